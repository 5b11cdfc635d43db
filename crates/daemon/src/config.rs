//! Hatch settings: the extraction root, shell fallback, forwarding policy
//! and SFTP server, read from `~/.config/hatch/config.toml`.
//!
//! [`Config`] is the on-disk document. [`ServerConfig`] is the resolved,
//! immutable value handed to the dispatcher and shared by every channel.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::forward::ForwardPolicy;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("dial_timeout_secs must be between 1 and 300 seconds, got {0}")]
    InvalidDialTimeout(u64),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("default_path must not be empty")]
    EmptyDefaultPath,

    #[error("working_dir is not a directory: {0}")]
    InvalidWorkingDir(PathBuf),

    #[error("cannot determine the current directory: {0}")]
    CurrentDirUnavailable(String),
}

/// Accepted `log_level` values, compared case-insensitively.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Shell installed by the bootstrap layer when the image has none.
pub const EMBEDDED_SHELL: &str = "/tmp/serial-busybox/ash";

/// PATH used when the client sends none.
pub const DEFAULT_PATH: &str = "/sbin:/usr/sbin:/bin:/usr/bin";

/// The config file, one field per `[section]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,

    pub shell: ShellConfig,

    pub forwarding: ForwardingConfig,

    pub sftp: SftpConfig,
}

/// `[server]`: extraction root, banner and log level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSection {
    /// PATH anchor and extraction root. Defaults to the current directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Text written to the secondary stream before an interactive shell.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,

    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
}

/// `[shell]`: how commands are launched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShellConfig {
    /// Shell used when `sh` is not on PATH.
    pub fallback_shell: PathBuf,

    /// PATH appended after the working directory when the client sent none.
    pub default_path: String,

    /// Set HOME and TMPDIR to the working directory unless the client did.
    pub inject_home_and_tmp: bool,
}

/// `[forwarding]`: `direct-tcpip` destinations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Destination policy for `direct-tcpip` channels.
    pub policy: ForwardPolicy,

    /// Timeout for dialing the forward destination.
    pub dial_timeout_secs: u64,
}

/// `[sftp]`: server binary and upload handling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SftpConfig {
    /// Explicit SFTP server executable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_path: Option<PathBuf>,

    /// Unpack uploaded `.tar` files after each SFTP session.
    pub auto_unpack: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            working_dir: None,
            banner: None,
            log_level: "info".to_string(),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            fallback_shell: PathBuf::from(EMBEDDED_SHELL),
            default_path: DEFAULT_PATH.to_string(),
            inject_home_and_tmp: true,
        }
    }
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            policy: ForwardPolicy::Disabled,
            dial_timeout_secs: 10,
        }
    }
}

impl Default for SftpConfig {
    fn default() -> Self {
        Self {
            server_path: None,
            auto_unpack: true,
        }
    }
}

/// `<config dir>/hatch/config.toml`, or `./hatch/config.toml` without a home.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hatch")
        .join("config.toml")
}

impl Config {
    /// Let the appliance bootstrap override a few settings without a file.
    ///
    /// `HATCH_LOG_LEVEL`, `HATCH_FORWARD_POLICY` and `HATCH_BANNER` win over
    /// the file when set and non-empty. A policy name that does not parse
    /// is logged and ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("HATCH_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!(%level, "log level set by HATCH_LOG_LEVEL");
                self.server.log_level = level;
            }
        }

        if let Ok(policy) = std::env::var("HATCH_FORWARD_POLICY") {
            if !policy.is_empty() {
                match policy.parse::<ForwardPolicy>() {
                    Ok(parsed) => {
                        tracing::info!(policy = %parsed, "forward policy set by HATCH_FORWARD_POLICY");
                        self.forwarding.policy = parsed;
                    }
                    Err(bad) => {
                        tracing::warn!(value = %bad, "HATCH_FORWARD_POLICY not recognised");
                    }
                }
            }
        }

        if let Ok(banner) = std::env::var("HATCH_BANNER") {
            if !banner.is_empty() {
                tracing::info!("banner set by HATCH_BANNER");
                self.server.banner = Some(banner);
            }
        }
    }

    /// Reject a dial timeout outside 1..=300s, an empty default PATH, a
    /// working directory that is not a directory, or an unknown log level.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeout = self.forwarding.dial_timeout_secs;
        if !(1..=300).contains(&timeout) {
            return Err(ConfigError::InvalidDialTimeout(timeout));
        }

        if self.shell.default_path.is_empty() {
            return Err(ConfigError::EmptyDefaultPath);
        }

        if let Some(dir) = &self.server.working_dir {
            if !dir.is_dir() {
                return Err(ConfigError::InvalidWorkingDir(dir.clone()));
            }
        }

        let level = self.server.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.server.log_level.clone()));
        }

        Ok(())
    }

    /// Read settings from `path`; an absent file means all defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("parsing {}", path.display()))
    }

    /// [`Config::load`] at [`default_config_path`].
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("invalid TOML: {}", format_toml_error(&e)))
    }

    /// Write the settings to `path`, creating its directory.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("creating {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("writing {}", path.display()))?;

        tracing::debug!(path = %path.display(), "config saved");
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serializing config")
    }

    /// Validate and resolve into the runtime configuration.
    pub fn resolve(&self) -> Result<ServerConfig, ConfigError> {
        self.validate()?;
        let working_dir = match &self.server.working_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()
                .map_err(|e| ConfigError::CurrentDirUnavailable(e.to_string()))?,
        };
        Ok(ServerConfig {
            working_dir,
            banner: self.server.banner.clone(),
            forward_policy: self.forwarding.policy,
            dial_timeout: Duration::from_secs(self.forwarding.dial_timeout_secs),
            shell: self.shell.clone(),
            sftp: self.sftp.clone(),
        })
    }
}

/// Parser message with the byte span, if any.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

/// Immutable runtime configuration shared by every channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub working_dir: PathBuf,
    pub banner: Option<String>,
    pub forward_policy: ForwardPolicy,
    pub dial_timeout: Duration,
    pub shell: ShellConfig,
    pub sftp: SftpConfig,
}

impl ServerConfig {
    /// Defaults anchored at `working_dir`.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let defaults = ForwardingConfig::default();
        Self {
            working_dir: working_dir.into(),
            banner: None,
            forward_policy: defaults.policy,
            dial_timeout: Duration::from_secs(defaults.dial_timeout_secs),
            shell: ShellConfig::default(),
            sftp: SftpConfig::default(),
        }
    }

    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = Some(banner.into());
        self
    }

    pub fn with_forward_policy(mut self, policy: ForwardPolicy) -> Self {
        self.forward_policy = policy;
        self
    }

    pub fn with_sftp_server(mut self, path: impl Into<PathBuf>) -> Self {
        self.sftp.server_path = Some(path.into());
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.log_level, "info");
        assert!(config.server.banner.is_none());
        assert!(config.server.working_dir.is_none());
        assert_eq!(config.shell.fallback_shell, PathBuf::from(EMBEDDED_SHELL));
        assert_eq!(config.shell.default_path, "/sbin:/usr/sbin:/bin:/usr/bin");
        assert!(config.shell.inject_home_and_tmp);
        assert_eq!(config.forwarding.policy, ForwardPolicy::Disabled);
        assert_eq!(config.forwarding.dial_timeout_secs, 10);
        assert!(config.sftp.auto_unpack);
        assert!(config.sftp.server_path.is_none());
    }

    #[test]
    fn test_from_toml_empty() {
        // Empty TOML should use all defaults
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[forwarding]
policy = "loopback"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.forwarding.policy, ForwardPolicy::Loopback);
        assert_eq!(config.forwarding.dial_timeout_secs, 10);
        assert_eq!(config.server.log_level, "info");
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[server]
working_dir = "/run/hatch"
banner = "debug access granted"
log_level = "trace"

[shell]
fallback_shell = "/opt/busybox/sh"
default_path = "/bin"
inject_home_and_tmp = false

[forwarding]
policy = "private-network"
dial_timeout_secs = 30

[sftp]
server_path = "/usr/libexec/sftp-server"
auto_unpack = false
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.server.working_dir, Some(PathBuf::from("/run/hatch")));
        assert_eq!(config.server.banner.as_deref(), Some("debug access granted"));
        assert_eq!(config.server.log_level, "trace");
        assert_eq!(config.shell.fallback_shell, PathBuf::from("/opt/busybox/sh"));
        assert_eq!(config.shell.default_path, "/bin");
        assert!(!config.shell.inject_home_and_tmp);
        assert_eq!(config.forwarding.policy, ForwardPolicy::PrivateNetwork);
        assert_eq!(config.forwarding.dial_timeout_secs, 30);
        assert_eq!(
            config.sftp.server_path,
            Some(PathBuf::from("/usr/libexec/sftp-server"))
        );
        assert!(!config.sftp.auto_unpack);
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let toml = r#"
[server
log_level = "debug"
"#;
        let err = Config::from_toml(toml).unwrap_err().to_string();
        assert!(err.contains("invalid TOML"));
    }

    #[test]
    fn test_from_toml_unknown_policy() {
        let toml = r#"
[forwarding]
policy = "everywhere"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_roundtrip_custom() {
        let mut original = Config::default();
        original.server.banner = Some("hello".to_string());
        original.forwarding.policy = ForwardPolicy::Loopback;
        original.sftp.auto_unpack = false;

        let toml = original.to_toml().unwrap();
        assert!(toml.contains("[forwarding]"));
        assert_eq!(Config::from_toml(&toml).unwrap(), original);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("dir").join("config.toml");

        let config = Config::default();
        config.save(&config_path).unwrap();

        assert!(config_path.exists());
        assert_eq!(Config::load(&config_path).unwrap(), config);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "this is not valid toml {{{{").unwrap();

        let err = Config::load(&config_path).unwrap_err();
        assert!(format!("{err:#}").contains("parsing "));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("hatch/config.toml"));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("HATCH_LOG_LEVEL", "debug");
        std::env::set_var("HATCH_FORWARD_POLICY", "loopback");
        std::env::set_var("HATCH_BANNER", "maintenance window");

        let mut config = Config::default();
        config.apply_env_overrides();

        std::env::remove_var("HATCH_LOG_LEVEL");
        std::env::remove_var("HATCH_FORWARD_POLICY");
        std::env::remove_var("HATCH_BANNER");

        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.forwarding.policy, ForwardPolicy::Loopback);
        assert_eq!(config.server.banner.as_deref(), Some("maintenance window"));
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var("HATCH_LOG_LEVEL", "");
        std::env::set_var("HATCH_BANNER", "");

        let mut config = Config::default();
        config.apply_env_overrides();

        std::env::remove_var("HATCH_LOG_LEVEL");
        std::env::remove_var("HATCH_BANNER");

        assert_eq!(config.server.log_level, "info");
        assert!(config.server.banner.is_none());
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_policy_is_ignored() {
        std::env::set_var("HATCH_FORWARD_POLICY", "anywhere");

        let mut config = Config::default();
        config.forwarding.policy = ForwardPolicy::PrivateNetwork;
        config.apply_env_overrides();

        std::env::remove_var("HATCH_FORWARD_POLICY");

        assert_eq!(config.forwarding.policy, ForwardPolicy::PrivateNetwork);
    }

    #[test]
    fn test_validate_default_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_dial_timeout_bounds() {
        let mut config = Config::default();

        config.forwarding.dial_timeout_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidDialTimeout(0)));

        config.forwarding.dial_timeout_secs = 301;
        assert_eq!(config.validate(), Err(ConfigError::InvalidDialTimeout(301)));

        config.forwarding.dial_timeout_secs = 1;
        assert!(config.validate().is_ok());

        config.forwarding.dial_timeout_secs = 300;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_log_level_case_insensitive() {
        let mut config = Config::default();
        config.server.log_level = "WARN".to_string();
        assert!(config.validate().is_ok());

        config.server.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    fn test_validate_working_dir_must_exist() {
        let mut config = Config::default();
        config.server.working_dir = Some(PathBuf::from("/nonexistent/hatch/dir"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWorkingDir(_))
        ));
    }

    #[test]
    fn test_resolve_uses_configured_working_dir() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.server.working_dir = Some(temp_dir.path().to_path_buf());
        config.server.banner = Some("hi".to_string());
        config.forwarding.dial_timeout_secs = 5;

        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.working_dir, temp_dir.path());
        assert_eq!(resolved.banner.as_deref(), Some("hi"));
        assert_eq!(resolved.dial_timeout, Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn test_resolve_defaults_to_current_dir() {
        let resolved = Config::default().resolve().unwrap();
        assert_eq!(resolved.working_dir, std::env::current_dir().unwrap());
    }

    #[test]
    fn test_server_config_builders() {
        let config = ServerConfig::new("/srv")
            .with_banner("b")
            .with_forward_policy(ForwardPolicy::Loopback)
            .with_sftp_server("/bin/true");
        assert_eq!(config.working_dir, PathBuf::from("/srv"));
        assert_eq!(config.banner.as_deref(), Some("b"));
        assert_eq!(config.forward_policy, ForwardPolicy::Loopback);
        assert_eq!(config.sftp.server_path, Some(PathBuf::from("/bin/true")));
        assert_eq!(config.dial_timeout, Duration::from_secs(10));
    }
}
