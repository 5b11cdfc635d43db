//! Remote `scp` argument parsing.
//!
//! The client runs `scp -t [flags] <target>` on the server. Only sink mode
//! is implemented; the flags OpenSSH adds for recursion, timestamps and
//! verbosity are accepted and ignored.

use super::ScpError;

/// Parsed remote `scp` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScpArgs {
    /// `-t`: receive files.
    pub sink: bool,
    /// `-f`: send files.
    pub source: bool,
    pub recursive: bool,
    pub preserve: bool,
    /// `-d`: target must be a directory.
    pub target_is_dir: bool,
    pub verbose: bool,
    pub quiet: bool,
    /// Target path as given by the client.
    pub target: Option<String>,
}

impl ScpArgs {
    /// Parse the words following `scp`. Fails unless `-t` is present.
    pub fn parse(words: &[String]) -> Result<Self, ScpError> {
        let mut args = Self::default();
        let mut only_positional = false;

        for word in words {
            match word.strip_prefix('-') {
                Some("-") if !only_positional => only_positional = true,
                Some(flags) if !only_positional && !flags.is_empty() => {
                    for flag in flags.chars() {
                        match flag {
                            't' => args.sink = true,
                            'f' => args.source = true,
                            'r' => args.recursive = true,
                            'p' => args.preserve = true,
                            'd' => args.target_is_dir = true,
                            'v' => args.verbose = true,
                            'q' => args.quiet = true,
                            other => return Err(ScpError::UnknownFlag(other)),
                        }
                    }
                }
                _ => args.target = Some(word.clone()),
            }
        }

        if !args.sink {
            return Err(ScpError::NotSink);
        }
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(line: &str) -> Vec<String> {
        shlex::split(line).unwrap()
    }

    #[test]
    fn test_parse_sink_with_target() {
        let args = ScpArgs::parse(&words("-t /tmp/upload")).unwrap();
        assert!(args.sink);
        assert_eq!(args.target.as_deref(), Some("/tmp/upload"));
    }

    #[test]
    fn test_parse_combined_openssh_flags() {
        let args = ScpArgs::parse(&words("-v -prd -t .")).unwrap();
        assert!(args.sink && args.verbose && args.preserve && args.recursive && args.target_is_dir);
        assert_eq!(args.target.as_deref(), Some("."));
    }

    #[test]
    fn test_parse_requires_sink() {
        assert!(matches!(
            ScpArgs::parse(&words("-f /etc/passwd")),
            Err(ScpError::NotSink)
        ));
        assert!(matches!(ScpArgs::parse(&[]), Err(ScpError::NotSink)));
    }

    #[test]
    fn test_parse_rejects_unknown_flag() {
        assert!(matches!(
            ScpArgs::parse(&words("-t -Z x")),
            Err(ScpError::UnknownFlag('Z'))
        ));
    }

    #[test]
    fn test_parse_double_dash_ends_flags() {
        let args = ScpArgs::parse(&words("-t -- -odd-name")).unwrap();
        assert_eq!(args.target.as_deref(), Some("-odd-name"));
    }
}
