//! Environment for launched processes.
//!
//! Processes start from the session's environment only. The working
//! directory is put first on PATH so files just unpacked there run by bare
//! name.

use std::path::Path;

use crate::config::ShellConfig;

fn has_key(env: &[(String, String)], key: &str) -> bool {
    env.iter().any(|(name, _)| name == key)
}

/// Prefix every PATH entry with `cwd`, or add `PATH=<cwd>:<default_path>`
/// when there is none.
pub fn expand_path(env: &mut Vec<(String, String)>, cwd: &Path, default_path: &str) {
    let anchor = cwd.display().to_string();
    let mut found = false;
    for (name, value) in env.iter_mut() {
        if name == "PATH" {
            *value = format!("{anchor}:{value}");
            found = true;
        }
    }
    if !found {
        env.push(("PATH".to_string(), format!("{anchor}:{default_path}")));
    }
}

/// Full environment for a launch from `session` entries.
///
/// `term` is the pty-req terminal type, present only when a PTY is attached.
pub fn launch_env(
    session: &[(String, String)],
    cwd: &Path,
    shell: &ShellConfig,
    term: Option<&str>,
) -> Vec<(String, String)> {
    let mut env = session.to_vec();
    expand_path(&mut env, cwd, &shell.default_path);

    if shell.inject_home_and_tmp {
        for key in ["HOME", "TMPDIR"] {
            if !has_key(&env, key) {
                env.push((key.to_string(), cwd.display().to_string()));
            }
        }
    }

    if let Some(term) = term {
        if !has_key(&env, "TERM") {
            env.push(("TERM".to_string(), term.to_string()));
        }
    }

    env
}
