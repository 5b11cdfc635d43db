//! Shell resolution and argv construction.

use std::path::{Path, PathBuf};

/// Shell used to run command strings.
///
/// `sh` from PATH wins, then the fallback (usually the embedded busybox
/// shell) if it exists. `None` means commands run as direct argv.
pub fn resolve_shell(fallback: &Path) -> Option<PathBuf> {
    if let Ok(path) = which::which("sh") {
        return Some(path);
    }
    if fallback.exists() {
        return Some(fallback.to_path_buf());
    }
    None
}

/// Argv for `command`: `<shell> -c <command>` when a shell is available,
/// otherwise the tokenized words themselves.
pub fn launch_argv(shell: Option<&Path>, command: &str, words: Vec<String>) -> Vec<String> {
    match shell {
        Some(shell) => vec![
            shell.to_string_lossy().into_owned(),
            "-c".to_string(),
            command.to_string(),
        ],
        None => words,
    }
}
