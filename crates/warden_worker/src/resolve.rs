//! Executable resolution without a shell.
//!
//! Children are spawned directly; the executable path is resolved here by
//! explicit `PATH` traversal instead of leaning on `shell: true` semantics.
//! A command containing a path separator resolves against the working
//! directory; a bare name is probed against each `PATH` entry in order.

use std::path::{Path, PathBuf};

/// Resolve `command` to a concrete executable path.
///
/// Returns `None` when nothing on `PATH` (or at the given path) is an
/// executable file.
pub fn resolve_executable(command: &str, cwd: &Path, path_var: Option<&str>) -> Option<PathBuf> {
    let as_path = Path::new(command);

    if as_path.is_absolute() {
        return is_executable(as_path).then(|| as_path.to_path_buf());
    }

    if command.contains('/') {
        let candidate = cwd.join(as_path);
        return is_executable(&candidate).then_some(candidate);
    }

    let path_var = path_var.map(|s| s.to_string()).or_else(|| {
        std::env::var("PATH").ok()
    })?;

    for entry in std::env::split_paths(&path_var) {
        let candidate = entry.join(command);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn resolves_from_path_variable() {
        let resolved = resolve_executable("sh", Path::new("/"), Some("/usr/bin:/bin"));
        assert!(resolved.is_some());
        let path = resolved.unwrap();
        assert!(path.ends_with("sh"));
    }

    #[test]
    fn missing_command_resolves_to_none() {
        assert!(resolve_executable(
            "definitely-not-a-real-binary-name",
            Path::new("/"),
            Some("/usr/bin:/bin"),
        )
        .is_none());
    }

    #[cfg(unix)]
    #[test]
    fn relative_path_resolves_against_cwd() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("bin");
        std::fs::create_dir_all(&dir).unwrap();
        let script = dir.join("tool.sh");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();

        // Not executable yet.
        assert!(resolve_executable("bin/tool.sh", temp.path(), Some("")).is_none());

        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let resolved = resolve_executable("bin/tool.sh", temp.path(), Some("")).unwrap();
        assert_eq!(resolved, script);
    }
}
