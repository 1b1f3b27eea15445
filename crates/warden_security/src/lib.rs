//! Command validation for Warden.
//!
//! Every command request passes through [`CommandValidator::validate`]
//! before it touches the queue or a process: whitelist lookup, per-argument
//! grammar, injection heuristics, working-directory confinement, and the
//! Node manifest check. The child environment is built separately via
//! [`build_child_env`].
//!
//! # Security Model
//!
//! Warden trusts its host (no sandboxing); validation exists to keep a
//! remote controller inside the configured whitelist, not to contain a
//! hostile local user. Checks are lexical: symlink tricks are out of scope.

mod environment;
mod injection;
mod workdir;

pub use environment::build_child_env;
pub use injection::injection_reason;
pub use workdir::{is_descendant, normalize, resolve_working_dir};

use std::path::{Path, PathBuf};
use tracing::debug;
use warden_protocol::config::{CompiledPattern, WardenConfig, WorkingDirRestriction};

/// Commands that refuse to run without a `package.json` in the working
/// directory.
const MANIFEST_COMMANDS: &[&str] = &["npm", "npx", "yarn", "pnpm"];

/// Outcome of a successful validation.
#[derive(Debug, Clone)]
pub struct Validation {
    /// Command name of the matched whitelist entry.
    pub matched_command: String,
    /// Arguments after validation (unchanged today; the slot exists so a
    /// pattern can rewrite args without touching callers).
    pub sanitized_args: Vec<String>,
    /// Absolute, normalized working directory for the child.
    pub resolved_working_dir: PathBuf,
    /// Effective timeout (pattern override or global default).
    pub timeout_ms: u64,
    /// Whether the job needs human approval before it executes.
    pub requires_confirmation: bool,
}

/// Validation failures, one per spec error code.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("command '{command}' is not whitelisted")]
    NotWhitelisted { command: String },

    #[error("argument '{arg}' is not accepted by the whitelist for '{command}'")]
    NotInAllowlist { command: String, arg: String },

    #[error("argument '{arg}' rejected: {reason}")]
    InjectionSuspected { arg: String, reason: &'static str },

    #[error("absolute working directory '{dir}' is forbidden")]
    AbsolutePathForbidden { dir: String },

    #[error("working directory '{dir}' is outside the configured project roots")]
    OutsideProjectRoots { dir: String },

    #[error("working directory '{dir}' is not among the allowed directories for '{command}'")]
    NotInSpecificDirs { command: String, dir: String },

    #[error("no package.json in '{dir}'; refusing to run {command}")]
    NoPackageJson { command: String, dir: String },

    #[error("untrusted environment: {reason}")]
    UntrustedEnvironment { reason: String },
}

impl ValidationError {
    /// Stable error code surfaced to the RPC layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotWhitelisted { .. } => "NOT_WHITELISTED",
            Self::NotInAllowlist { .. } => "NOT_IN_ALLOWLIST",
            Self::InjectionSuspected { .. } => "INJECTION_SUSPECTED",
            Self::AbsolutePathForbidden { .. } => "ABSOLUTE_PATH_FORBIDDEN",
            Self::OutsideProjectRoots { .. } => "OUTSIDE_PROJECT_ROOTS",
            Self::NotInSpecificDirs { .. } => "NOT_IN_SPECIFIC_DIRS",
            Self::NoPackageJson { .. } => "NO_PACKAGE_JSON",
            Self::UntrustedEnvironment { .. } => "UNTRUSTED_ENVIRONMENT",
        }
    }
}

/// Whitelist validator. Cheap to construct; holds a reference to the
/// loaded configuration.
pub struct CommandValidator<'a> {
    config: &'a WardenConfig,
}

impl<'a> CommandValidator<'a> {
    pub fn new(config: &'a WardenConfig) -> Self {
        Self { config }
    }

    /// Validate a command request.
    ///
    /// `requested_dir` is relative to `start_dir`; `None` means run in
    /// `start_dir` itself.
    pub fn validate(
        &self,
        command: &str,
        args: &[String],
        requested_dir: Option<&Path>,
        start_dir: &Path,
    ) -> Result<Validation, ValidationError> {
        let compiled = self.config.find_pattern(command).ok_or_else(|| {
            ValidationError::NotWhitelisted {
                command: command.to_string(),
            }
        })?;

        // Every argument must clear the injection heuristics AND be accepted
        // by the literal list or one of the regexes. The first failure
        // rejects the whole command.
        for arg in args {
            if let Some(reason) = injection_reason(arg) {
                return Err(ValidationError::InjectionSuspected {
                    arg: arg.clone(),
                    reason,
                });
            }
            if !arg_accepted(compiled, arg) {
                return Err(ValidationError::NotInAllowlist {
                    command: command.to_string(),
                    arg: arg.clone(),
                });
            }
        }

        let resolved = resolve_working_dir(start_dir, requested_dir)?;

        match compiled.pattern.working_dir_restriction {
            WorkingDirRestriction::None => {}
            WorkingDirRestriction::ProjectOnly => {
                let inside = self
                    .config
                    .project_roots
                    .iter()
                    .any(|root| is_descendant(&resolved, root));
                if !inside {
                    return Err(ValidationError::OutsideProjectRoots {
                        dir: resolved.display().to_string(),
                    });
                }
            }
            WorkingDirRestriction::Specific => {
                let inside = compiled
                    .pattern
                    .allowed_working_dirs
                    .iter()
                    .any(|dir| is_descendant(&resolved, &normalize(dir)));
                if !inside {
                    return Err(ValidationError::NotInSpecificDirs {
                        command: command.to_string(),
                        dir: resolved.display().to_string(),
                    });
                }
            }
        }

        if MANIFEST_COMMANDS.contains(&command) && !resolved.join("package.json").is_file() {
            return Err(ValidationError::NoPackageJson {
                command: command.to_string(),
                dir: resolved.display().to_string(),
            });
        }

        debug!(command, dir = %resolved.display(), "command validated");

        Ok(Validation {
            matched_command: compiled.pattern.command.clone(),
            sanitized_args: args.to_vec(),
            resolved_working_dir: resolved,
            timeout_ms: compiled.timeout_ms(self.config.default_timeout_ms),
            requires_confirmation: compiled.pattern.requires_confirmation,
        })
    }
}

fn arg_accepted(compiled: &CompiledPattern, arg: &str) -> bool {
    if compiled.pattern.allowed_args.iter().any(|a| a == arg) {
        return true;
    }
    compiled.arg_regexes.iter().any(|re| re.is_match(arg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_protocol::config::CommandPattern;

    fn config() -> WardenConfig {
        WardenConfig::from_patterns(vec![
            CommandPattern::new("echo").with_arg_patterns(&["[\\w\\s\\-_.]+"]),
            CommandPattern::new("git")
                .with_allowed_args(&["status", "push", "pull"])
                .confirmed(),
            CommandPattern::new("npm").with_allowed_args(&["install", "ci"]),
        ])
        .unwrap()
    }

    fn strs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rejects_unlisted_command() {
        let config = config();
        let validator = CommandValidator::new(&config);
        let err = validator
            .validate("rm", &strs(&["-rf", "/"]), None, &config.start_directory)
            .unwrap_err();
        assert_eq!(err.code(), "NOT_WHITELISTED");
    }

    #[test]
    fn accepts_pattern_matched_args() {
        let config = config();
        let validator = CommandValidator::new(&config);
        let validation = validator
            .validate("echo", &strs(&["hello world"]), None, &config.start_directory)
            .unwrap();
        assert_eq!(validation.matched_command, "echo");
        assert!(!validation.requires_confirmation);
    }

    #[test]
    fn rejects_when_any_arg_fails() {
        // One accepted argument must not whitewash the rest of the line.
        let config = config();
        let validator = CommandValidator::new(&config);
        let err = validator
            .validate(
                "git",
                &strs(&["status", "--force-with-lease"]),
                None,
                &config.start_directory,
            )
            .unwrap_err();
        assert_eq!(err.code(), "NOT_IN_ALLOWLIST");
    }

    #[test]
    fn rejects_shell_metacharacters() {
        let config = config();
        let validator = CommandValidator::new(&config);
        for arg in ["a;b", "a|b", "a&b", "a<b", "a>b", "`id`", "$(id)", "a\0b"] {
            let err = validator
                .validate("echo", &strs(&[arg]), None, &config.start_directory)
                .unwrap_err();
            assert_eq!(err.code(), "INJECTION_SUSPECTED", "arg {:?}", arg);
        }
    }

    #[test]
    fn rejects_escalation_prefixes_and_traversal() {
        let config = config();
        let validator = CommandValidator::new(&config);
        for arg in ["sudo reboot", "rm -rf tmp", "eval x", "../secrets", "${HOME}"] {
            let err = validator
                .validate("echo", &strs(&[arg]), None, &config.start_directory)
                .unwrap_err();
            assert_eq!(err.code(), "INJECTION_SUSPECTED", "arg {:?}", arg);
        }
    }

    #[test]
    fn rejects_absolute_requested_dir() {
        let config = config();
        let validator = CommandValidator::new(&config);
        let err = validator
            .validate(
                "echo",
                &strs(&["hi"]),
                Some(Path::new("/etc")),
                &config.start_directory,
            )
            .unwrap_err();
        assert_eq!(err.code(), "ABSOLUTE_PATH_FORBIDDEN");
    }

    #[test]
    fn npm_requires_package_json() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = config();
        let validator = CommandValidator::new(&config);

        let err = validator
            .validate("npm", &strs(&["install"]), None, temp.path())
            .unwrap_err();
        assert_eq!(err.code(), "NO_PACKAGE_JSON");

        std::fs::write(temp.path().join("package.json"), "{}").unwrap();
        let validation = validator
            .validate("npm", &strs(&["install"]), None, temp.path())
            .unwrap();
        assert_eq!(validation.matched_command, "npm");
    }

    #[test]
    fn project_only_confines_to_roots() {
        let mut pattern = CommandPattern::new("ls");
        pattern.working_dir_restriction = WorkingDirRestriction::ProjectOnly;
        let config = WardenConfig::from_patterns(vec![pattern]).unwrap();
        let validator = CommandValidator::new(&config);

        // Inside the start directory (itself a project root): fine.
        validator
            .validate(
                "ls",
                &[],
                Some(Path::new("subdir")),
                &config.start_directory,
            )
            .unwrap();

        // Escaping upward: denied.
        let err = validator
            .validate(
                "ls",
                &[],
                Some(Path::new("../../outside")),
                &config.start_directory,
            )
            .unwrap_err();
        assert_eq!(err.code(), "OUTSIDE_PROJECT_ROOTS");
    }

    #[test]
    fn specific_restriction_checks_pattern_dirs() {
        let temp = tempfile::TempDir::new().unwrap();
        let allowed = temp.path().join("build");
        std::fs::create_dir_all(&allowed).unwrap();

        let mut pattern = CommandPattern::new("make");
        pattern.working_dir_restriction = WorkingDirRestriction::Specific;
        pattern.allowed_working_dirs = vec![allowed.clone()];
        let config = WardenConfig::from_patterns(vec![pattern]).unwrap();
        let validator = CommandValidator::new(&config);

        validator
            .validate("make", &[], Some(Path::new("build")), temp.path())
            .unwrap();

        let err = validator
            .validate("make", &[], Some(Path::new("src")), temp.path())
            .unwrap_err();
        assert_eq!(err.code(), "NOT_IN_SPECIFIC_DIRS");
    }
}
