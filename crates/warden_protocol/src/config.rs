//! Service configuration: the command whitelist and runtime knobs.
//!
//! Configuration is a TOML file (path from `MCP_SHELL_CONFIG_PATH`)
//! deserialized into plain structs, then post-processed once: argument
//! regexes are compiled, durations clamped, and environment overrides
//! applied. Patterns are read-only at runtime.

use crate::defaults;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Restriction applied to a job's resolved working directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkingDirRestriction {
    /// No check beyond relative-path resolution.
    #[default]
    None,
    /// Resolved directory must live under one of the configured project roots.
    ProjectOnly,
    /// Resolved directory must equal or live under one of
    /// `allowed_working_dirs` on the pattern.
    Specific,
}

/// One whitelist entry, as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPattern {
    /// Executable name the request must match exactly.
    pub command: String,

    /// Literal argument allow-list.
    #[serde(default)]
    pub allowed_args: Vec<String>,

    /// Regex argument allow-list (full-match semantics applied at load).
    #[serde(default)]
    pub arg_patterns: Vec<String>,

    /// Per-pattern timeout; falls back to the global default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub working_dir_restriction: WorkingDirRestriction,

    /// Only meaningful with `working_dir_restriction = "specific"`.
    #[serde(default)]
    pub allowed_working_dirs: Vec<PathBuf>,

    /// Whether submissions matching this pattern wait for human approval.
    #[serde(default)]
    pub requires_confirmation: bool,

    #[serde(default)]
    pub description: String,
}

/// A pattern with its argument regexes compiled.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub pattern: CommandPattern,
    pub arg_regexes: Vec<Regex>,
}

impl CompiledPattern {
    fn compile(pattern: CommandPattern) -> Result<Self, ConfigError> {
        let mut arg_regexes = Vec::with_capacity(pattern.arg_patterns.len());
        for raw in &pattern.arg_patterns {
            // Anchor so a pattern accepts the whole argument, not a substring.
            let anchored = if raw.starts_with('^') && raw.ends_with('$') {
                raw.clone()
            } else {
                format!("^(?:{})$", raw)
            };
            let regex = Regex::new(&anchored).map_err(|e| ConfigError::InvalidRegex {
                command: pattern.command.clone(),
                pattern: raw.clone(),
                source: e,
            })?;
            arg_regexes.push(regex);
        }
        Ok(Self {
            pattern,
            arg_regexes,
        })
    }

    /// Effective timeout for this pattern.
    pub fn timeout_ms(&self, default_timeout_ms: u64) -> u64 {
        self.pattern.timeout_ms.unwrap_or(default_timeout_ms)
    }
}

/// Child environment policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvPolicy {
    /// Names always removed from the child environment.
    #[serde(default = "EnvPolicy::default_blocked")]
    pub blocked: Vec<String>,

    /// When set, only these names survive (after `blocked` is applied).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
}

impl EnvPolicy {
    fn default_blocked() -> Vec<String> {
        [
            "LD_PRELOAD",
            "LD_LIBRARY_PATH",
            "DYLD_INSERT_LIBRARIES",
            "DYLD_LIBRARY_PATH",
            "NODE_OPTIONS",
            "PYTHONPATH",
            "PYTHONSTARTUP",
            "BASH_ENV",
            "ENV",
            "IFS",
            "GIT_ASKPASS",
            "SSH_ASKPASS",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
}

/// Async queue tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum non-terminal jobs admitted.
    pub capacity: usize,
    /// Retention sweep period.
    pub cleanup_interval_ms: u64,
    /// Age after which completed jobs are removed.
    pub retention_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::DEFAULT_QUEUE_CAPACITY,
            cleanup_interval_ms: defaults::DEFAULT_CLEANUP_INTERVAL_MS,
            retention_ms: defaults::DEFAULT_RETENTION_MS,
        }
    }
}

/// Raw TOML shape of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    commands: Vec<CommandPattern>,
    #[serde(default)]
    default_timeout_ms: Option<u64>,
    #[serde(default)]
    max_concurrent: Option<usize>,
    #[serde(default)]
    project_roots: Vec<PathBuf>,
    #[serde(default)]
    approval_timeout_ms: Option<u64>,
    #[serde(default)]
    shutdown_timeout_ms: Option<u64>,
    #[serde(default)]
    launch_browser: Option<bool>,
    #[serde(default)]
    env: Option<EnvPolicy>,
    #[serde(default)]
    queue: Option<QueueConfig>,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct WardenConfig {
    pub patterns: Vec<CompiledPattern>,
    pub default_timeout_ms: u64,
    pub max_concurrent: usize,
    /// Roots that confine `project-only` patterns. Always contains the
    /// start directory.
    pub project_roots: Vec<PathBuf>,
    /// Process working directory at startup; relative job directories
    /// resolve against it.
    pub start_directory: PathBuf,
    pub approval_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub launch_browser: bool,
    pub env: EnvPolicy,
    pub queue: QueueConfig,
}

impl WardenConfig {
    /// Load from `MCP_SHELL_CONFIG_PATH` (or defaults when unset) and apply
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var("MCP_SHELL_CONFIG_PATH") {
            Ok(path) => Self::read_file(Path::new(&path))?,
            Err(_) => ConfigFile::default(),
        };
        let mut config = Self::from_file(file)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load from an explicit path and apply environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let file = Self::read_file(path)?;
        let mut config = Self::from_file(file)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Build a config from raw patterns; used by tests and embedders.
    pub fn from_patterns(patterns: Vec<CommandPattern>) -> Result<Self, ConfigError> {
        Self::from_file(ConfigFile {
            commands: patterns,
            ..ConfigFile::default()
        })
    }

    fn read_file(path: &Path) -> Result<ConfigFile, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for pattern in &file.commands {
            if !seen.insert(pattern.command.clone()) {
                return Err(ConfigError::DuplicateCommand {
                    command: pattern.command.clone(),
                });
            }
        }

        let patterns = file
            .commands
            .into_iter()
            .map(CompiledPattern::compile)
            .collect::<Result<Vec<_>, _>>()?;

        let start_directory =
            std::env::current_dir().map_err(|e| ConfigError::StartDirectory { source: e })?;

        let mut project_roots = file.project_roots;
        if !project_roots.contains(&start_directory) {
            project_roots.push(start_directory.clone());
        }

        Ok(Self {
            patterns,
            default_timeout_ms: file
                .default_timeout_ms
                .unwrap_or(defaults::DEFAULT_TIMEOUT_MS),
            max_concurrent: file
                .max_concurrent
                .unwrap_or(defaults::DEFAULT_MAX_CONCURRENT),
            project_roots,
            start_directory,
            approval_timeout_ms: file
                .approval_timeout_ms
                .unwrap_or(defaults::DEFAULT_APPROVAL_TIMEOUT_MS),
            shutdown_timeout_ms: file
                .shutdown_timeout_ms
                .unwrap_or(defaults::DEFAULT_SHUTDOWN_TIMEOUT_MS),
            launch_browser: file.launch_browser.unwrap_or(false),
            env: file.env.unwrap_or_else(|| EnvPolicy {
                blocked: EnvPolicy::default_blocked(),
                allowed: None,
            }),
            queue: file.queue.unwrap_or_default(),
        })
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = env_parsed::<usize>("MCP_SHELL_MAX_CONCURRENT")? {
            self.max_concurrent = value.clamp(
                defaults::MIN_MAX_CONCURRENT,
                defaults::MAX_MAX_CONCURRENT,
            );
        }
        if let Some(value) = env_parsed::<u64>("MCP_SHELL_TIMEOUT")? {
            self.default_timeout_ms =
                value.clamp(defaults::MIN_TIMEOUT_MS, defaults::MAX_TIMEOUT_MS);
        }
        if let Ok(dir) = std::env::var("MCP_SHELL_START_DIRECTORY") {
            let dir = PathBuf::from(dir);
            if !self.project_roots.contains(&dir) {
                self.project_roots.push(dir.clone());
            }
            self.start_directory = dir;
        }
        if let Some(value) = env_parsed::<usize>("ASYNC_QUEUE_CAPACITY")? {
            self.queue.capacity = value;
        }
        if let Some(value) = env_parsed::<u64>("ASYNC_QUEUE_CLEANUP_INTERVAL")? {
            self.queue.cleanup_interval_ms = value;
        }
        if let Some(value) = env_parsed::<u64>("ASYNC_QUEUE_RETENTION")? {
            self.queue.retention_ms = value;
        }
        Ok(())
    }

    /// Look up the whitelist entry for a command, if any.
    pub fn find_pattern(&self, command: &str) -> Option<&CompiledPattern> {
        self.patterns.iter().find(|p| p.pattern.command == command)
    }

    /// Validation beyond what deserialization enforces; `config check` runs
    /// this and refuses to serve on error.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.patterns.is_empty() {
            return Err(ConfigError::EmptyWhitelist);
        }
        for compiled in &self.patterns {
            let p = &compiled.pattern;
            if p.working_dir_restriction == WorkingDirRestriction::Specific
                && p.allowed_working_dirs.is_empty()
            {
                return Err(ConfigError::MissingAllowedDirs {
                    command: p.command.clone(),
                });
            }
        }
        Ok(())
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvValue {
                name: name.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

/// Configuration failures. All fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid argument pattern '{pattern}' for command '{command}'")]
    InvalidRegex {
        command: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("duplicate whitelist entry for command '{command}'")]
    DuplicateCommand { command: String },

    #[error("whitelist is empty; refusing to serve")]
    EmptyWhitelist,

    #[error("command '{command}' uses 'specific' restriction without allowed_working_dirs")]
    MissingAllowedDirs { command: String },

    #[error("invalid value '{value}' for environment variable {name}")]
    InvalidEnvValue { name: String, value: String },

    #[error("could not determine start directory")]
    StartDirectory {
        #[source]
        source: std::io::Error,
    },
}

/// Convenience for building a pattern in tests and embedders.
impl CommandPattern {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            allowed_args: Vec::new(),
            arg_patterns: Vec::new(),
            timeout_ms: None,
            working_dir_restriction: WorkingDirRestriction::None,
            allowed_working_dirs: Vec::new(),
            requires_confirmation: false,
            description: String::new(),
        }
    }

    pub fn with_arg_patterns(mut self, patterns: &[&str]) -> Self {
        self.arg_patterns = patterns.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_allowed_args(mut self, args: &[&str]) -> Self {
        self.allowed_args = args.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn confirmed(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_and_anchors_arg_patterns() {
        let config = WardenConfig::from_patterns(vec![
            CommandPattern::new("echo").with_arg_patterns(&["[\\w\\s\\-_.]+"])
        ])
        .unwrap();

        let compiled = config.find_pattern("echo").unwrap();
        assert!(compiled.arg_regexes[0].is_match("hello"));
        // Anchoring means a shell metachar suffix cannot ride along.
        assert!(!compiled.arg_regexes[0].is_match("hello;rm"));
    }

    #[test]
    fn rejects_duplicate_commands() {
        let result = WardenConfig::from_patterns(vec![
            CommandPattern::new("git"),
            CommandPattern::new("git"),
        ]);
        assert!(matches!(result, Err(ConfigError::DuplicateCommand { .. })));
    }

    #[test]
    fn rejects_invalid_regex() {
        let result = WardenConfig::from_patterns(vec![
            CommandPattern::new("echo").with_arg_patterns(&["["])
        ]);
        assert!(matches!(result, Err(ConfigError::InvalidRegex { .. })));
    }

    #[test]
    fn check_requires_patterns_and_specific_dirs() {
        let config = WardenConfig::from_patterns(vec![]).unwrap();
        assert!(matches!(config.check(), Err(ConfigError::EmptyWhitelist)));

        let mut bad = CommandPattern::new("ls");
        bad.working_dir_restriction = WorkingDirRestriction::Specific;
        let config = WardenConfig::from_patterns(vec![bad]).unwrap();
        assert!(matches!(
            config.check(),
            Err(ConfigError::MissingAllowedDirs { .. })
        ));
    }

    #[test]
    fn pattern_timeout_falls_back_to_default() {
        let mut with_timeout = CommandPattern::new("sleep");
        with_timeout.timeout_ms = Some(500);
        let config =
            WardenConfig::from_patterns(vec![with_timeout, CommandPattern::new("echo")]).unwrap();

        let sleep = config.find_pattern("sleep").unwrap();
        let echo = config.find_pattern("echo").unwrap();
        assert_eq!(sleep.timeout_ms(config.default_timeout_ms), 500);
        assert_eq!(
            echo.timeout_ms(config.default_timeout_ms),
            config.default_timeout_ms
        );
    }

    #[test]
    fn parses_toml_document() {
        let doc = r#"
            default_timeout_ms = 20000
            max_concurrent = 2

            [[commands]]
            command = "echo"
            arg_patterns = ["[\\w\\s\\-_.]+"]
            description = "print text"

            [[commands]]
            command = "git"
            allowed_args = ["status", "push"]
            requires_confirmation = true
            working_dir_restriction = "project-only"
        "#;
        let file: ConfigFile = toml::from_str(doc).unwrap();
        let config = WardenConfig::from_file(file).unwrap();

        assert_eq!(config.default_timeout_ms, 20_000);
        assert_eq!(config.max_concurrent, 2);
        let git = config.find_pattern("git").unwrap();
        assert!(git.pattern.requires_confirmation);
        assert_eq!(
            git.pattern.working_dir_restriction,
            WorkingDirRestriction::ProjectOnly
        );
    }
}
