//! Job lifecycle and classification enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a queued job.
///
/// A job lives in exactly one status shard on disk; the directory name is
/// `dir_name()`. Terminal statuses never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    PendingApproval,
    Approved,
    Executing,
    Completed,
    Rejected,
    ApprovalTimeout,
    ExecutionTimeout,
    ExecutionFailed,
    Cancelled,
    Expired,
}

impl JobStatus {
    /// All statuses, in shard-scan order. `get` scans these in order and
    /// returns the first hit, so the active statuses come first.
    pub fn all() -> &'static [JobStatus] {
        &[
            JobStatus::Executing,
            JobStatus::Approved,
            JobStatus::PendingApproval,
            JobStatus::Completed,
            JobStatus::Rejected,
            JobStatus::ApprovalTimeout,
            JobStatus::ExecutionTimeout,
            JobStatus::ExecutionFailed,
            JobStatus::Cancelled,
            JobStatus::Expired,
        ]
    }

    /// On-disk shard directory name.
    pub fn dir_name(&self) -> &'static str {
        match self {
            JobStatus::PendingApproval => "pending_approval",
            JobStatus::Approved => "approved",
            JobStatus::Executing => "executing",
            JobStatus::Completed => "completed",
            JobStatus::Rejected => "rejected",
            JobStatus::ApprovalTimeout => "approval_timeout",
            JobStatus::ExecutionTimeout => "execution_timeout",
            JobStatus::ExecutionFailed => "execution_failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Expired => "expired",
        }
    }

    /// Parse a shard directory name back into a status.
    pub fn from_dir_name(name: &str) -> Option<JobStatus> {
        JobStatus::all()
            .iter()
            .copied()
            .find(|s| s.dir_name() == name)
    }

    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::Rejected
                | JobStatus::ApprovalTimeout
                | JobStatus::ExecutionTimeout
                | JobStatus::ExecutionFailed
                | JobStatus::Cancelled
                | JobStatus::Expired
        )
    }

    /// Statuses that count against queue capacity.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Coarse classification of what a command does, used for duration
/// estimates and list filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    PackageInstall,
    BuildCompile,
    DockerBuild,
    TestSuite,
    CodeGeneration,
    Deployment,
    Database,
    Other,
}

impl OperationType {
    /// Classify a command line. Heuristic only; `Other` is always safe.
    pub fn classify(command: &str, args: &[String]) -> OperationType {
        let first = args.first().map(|s| s.as_str()).unwrap_or("");
        let line = format!("{} {}", command, args.join(" ")).to_lowercase();

        if command == "docker" && (first == "build" || first == "buildx") {
            return OperationType::DockerBuild;
        }
        if matches!(command, "npm" | "pnpm" | "yarn" | "pip" | "pip3" | "cargo")
            && matches!(first, "install" | "add" | "ci" | "i")
        {
            return OperationType::PackageInstall;
        }
        if first == "test" || line.contains("jest") || line.contains("pytest") {
            return OperationType::TestSuite;
        }
        if matches!(first, "build" | "compile") || command == "make" || command == "gcc" {
            return OperationType::BuildCompile;
        }
        if first == "generate" || line.contains("codegen") || line.contains("scaffold") {
            return OperationType::CodeGeneration;
        }
        if first == "deploy" || line.contains("deploy") {
            return OperationType::Deployment;
        }
        if matches!(command, "psql" | "mysql" | "sqlite3") || first == "migrate" {
            return OperationType::Database;
        }
        OperationType::Other
    }

    /// Rough wall-clock estimate used for `estimated_duration_ms`.
    pub fn estimated_duration_ms(&self) -> u64 {
        match self {
            OperationType::PackageInstall => 60_000,
            OperationType::BuildCompile => 120_000,
            OperationType::DockerBuild => 300_000,
            OperationType::TestSuite => 180_000,
            OperationType::CodeGeneration => 30_000,
            OperationType::Deployment => 240_000,
            OperationType::Database => 60_000,
            OperationType::Other => 15_000,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationType::PackageInstall => "package_install",
            OperationType::BuildCompile => "build_compile",
            OperationType::DockerBuild => "docker_build",
            OperationType::TestSuite => "test_suite",
            OperationType::CodeGeneration => "code_generation",
            OperationType::Deployment => "deployment",
            OperationType::Database => "database",
            OperationType::Other => "other",
        };
        f.write_str(s)
    }
}

/// Queue load relative to configured capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBand {
    Low,
    Medium,
    High,
}

impl LoadBand {
    /// Band thresholds: <50% low, <80% medium, otherwise high.
    pub fn from_utilization(active: usize, capacity: usize) -> LoadBand {
        if capacity == 0 {
            return LoadBand::High;
        }
        let ratio = active as f64 / capacity as f64;
        if ratio < 0.5 {
            LoadBand::Low
        } else if ratio < 0.8 {
            LoadBand::Medium
        } else {
            LoadBand::High
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_dir_name() {
        for status in JobStatus::all() {
            assert_eq!(JobStatus::from_dir_name(status.dir_name()), Some(*status));
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Rejected.is_terminal());
        assert!(JobStatus::Expired.is_terminal());
        assert!(!JobStatus::PendingApproval.is_terminal());
        assert!(!JobStatus::Approved.is_terminal());
        assert!(!JobStatus::Executing.is_terminal());
    }

    #[test]
    fn classify_common_operations() {
        let args = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        assert_eq!(
            OperationType::classify("npm", &args(&["install"])),
            OperationType::PackageInstall
        );
        assert_eq!(
            OperationType::classify("docker", &args(&["build", "."])),
            OperationType::DockerBuild
        );
        assert_eq!(
            OperationType::classify("cargo", &args(&["test"])),
            OperationType::TestSuite
        );
        assert_eq!(
            OperationType::classify("echo", &args(&["hello"])),
            OperationType::Other
        );
    }

    #[test]
    fn load_bands() {
        assert_eq!(LoadBand::from_utilization(1, 10), LoadBand::Low);
        assert_eq!(LoadBand::from_utilization(5, 10), LoadBand::Medium);
        assert_eq!(LoadBand::from_utilization(8, 10), LoadBand::High);
        assert_eq!(LoadBand::from_utilization(0, 0), LoadBand::High);
    }
}
