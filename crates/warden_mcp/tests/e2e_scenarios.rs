//! End-to-end scenarios against a real facade: real processes, a real
//! on-disk queue, and a real approval server over HTTP.

#![cfg(unix)]

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use warden_mcp::queue::ListFilter;
use warden_mcp::session::{ExecuteRequest, SessionFacade};
use warden_mcp::Decision;
use warden_protocol::config::{CommandPattern, WardenConfig};
use warden_protocol::JobStatus;

fn request(command: &str, args: &[&str]) -> ExecuteRequest {
    ExecuteRequest {
        command: command.to_string(),
        args: args.iter().map(|s| s.to_string()).collect(),
        working_directory: None,
        timeout_ms: None,
        env: Default::default(),
        conversation_id: None,
        user_description: None,
    }
}

fn facade_with(patterns: Vec<CommandPattern>, max_concurrent: usize) -> (SessionFacade, TempDir) {
    let temp = TempDir::new().unwrap();
    let mut config = WardenConfig::from_patterns(patterns).unwrap();
    config.max_concurrent = max_concurrent;
    config.approval_timeout_ms = 60_000;
    let facade = SessionFacade::start(config, temp.path().to_path_buf(), None).unwrap();
    (facade, temp)
}

fn echo_pattern() -> CommandPattern {
    CommandPattern::new("echo").with_arg_patterns(&["[\\w\\s\\-_.]+"])
}

fn wait_for_status(
    facade: &SessionFacade,
    job_id: &str,
    wanted: JobStatus,
    timeout: Duration,
) -> warden_mcp::JobRecord {
    let deadline = Instant::now() + timeout;
    loop {
        let record = facade.check_status(job_id).unwrap();
        if record.status == wanted {
            return record;
        }
        assert!(
            Instant::now() < deadline,
            "job {} stuck in {} waiting for {}",
            job_id,
            record.status,
            wanted
        );
        thread::sleep(Duration::from_millis(50));
    }
}

// ============================================================================
// S1: whitelist reject
// ============================================================================

#[test]
fn s1_unwhitelisted_command_is_rejected_without_a_record() {
    let (facade, _temp) = facade_with(vec![CommandPattern::new("npm")], 2);

    let err = facade
        .submit_async(request("rm", &["-rf", "/"]))
        .unwrap_err();
    assert_eq!(err.code(), "NOT_WHITELISTED");

    let jobs = facade
        .list_jobs(ListFilter {
            limit: 10,
            ..ListFilter::default()
        })
        .unwrap();
    assert!(jobs.is_empty(), "no job record may be written");

    facade.shutdown();
}

// ============================================================================
// S2: auto-approved echo through the queue
// ============================================================================

#[test]
fn s2_auto_approved_echo_completes_and_gates_results_on_the_token() {
    let (facade, _temp) = facade_with(vec![echo_pattern()], 2);

    let submitted = facade.submit_async(request("echo", &["hello"])).unwrap();
    assert_eq!(submitted.status, JobStatus::Approved);

    let record = wait_for_status(
        &facade,
        submitted.job_id.as_ref(),
        JobStatus::Completed,
        Duration::from_secs(10),
    );
    let token = record.execution_token.clone().expect("token at completed");
    assert_eq!(record.exit_code, Some(0));

    // Wrong token: refused.
    let err = facade
        .get_result(submitted.job_id.as_ref(), "not-the-token")
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_EXECUTION_TOKEN");

    // Right token: the output.
    let result = facade
        .get_result(submitted.job_id.as_ref(), &token)
        .unwrap();
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.stdout.as_deref(), Some("hello\n"));
    assert_eq!(result.stderr.as_deref(), Some(""));

    facade.shutdown();
}

// ============================================================================
// S3: approval round-trip over HTTP
// ============================================================================

#[test]
fn s3_pending_job_is_bridged_approved_over_http_and_then_executed() {
    let (facade, _temp) = facade_with(vec![echo_pattern().confirmed()], 2);
    let url = facade.launch_approval_center(false).unwrap();
    let token = url.split("token=").nth(1).unwrap().to_string();
    let base = url.split('/').take(3).collect::<Vec<_>>().join("/");

    let submitted = facade
        .submit_async(request("echo", &["release artifact"]))
        .unwrap();
    assert_eq!(submitted.status, JobStatus::PendingApproval);

    // The submit wake triggers an immediate bridge scan; poll briefly.
    let deadline = Instant::now() + Duration::from_secs(5);
    let request_id = loop {
        let body: serde_json::Value = ureq::get(&format!("{}/api/requests/pending", base))
            .set("Authorization", &format!("Bearer {}", token))
            .call()
            .unwrap()
            .into_json()
            .unwrap();
        if body["count"].as_u64() == Some(1) {
            let entry = &body["requests"][0];
            assert_eq!(entry["command"], "echo");
            assert!(entry["risk_score"].as_u64().is_some());
            assert!(entry["risk_factors"].is_array());
            break entry["request_id"].as_str().unwrap().to_string();
        }
        assert!(Instant::now() < deadline, "job never bridged");
        thread::sleep(Duration::from_millis(100));
    };

    let resp = ureq::post(&format!("{}/api/requests/{}/approve", base, request_id))
        .set("Authorization", &format!("Bearer {}", token))
        .send_json(serde_json::json!({ "decidedBy": "e2e-test" }));
    assert_eq!(resp.unwrap().status(), 200);

    let record = wait_for_status(
        &facade,
        submitted.job_id.as_ref(),
        JobStatus::Completed,
        Duration::from_secs(10),
    );
    assert_eq!(record.approved_by.as_deref(), Some("e2e-test"));
    assert!(record.approved_at.unwrap() >= record.submitted_at);
    assert!(record.started_at.unwrap() >= record.approved_at.unwrap());

    facade.shutdown();
}

// ============================================================================
// S4: synchronous rejection propagates USER_REJECTED
// ============================================================================

#[test]
fn s4_sync_caller_of_a_rejected_command_sees_user_rejected() {
    let (facade, _temp) = facade_with(vec![echo_pattern().confirmed()], 2);
    let core = facade.core().clone();

    // Run the blocking execute on a helper thread; decide from here.
    let result = thread::scope(|scope| {
        let facade_ref = &facade;
        let handle = scope.spawn(move || facade_ref.execute(request("echo", &["publish"])));

        let deadline = Instant::now() + Duration::from_secs(5);
        let view = loop {
            let pending = core.pending_approvals().unwrap();
            if let Some(view) = pending.first() {
                break view.clone();
            }
            assert!(Instant::now() < deadline, "direct request never appeared");
            thread::sleep(Duration::from_millis(50));
        };

        core.decide(
            view.request_id.clone(),
            Decision {
                approve: false,
                decided_by: "operator".to_string(),
                reason: Some("no".to_string()),
            },
        )
        .unwrap()
        .unwrap();

        handle.join().unwrap()
    });

    let err = result.unwrap_err();
    assert_eq!(err.code(), "USER_REJECTED");
    assert!(err.to_string().contains("no"));

    facade.shutdown();
}

// ============================================================================
// S5: timeout discipline on the synchronous path
// ============================================================================

#[test]
fn s5_sync_timeout_kills_the_child_and_clears_the_table() {
    let mut sleep_pattern = CommandPattern::new("sleep").with_arg_patterns(&["[0-9.]+"]);
    sleep_pattern.timeout_ms = Some(500);
    let (facade, _temp) = facade_with(vec![sleep_pattern], 2);

    let start = Instant::now();
    let err = facade.execute(request("sleep", &["30"])).unwrap_err();
    assert_eq!(err.code(), "EXECUTION_TIMEOUT");
    assert!(
        start.elapsed() < Duration::from_millis(5500 + 1500),
        "timeout escalation must finish within timeout + grace"
    );
    assert_eq!(facade.supervisor().active_count(), 0);
    assert!(facade.supervisor().list().is_empty());

    facade.shutdown();
}

// ============================================================================
// S6: unauthorized HTTP
// ============================================================================

#[test]
fn s6_api_requires_the_bearer_token() {
    let (facade, _temp) = facade_with(vec![echo_pattern()], 2);
    let url = facade.launch_approval_center(false).unwrap();
    let token = url.split("token=").nth(1).unwrap().to_string();
    let base = url.split('/').take(3).collect::<Vec<_>>().join("/");

    // No token.
    let err = ureq::get(&format!("{}/api/stats", base)).call().unwrap_err();
    match err {
        ureq::Error::Status(status, response) => {
            assert_eq!(status, 401);
            let body: serde_json::Value = response.into_json().unwrap();
            assert_eq!(body["error"], "Unauthorized");
            assert_eq!(body["message"], "Valid authentication token required");
        }
        other => panic!("expected 401, got {:?}", other),
    }

    // Wrong token.
    let err = ureq::get(&format!("{}/api/stats", base))
        .set("Authorization", "Bearer wrong")
        .call()
        .unwrap_err();
    assert!(matches!(err, ureq::Error::Status(401, _)));

    // Correct token, both transports.
    let ok = ureq::get(&format!("{}/api/stats", base))
        .set("Authorization", &format!("Bearer {}", token))
        .call()
        .unwrap();
    assert_eq!(ok.status(), 200);
    let ok = ureq::get(&format!("{}/api/stats?token={}", base, token))
        .call()
        .unwrap();
    assert_eq!(ok.status(), 200);

    // Health needs nothing.
    let health = ureq::get(&format!("{}/health", base)).call().unwrap();
    let body: serde_json::Value = health.into_json().unwrap();
    assert_eq!(body["status"], "ok");

    facade.shutdown();
}

// ============================================================================
// Capacity cap is shared between sync path and processor
// ============================================================================

#[test]
fn sync_path_hits_the_shared_capacity_gate() {
    let mut sleep_pattern = CommandPattern::new("sleep").with_arg_patterns(&["[0-9.]+"]);
    sleep_pattern.timeout_ms = Some(10_000);
    let (facade, _temp) = facade_with(vec![sleep_pattern, echo_pattern()], 1);

    thread::scope(|scope| {
        let facade_ref = &facade;
        let long_running = scope.spawn(move || facade_ref.execute(request("sleep", &["5"])));

        // Let the first spawn claim the only slot.
        let deadline = Instant::now() + Duration::from_secs(3);
        while facade.supervisor().active_count() == 0 {
            assert!(Instant::now() < deadline, "first command never started");
            thread::sleep(Duration::from_millis(50));
        }

        let err = facade.execute(request("echo", &["hi"])).unwrap_err();
        assert_eq!(err.code(), "CAPACITY_EXCEEDED");

        facade.supervisor().kill_all(warden_worker::Signal::Kill);
        let _ = long_running.join().unwrap();
    });

    facade.shutdown();
}

// ============================================================================
// Kill an executing job by id
// ============================================================================

#[test]
fn killing_an_executing_job_fails_it_with_killed_flag() {
    let mut sleep_pattern = CommandPattern::new("sleep").with_arg_patterns(&["[0-9.]+"]);
    sleep_pattern.timeout_ms = Some(30_000);
    let (facade, _temp) = facade_with(vec![sleep_pattern], 2);

    let submitted = facade.submit_async(request("sleep", &["20"])).unwrap();
    wait_for_status(
        &facade,
        submitted.job_id.as_ref(),
        JobStatus::Executing,
        Duration::from_secs(10),
    );

    facade.kill(submitted.job_id.as_ref(), None).unwrap();
    let record = wait_for_status(
        &facade,
        submitted.job_id.as_ref(),
        JobStatus::ExecutionFailed,
        Duration::from_secs(10),
    );
    assert_eq!(record.killed, Some(true));
    assert!(record.execution_token.is_none());

    facade.shutdown();
}

// ============================================================================
// Pending jobs can be cancelled before execution
// ============================================================================

#[test]
fn cancelling_a_pending_job_never_spawns_it() {
    let (facade, _temp) = facade_with(vec![echo_pattern().confirmed()], 2);

    let submitted = facade.submit_async(request("echo", &["later"])).unwrap();
    assert_eq!(submitted.status, JobStatus::PendingApproval);

    facade.kill(submitted.job_id.as_ref(), None).unwrap();
    let record = facade.check_status(submitted.job_id.as_ref()).unwrap();
    assert_eq!(record.status, JobStatus::Cancelled);
    assert!(record.started_at.is_none());
    assert!(record.pid.is_none());

    facade.shutdown();
}

// ============================================================================
// Working directory resolution end to end
// ============================================================================

#[test]
fn working_directory_is_resolved_relative_and_absolute_is_refused() {
    let (facade, _temp) = facade_with(
        vec![CommandPattern::new("pwd").with_arg_patterns(&[])],
        2,
    );

    let mut absolute = request("pwd", &[]);
    absolute.working_directory = Some(PathBuf::from("/etc"));
    let err = facade.execute(absolute).unwrap_err();
    assert_eq!(err.code(), "ABSOLUTE_PATH_FORBIDDEN");

    let response = facade.execute(request("pwd", &[])).unwrap();
    assert_eq!(response.exit_code, Some(0));
    assert!(!response.stdout.trim().is_empty());

    facade.shutdown();
}
