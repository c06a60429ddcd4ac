//! End-to-end tests: the re-exported library surface and the `agentmolt` binary

use agentmolt::*;
use std::path::Path;
use std::process::{Command, Output};
use std::sync::Arc;
use std::time::Duration;

fn agentmolt(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_agentmolt"))
        .arg("--db")
        .arg(dir.join("agentmolt.db"))
        .arg("--config")
        .arg(dir.join("missing.toml"))
        .args(args)
        .env_remove("AGENTMOLT_DB_PATH")
        .env_remove("AGENTMOLT_POLL_INTERVAL")
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to run agentmolt")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

// ===========================================================================
// Library
// ===========================================================================

#[tokio::test]
async fn governed_agent_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig {
        path: dir.path().join("agentmolt.db"),
        ..Default::default()
    };
    let plane = Arc::new(LocalControlPlane::open(&config).unwrap());
    let agent = plane.register_agent("researcher", "gpt-4").unwrap();

    plane.add_policy(NewPolicyRule::denylist("delete_files")).unwrap();
    plane.add_policy(NewPolicyRule::cost_limit("1.00")).unwrap();

    assert!(plane.check_policy(&agent.id, "search").unwrap().allowed);
    plane
        .log_event(NewEvent::new(&agent.id, "search").with_target("web"))
        .unwrap();
    plane
        .log_metric(&agent.id, MetricSample::tokens(800).with_cost(0.6))
        .unwrap();
    assert!(plane.check_policy(&agent.id, "delete_files").unwrap().is_denied());

    plane.log_metric(&agent.id, MetricSample::cost(0.6)).unwrap();
    let verdict = plane.check_policy(&agent.id, "search").unwrap();
    assert!(verdict.reason.unwrap().contains("cost limit"));

    let dyn_plane: Arc<dyn ControlPlane> = plane.clone();
    let mut switch = KillSwitch::new(dyn_plane, agent.id.clone(), Duration::from_millis(20)).unwrap();
    let token = switch.kill_token();
    switch.start().unwrap();

    kill_now(plane.as_ref(), &agent.id).unwrap();
    tokio::time::timeout(Duration::from_secs(5), token.cancelled())
        .await
        .unwrap();
    switch.join().await;
    assert_eq!(switch.state(), MonitorState::KilledObserved);
    assert_eq!(
        plane.check_policy(&agent.id, "search").unwrap().reason.as_deref(),
        Some("agent is killed")
    );
}

// ===========================================================================
// CLI
// ===========================================================================

#[test]
fn cli_register_then_list() {
    let dir = tempfile::tempdir().unwrap();
    let out = agentmolt(dir.path(), &["agents", "register", "bot", "--model", "gpt-4"]);
    assert!(out.status.success(), "{:?}", out);
    let id = stdout(&out).trim().to_string();
    assert!(!id.is_empty());

    let out = agentmolt(dir.path(), &["--json", "agents", "list"]);
    assert!(out.status.success());
    let agents: Vec<Agent> = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].id, id);
    assert_eq!(agents[0].model, "gpt-4");
}

#[test]
fn cli_policy_check_exit_codes() {
    let dir = tempfile::tempdir().unwrap();
    let id = stdout(&agentmolt(dir.path(), &["agents", "register", "bot"]))
        .trim()
        .to_string();

    assert!(agentmolt(dir.path(), &["policy", "add", "denylist", "rm"]).status.success());

    let allowed = agentmolt(dir.path(), &["policy", "check", &id, "ls"]);
    assert_eq!(allowed.status.code(), Some(0));
    assert_eq!(stdout(&allowed), "ALLOW\n");

    let denied = agentmolt(dir.path(), &["--json", "policy", "check", &id, "rm"]);
    assert_eq!(denied.status.code(), Some(2));
    let verdict: PolicyResult = serde_json::from_str(&stdout(&denied)).unwrap();
    assert!(!verdict.allowed);
}

#[test]
fn cli_rejects_malformed_rule() {
    let dir = tempfile::tempdir().unwrap();
    let out = agentmolt(dir.path(), &["policy", "add", "cost_limit", "lots"]);
    assert!(!out.status.success());
    let listed = agentmolt(dir.path(), &["--json", "policy", "list"]);
    let rules: Vec<PolicyRule> = serde_json::from_str(&stdout(&listed)).unwrap();
    assert!(rules.is_empty());
}

#[test]
fn cli_kill_and_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let id = stdout(&agentmolt(dir.path(), &["agents", "register", "bot"]))
        .trim()
        .to_string();

    for cost in ["1.0", "2.5", "0.5"] {
        let out = agentmolt(dir.path(), &["log", "metric", &id, "--cost", cost]);
        assert!(out.status.success(), "{:?}", out);
    }
    let out = agentmolt(dir.path(), &["--json", "metrics", &id]);
    let report: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(report["totals"]["total_cost"], 4.0);
    assert_eq!(report["metrics"].as_array().unwrap().len(), 3);

    assert!(agentmolt(dir.path(), &["kill", &id]).status.success());
    assert!(agentmolt(dir.path(), &["kill", &id]).status.success());
    let out = agentmolt(dir.path(), &["--json", "agents", "get", &id]);
    let agent: Agent = serde_json::from_str(&stdout(&out)).unwrap();
    assert!(agent.killed);

    assert!(!agentmolt(dir.path(), &["kill", "ghost"]).status.success());
}

#[test]
fn cli_config_show_prints_effective_values() {
    let dir = tempfile::tempdir().unwrap();
    let out = agentmolt(dir.path(), &["config", "show"]);
    assert!(out.status.success());
    let config = AgentMoltConfig::from_toml(&stdout(&out)).unwrap();
    assert_eq!(config.store.path, dir.path().join("agentmolt.db"));
    assert_eq!(config.killswitch.poll_interval_secs, 5.0);
}

#[test]
fn cli_watch_exits_when_agent_is_killed() {
    let dir = tempfile::tempdir().unwrap();
    let id = stdout(&agentmolt(dir.path(), &["agents", "register", "bot"]))
        .trim()
        .to_string();

    let mut child = Command::new(env!("CARGO_BIN_EXE_agentmolt"))
        .arg("--db")
        .arg(dir.path().join("agentmolt.db"))
        .arg("--config")
        .arg(dir.path().join("missing.toml"))
        .args(["watch", &id, "--interval", "0.05"])
        .env_remove("AGENTMOLT_DB_PATH")
        .env_remove("AGENTMOLT_POLL_INTERVAL")
        .env("RUST_LOG", "off")
        .stdout(std::process::Stdio::piped())
        .spawn()
        .unwrap();

    std::thread::sleep(Duration::from_millis(200));
    assert!(agentmolt(dir.path(), &["kill", &id]).status.success());

    let out = child.wait_with_output().unwrap();
    assert_eq!(out.status.code(), Some(3));
    assert!(stdout(&out).contains("killed"));
}
