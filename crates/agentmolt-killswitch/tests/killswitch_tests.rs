//! Tests for agentmolt-killswitch: immediate kill and the polling monitor

use agentmolt_core::*;
use agentmolt_engine::LocalControlPlane;
use agentmolt_killswitch::{kill_now, KillSwitch, MonitorState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const POLL: Duration = Duration::from_millis(20);
const WAIT: Duration = Duration::from_secs(5);

fn setup() -> (Arc<dyn ControlPlane>, Agent) {
    let plane: Arc<dyn ControlPlane> = Arc::new(LocalControlPlane::open_in_memory().unwrap());
    let agent = plane.register_agent("bot", "gpt-4").unwrap();
    (plane, agent)
}

async fn wait_for(switch: &KillSwitch, want: MonitorState) {
    let mut rx = switch.subscribe();
    timeout(WAIT, rx.wait_for(|s| *s == want))
        .await
        .expect("timed out waiting for monitor state")
        .unwrap();
}

// ===========================================================================
// Immediate kill
// ===========================================================================

#[test]
fn kill_now_marks_agent_killed() {
    let (plane, agent) = setup();
    let killed = kill_now(plane.as_ref(), &agent.id).unwrap();
    assert!(killed.killed);
    assert!(plane.is_killed(&agent.id).unwrap());
    assert!(kill_now(plane.as_ref(), &agent.id).unwrap().killed);
}

#[test]
fn kill_now_unknown_is_not_found() {
    let (plane, _) = setup();
    assert!(kill_now(plane.as_ref(), "ghost").unwrap_err().is_not_found());
}

// ===========================================================================
// Construction
// ===========================================================================

#[test]
fn zero_interval_is_rejected() {
    let (plane, agent) = setup();
    assert!(KillSwitch::new(plane, agent.id, Duration::ZERO)
        .err()
        .unwrap()
        .is_validation());
}

#[test]
fn from_config_uses_poll_interval() {
    let (plane, agent) = setup();
    let config = KillSwitchConfig {
        poll_interval_secs: 0.25,
    };
    let switch = KillSwitch::from_config(plane, agent.id, &config).unwrap();
    assert_eq!(switch.poll_interval(), Duration::from_millis(250));
    assert_eq!(switch.state(), MonitorState::Idle);
}

#[test]
fn start_outside_runtime_fails() {
    let (plane, agent) = setup();
    let mut switch = KillSwitch::new(plane, agent.id, POLL).unwrap();
    assert!(switch.start().unwrap_err().is_validation());
    assert_eq!(switch.state(), MonitorState::Idle);
}

// ===========================================================================
// Monitor
// ===========================================================================

#[tokio::test]
async fn callback_fires_once_after_kill() {
    let (plane, agent) = setup();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let mut switch = KillSwitch::new(plane.clone(), agent.id.clone(), POLL)
        .unwrap()
        .on_kill(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

    switch.start().unwrap();
    assert_eq!(switch.state(), MonitorState::Running);

    plane.kill(&agent.id).unwrap();
    wait_for(&switch, MonitorState::KilledObserved).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    plane.kill(&agent.id).unwrap();
    tokio::time::sleep(POLL * 5).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(switch.state(), MonitorState::KilledObserved);

    // The default reaction was replaced, so the token stays live.
    assert!(!switch.kill_token().is_cancelled());
}

#[tokio::test]
async fn default_reaction_cancels_kill_token() {
    let (plane, agent) = setup();
    let mut switch = KillSwitch::new(plane.clone(), agent.id.clone(), POLL).unwrap();
    let token = switch.kill_token();
    switch.start().unwrap();

    plane.kill(&agent.id).unwrap();
    timeout(WAIT, token.cancelled())
        .await
        .expect("kill token was not cancelled");
    timeout(WAIT, switch.join()).await.unwrap();
    assert_eq!(switch.state(), MonitorState::KilledObserved);
}

#[tokio::test]
async fn callback_receives_killed_agent() {
    let (plane, agent) = setup();
    let (tx, rx) = tokio::sync::oneshot::channel();
    let mut switch = KillSwitch::new(plane.clone(), agent.id.clone(), POLL)
        .unwrap()
        .on_kill(move |a| {
            let _ = tx.send(a.clone());
        });
    switch.start().unwrap();
    plane.kill(&agent.id).unwrap();

    let seen = timeout(WAIT, rx).await.unwrap().unwrap();
    assert_eq!(seen.id, agent.id);
    assert!(seen.killed);
}

#[tokio::test]
async fn panicking_callback_still_reaches_killed_observed() {
    let (plane, agent) = setup();
    let mut switch = KillSwitch::new(plane.clone(), agent.id.clone(), POLL)
        .unwrap()
        .on_kill(|a| panic!("reaction for {} failed", a.id));
    switch.start().unwrap();

    plane.kill(&agent.id).unwrap();
    wait_for(&switch, MonitorState::KilledObserved).await;
    timeout(WAIT, switch.join()).await.unwrap();
    assert_eq!(switch.state(), MonitorState::KilledObserved);
    assert!(!switch.kill_token().is_cancelled());
}

#[tokio::test]
async fn stop_before_kill_never_fires() {
    let (plane, agent) = setup();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let mut switch = KillSwitch::new(plane.clone(), agent.id.clone(), POLL)
        .unwrap()
        .on_kill(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    switch.start().unwrap();
    tokio::time::sleep(POLL * 2).await;

    timeout(WAIT, switch.stop()).await.unwrap();
    assert_eq!(switch.state(), MonitorState::Stopped);

    plane.kill(&agent.id).unwrap();
    tokio::time::sleep(POLL * 5).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stop_is_prompt_with_long_interval() {
    let (plane, agent) = setup();
    let mut switch = KillSwitch::new(plane, agent.id, Duration::from_secs(3600)).unwrap();
    switch.start().unwrap();
    timeout(Duration::from_secs(1), switch.stop())
        .await
        .expect("stop waited for the poll interval");
    assert_eq!(switch.state(), MonitorState::Stopped);
}

#[tokio::test]
async fn stop_after_kill_is_noop() {
    let (plane, agent) = setup();
    let mut switch = KillSwitch::new(plane.clone(), agent.id.clone(), POLL)
        .unwrap()
        .on_kill(|_| {});
    switch.start().unwrap();
    plane.kill(&agent.id).unwrap();
    wait_for(&switch, MonitorState::KilledObserved).await;

    switch.stop().await;
    switch.stop().await;
    assert_eq!(switch.state(), MonitorState::KilledObserved);
}

#[tokio::test]
async fn start_is_idempotent_and_not_restartable() {
    let (plane, agent) = setup();
    let mut switch = KillSwitch::new(plane, agent.id, POLL).unwrap();
    switch.start().unwrap();
    switch.start().unwrap();
    assert_eq!(switch.state(), MonitorState::Running);

    switch.stop().await;
    assert!(switch.start().unwrap_err().is_validation());
}

#[tokio::test]
async fn stop_without_start_is_terminal() {
    let (plane, agent) = setup();
    let mut switch = KillSwitch::new(plane, agent.id, POLL).unwrap();
    switch.stop().await;
    assert_eq!(switch.state(), MonitorState::Stopped);
    assert!(switch.start().is_err());
}

#[tokio::test]
async fn poll_errors_keep_monitor_running() {
    let (plane, _) = setup();
    let mut switch = KillSwitch::new(plane, "ghost", POLL).unwrap();
    switch.start().unwrap();
    tokio::time::sleep(POLL * 4).await;
    assert_eq!(switch.state(), MonitorState::Running);
    switch.stop().await;
    assert_eq!(switch.state(), MonitorState::Stopped);
}

#[tokio::test]
async fn kill_from_another_connection_is_observed() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig {
        path: dir.path().join("agentmolt.db"),
        ..Default::default()
    };
    let watcher: Arc<dyn ControlPlane> = Arc::new(LocalControlPlane::open(&config).unwrap());
    let agent = watcher.register_agent("bot", "").unwrap();

    let mut switch = KillSwitch::new(watcher, agent.id.clone(), POLL).unwrap();
    let token = switch.kill_token();
    switch.start().unwrap();

    let operator = LocalControlPlane::open(&config).unwrap();
    kill_now(&operator, &agent.id).unwrap();

    timeout(WAIT, token.cancelled()).await.unwrap();
    switch.join().await;
    assert_eq!(switch.state(), MonitorState::KilledObserved);
}
