use crate::args::parse_metadata;
use crate::format::*;
use crate::*;

fn plane_with_agent() -> (LocalControlPlane, Agent) {
    let plane = LocalControlPlane::open_in_memory().unwrap();
    let agent = plane.register_agent("bot", "gpt-4").unwrap();
    (plane, agent)
}

#[test]
fn parse_metadata_keeps_json_types() {
    let meta = parse_metadata(&["n=3".into(), "on=true".into(), "team=search".into()]).unwrap();
    assert_eq!(meta["n"], 3);
    assert_eq!(meta["on"], true);
    assert_eq!(meta["team"], "search");
}

#[test]
fn parse_metadata_rejects_bad_pairs() {
    assert!(parse_metadata(&["novalue".into()]).unwrap_err().is_validation());
    assert!(parse_metadata(&["=x".into()]).unwrap_err().is_validation());
    assert!(parse_metadata(&[]).unwrap().is_empty());
}

#[test]
fn agents_table_has_header_and_rows() {
    let (plane, agent) = plane_with_agent();
    let out = format_agents(&plane.list_agents().unwrap());
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("ID\tNAME"));
    assert!(lines[1].starts_with(&format!("{}\tbot\tgpt-4\tidle\tno\t", agent.id)));
}

#[test]
fn agent_detail_shows_kill_time() {
    let (plane, agent) = plane_with_agent();
    assert!(!format_agent(&agent).contains("killed_at"));
    let killed = plane.kill(&agent.id).unwrap();
    let out = format_agent(&killed);
    assert!(out.contains("killed:     true"));
    assert!(out.contains("killed_at:"));
    assert!(out.contains("status:     killed"));
}

#[test]
fn events_table_dashes_missing_target() {
    let (plane, agent) = plane_with_agent();
    plane.log_event(NewEvent::new(&agent.id, "search")).unwrap();
    let out = format_events(&plane.list_events(&agent.id).unwrap());
    let row = out.lines().nth(1).unwrap();
    assert!(row.ends_with("\tsearch\t-\tallowed"));
}

#[test]
fn metrics_table_ends_with_totals() {
    let (plane, agent) = plane_with_agent();
    plane.log_metric(&agent.id, MetricSample::cost(1.5).with_tokens(10)).unwrap();
    plane.log_metric(&agent.id, MetricSample::cost(0.25).with_tokens(5)).unwrap();
    let out = format_metrics(
        &plane.list_metrics(&agent.id).unwrap(),
        &plane.cumulative(&agent.id).unwrap(),
    );
    assert_eq!(out.lines().count(), 4);
    assert_eq!(out.lines().last().unwrap(), "TOTAL\t2 samples\t15\t1.750000\t0\t0");
}

#[test]
fn policies_table_marks_global_rules() {
    let (plane, agent) = plane_with_agent();
    plane.add_policy(NewPolicyRule::denylist("rm")).unwrap();
    plane
        .add_policy(NewPolicyRule::token_limit("100").for_agent(&agent.id))
        .unwrap();
    let out = format_policies(&plane.list_policies().unwrap());
    let rows: Vec<&str> = out.lines().skip(1).collect();
    assert!(rows[0].contains("\tdenylist\trm\t*\t"));
    assert!(rows[1].contains(&format!("\ttoken_limit\t100\t{}\t", agent.id)));
}

#[test]
fn verdicts_render() {
    assert_eq!(format_verdict(&PolicyResult::allow()), "ALLOW\n");
    assert_eq!(
        format_verdict(&PolicyResult::deny("agent is killed", None)),
        "DENY\tagent is killed\n"
    );
}

#[test]
fn stats_render() {
    let (plane, _) = plane_with_agent();
    assert_eq!(
        format_stats(&plane.stats().unwrap()),
        "agents\t1\nevents\t0\nmetrics\t0\npolicies\t0\n"
    );
}
