//! Tab-separated text rendering for CLI output

use agentmolt_core::{Agent, Event, Metric, PolicyResult, PolicyRule, StoreStats, UsageTotals};
use chrono::{DateTime, SecondsFormat, Utc};

pub fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn or_dash(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("-")
}

pub fn format_agents(agents: &[Agent]) -> String {
    let mut out = String::from("ID\tNAME\tMODEL\tSTATUS\tKILLED\tCREATED\n");
    for a in agents {
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\n",
            a.id,
            a.name,
            or_dash(Some(&a.model)),
            a.status,
            if a.killed { "yes" } else { "no" },
            format_timestamp(&a.created_at)
        ));
    }
    out
}

pub fn format_agent(a: &Agent) -> String {
    let mut out = String::new();
    out.push_str(&format!("id:         {}\n", a.id));
    out.push_str(&format!("name:       {}\n", a.name));
    out.push_str(&format!("model:      {}\n", or_dash(Some(&a.model))));
    out.push_str(&format!("status:     {}\n", a.status));
    out.push_str(&format!("killed:     {}\n", a.killed));
    if let Some(at) = &a.killed_at {
        out.push_str(&format!("killed_at:  {}\n", format_timestamp(at)));
    }
    out.push_str(&format!("created_at: {}\n", format_timestamp(&a.created_at)));
    out.push_str(&format!("updated_at: {}\n", format_timestamp(&a.updated_at)));
    if !a.metadata.is_empty() {
        out.push_str(&format!(
            "metadata:   {}\n",
            serde_json::Value::Object(a.metadata.clone())
        ));
    }
    out
}

pub fn format_events(events: &[Event]) -> String {
    let mut out = String::from("ID\tTIME\tACTION\tTARGET\tSTATUS\n");
    for e in events {
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\n",
            e.id,
            format_timestamp(&e.timestamp),
            e.action,
            or_dash(e.target.as_deref()),
            e.status
        ));
    }
    out
}

pub fn format_metrics(metrics: &[Metric], totals: &UsageTotals) -> String {
    let mut out = String::from("ID\tTIME\tTOKENS\tCOST\tTOOL_CALLS\tFILES\n");
    for m in metrics {
        out.push_str(&format!(
            "{}\t{}\t{}\t{:.6}\t{}\t{}\n",
            m.id,
            format_timestamp(&m.timestamp),
            m.tokens_used,
            m.cost,
            m.tool_calls,
            m.files_accessed
        ));
    }
    out.push_str(&format!(
        "TOTAL\t{} samples\t{}\t{:.6}\t{}\t{}\n",
        totals.samples,
        totals.total_tokens,
        totals.total_cost,
        totals.total_tool_calls,
        totals.total_files_accessed
    ));
    out
}

pub fn format_policies(rules: &[PolicyRule]) -> String {
    let mut out = String::from("ID\tKIND\tVALUE\tAGENT\tCREATED\n");
    for r in rules {
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\n",
            r.id,
            r.kind,
            r.value,
            r.agent_id.as_deref().unwrap_or("*"),
            format_timestamp(&r.created_at)
        ));
    }
    out
}

pub fn format_verdict(result: &PolicyResult) -> String {
    match (&result.reason, result.allowed) {
        (_, true) => "ALLOW\n".to_string(),
        (Some(reason), false) => format!("DENY\t{}\n", reason),
        (None, false) => "DENY\n".to_string(),
    }
}

pub fn format_stats(stats: &StoreStats) -> String {
    format!(
        "agents\t{}\nevents\t{}\nmetrics\t{}\npolicies\t{}\n",
        stats.agents, stats.events, stats.metrics, stats.policies
    )
}
