//! agentmolt - local control plane for autonomous agents
//!
//! Usage:
//!   agentmolt agents register bot --model gpt-4   → register, prints the new id
//!   agentmolt log metric <id> --tokens 500 --cost 0.02
//!   agentmolt policy add cost_limit 5.00
//!   agentmolt policy check <id> delete_files      → exit 2 when denied
//!   agentmolt kill <id>
//!   agentmolt watch <id>                          → block until killed or Ctrl-C

use agentmolt::args::parse_metadata;
use agentmolt::format::*;
use agentmolt::{
    AgentMoltConfig, AgentStatus, ControlPlane, EventStatus, KillSwitch, LocalControlPlane,
    Metric, MetricSample, MonitorState, NewEvent, NewPolicyRule, PolicyKind, UsageTotals,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "agentmolt",
    about = "Local control plane for autonomous agents: registry, audit log, policy, kill switch",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (TOML). Default: ~/.agentmolt/agentmolt.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database (or set AGENTMOLT_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print JSON instead of tab-separated text
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Write logs to a file (in addition to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage agents
    Agents {
        #[command(subcommand)]
        command: AgentCommands,
    },
    /// Kill an agent (idempotent)
    Kill { agent_id: String },
    /// List an agent's events in order
    Events { agent_id: String },
    /// List an agent's metrics with running totals
    Metrics { agent_id: String },
    /// Append to the audit log
    Log {
        #[command(subcommand)]
        command: LogCommands,
    },
    /// Manage and evaluate governance rules
    Policy {
        #[command(subcommand)]
        command: PolicyCommands,
    },
    /// Run the kill-switch monitor until the agent is killed or Ctrl-C
    Watch {
        agent_id: String,
        /// Poll interval in seconds (default: from config)
        #[arg(short, long)]
        interval: Option<f64>,
    },
    /// Row counts in the store
    Stats,
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum AgentCommands {
    /// List agents in creation order
    List,
    /// Show one agent
    Get { agent_id: String },
    /// Register a new agent
    Register {
        name: String,
        #[arg(short, long, default_value = "")]
        model: String,
        /// Metadata as key=value (repeatable)
        #[arg(long = "meta")]
        meta: Vec<String>,
    },
    /// Set lifecycle status (idle, running, stopped, failed)
    Status { agent_id: String, status: String },
}

#[derive(Subcommand)]
enum LogCommands {
    /// Record an action
    Event {
        agent_id: String,
        action: String,
        #[arg(short, long)]
        target: Option<String>,
        /// allowed, denied, started, or failed
        #[arg(short, long, default_value = "allowed")]
        status: String,
        #[arg(long = "meta")]
        meta: Vec<String>,
    },
    /// Record resource usage
    Metric {
        agent_id: String,
        #[arg(long, default_value_t = 0)]
        tokens: u64,
        #[arg(long, default_value_t = 0.0)]
        cost: f64,
        #[arg(long, default_value_t = 0)]
        tool_calls: u64,
        #[arg(long, default_value_t = 0)]
        files: u64,
        #[arg(long = "meta")]
        meta: Vec<String>,
    },
}

#[derive(Subcommand)]
enum PolicyCommands {
    /// Add a rule: denylist|allowlist <action>, cost_limit|token_limit <n>
    Add {
        kind: String,
        value: String,
        /// Scope the rule to one agent
        #[arg(short, long)]
        agent: Option<String>,
    },
    /// List rules in insertion order
    List {
        /// Only rules that govern this agent
        #[arg(short, long)]
        agent: Option<String>,
    },
    /// Remove every rule
    Reset,
    /// Evaluate an action for an agent
    Check { agent_id: String, action: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
}

#[derive(Serialize)]
struct MetricsReport<'a> {
    metrics: &'a [Metric],
    totals: &'a UsageTotals,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref())?;
    let config = load_config(&cli)?;

    if let Commands::Config {
        command: ConfigCommands::Show,
    } = &cli.command
    {
        print!("{}", config.to_toml());
        return Ok(ExitCode::SUCCESS);
    }

    let plane = Arc::new(LocalControlPlane::open(&config.store)?);
    run(&cli, &config, plane).await
}

async fn run(
    cli: &Cli,
    config: &AgentMoltConfig,
    plane: Arc<LocalControlPlane>,
) -> anyhow::Result<ExitCode> {
    let json = cli.json;
    match &cli.command {
        Commands::Agents { command } => match command {
            AgentCommands::List => {
                let agents = plane.list_agents()?;
                emit(json, &agents, || format_agents(&agents))?;
            }
            AgentCommands::Get { agent_id } => {
                let agent = plane.get_agent(agent_id)?;
                emit(json, &agent, || format_agent(&agent))?;
            }
            AgentCommands::Register { name, model, meta } => {
                let agent = plane.registry().register_agent_with_metadata(
                    name,
                    model,
                    parse_metadata(meta)?,
                )?;
                emit(json, &agent, || format!("{}\n", agent.id))?;
            }
            AgentCommands::Status { agent_id, status } => {
                let status: AgentStatus = status.parse()?;
                let agent = plane.registry().update_status(agent_id, status)?;
                emit(json, &agent, || format_agent(&agent))?;
            }
        },

        Commands::Kill { agent_id } => {
            let agent = agentmolt::kill_now(plane.as_ref(), agent_id)?;
            emit(json, &agent, || format_agent(&agent))?;
        }

        Commands::Events { agent_id } => {
            let events = plane.list_events(agent_id)?;
            emit(json, &events, || format_events(&events))?;
        }

        Commands::Metrics { agent_id } => {
            let metrics = plane.list_metrics(agent_id)?;
            let totals = plane.cumulative(agent_id)?;
            let report = MetricsReport {
                metrics: &metrics,
                totals: &totals,
            };
            emit(json, &report, || format_metrics(&metrics, &totals))?;
        }

        Commands::Log { command } => match command {
            LogCommands::Event {
                agent_id,
                action,
                target,
                status,
                meta,
            } => {
                let status: EventStatus = status.parse()?;
                let mut event = NewEvent::new(agent_id, action)
                    .with_status(status)
                    .with_metadata(parse_metadata(meta)?);
                event.target = target.clone();
                let event = plane.log_event(event)?;
                emit(json, &event, || format_events(std::slice::from_ref(&event)))?;
            }
            LogCommands::Metric {
                agent_id,
                tokens,
                cost,
                tool_calls,
                files,
                meta,
            } => {
                let sample = MetricSample::tokens(*tokens)
                    .with_cost(*cost)
                    .with_tool_calls(*tool_calls)
                    .with_files_accessed(*files)
                    .with_metadata(parse_metadata(meta)?);
                let (metric, totals) = plane.audit().log_metric_with_totals(agent_id, sample)?;
                let metrics = [metric];
                let report = MetricsReport {
                    metrics: &metrics,
                    totals: &totals,
                };
                emit(json, &report, || format_metrics(&metrics, &totals))?;
            }
        },

        Commands::Policy { command } => match command {
            PolicyCommands::Add { kind, value, agent } => {
                let kind: PolicyKind = kind.parse()?;
                let mut rule = NewPolicyRule::new(kind, value.as_str());
                if let Some(agent_id) = agent {
                    rule = rule.for_agent(agent_id);
                }
                let rule = plane.add_policy(rule)?;
                emit(json, &rule, || format_policies(std::slice::from_ref(&rule)))?;
            }
            PolicyCommands::List { agent } => {
                let rules = match agent {
                    Some(agent_id) => plane.policy().list_policies_for(agent_id)?,
                    None => plane.list_policies()?,
                };
                emit(json, &rules, || format_policies(&rules))?;
            }
            PolicyCommands::Reset => {
                let removed = plane.reset_policies()?;
                emit(json, &serde_json::json!({ "removed": removed }), || {
                    format!("removed {} rules\n", removed)
                })?;
            }
            PolicyCommands::Check { agent_id, action } => {
                let verdict = plane.check_policy(agent_id, action)?;
                emit(json, &verdict, || format_verdict(&verdict))?;
                if verdict.is_denied() {
                    return Ok(ExitCode::from(2));
                }
            }
        },

        Commands::Watch { agent_id, interval } => {
            let mut ks_config = config.killswitch.clone();
            if let Some(secs) = interval {
                ks_config.poll_interval_secs = *secs;
            }
            return watch(plane, agent_id, &ks_config).await;
        }

        Commands::Stats => {
            let stats = plane.stats()?;
            emit(json, &stats, || format_stats(&stats))?;
        }

        Commands::Config {
            command: ConfigCommands::Show,
        } => print!("{}", config.to_toml()),
    }
    Ok(ExitCode::SUCCESS)
}

async fn watch(
    plane: Arc<LocalControlPlane>,
    agent_id: &str,
    config: &agentmolt::KillSwitchConfig,
) -> anyhow::Result<ExitCode> {
    // Fail fast on an unknown agent instead of polling NotFound forever.
    plane.get_agent(agent_id)?;

    let plane: Arc<dyn ControlPlane> = plane;
    let mut switch = KillSwitch::from_config(plane, agent_id, config)?;
    let killed = switch.kill_token();
    switch.start()?;
    info!("Watching agent {} (Ctrl-C to stop)", agent_id);

    tokio::select! {
        _ = killed.cancelled() => {
            switch.join().await;
        }
        _ = tokio::signal::ctrl_c() => {
            switch.stop().await;
        }
    }

    match switch.state() {
        MonitorState::KilledObserved => {
            println!("agent {} killed", agent_id);
            Ok(ExitCode::from(3))
        }
        state => {
            println!("watch ended ({})", state);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", text());
    }
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<AgentMoltConfig> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(AgentMoltConfig::default_path);
    let mut config = AgentMoltConfig::load(&path)?.with_env()?;
    if let Some(db) = &cli.db {
        config.store.path = db.clone();
    }
    config.validate()?;
    Ok(config)
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentmolt=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Ok(Some(guard))
        }
        None => {
            registry.init();
            Ok(None)
        }
    }
}
