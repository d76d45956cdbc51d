//! Armada - multi-host Docker container orchestrator.
//!
//! Reads a YAML environment description and executes orchestration actions
//! across the declared fleet: status, pull, start, stop, kill, restart,
//! clean, logs and deptree. Dependency order is honored per action, work is
//! parallelized under an optional concurrency cap, and transitions are
//! confirmed by lifecycle checks.

mod output;

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use armada_core::environment::{Environment, SelectionFilters};
use armada_loader::LoadedEnvironment;
use armada_orchestrator::runtime::docker::DockerProvider;
use armada_orchestrator::runtime::RuntimeProvider;
use armada_orchestrator::{
    logs::stream_logs, status::status, Action, AuditTrail, Play, PlayOptions, StatusOptions,
    TracingAuditor, TracingProgress,
};

const DEFAULT_ENVIRONMENT_FILE: &str = "armada.yaml";

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(
    name = "armada",
    about = "Orchestrates environments of containerized services across fleets of Docker hosts",
    version
)]
struct Cli {
    /// Environment description file (use - for stdin).
    #[arg(short = 'f', long = "file", value_name = "FILE", default_value = DEFAULT_ENVIRONMENT_FILE, global = true)]
    file: String,

    /// Log level when RUST_LOG is not set (trace, debug, info, warn, error).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: String,

    /// Emit JSON logs.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

/// Target selection shared by every command.
#[derive(Args, Debug, Clone)]
struct SelectorArgs {
    /// Services or containers to act on; all services when empty.
    #[arg(value_name = "THING")]
    targets: Vec<String>,

    /// Act strictly on the named targets, never on dependencies.
    #[arg(short = 'o', long)]
    only: bool,

    /// Glob filter over container names.
    #[arg(short = 'C', long = "container-filter", value_name = "GLOB")]
    container_filter: Option<String>,

    /// Glob filter over ship names.
    #[arg(short = 'S', long = "ship-filter", value_name = "GLOB")]
    ship_filter: Option<String>,
}

impl SelectorArgs {
    fn filters(&self) -> SelectionFilters {
        SelectionFilters {
            container_pattern: self.container_filter.clone(),
            ship_pattern: self.ship_filter.clone(),
        }
    }
}

/// Ordering and concurrency flags shared by the mutating commands.
#[derive(Args, Debug, Clone)]
struct ConcurrencyArgs {
    /// Limit how many containers are acted on at the same time.
    #[arg(short = 'c', long, value_name = "LIMIT")]
    concurrency: Option<usize>,

    /// Include dependencies of the targets.
    #[arg(short = 'd', long)]
    with_dependencies: bool,

    /// Ignore dependency order.
    #[arg(short = 'i', long)]
    ignore_dependencies: bool,
}

/// Gating flags for destructive commands acting on whole services.
#[derive(Args, Debug, Clone)]
struct ExpandArgs {
    /// Confirm acting on every instance of the named services.
    #[arg(long)]
    expand_services: bool,

    /// Confirm acting on the entire environment.
    #[arg(long)]
    all: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Display container status.
    Status {
        #[command(flatten)]
        selector: SelectorArgs,

        #[command(flatten)]
        concurrency: ConcurrencyArgs,

        /// Also probe the external state of each named port.
        #[arg(short = 'F', long)]
        full: bool,
    },

    /// Pull container images onto their ships.
    Pull {
        #[command(flatten)]
        selector: SelectorArgs,

        #[command(flatten)]
        concurrency: ConcurrencyArgs,
    },

    /// Start services and containers.
    Start {
        #[command(flatten)]
        selector: SelectorArgs,

        #[command(flatten)]
        concurrency: ConcurrencyArgs,

        /// Pull images even when already present.
        #[arg(short = 'r', long)]
        refresh_images: bool,
    },

    /// Stop services and containers.
    Stop {
        #[command(flatten)]
        selector: SelectorArgs,

        #[command(flatten)]
        concurrency: ConcurrencyArgs,

        #[command(flatten)]
        expand: ExpandArgs,
    },

    /// Kill services and containers.
    Kill {
        #[command(flatten)]
        selector: SelectorArgs,

        #[command(flatten)]
        concurrency: ConcurrencyArgs,

        #[command(flatten)]
        expand: ExpandArgs,
    },

    /// Restart services and containers.
    Restart {
        #[command(flatten)]
        selector: SelectorArgs,

        #[command(flatten)]
        concurrency: ConcurrencyArgs,

        #[command(flatten)]
        expand: ExpandArgs,

        /// Pull images before restarting.
        #[arg(short = 'r', long)]
        refresh_images: bool,

        /// Keep the existing container when its image is unchanged.
        #[arg(long)]
        reuse: bool,

        /// Only restart containers whose image changed.
        #[arg(long)]
        only_if_changed: bool,
    },

    /// Remove stopped containers and their volumes.
    Clean {
        #[command(flatten)]
        selector: SelectorArgs,

        #[command(flatten)]
        concurrency: ConcurrencyArgs,

        #[command(flatten)]
        expand: ExpandArgs,
    },

    /// Show logs from a single container.
    Logs {
        /// The container to show logs for.
        #[arg(value_name = "CONTAINER")]
        container: String,

        /// Follow logs as they are produced.
        #[arg(short = 'F', long)]
        follow: bool,

        /// Only show the last LINES lines.
        #[arg(short = 'n', value_name = "LINES")]
        tail: Option<usize>,
    },

    /// Show the service dependency tree.
    Deptree {
        /// Services to show; all when empty.
        #[arg(value_name = "SERVICE")]
        services: Vec<String>,

        /// Recurse through transitive dependencies.
        #[arg(short = 'r', long)]
        recursive: bool,
    },
}

fn init_tracing(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("invalid log filter")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;
    }
    Ok(())
}

fn load_environment(file: &str) -> Result<LoadedEnvironment> {
    let vars: BTreeMap<String, String> = std::env::vars().collect();

    let loaded = if file == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("reading environment description from stdin")?;
        armada_loader::load_str(&text, Path::new("."), &vars)?
    } else {
        armada_loader::load_file(Path::new(file), &vars)?
    };

    info!(
        environment = %loaded.environment.name,
        ships = loaded.environment.ships.len(),
        services = loaded.environment.services.len(),
        containers = loaded.environment.containers.len(),
        "environment loaded"
    );

    Ok(loaded)
}

fn audit_trail(loaded: &LoadedEnvironment) -> AuditTrail {
    let mut trail = AuditTrail::new();
    let mut registered = false;
    for sink in &loaded.audit {
        match sink.kind.as_str() {
            "log" => {
                trail.register(Box::new(TracingAuditor), sink.ignore_errors);
                registered = true;
            }
            other => warn!(kind = %other, "unsupported audit sink type, skipping"),
        }
    }
    if !registered {
        trail.register(Box::new(TracingAuditor), true);
    }
    trail
}

/// Destructive commands acting on whole services (or on everything) must be
/// confirmed explicitly.
fn check_expansion(
    environment: &Environment,
    action: &str,
    selector: &SelectorArgs,
    expand: &ExpandArgs,
) -> Result<()> {
    if selector.targets.is_empty() {
        if !expand.all {
            bail!(
                "refusing to {} the entire environment; pass --all to confirm",
                action
            );
        }
        return Ok(());
    }

    let services: Vec<&String> = selector
        .targets
        .iter()
        .filter(|t| environment.services.contains_key(*t))
        .collect();
    if !services.is_empty() && !expand.expand_services && !expand.all {
        bail!(
            "{} expands to every instance of {}; pass --expand-services to confirm",
            action,
            services
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    Ok(())
}

fn play_options(selector: &SelectorArgs, concurrency: &ConcurrencyArgs) -> PlayOptions {
    PlayOptions {
        concurrency: concurrency.concurrency,
        with_dependencies: concurrency.with_dependencies && !selector.only,
        ignore_order: concurrency.ignore_dependencies,
        filters: selector.filters(),
    }
}

async fn run_play(
    environment: Arc<Environment>,
    audit: AuditTrail,
    action: Action,
    selector: &SelectorArgs,
    concurrency: &ConcurrencyArgs,
) -> Result<bool> {
    let provider: Arc<dyn RuntimeProvider> = Arc::new(DockerProvider::new());
    let play = Play::new(environment, provider)
        .with_progress(Arc::new(TracingProgress))
        .with_audit(audit);

    // Interrupts stop new layers; the current layer drains.
    let cancel = play.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight tasks");
            cancel.cancel();
        }
    });

    let options = play_options(selector, concurrency);
    let report = play.run(action, &selector.targets, &options).await?;
    Ok(output::print_report(&report))
}

async fn run(cli: Cli) -> Result<bool> {
    let loaded = load_environment(&cli.file)?;
    let audit = audit_trail(&loaded);
    let environment = Arc::new(loaded.environment);

    match cli.command {
        Command::Status {
            selector,
            concurrency,
            full,
        } => {
            let provider: Arc<dyn RuntimeProvider> = Arc::new(DockerProvider::new());
            let options = StatusOptions {
                concurrency: concurrency.concurrency,
                detailed: full,
                with_dependencies: concurrency.with_dependencies && !selector.only,
                filters: selector.filters(),
            };
            let rows = status(&environment, &provider, &selector.targets, &options).await?;
            output::print_status(&rows, full);
            Ok(false)
        }

        Command::Pull {
            selector,
            concurrency,
        } => run_play(environment, audit, Action::Pull, &selector, &concurrency).await,

        Command::Start {
            selector,
            concurrency,
            refresh_images,
        } => {
            run_play(
                environment,
                audit,
                Action::Start { refresh_images },
                &selector,
                &concurrency,
            )
            .await
        }

        Command::Stop {
            selector,
            concurrency,
            expand,
        } => {
            check_expansion(&environment, "stop", &selector, &expand)?;
            run_play(environment, audit, Action::Stop, &selector, &concurrency).await
        }

        Command::Kill {
            selector,
            concurrency,
            expand,
        } => {
            check_expansion(&environment, "kill", &selector, &expand)?;
            run_play(environment, audit, Action::Kill, &selector, &concurrency).await
        }

        Command::Restart {
            selector,
            concurrency,
            expand,
            refresh_images,
            reuse,
            only_if_changed,
        } => {
            check_expansion(&environment, "restart", &selector, &expand)?;
            run_play(
                environment,
                audit,
                Action::Restart {
                    refresh_images,
                    reuse,
                    only_if_changed,
                },
                &selector,
                &concurrency,
            )
            .await
        }

        Command::Clean {
            selector,
            concurrency,
            expand,
        } => {
            check_expansion(&environment, "clean", &selector, &expand)?;
            run_play(environment, audit, Action::Clean, &selector, &concurrency).await
        }

        Command::Logs {
            container,
            follow,
            tail,
        } => {
            let provider: Arc<dyn RuntimeProvider> = Arc::new(DockerProvider::new());
            let mut stream = stream_logs(&environment, &provider, &container, follow, tail).await?;
            while let Some(line) = stream.next().await {
                match line {
                    Ok(line) => print!("{}", line),
                    Err(err) => bail!("log stream interrupted: {err}"),
                }
            }
            Ok(false)
        }

        Command::Deptree {
            services,
            recursive,
        } => {
            let selected: Vec<String> = if services.is_empty() {
                environment.services.keys().cloned().collect()
            } else {
                for service in &services {
                    if !environment.services.contains_key(service) {
                        bail!("{} is not a service", service);
                    }
                }
                services
            };
            output::print_deptree(&environment, &selected, recursive);
            Ok(false)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_tracing(&cli.log_level, cli.json_logs) {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(false) => ExitCode::SUCCESS,
        Ok(true) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
