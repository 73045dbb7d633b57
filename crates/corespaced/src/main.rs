//! corespaced — operator front end for the corespace scheduler.
//!
//! Opens the registry, records services and pending requests, and runs
//! placements against it.
//!
//! # Usage
//!
//! ```text
//! corespaced --data-dir /var/lib/corespace service register host-a compute
//! corespaced instance create i-1 --vcpus 4 --local-gb 40
//! corespaced schedule instance i-1
//! corespaced capacity
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use corespace_scheduler::{PlacementScheduler, RequestContext, SchedulerConfig};
use corespace_state::{ResourceKind, StateStore};

mod commands;

#[derive(Parser)]
#[command(
    name = "corespaced",
    about = "corespace placement scheduler",
    version,
    propagate_version = true
)]
struct Cli {
    /// Scheduler config file (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for the registry database.
    #[arg(long, global = true, default_value = "/var/lib/corespace")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage host services.
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },
    /// Manage compute instances.
    Instance {
        #[command(subcommand)]
        action: InstanceAction,
    },
    /// Manage storage volumes.
    Volume {
        #[command(subcommand)]
        action: VolumeAction,
    },
    /// Manage networks.
    Network {
        #[command(subcommand)]
        action: NetworkAction,
    },
    /// Place a pending request on a host.
    Schedule {
        #[command(subcommand)]
        target: ScheduleTarget,
        /// Act as a privileged caller, honoring `zone:host` pins.
        #[arg(long, global = true)]
        admin: bool,
    },
    /// Show the disk figures an admission check would use.
    Capacity,
}

#[derive(Subcommand)]
enum ServiceAction {
    /// Register (or re-enable) a service and record a heartbeat.
    Register { host: String, kind: ResourceKind },
    /// Record a heartbeat for an existing service.
    Heartbeat { host: String, kind: ResourceKind },
    /// Stop offering a service as a placement candidate.
    Disable { host: String, kind: ResourceKind },
    /// List services of one kind with their liveness.
    List { kind: ResourceKind },
}

#[derive(Subcommand)]
enum InstanceAction {
    /// Record a pending instance.
    Create {
        id: String,
        #[arg(long)]
        vcpus: u64,
        #[arg(long, default_value = "0")]
        local_gb: u64,
        /// `zone` or `zone:host`.
        #[arg(long)]
        zone: Option<String>,
    },
    List,
}

#[derive(Subcommand)]
enum VolumeAction {
    /// Record a pending volume.
    Create {
        id: String,
        #[arg(long)]
        size_gb: u64,
        #[arg(long)]
        zone: Option<String>,
    },
    List,
}

#[derive(Subcommand)]
enum NetworkAction {
    /// Record a network awaiting a host.
    Create { id: String },
    List,
}

#[derive(Subcommand)]
enum ScheduleTarget {
    /// Place a new instance.
    Instance { id: String },
    /// Place a stopped instance that is starting again.
    StartInstance { id: String },
    Volume { id: String },
    /// Bind a network to a network host.
    Network { id: String },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,corespace=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SchedulerConfig::from_file(path)?,
        None => SchedulerConfig::default(),
    };

    std::fs::create_dir_all(&cli.data_dir)?;
    let db_path = cli.data_dir.join("corespace.redb");
    let store = StateStore::open(&db_path)?.with_service_down_time(config.service_down_time());
    info!(path = ?db_path, "registry opened");

    match cli.command {
        Command::Service { action } => match action {
            ServiceAction::Register { host, kind } => {
                commands::service::register(&store, &host, kind)
            }
            ServiceAction::Heartbeat { host, kind } => {
                commands::service::heartbeat(&store, &host, kind)
            }
            ServiceAction::Disable { host, kind } => {
                commands::service::disable(&store, &host, kind)
            }
            ServiceAction::List { kind } => commands::service::list(&store, kind),
        },
        Command::Instance { action } => match action {
            InstanceAction::Create {
                id,
                vcpus,
                local_gb,
                zone,
            } => commands::request::create_instance(&store, id, vcpus, local_gb, zone),
            InstanceAction::List => commands::request::print_json(&store.list_instances()?),
        },
        Command::Volume { action } => match action {
            VolumeAction::Create { id, size_gb, zone } => {
                commands::request::create_volume(&store, id, size_gb, zone)
            }
            VolumeAction::List => commands::request::print_json(&store.list_volumes()?),
        },
        Command::Network { action } => match action {
            NetworkAction::Create { id } => commands::request::create_network(&store, id),
            NetworkAction::List => commands::request::print_json(&store.list_networks()?),
        },
        Command::Schedule { target, admin } => {
            let scheduler = PlacementScheduler::new(store, Arc::new(config))?;
            let ctx = if admin {
                RequestContext::admin()
            } else {
                RequestContext::user()
            };
            let outcome = match &target {
                ScheduleTarget::Instance { id } => scheduler.schedule_run_instance(ctx, id),
                ScheduleTarget::StartInstance { id } => scheduler.schedule_start_instance(ctx, id),
                ScheduleTarget::Volume { id } => scheduler.schedule_create_volume(ctx, id),
                ScheduleTarget::Network { id } => scheduler.schedule_set_network_host(ctx, id),
            };
            commands::schedule::report(outcome)
        }
        Command::Capacity => {
            let scheduler = PlacementScheduler::new(store, Arc::new(config))?;
            commands::schedule::capacity(&scheduler)
        }
    }
}
