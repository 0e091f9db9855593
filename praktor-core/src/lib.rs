//! # praktor-core
//!
//! The run-time kernel behind Praktor's gateway: the agent registry,
//! the message router, the task scheduler, the secret vault,
//! the swarm coordinator, and the orchestrator that ties
//! them to a running fleet of agent containers.
//!
//! ## Main modules
//!
//! - [`registry`]: [`registry::AgentDefinition`], [`registry::RegistrySnapshot`],
//!   [`registry::Registry`] — the atomically-swappable set of configured agents.
//! - [`router`]: [`router::route`], [`router::RouteQuerier`] — explicit `@name`
//!   parsing and model-driven smart routing.
//! - [`scheduler`]: [`scheduler::Scheduler`], [`scheduler::Schedule`],
//!   [`scheduler::TaskDispatcher`] — due-task polling and dispatch.
//! - [`vault`]: [`vault::Vault`] — AES-256-GCM secret storage, env/file/JSON
//!   reference resolution, and output redaction.
//! - [`swarm`]: [`swarm::build_plan`], [`swarm::SwarmCoordinator`] — multi-agent
//!   collaboration planning and execution.
//! - [`orchestrator`]: [`orchestrator::Orchestrator`] — per-agent FIFO message
//!   queues, lazy container lifecycle, IPC dispatch, idle reaping.

pub mod orchestrator;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod swarm;
pub mod vault;

pub use orchestrator::{
    FileListener, Orchestrator, OrchestratorError, OutputListener, ReadyConfig, SwarmChatLookup, SwarmLaunchEdge,
    SwarmLaunchNode, SwarmLaunchRequest, SwarmLauncher,
};
pub use registry::{
    diff, validate, AgentDefinition, Defaults, FileMount, Registry, RegistryDiff, RegistryError,
    RegistrySnapshot,
};
pub use router::{route, RouteQuerier, Routed};
pub use scheduler::{normalize, Schedule, ScheduleError, Scheduler, TaskDispatcher};
pub use swarm::{build_plan, Plan, SwarmCoordinator, SwarmEdge, SwarmError, SwarmNode};
pub use vault::{Vault, VaultError};

/// Initializes tracing from `RUST_LOG` so unit tests across `src/**` can
/// print logs with `--nocapture`.
#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(filter),
            )
            .try_init();
    }
}
