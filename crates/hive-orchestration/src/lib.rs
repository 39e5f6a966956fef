//! # hive-orchestration
//!
//! Everything above the shared foundation: the worker registry and
//! dispatcher, the consensus engine, the proposal lifecycle, the stateless
//! instance lifecycle, the admin push channel, and the supervisor that
//! owns them all.
//!
//! Initialization order is fixed: Config -> Bus -> Board -> Security
//! Pipeline -> Registry (-> wiring pass) -> Push Channel -> Supervisor.
//! The server binary follows it exactly.

pub mod consensus;
pub mod dispatcher;
pub mod lifecycle;
pub mod proposals;
pub mod realtime;
pub mod registry;
pub mod supervisor;

pub use consensus::{ConsensusEngine, Vote, VoteChoice, VoteOutcome};
pub use dispatcher::{Dispatcher, RouteHint};
pub use lifecycle::InstanceLifecycle;
pub use registry::{FleetHealth, WorkerRegistry};
pub use supervisor::Supervisor;
