//! Built-in specialist workers.
//!
//! Each worker declares a closed operation enum parsed from the task type
//! and payload, and dispatches with a total match. Collaborator handles
//! (bus, board, LLM) arrive at construction through [`WorkerContext`];
//! absence of a collaborator degrades the worker's output, never its
//! availability.

pub mod blockchain;
pub mod data;
pub mod maths;
pub mod monitoring;
pub mod pattern;
pub mod security;
pub mod treasury;

use std::sync::Arc;

use hive_shared::board::KnowledgeBoard;
use hive_shared::llm::LlmClient;
use hive_shared::messaging::BusClient;

pub use blockchain::BlockchainWorker;
pub use data::DataWorker;
pub use maths::MathsWorker;
pub use monitoring::MonitoringWorker;
pub use pattern::PatternWorker;
pub use security::SecurityWorker;
pub use treasury::TreasuryWorker;

/// Collaborators handed to every worker at construction.
#[derive(Debug, Clone, Default)]
pub struct WorkerContext {
    pub bus: Option<BusClient>,
    pub board: Option<Arc<KnowledgeBoard>>,
    pub llm: Option<LlmClient>,
}

impl WorkerContext {
    /// Context with no collaborators, for tests and standalone use.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_board(mut self, board: Arc<KnowledgeBoard>) -> Self {
        self.board = Some(board);
        self
    }

    pub fn with_bus(mut self, bus: BusClient) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_llm(mut self, llm: LlmClient) -> Self {
        self.llm = Some(llm);
        self
    }
}
