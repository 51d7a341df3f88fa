// warden-core/src/application/mod.rs

pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod stage;

// --- RE-EXPORTS (FACADE PATTERN) ---
// Le CLI fait `use warden_core::application::PipelineError;`
// sans connaître la structure interne des fichiers.

pub use error::{PipelineError, RecoveredIssue};
pub use gateway::{ExecutionFailure, ExecutionGateway, ExecutionOutcome};
pub use orchestrator::GovernanceOrchestrator;
pub use stage::{PipelineStage, StageTrail};
