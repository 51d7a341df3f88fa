// warden-core/src/application/stage.rs

use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// Where a request stands in the governance pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    Validated,
    Secured,
    Optimized,
    Executed,
    Masked,
    Logged,
    Returned,
    Rejected,
}

impl PipelineStage {
    pub fn can_transition_to(&self, next: &PipelineStage) -> bool {
        match (self, next) {
            // Happy path (optimization is optional)
            (Self::Received, Self::Validated) => true,
            (Self::Validated, Self::Secured) => true,
            (Self::Secured, Self::Optimized | Self::Executed) => true,
            (Self::Optimized, Self::Executed) => true,
            (Self::Executed, Self::Masked) => true,
            (Self::Masked, Self::Logged) => true,
            (Self::Logged, Self::Returned) => true,

            // Rejections before anything ran
            (Self::Received | Self::Validated | Self::Secured | Self::Optimized, Self::Rejected) => true,

            // Failed execution (or rule loading) is logged, then rejected
            (Self::Executed, Self::Logged) => true,
            (Self::Logged, Self::Rejected) => true,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Returned | Self::Rejected)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::Secured => "secured",
            Self::Optimized => "optimized",
            Self::Executed => "executed",
            Self::Masked => "masked",
            Self::Logged => "logged",
            Self::Returned => "returned",
            Self::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

/// The stages one request went through, in order.
#[derive(Debug, Clone)]
pub struct StageTrail {
    stages: Vec<PipelineStage>,
}

impl Default for StageTrail {
    fn default() -> Self {
        Self::new()
    }
}

impl StageTrail {
    pub fn new() -> Self {
        Self {
            stages: vec![PipelineStage::Received],
        }
    }

    pub fn current(&self) -> PipelineStage {
        self.stages.last().copied().unwrap_or(PipelineStage::Received)
    }

    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    /// Records `next`. An illegal edge is traced and refused, leaving the
    /// trail where it was.
    pub fn advance(&mut self, next: PipelineStage) -> bool {
        let current = self.current();
        if !current.can_transition_to(&next) {
            warn!(from = %current, to = %next, "Illegal pipeline transition refused");
            return false;
        }
        debug!(from = %current, to = %next, "Pipeline transition");
        self.stages.push(next);
        true
    }
}
