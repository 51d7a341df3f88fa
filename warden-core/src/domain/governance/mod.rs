// warden-core/src/domain/governance/mod.rs

pub mod cache;
pub mod configuration;
pub mod lineage;
pub mod masking;
pub mod redaction;
pub mod resolver;
pub mod rule;

// Re-exports
pub use cache::RuleCache;
pub use configuration::{GovernanceSettings, MaskingSettings, RedactPattern};
pub use lineage::ColumnLineage;
pub use masking::{MaskedTable, MaskingEngine, MaskingStrategy, Row};
pub use redaction::Redactor;
pub use resolver::{ResolveError, RuleResolver, SecurityContext};
pub use rule::{ColumnSecurityRule, MaskingConfig, RuleAction, RuleScope};
