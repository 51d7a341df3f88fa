// warden-core/src/domain/governance/rule.rs

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::error::DomainError;
use crate::domain::governance::masking::MaskingStrategy;

/// Who a rule targets. Declared from weakest to strongest precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    Global,
    Role,
    OrgUnit,
    User,
}

/// What a rule does to a column. Declared from least to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    ReadOnly,
    PartialMask,
    Mask,
    Hide,
}

impl RuleAction {
    /// Whether the action changes or removes the values a caller receives.
    pub fn restricts_output(self) -> bool {
        self != Self::ReadOnly
    }
}

impl fmt::Display for RuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Global => "global",
            Self::Role => "role",
            Self::OrgUnit => "org_unit",
            Self::User => "user",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ReadOnly => "read_only",
            Self::PartialMask => "partial_mask",
            Self::Mask => "mask",
            Self::Hide => "hide",
        };
        write!(f, "{}", s)
    }
}

/// Per-rule overrides of the engine's masking settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_char: Option<char>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSecurityRule {
    pub tenant_id: String,
    pub resource: String,
    pub column: String,
    pub scope: RuleScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    pub action: RuleAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub masking_type: Option<MaskingStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub masking_config: Option<MaskingConfig>,
}

impl ColumnSecurityRule {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.column.trim().is_empty() {
            return Err(DomainError::RuleConfiguration(format!(
                "rule on resource '{}' has no column",
                self.resource
            )));
        }
        match (self.scope, &self.scope_id) {
            (RuleScope::Global, Some(id)) => Err(DomainError::RuleConfiguration(format!(
                "global rule on '{}' must not carry scope_id '{}'",
                self.column, id
            ))),
            (RuleScope::Global, None) => Ok(()),
            (scope, None) => Err(DomainError::RuleConfiguration(format!(
                "{} rule on '{}' needs a scope_id",
                scope, self.column
            ))),
            (scope, Some(id)) if id.trim().is_empty() => Err(DomainError::RuleConfiguration(
                format!("{} rule on '{}' has an empty scope_id", scope, self.column),
            )),
            _ => Ok(()),
        }
    }

    pub fn matches_column(&self, column: &str) -> bool {
        self.column.eq_ignore_ascii_case(column)
    }

    /// Precedence first, then restrictiveness: the greater rule wins.
    pub fn rank(&self) -> (RuleScope, RuleAction) {
        (self.scope, self.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_ordering_encodes_precedence() {
        assert!(RuleScope::User > RuleScope::OrgUnit);
        assert!(RuleScope::OrgUnit > RuleScope::Role);
        assert!(RuleScope::Role > RuleScope::Global);
        assert!(RuleAction::Hide > RuleAction::Mask);
        assert!(RuleAction::Mask > RuleAction::PartialMask);
        assert!(RuleAction::PartialMask > RuleAction::ReadOnly);
    }

    #[test]
    fn test_rule_from_yaml() -> Result<()> {
        let rule: ColumnSecurityRule = serde_yaml::from_str(
            "tenant_id: t1\nresource: crm\ncolumn: ssn\nscope: user\nscope_id: u1\naction: partial_mask\n\
             masking_config:\n  prefix: 0\n  suffix: 4\n",
        )?;
        assert_eq!(rule.scope, RuleScope::User);
        assert_eq!(rule.action, RuleAction::PartialMask);
        assert_eq!(rule.masking_config.and_then(|c| c.suffix), Some(4));
        Ok(())
    }

    #[test]
    fn test_scope_id_consistency() {
        let mut rule = ColumnSecurityRule {
            tenant_id: "t1".into(),
            resource: "crm".into(),
            column: "ssn".into(),
            scope: RuleScope::Role,
            scope_id: None,
            action: RuleAction::Mask,
            masking_type: None,
            masking_config: None,
        };
        assert!(rule.validate().is_err());
        rule.scope_id = Some("analyst".into());
        assert!(rule.validate().is_ok());
        rule.scope = RuleScope::Global;
        assert!(rule.validate().is_err());
    }
}
