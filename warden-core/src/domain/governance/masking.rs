// warden-core/src/domain/governance/masking.rs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::str::FromStr;

use crate::domain::error::DomainError;
use crate::domain::governance::configuration::MaskingSettings;
use crate::domain::governance::redaction::Redactor;
use crate::domain::governance::rule::{ColumnSecurityRule, MaskingConfig, RuleAction};

const HASH_PREFIX: &str = "hash_";
const HASH_BYTES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskingStrategy {
    Full,
    Partial,
    Hash,
    Redact,
    MaskEmail,
}

impl FromStr for MaskingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "partial" => Ok(Self::Partial),
            "hash" => Ok(Self::Hash),
            "redact" => Ok(Self::Redact),
            "mask_email" => Ok(Self::MaskEmail),
            _ => Err(format!("Unknown masking strategy: {}", s)),
        }
    }
}

impl std::fmt::Display for MaskingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Full => "full",
            Self::Partial => "partial",
            Self::Hash => "hash",
            Self::Redact => "redact",
            Self::MaskEmail => "mask_email",
        };
        write!(f, "{}", s)
    }
}

pub type Row = Map<String, Value>;

/// Positional result of masking a whole result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaskedTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub hidden_columns: usize,
    pub masked_columns: usize,
}

/// Applies resolved column rules to values. Output depends only on the
/// original value and the rule, so masking twice equals masking once.
pub struct MaskingEngine {
    settings: MaskingSettings,
    redactor: Redactor,
}

impl MaskingEngine {
    pub fn new(settings: &MaskingSettings) -> Result<Self, DomainError> {
        if settings.mask_token.is_empty() {
            return Err(DomainError::MaskingConfiguration(
                "mask token cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            settings: settings.clone(),
            redactor: Redactor::new(&settings.redact_patterns)?,
        })
    }

    pub fn apply_row(&self, row: &Row, rules: &[ColumnSecurityRule]) -> Row {
        let mut masked = Map::with_capacity(row.len());
        for (column, value) in row {
            match rule_for(column, rules) {
                Some(rule) if rule.action == RuleAction::Hide => {}
                Some(rule) => {
                    masked.insert(column.clone(), self.apply_value(value, rule));
                }
                None => {
                    masked.insert(column.clone(), value.clone());
                }
            }
        }
        masked
    }

    pub fn apply_rows(&self, rows: &[Row], rules: &[ColumnSecurityRule]) -> Vec<Row> {
        rows.iter().map(|row| self.apply_row(row, rules)).collect()
    }

    /// Column-ordered variant: duplicate column names stay distinct, hidden
    /// columns vanish from the header and from every row.
    pub fn apply_table(
        &self,
        columns: &[String],
        rows: &[Vec<Value>],
        rules: &[ColumnSecurityRule],
    ) -> MaskedTable {
        let treatments: Vec<Option<&ColumnSecurityRule>> =
            columns.iter().map(|c| rule_for(c, rules)).collect();

        let mut table = MaskedTable::default();
        for (column, treatment) in columns.iter().zip(&treatments) {
            match treatment.map(|rule| rule.action) {
                Some(RuleAction::Hide) => {
                    table.hidden_columns += 1;
                    continue;
                }
                Some(RuleAction::Mask | RuleAction::PartialMask) => table.masked_columns += 1,
                _ => {}
            }
            table.columns.push(column.clone());
        }

        table.rows = rows
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&treatments)
                    .filter_map(|(value, treatment)| match treatment {
                        Some(rule) if rule.action == RuleAction::Hide => None,
                        Some(rule) => Some(self.apply_value(value, rule)),
                        None => Some(value.clone()),
                    })
                    .collect()
            })
            .collect();
        table
    }

    /// Hide has no value-level effect; callers drop the column.
    pub fn apply_value(&self, value: &Value, rule: &ColumnSecurityRule) -> Value {
        let config = rule.masking_config.as_ref();
        match rule.action {
            RuleAction::ReadOnly | RuleAction::Hide => value.clone(),
            RuleAction::PartialMask => self.apply_strategy(MaskingStrategy::Partial, value, config),
            RuleAction::Mask => {
                let strategy = rule.masking_type.unwrap_or(MaskingStrategy::Full);
                self.apply_strategy(strategy, value, config)
            }
        }
    }

    pub fn apply_strategy(
        &self,
        strategy: MaskingStrategy,
        value: &Value,
        config: Option<&MaskingConfig>,
    ) -> Value {
        let text: Cow<'_, str> = match value {
            Value::Null => return Value::Null,
            Value::String(s) => Cow::Borrowed(s.as_str()),
            other => Cow::Owned(other.to_string()),
        };

        match strategy {
            MaskingStrategy::Redact => match self.redactor.redact(&text) {
                Some(redacted) => Value::String(redacted),
                None => value.clone(),
            },
            MaskingStrategy::Full => Value::String(self.settings.mask_token.clone()),
            MaskingStrategy::Partial => Value::String(self.partial(&text, config)),
            MaskingStrategy::Hash => Value::String(self.hash(&text)),
            MaskingStrategy::MaskEmail => Value::String(self.mask_email(&text)),
        }
    }

    fn partial(&self, text: &str, config: Option<&MaskingConfig>) -> String {
        let prefix = config
            .and_then(|c| c.prefix)
            .unwrap_or(self.settings.visible_prefix);
        let suffix = config
            .and_then(|c| c.suffix)
            .unwrap_or(self.settings.visible_suffix);
        let mask_char = config
            .and_then(|c| c.mask_char)
            .unwrap_or(self.settings.mask_char);

        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= prefix + suffix {
            return std::iter::repeat_n(mask_char, chars.len()).collect();
        }
        let middle = chars.len() - prefix - suffix;
        chars[..prefix]
            .iter()
            .copied()
            .chain(std::iter::repeat_n(mask_char, middle))
            .chain(chars[chars.len() - suffix..].iter().copied())
            .collect()
    }

    fn hash(&self, text: &str) -> String {
        if is_hash_token(text) {
            return text.to_string();
        }
        let mut hasher = Sha256::new();
        hasher.update(self.settings.hash_salt.as_bytes());
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();
        format!("{HASH_PREFIX}{}", hex::encode(&digest[..HASH_BYTES]))
    }

    fn mask_email(&self, text: &str) -> String {
        match text.split_once('@') {
            Some((local, domain)) if !domain.is_empty() => match local.chars().next() {
                Some(first) => {
                    let stars: String = std::iter::repeat_n(self.settings.mask_char, 4).collect();
                    format!("{first}{stars}@{domain}")
                }
                None => self.settings.mask_token.clone(),
            },
            _ => self.settings.mask_token.clone(),
        }
    }
}

fn is_hash_token(text: &str) -> bool {
    text.strip_prefix(HASH_PREFIX).is_some_and(|hex| {
        hex.len() == HASH_BYTES * 2 && hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    })
}

/// The strongest rule on `column`; the resolver normally leaves only one.
pub(crate) fn rule_for<'r>(column: &str, rules: &'r [ColumnSecurityRule]) -> Option<&'r ColumnSecurityRule> {
    rules
        .iter()
        .filter(|rule| rule.matches_column(column))
        .max_by_key(|rule| rule.rank())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::governance::rule::RuleScope;
    use anyhow::Result;
    use serde_json::json;

    fn engine() -> MaskingEngine {
        MaskingEngine::new(&MaskingSettings::default()).unwrap()
    }

    fn rule(column: &str, action: RuleAction, masking_type: Option<MaskingStrategy>) -> ColumnSecurityRule {
        ColumnSecurityRule {
            tenant_id: "t1".into(),
            resource: "crm".into(),
            column: column.into(),
            scope: RuleScope::Global,
            scope_id: None,
            action,
            masking_type,
            masking_config: None,
        }
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_hidden_key_is_absent_not_null() {
        let rules = vec![rule("salary", RuleAction::Hide, None)];
        let masked = engine().apply_row(&row(json!({"name": "Ann", "salary": null})), &rules);
        assert!(!masked.contains_key("salary"));
        assert_eq!(masked["name"], "Ann");
    }

    #[test]
    fn test_full_mask_and_nulls() {
        let rules = vec![rule("SSN", RuleAction::Mask, None)];
        let engine = engine();
        let masked = engine.apply_rows(
            &[row(json!({"ssn": "123-45-6789"})), row(json!({"ssn": null})), row(json!({"ssn": 42}))],
            &rules,
        );
        assert_eq!(masked[0]["ssn"], "****");
        assert_eq!(masked[1]["ssn"], Value::Null);
        assert_eq!(masked[2]["ssn"], "****");
    }

    #[test]
    fn test_partial_mask() {
        let engine = engine();
        let card = rule("card", RuleAction::PartialMask, None);
        assert_eq!(engine.apply_value(&json!("4111111111111111"), &card), json!("************1111"));

        let mut short = rule("code", RuleAction::PartialMask, None);
        short.masking_config = Some(MaskingConfig {
            prefix: Some(2),
            suffix: Some(2),
            mask_char: Some('#'),
        });
        assert_eq!(engine.apply_value(&json!("abcd"), &short), json!("####"));
        assert_eq!(engine.apply_value(&json!("abcdef"), &short), json!("ab##ef"));
        assert_eq!(engine.apply_value(&json!("éèêë€"), &short), json!("éè#ë€"));
    }

    #[test]
    fn test_hash_is_deterministic_and_salted() -> Result<()> {
        let hashed = rule("email", RuleAction::Mask, Some(MaskingStrategy::Hash));
        let a = engine().apply_value(&json!("ann@example.com"), &hashed);
        let b = engine().apply_value(&json!("ann@example.com"), &hashed);
        assert_eq!(a, b);
        let token = a.as_str().unwrap();
        assert!(token.starts_with("hash_"));
        assert_eq!(token.len(), 5 + 16);

        let salted = MaskingEngine::new(&MaskingSettings {
            hash_salt: "pepper".into(),
            ..MaskingSettings::default()
        })?;
        assert_ne!(salted.apply_value(&json!("ann@example.com"), &hashed), a);
        Ok(())
    }

    #[test]
    fn test_redact_and_mask_email() {
        let engine = engine();
        let redacted = rule("notes", RuleAction::Mask, Some(MaskingStrategy::Redact));
        assert_eq!(
            engine.apply_value(&json!("reach me at ann@example.com"), &redacted),
            json!("reach me at [EMAIL]")
        );
        assert_eq!(engine.apply_value(&json!(42), &redacted), json!(42));

        let email = rule("email", RuleAction::Mask, Some(MaskingStrategy::MaskEmail));
        assert_eq!(engine.apply_value(&json!("ann@example.com"), &email), json!("a****@example.com"));
        assert_eq!(engine.apply_value(&json!("not-an-email"), &email), json!("****"));
    }

    #[test]
    fn test_every_strategy_is_idempotent() {
        let engine = engine();
        let values = [
            json!("ann@example.com"),
            json!("call +1 (555) 010-9999"),
            json!("x"),
            json!(""),
            json!(1234567),
            json!(true),
            Value::Null,
        ];
        let mut rules = vec![
            rule("c", RuleAction::Mask, None),
            rule("c", RuleAction::PartialMask, None),
            rule("c", RuleAction::ReadOnly, None),
        ];
        for strategy in [
            MaskingStrategy::Full,
            MaskingStrategy::Partial,
            MaskingStrategy::Hash,
            MaskingStrategy::Redact,
            MaskingStrategy::MaskEmail,
        ] {
            rules.push(rule("c", RuleAction::Mask, Some(strategy)));
        }

        for rule in &rules {
            for value in &values {
                let once = engine.apply_value(value, rule);
                let twice = engine.apply_value(&once, rule);
                assert_eq!(once, twice, "{:?} / {:?}", rule.action, rule.masking_type);
            }
        }
    }

    #[test]
    fn test_table_keeps_duplicate_columns_and_drops_hidden() {
        let rules = vec![
            rule("id", RuleAction::ReadOnly, None),
            rule("ssn", RuleAction::Hide, None),
            rule("name", RuleAction::Mask, None),
        ];
        let columns = vec!["id".to_string(), "ssn".to_string(), "name".to_string(), "name".to_string()];
        let rows = vec![vec![json!(1), json!("123-45-6789"), json!("Ann"), json!("Bob")]];

        let table = engine().apply_table(&columns, &rows, &rules);
        assert_eq!(table.columns, vec!["id", "name", "name"]);
        assert_eq!(table.rows, vec![vec![json!(1), json!("****"), json!("****")]]);
        assert_eq!(table.hidden_columns, 1);
        assert_eq!(table.masked_columns, 2);
    }

    #[test]
    fn test_strategy_names() -> Result<()> {
        for name in ["full", "partial", "hash", "redact", "mask_email"] {
            let strategy: MaskingStrategy = name.parse().map_err(anyhow::Error::msg)?;
            assert_eq!(strategy.to_string(), name);
        }
        assert!("nullify".parse::<MaskingStrategy>().is_err());
        Ok(())
    }
}
