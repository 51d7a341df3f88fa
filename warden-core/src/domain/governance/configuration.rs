// warden-core/src/domain/governance/configuration.rs

use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::domain::tenancy::DEFAULT_DENIED_KEYWORDS;

/// Knobs of the query pipeline, read from the `governance:` block of the
/// project file.
#[derive(Debug, Deserialize, Serialize, Validate, Clone, PartialEq)]
pub struct GovernanceSettings {
    /// Hard cap on returned rows, whatever the query says.
    #[validate(range(min = 1, max = 1_000_000))]
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,

    #[validate(range(min = 1))]
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    #[serde(default = "default_true")]
    pub optimize_by_default: bool,

    #[validate(custom(function = "validate_keywords"))]
    #[serde(default = "default_denied_keywords")]
    pub denied_keywords: Vec<String>,

    /// 0 disables the rule cache.
    #[serde(default = "default_rule_cache_ttl_secs")]
    pub rule_cache_ttl_secs: u64,

    #[validate(range(min = 1))]
    #[serde(default = "default_rule_cache_capacity")]
    pub rule_cache_capacity: usize,

    #[validate(range(min = 1, max = 256))]
    #[serde(default = "default_max_concurrent_queries")]
    pub max_concurrent_queries_per_source: usize,

    #[validate(range(min = 1))]
    #[serde(default = "default_log_excerpt_chars")]
    pub log_excerpt_chars: usize,

    #[validate(nested)]
    #[serde(default)]
    pub masking: MaskingSettings,
}

#[derive(Debug, Deserialize, Serialize, Validate, Clone, PartialEq)]
pub struct MaskingSettings {
    #[validate(length(min = 1, message = "mask token cannot be empty"))]
    #[serde(default = "default_mask_token")]
    pub mask_token: String,

    #[serde(default = "default_mask_char")]
    pub mask_char: char,

    #[serde(default)]
    pub visible_prefix: usize,

    #[serde(default = "default_visible_suffix")]
    pub visible_suffix: usize,

    #[serde(default)]
    pub hash_salt: String,

    /// Extra patterns scrubbed by the `redact` strategy, tried before the
    /// built-in e-mail, national id and phone patterns.
    #[validate(nested)]
    #[validate(custom(function = "validate_unique_pattern_names"))]
    #[serde(default)]
    pub redact_patterns: Vec<RedactPattern>,
}

#[derive(Debug, Deserialize, Serialize, Validate, Clone, PartialEq)]
pub struct RedactPattern {
    #[validate(length(min = 1, message = "pattern name cannot be empty"))]
    pub name: String,

    #[validate(length(min = 1, message = "Regex cannot be empty"))]
    #[validate(custom(function = "validate_regex"))]
    pub regex: String,
}

fn default_max_rows() -> usize {
    1_000
}

fn default_query_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_denied_keywords() -> Vec<String> {
    DEFAULT_DENIED_KEYWORDS.iter().map(|k| k.to_string()).collect()
}

fn default_rule_cache_ttl_secs() -> u64 {
    60
}

fn default_rule_cache_capacity() -> usize {
    1_024
}

fn default_max_concurrent_queries() -> usize {
    4
}

fn default_log_excerpt_chars() -> usize {
    500
}

fn default_mask_token() -> String {
    "****".to_string()
}

fn default_mask_char() -> char {
    '*'
}

fn default_visible_suffix() -> usize {
    4
}

impl Default for GovernanceSettings {
    fn default() -> Self {
        Self {
            max_rows: default_max_rows(),
            query_timeout_ms: default_query_timeout_ms(),
            optimize_by_default: true,
            denied_keywords: default_denied_keywords(),
            rule_cache_ttl_secs: default_rule_cache_ttl_secs(),
            rule_cache_capacity: default_rule_cache_capacity(),
            max_concurrent_queries_per_source: default_max_concurrent_queries(),
            log_excerpt_chars: default_log_excerpt_chars(),
            masking: MaskingSettings::default(),
        }
    }
}

impl Default for MaskingSettings {
    fn default() -> Self {
        Self {
            mask_token: default_mask_token(),
            mask_char: default_mask_char(),
            visible_prefix: 0,
            visible_suffix: default_visible_suffix(),
            hash_salt: String::new(),
            redact_patterns: vec![],
        }
    }
}

fn validate_keywords(keywords: &[String]) -> Result<(), ValidationError> {
    for keyword in keywords {
        if keyword.is_empty() || !keyword.chars().all(|c| c.is_ascii_alphabetic() || c == '_') {
            let mut error = ValidationError::new("denied_keyword");
            error.message = Some(format!("'{}' is not a single SQL keyword", keyword).into());
            return Err(error);
        }
    }
    Ok(())
}

fn validate_regex(regex: &str) -> Result<(), ValidationError> {
    Regex::new(regex).map(|_| ()).map_err(|e| {
        let mut error = ValidationError::new("regex");
        error.message = Some(e.to_string().into());
        error
    })
}

fn validate_unique_pattern_names(patterns: &[RedactPattern]) -> Result<(), ValidationError> {
    let mut seen = std::collections::HashSet::new();
    for pattern in patterns {
        if !seen.insert(pattern.name.to_lowercase()) {
            let mut error = ValidationError::new("duplicate_pattern");
            error.message = Some(format!("redact pattern '{}' is defined twice", pattern.name).into());
            return Err(error);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_defaults_are_valid() {
        let settings = GovernanceSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.max_rows, 1_000);
        assert!(settings.denied_keywords.iter().any(|k| k == "DROP"));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() -> Result<()> {
        let settings: GovernanceSettings =
            serde_yaml::from_str("max_rows: 50\nmasking:\n  mask_token: '[hidden]'\n")?;
        assert_eq!(settings.max_rows, 50);
        assert_eq!(settings.query_timeout_ms, 30_000);
        assert_eq!(settings.masking.mask_token, "[hidden]");
        assert_eq!(settings.masking.mask_char, '*');
        Ok(())
    }

    #[test]
    fn test_out_of_range_and_bad_patterns_are_rejected() -> Result<()> {
        let zero_rows: GovernanceSettings = serde_yaml::from_str("max_rows: 0")?;
        assert!(zero_rows.validate().is_err());

        let bad_keyword: GovernanceSettings = serde_yaml::from_str("denied_keywords: ['DROP TABLE']")?;
        assert!(bad_keyword.validate().is_err());

        let bad_regex: GovernanceSettings = serde_yaml::from_str(
            "masking:\n  redact_patterns:\n    - name: iban\n      regex: '[unclosed'\n",
        )?;
        assert!(bad_regex.validate().is_err());
        Ok(())
    }
}
