// warden-core/src/domain/governance/redaction.rs

use regex::Regex;

use crate::domain::error::DomainError;
use crate::domain::governance::configuration::RedactPattern;

// National ids are tried before phones: an SSN also looks like a phone number.
const BUILTIN_PATTERNS: [(&str, &str); 3] = [
    ("EMAIL", r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}"),
    ("NATIONAL_ID", r"\b\d{3}-\d{2}-\d{4}\b"),
    ("PHONE", r"\+?\(?\d[\d .()-]{7,}\d"),
];

/// A sensitive substring found in a value.
/// Borrows the scanned text and the pattern name; nothing is copied.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding<'a> {
    pub pattern: &'a str,
    pub matched_value: &'a str,
}

struct CompiledPattern {
    name: String,
    placeholder: String,
    regex: Regex,
}

/// Pattern-based scrubbing of e-mail, national id and phone shaped text,
/// whatever column it appears in.
pub struct Redactor {
    patterns: Vec<CompiledPattern>,
}

impl Redactor {
    /// Compiles `custom` patterns ahead of the built-in ones, so a specific
    /// pattern wins over the generic phone shape.
    pub fn new(custom: &[RedactPattern]) -> Result<Self, DomainError> {
        let builtin = BUILTIN_PATTERNS
            .iter()
            .map(|(name, regex)| (name.to_string(), regex.to_string()));
        let configured = custom
            .iter()
            .map(|p| (p.name.to_uppercase(), p.regex.clone()));

        let mut patterns = Vec::with_capacity(BUILTIN_PATTERNS.len() + custom.len());
        for (name, regex) in configured.chain(builtin) {
            let regex = Regex::new(&regex).map_err(|e| {
                DomainError::MaskingConfiguration(format!("redact pattern '{}': {}", name, e))
            })?;
            patterns.push(CompiledPattern {
                placeholder: format!("[{}]", name),
                name,
                regex,
            });
        }
        Ok(Self { patterns })
    }

    pub fn scan<'a>(&'a self, text: &'a str) -> Vec<Finding<'a>> {
        self.patterns
            .iter()
            .flat_map(|pattern| {
                pattern.regex.find_iter(text).map(move |m| Finding {
                    pattern: &pattern.name,
                    matched_value: m.as_str(),
                })
            })
            .collect()
    }

    /// `None` when nothing sensitive was found.
    pub fn redact(&self, text: &str) -> Option<String> {
        let mut current: Option<String> = None;
        for pattern in &self.patterns {
            let input = current.as_deref().unwrap_or(text);
            if pattern.regex.is_match(input) {
                let replaced = pattern
                    .regex
                    .replace_all(input, pattern.placeholder.as_str())
                    .into_owned();
                current = Some(replaced);
            }
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_builtin_patterns() -> Result<()> {
        let redactor = Redactor::new(&[])?;
        let text = "SSN 123-45-6789, call 555-123-4567 or mail ceo@warden.dev";
        assert_eq!(
            redactor.redact(text).as_deref(),
            Some("SSN [NATIONAL_ID], call [PHONE] or mail [EMAIL]")
        );

        let findings = redactor.scan(text);
        assert_eq!(findings.len(), 4);
        assert_eq!(findings[0].pattern, "EMAIL");
        assert_eq!(findings[0].matched_value, "ceo@warden.dev");

        assert!(redactor.redact("nothing to see here").is_none());
        Ok(())
    }

    #[test]
    fn test_redaction_is_idempotent() -> Result<()> {
        let redactor = Redactor::new(&[])?;
        let once = redactor.redact("+33 6 12 34 56 78 / jane@doe.org").unwrap_or_default();
        assert_eq!(once, "[PHONE] / [EMAIL]");
        assert!(redactor.redact(&once).is_none());
        Ok(())
    }

    #[test]
    fn test_custom_patterns() -> Result<()> {
        let redactor = Redactor::new(&[RedactPattern {
            name: "iban".into(),
            regex: r"\bFR\d{12}\b".into(),
        }])?;
        assert_eq!(redactor.redact("pay FR761234567890").as_deref(), Some("pay [IBAN]"));
        Ok(())
    }

    #[test]
    fn test_invalid_regex_fails() {
        let result = Redactor::new(&[RedactPattern {
            name: "Bad Regex".into(),
            regex: "[unclosed-bracket".into(),
        }]);
        assert!(result.is_err(), "Redactor should fail on invalid regex");
    }
}
