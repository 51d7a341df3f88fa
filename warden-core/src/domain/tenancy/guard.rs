// warden-core/src/domain/tenancy/guard.rs

use std::collections::HashSet;
use std::ops::Range;

use tracing::debug;

use super::coverage::{CoverageChecker, Exposure};
use super::lexer::TokenKind;
use super::predicate::{PredicateMatcher, TenantBindings};
use super::rewrite::Rewriter;
use super::structure::{QueryExpr, TokenStream, unparseable};
use crate::domain::error::GuardError;
use crate::domain::query::SecuredQuery;

pub const DEFAULT_DENIED_KEYWORDS: [&str; 22] = [
    "INSERT", "UPDATE", "DELETE", "MERGE", "UPSERT", "CREATE", "ALTER", "DROP", "TRUNCATE",
    "RENAME", "GRANT", "REVOKE", "INTO", "COPY", "CALL", "EXEC", "EXECUTE", "ATTACH", "DETACH",
    "PRAGMA", "VACUUM", "LOCK",
];

const DENIED_FUNCTIONS: [&str; 4] = ["query", "query_table", "glob", "sniff_csv"];

#[derive(Debug, Clone)]
pub struct GuardPolicy {
    pub tenant_column: String,
    pub denied_keywords: Vec<String>,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            tenant_column: "tenant_id".to_string(),
            denied_keywords: DEFAULT_DENIED_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl GuardPolicy {
    pub fn for_column(tenant_column: impl Into<String>) -> Self {
        Self {
            tenant_column: tenant_column.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub valid: bool,
    pub reason: Option<String>,
}

impl Validation {
    fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Proves or enforces that a statement can only read one tenant's rows.
/// Pure and synchronous; one guard can serve any number of callers.
#[derive(Debug, Clone)]
pub struct TenantGuard {
    tenant_column: String,
    denied: HashSet<String>,
}

impl TenantGuard {
    pub fn new(policy: GuardPolicy) -> Result<Self, GuardError> {
        if !is_plain_identifier(&policy.tenant_column) {
            return Err(GuardError::InvalidPolicy(format!(
                "tenant column '{}' is not a plain identifier",
                policy.tenant_column
            )));
        }

        let mut denied = HashSet::new();
        for keyword in &policy.denied_keywords {
            let keyword = keyword.trim();
            if keyword.is_empty() || !keyword.chars().all(|c| c.is_ascii_alphabetic() || c == '_') {
                return Err(GuardError::InvalidPolicy(format!(
                    "denied keyword '{}' is not a single SQL word",
                    keyword
                )));
            }
            denied.insert(keyword.to_ascii_uppercase());
        }

        Ok(Self {
            tenant_column: policy.tenant_column,
            denied,
        })
    }

    pub fn tenant_column(&self) -> &str {
        &self.tenant_column
    }

    pub fn secure(&self, raw: &str, tenant_id: &str) -> Result<SecuredQuery, GuardError> {
        self.secure_with(raw, tenant_id, &TenantBindings::new())
    }

    pub fn secure_with(
        &self,
        raw: &str,
        tenant_id: &str,
        bindings: &TenantBindings,
    ) -> Result<SecuredQuery, GuardError> {
        let literal = tenant_literal(tenant_id)?;
        let stream = TokenStream::new(raw)?;
        let range = self.gate(&stream)?;
        let query = stream.parse_statement(range)?;

        let matcher = PredicateMatcher::new(&self.tenant_column, tenant_id, bindings);
        let checker = CoverageChecker::new(&stream, &matcher);
        let mut rewriter = Rewriter::new(&checker, literal);
        let text = rewriter.secure_query(&query, &[], Exposure::Direct);
        let injected = rewriter.injected();

        // the rewrite is only trusted once it proves itself
        let check = self.validate_with(&text, tenant_id, bindings);
        if !check.valid {
            return Err(unparseable(format!(
                "secured query failed re-validation: {}",
                check.reason.unwrap_or_default()
            )));
        }

        debug!(
            tenant_id,
            injected,
            raw_len = raw.len(),
            secured_len = text.len(),
            "Query secured"
        );
        Ok(SecuredQuery {
            text,
            tenant_predicate_injected: injected,
            tenant_id: tenant_id.to_string(),
        })
    }

    pub fn validate(&self, query: &str, tenant_id: &str) -> Validation {
        self.validate_with(query, tenant_id, &TenantBindings::new())
    }

    pub fn validate_with(&self, query: &str, tenant_id: &str, bindings: &TenantBindings) -> Validation {
        match self.check(query, tenant_id, bindings) {
            Ok(()) => Validation::ok(),
            Err(reason) => Validation::rejected(reason),
        }
    }

    fn check(&self, query: &str, tenant_id: &str, bindings: &TenantBindings) -> Result<(), String> {
        tenant_literal(tenant_id).map_err(|e| e.to_string())?;
        let stream = TokenStream::new(query).map_err(|e| e.to_string())?;
        let range = self.gate(&stream).map_err(|e| e.to_string())?;
        let parsed: QueryExpr = stream.parse_statement(range).map_err(|e| e.to_string())?;

        let matcher = PredicateMatcher::new(&self.tenant_column, tenant_id, bindings);
        CoverageChecker::new(&stream, &matcher).check_query(&parsed, &[], Exposure::Direct)
    }

    /// Single read-only statement without deny-listed words. Returns the
    /// token range of the statement minus its optional trailing `;`.
    fn gate(&self, stream: &TokenStream<'_>) -> Result<Range<usize>, GuardError> {
        let tokens = stream.tokens();
        let mut end = tokens.len();
        if end > 0 && tokens[end - 1].kind == TokenKind::Semicolon {
            end -= 1;
        }
        if end == 0 {
            return Err(unparseable("empty statement"));
        }
        if tokens[..end].iter().any(|t| t.kind == TokenKind::Semicolon) {
            return Err(GuardError::ForbiddenStatement {
                keyword: ";".to_string(),
            });
        }

        let leading = tokens[..end]
            .iter()
            .find(|t| t.kind != TokenKind::LParen)
            .ok_or_else(|| unparseable("statement has no keyword"))?;
        if leading.kind != TokenKind::Word {
            return Err(unparseable(format!("statement starts with '{}'", leading.text)));
        }
        if !leading.is_any_keyword(&["SELECT", "WITH"]) {
            return Err(GuardError::ForbiddenStatement {
                keyword: leading.text.to_ascii_uppercase(),
            });
        }

        if let Some(denied) = tokens[..end]
            .iter()
            .find(|t| t.kind == TokenKind::Word && self.denied.contains(&t.text.to_ascii_uppercase()))
        {
            return Err(GuardError::ForbiddenStatement {
                keyword: denied.text.to_ascii_uppercase(),
            });
        }

        if let Some(call) = tokens[..end].windows(2).find(|pair| {
            pair[0].kind == TokenKind::Word && pair[1].kind == TokenKind::LParen && is_denied_function(pair[0].text)
        }) {
            return Err(GuardError::ForbiddenStatement {
                keyword: call[0].text.to_ascii_uppercase(),
            });
        }
        Ok(0..end)
    }
}

/// Engine functions that run SQL held in a string or read files.
fn is_denied_function(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    DENIED_FUNCTIONS.contains(&name.as_str()) || name.starts_with("read_") || name.ends_with("_scan")
}

pub(crate) fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// The tenant id as a literal the guard controls: single-quoted, quotes doubled.
fn tenant_literal(tenant_id: &str) -> Result<String, GuardError> {
    if tenant_id.trim().is_empty() {
        return Err(GuardError::MissingTenantContext(
            "caller has no tenant id".to_string(),
        ));
    }
    if tenant_id.chars().any(|c| c == '\\' || c.is_control()) {
        return Err(GuardError::MissingTenantContext(
            "tenant id contains characters that cannot be embedded in a literal".to_string(),
        ));
    }
    Ok(format!("'{}'", tenant_id.replace('\'', "''")))
}
