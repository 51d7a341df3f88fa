// warden-core/src/domain/tenancy/predicate.rs

use std::collections::HashMap;
use std::ops::Range;

use super::lexer::{Token, TokenKind};
use super::structure::TokenStream;

/// Placeholders whose runtime value is known to be the caller's tenant id
/// (`$1`, `?`, `:tenant`, `@tenant`).
#[derive(Debug, Clone, Default)]
pub struct TenantBindings {
    values: HashMap<String, String>,
}

impl TenantBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, placeholder: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(placeholder.into(), value.into());
        self
    }

    pub fn value_of(&self, placeholder: &str) -> Option<&str> {
        self.values.get(placeholder).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Recognises `[qualifier.]<tenant column> = <tenant literal>` conjuncts.
pub struct PredicateMatcher<'p> {
    column: &'p str,
    tenant_id: &'p str,
    bindings: &'p TenantBindings,
}

impl<'p> PredicateMatcher<'p> {
    pub fn new(column: &'p str, tenant_id: &'p str, bindings: &'p TenantBindings) -> Self {
        Self {
            column,
            tenant_id,
            bindings,
        }
    }

    pub fn column(&self) -> &str {
        self.column
    }

    /// Qualifiers (`None` for an unqualified column) of every top-level
    /// conjunct in `range` that pins the tenant column to the tenant.
    /// A clause with a top-level disjunction contributes nothing.
    pub fn scoped_qualifiers(&self, stream: &TokenStream<'_>, range: Range<usize>) -> Vec<Option<String>> {
        let mut conjuncts = Vec::new();
        if !split_conjuncts(stream, range, &mut conjuncts) {
            return Vec::new();
        }
        conjuncts
            .into_iter()
            .filter_map(|conjunct| self.match_conjunct(stream.slice(conjunct)))
            .collect()
    }

    /// Top-level comma items of `range` that are a bare tenant column reference.
    pub fn column_references(&self, stream: &TokenStream<'_>, range: Range<usize>) -> Vec<Option<String>> {
        let mut items = Vec::new();
        let mut start = range.start;
        for t in stream.top_level(range.clone()) {
            if stream.tokens()[t].kind == TokenKind::Comma {
                items.push(start..t);
                start = t + 1;
            }
        }
        items.push(start..range.end);

        items
            .into_iter()
            .filter_map(|item| self.match_column(stream.slice(item)))
            .collect()
    }

    fn match_conjunct(&self, tokens: &[Token<'_>]) -> Option<Option<String>> {
        let eq = tokens.iter().position(|t| t.is_op("="))?;
        let (left, right) = (&tokens[..eq], &tokens[eq + 1..]);
        match (left, right) {
            (column, [literal]) | ([literal], column) if self.is_tenant_literal(literal) => {
                self.match_column(column)
            }
            _ => None,
        }
    }

    fn match_column(&self, tokens: &[Token<'_>]) -> Option<Option<String>> {
        match tokens {
            [column] if self.is_tenant_column(column) => Some(None),
            [qualifier, dot, column]
                if qualifier.is_identifier()
                    && dot.kind == TokenKind::Dot
                    && self.is_tenant_column(column) =>
            {
                Some(qualifier.ident_key())
            }
            _ => None,
        }
    }

    fn is_tenant_column(&self, token: &Token<'_>) -> bool {
        match token.kind {
            TokenKind::Word => token.text.eq_ignore_ascii_case(self.column),
            TokenKind::QuotedIdent => token.ident_key().as_deref() == Some(self.column),
            _ => false,
        }
    }

    fn is_tenant_literal(&self, token: &Token<'_>) -> bool {
        match token.kind {
            TokenKind::StringLit => token.string_value().as_deref() == Some(self.tenant_id),
            TokenKind::Number => token.text == self.tenant_id,
            TokenKind::Placeholder => self.bindings.value_of(token.text) == Some(self.tenant_id),
            _ => false,
        }
    }
}

/// Splits `range` on top-level AND, descending into fully parenthesised
/// groups. Returns false when a top-level OR / XOR / `||` makes the clause
/// unusable as a filter proof.
fn split_conjuncts(stream: &TokenStream<'_>, range: Range<usize>, out: &mut Vec<Range<usize>>) -> bool {
    let tokens = stream.tokens();
    let mut start = range.start;
    let mut in_between = false;
    let mut pieces = Vec::new();

    for t in stream.top_level(range.clone()) {
        let token = &tokens[t];
        if token.is_any_keyword(&["OR", "XOR"]) || token.is_op("||") {
            return false;
        }
        if token.is_keyword("BETWEEN") {
            in_between = true;
        } else if token.is_keyword("AND") {
            if in_between {
                in_between = false;
            } else {
                pieces.push(start..t);
                start = t + 1;
            }
        }
    }
    pieces.push(start..range.end);

    for piece in pieces {
        if piece.is_empty() {
            continue;
        }
        let grouped = tokens[piece.start].kind == TokenKind::LParen
            && stream.partner(piece.start) == Some(piece.end - 1)
            && !stream.opens_subquery(piece.start);
        if grouped {
            // a disjunction inside one group only disqualifies that group
            let mut inner = Vec::new();
            if split_conjuncts(stream, piece.start + 1..piece.end - 1, &mut inner) {
                out.extend(inner);
            }
        } else {
            out.push(piece);
        }
    }
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn qualifiers(clause: &str, tenant: &str, bindings: &TenantBindings) -> Result<Vec<Option<String>>> {
        let stream = TokenStream::new(clause)?;
        let matcher = PredicateMatcher::new("tenant_id", tenant, bindings);
        Ok(matcher.scoped_qualifiers(&stream, 0..stream.len()))
    }

    #[test]
    fn test_simple_equality_both_sides() -> Result<()> {
        let none = TenantBindings::new();
        assert_eq!(qualifiers("tenant_id = 't1'", "t1", &none)?, vec![None]);
        assert_eq!(qualifiers("'t1' = i.tenant_id", "t1", &none)?, vec![Some("i".to_string())]);
        assert_eq!(qualifiers("TENANT_ID = 42", "42", &none)?, vec![None]);
        Ok(())
    }

    #[test]
    fn test_wrong_tenant_or_operator_is_ignored() -> Result<()> {
        let none = TenantBindings::new();
        assert!(qualifiers("tenant_id = 't2'", "t1", &none)?.is_empty());
        assert!(qualifiers("tenant_id <> 't1'", "t1", &none)?.is_empty());
        assert!(qualifiers("NOT tenant_id = 't1'", "t1", &none)?.is_empty());
        assert!(qualifiers("lower(tenant_id) = 't1'", "t1", &none)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_disjunction_disqualifies_clause() -> Result<()> {
        let none = TenantBindings::new();
        assert!(qualifiers("tenant_id = 't1' OR 1 = 1", "t1", &none)?.is_empty());
        assert!(qualifiers("tenant_id = 't1' AND a = 1 || b", "t1", &none)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_between_and_nested_groups() -> Result<()> {
        let none = TenantBindings::new();
        let found = qualifiers(
            "amount BETWEEN 1 AND 10 AND (t.tenant_id = 't1' AND (x = 1 OR y = 2))",
            "t1",
            &none,
        )?;
        assert_eq!(found, vec![Some("t".to_string())]);

        let grouped_or = qualifiers("(tenant_id = 't1' OR x = 1) AND y = 2", "t1", &none)?;
        assert!(grouped_or.is_empty());
        Ok(())
    }

    #[test]
    fn test_bound_placeholders() -> Result<()> {
        let bindings = TenantBindings::new().bind("$1", "t1").bind(":tenant", "t1");
        assert_eq!(qualifiers("tenant_id = $1", "t1", &bindings)?, vec![None]);
        assert_eq!(qualifiers("tenant_id = :tenant", "t1", &bindings)?, vec![None]);
        assert!(qualifiers("tenant_id = $2", "t1", &bindings)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_escaped_tenant_literal() -> Result<()> {
        let none = TenantBindings::new();
        assert_eq!(qualifiers("tenant_id = 'o''neil'", "o'neil", &none)?, vec![None]);
        Ok(())
    }
}
