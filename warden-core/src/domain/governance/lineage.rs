// warden-core/src/domain/governance/lineage.rs
//
// Column rules are applied to result columns by name. A restricted column
// may therefore only reach the result under its own name: renames,
// expressions, positional renames and whole-row references are refused
// before the query runs.

use std::ops::Range;

use crate::domain::error::GuardError;
use crate::domain::governance::masking::rule_for;
use crate::domain::governance::rule::ColumnSecurityRule;
use crate::domain::tenancy::lexer::{Token, TokenKind};
use crate::domain::tenancy::structure::{Branch, BranchKind, QueryExpr, RelationKind, SelectBranch, TokenStream};

/// What one projection item contributes to the result.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Output {
    /// Values of a restricted column, under that column's name.
    Restricted(String),
    Named(String),
    /// The engine picks the name.
    Anonymous,
    /// `*` / `q.*`: names only the engine knows.
    Star,
}

impl Output {
    fn name(&self) -> Option<&str> {
        match self {
            Self::Restricted(name) | Self::Named(name) => Some(name),
            Self::Anonymous | Self::Star => None,
        }
    }
}

fn refused(reason: impl Into<String>) -> GuardError {
    GuardError::RestrictedColumn(reason.into())
}

/// Proves that masking by result column name sees every restricted value.
#[derive(Debug, Clone, Default)]
pub struct ColumnLineage {
    restricted: Vec<String>,
}

impl ColumnLineage {
    /// Columns whose winning rule masks or hides them.
    pub fn new(rules: &[ColumnSecurityRule]) -> Self {
        let mut restricted: Vec<String> = Vec::new();
        for rule in rules {
            let column = rule.column.to_lowercase();
            if restricted.contains(&column) {
                continue;
            }
            if rule_for(&column, rules).is_some_and(|winner| winner.action.restricts_output()) {
                restricted.push(column);
            }
        }
        Self { restricted }
    }

    pub fn restricted_columns(&self) -> &[String] {
        &self.restricted
    }

    pub fn check(&self, sql: &str) -> Result<(), GuardError> {
        if self.restricted.is_empty() {
            return Ok(());
        }
        let stream = TokenStream::new(sql)?;
        let mut end = stream.len();
        if end > 0 && stream.tokens()[end - 1].kind == TokenKind::Semicolon {
            end -= 1;
        }
        let query = stream.parse_statement(0..end)?;
        self.query(&stream, &query).map(|_| ())
    }

    /// Checks the expression and returns the outputs of its first branch,
    /// which name the columns of a set operation.
    fn query(&self, stream: &TokenStream<'_>, query: &QueryExpr) -> Result<Vec<Output>, GuardError> {
        for cte in &query.ctes {
            if cte.column_aliases {
                self.no_positional_rename(stream, cte.body.range.clone(), &cte.name)?;
            }
            self.query(stream, &cte.body)?;
        }

        let branches = query
            .branches
            .iter()
            .map(|branch| self.branch(stream, branch))
            .collect::<Result<Vec<_>, _>>()?;
        for subquery in &query.tail_subqueries {
            self.query(stream, subquery)?;
        }

        let mut branches = branches.into_iter();
        let first = branches.next().unwrap_or_default();
        let rest: Vec<Vec<Output>> = branches.collect();
        if rest.is_empty() {
            return Ok(first);
        }

        if first.iter().chain(rest.iter().flatten()).any(|o| *o == Output::Star) {
            return Err(refused(
                "set operations over '*' cannot be matched to column rules; list the columns",
            ));
        }
        for outputs in &rest {
            for (k, output) in outputs.iter().enumerate() {
                if let Output::Restricted(column) = output
                    && !first.get(k).and_then(Output::name).is_some_and(|n| n.eq_ignore_ascii_case(column))
                {
                    return Err(refused(format!(
                        "'{column}' is combined into a differently named column of a set operation"
                    )));
                }
            }
        }
        Ok(first)
    }

    fn branch(&self, stream: &TokenStream<'_>, branch: &Branch) -> Result<Vec<Output>, GuardError> {
        match &branch.kind {
            BranchKind::Select(select) => self.select(stream, select),
            BranchKind::Nested(inner) => self.query(stream, inner),
            BranchKind::Values(subqueries) => {
                for subquery in subqueries {
                    self.query(stream, subquery)?;
                }
                if let Some(column) = self.first_restricted(stream, branch.range.clone()) {
                    return Err(refused(format!("'{column}' is used inside VALUES")));
                }
                Ok(Vec::new())
            }
        }
    }

    fn select(&self, stream: &TokenStream<'_>, select: &SelectBranch) -> Result<Vec<Output>, GuardError> {
        for subquery in &select.subqueries {
            self.query(stream, subquery)?;
        }
        for relation in &select.relations {
            match &relation.kind {
                RelationKind::Table { .. } => {}
                RelationKind::Derived(inner) => {
                    if relation.column_aliases {
                        self.no_positional_rename(stream, inner.range.clone(), &relation.qualifier)?;
                    }
                    self.query(stream, inner)?;
                }
                RelationKind::Function { name, arguments } => {
                    for argument in arguments {
                        self.query(stream, argument)?;
                    }
                    if let Some(column) = self.first_restricted(stream, relation.range.clone()) {
                        return Err(refused(format!("'{column}' is passed to table function '{name}'")));
                    }
                }
            }
        }

        let qualifiers: Vec<&str> = select.relations.iter().map(|r| r.qualifier.as_str()).collect();
        let mut start = select.projection.start;
        while stream.is_keyword(start, "ALL")
            || (stream.is_keyword(start, "DISTINCT") && !stream.is_keyword(start + 1, "ON"))
        {
            start += 1;
        }

        let mut items = Vec::new();
        let mut item_start = start;
        for t in stream.top_level(start..select.projection.end) {
            if stream.tokens()[t].kind == TokenKind::Comma {
                items.push(item_start..t);
                item_start = t + 1;
            }
        }
        items.push(item_start..select.projection.end);

        items
            .into_iter()
            .map(|item| self.item(stream, item, &qualifiers))
            .collect()
    }

    fn item(&self, stream: &TokenStream<'_>, item: Range<usize>, qualifiers: &[&str]) -> Result<Output, GuardError> {
        let tokens = stream.slice(item.clone());

        let star_at = match tokens {
            [star, ..] if star.is_op("*") => Some(1),
            [qualifier, dot, star, ..] if qualifier.is_identifier() && dot.kind == TokenKind::Dot && star.is_op("*") => {
                Some(3)
            }
            _ => None,
        };
        if let Some(tail) = star_at {
            let tail = item.start + tail..item.end;
            self.no_row_access(stream, tail.clone(), qualifiers)?;
            // EXCLUDE only drops columns; REPLACE / RENAME can move values
            if !stream.is_keyword(tail.start, "EXCLUDE")
                && let Some(column) = self.first_restricted(stream, tail)
            {
                return Err(refused(format!("'{column}' is renamed or replaced inside a '*' modifier")));
            }
            return Ok(Output::Star);
        }

        let (expr, alias) = match tokens {
            [.., as_kw, alias] if tokens.len() >= 3 && as_kw.is_keyword("AS") && alias.is_identifier() => {
                (item.start..item.end - 2, alias.ident_key())
            }
            _ => (item.clone(), None),
        };
        self.no_row_access(stream, expr.clone(), qualifiers)?;

        let bare = match stream.slice(expr.clone()) {
            [column] if column.is_identifier() => column.ident_key(),
            [qualifier, dot, column]
                if qualifier.is_identifier() && dot.kind == TokenKind::Dot && column.is_identifier() =>
            {
                column.ident_key()
            }
            _ => None,
        };
        let name = alias.or(bare);

        let referenced = self.restricted_in(stream, expr);
        match (referenced.first(), &name) {
            (None, Some(name)) => Ok(Output::Named(name.clone())),
            (None, None) => Ok(Output::Anonymous),
            (Some(_), Some(name)) if referenced.iter().all(|c| c.eq_ignore_ascii_case(name)) => {
                Ok(Output::Restricted(name.clone()))
            }
            (Some(column), Some(name)) => Err(refused(format!(
                "'{column}' cannot reach the result as '{name}'"
            ))),
            (Some(column), None) => Err(refused(format!(
                "'{column}' cannot be used inside an unnamed expression"
            ))),
        }
    }

    /// Whole-row references (`t`, `to_json(t)`), `COLUMNS(...)` and stars
    /// nested in expressions carry columns without naming them.
    fn no_row_access(&self, stream: &TokenStream<'_>, range: Range<usize>, qualifiers: &[&str]) -> Result<(), GuardError> {
        let tokens = stream.tokens();
        for i in range.clone() {
            let token = &tokens[i];
            let next = tokens.get(i + 1).filter(|_| i + 1 < range.end);
            let prev = (i > range.start).then(|| &tokens[i - 1]);

            if token.is_identifier()
                && !next.is_some_and(|n| n.kind == TokenKind::Dot)
                && !prev.is_some_and(|p| p.kind == TokenKind::Dot)
                && token.ident_key().is_some_and(|key| qualifiers.contains(&key.as_str()))
            {
                return Err(refused(format!("'{}' selects a whole row", token.text)));
            }
            if token.is_keyword("COLUMNS") && next.is_some_and(|n| n.kind == TokenKind::LParen) {
                return Err(refused("COLUMNS(...) expressions cannot be matched to column rules"));
            }
            if token.is_op("*") && !self.is_count_star(stream, i) {
                let operand_before = prev.is_some_and(|p| {
                    matches!(
                        p.kind,
                        TokenKind::Word | TokenKind::QuotedIdent | TokenKind::Number | TokenKind::StringLit | TokenKind::RParen
                    ) || (p.kind == TokenKind::Punct && matches!(p.text, "]" | "}"))
                });
                if !operand_before || prev.is_some_and(|p| p.kind == TokenKind::Dot) {
                    return Err(refused("'*' inside an expression cannot be matched to column rules"));
                }
            }
        }
        Ok(())
    }

    fn is_count_star(&self, stream: &TokenStream<'_>, i: usize) -> bool {
        let tokens = stream.tokens();
        i >= 2
            && tokens[i - 1].kind == TokenKind::LParen
            && tokens[i - 2].is_keyword("count")
            && tokens.get(i + 1).is_some_and(|t| t.kind == TokenKind::RParen)
    }

    /// `alias(c1, c2, …)` renames by position, so its query must not touch
    /// restricted columns at all, not even through `*`.
    fn no_positional_rename(&self, stream: &TokenStream<'_>, range: Range<usize>, name: &str) -> Result<(), GuardError> {
        if let Some(column) = self.first_restricted(stream, range.clone()) {
            return Err(refused(format!("'{column}' is renamed by the column list of '{name}'")));
        }
        if stream.slice(range).iter().any(|t| t.is_op("*")) {
            return Err(refused(format!(
                "the column list of '{name}' renames the columns of a '*' projection"
            )));
        }
        Ok(())
    }

    fn first_restricted(&self, stream: &TokenStream<'_>, range: Range<usize>) -> Option<String> {
        self.restricted_in(stream, range).into_iter().next()
    }

    /// Restricted columns referenced in `range`; function names and
    /// qualifiers are not column references.
    fn restricted_in(&self, stream: &TokenStream<'_>, range: Range<usize>) -> Vec<String> {
        let tokens = stream.tokens();
        let mut found: Vec<String> = Vec::new();
        for i in range.clone() {
            let token: &Token<'_> = &tokens[i];
            let followed_by = |kind: TokenKind| i + 1 < range.end && tokens[i + 1].kind == kind;
            if followed_by(TokenKind::LParen) || followed_by(TokenKind::Dot) {
                continue;
            }
            let Some(key) = token.ident_key() else {
                continue;
            };
            if let Some(column) = self.restricted.iter().find(|c| c.eq_ignore_ascii_case(&key))
                && !found.contains(column)
            {
                found.push(column.clone());
            }
        }
        found
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::governance::rule::{RuleAction, RuleScope};

    fn rule(column: &str, scope: RuleScope, action: RuleAction) -> ColumnSecurityRule {
        ColumnSecurityRule {
            tenant_id: "t1".into(),
            resource: "crm".into(),
            column: column.into(),
            scope,
            scope_id: (scope != RuleScope::Global).then(|| "u1".to_string()),
            action,
            masking_type: None,
            masking_config: None,
        }
    }

    fn lineage() -> ColumnLineage {
        ColumnLineage::new(&[
            rule("ssn", RuleScope::Global, RuleAction::Mask),
            rule("Total", RuleScope::Global, RuleAction::Hide),
            rule("email", RuleScope::Global, RuleAction::ReadOnly),
        ])
    }

    #[test]
    fn test_only_restricting_winners_count() {
        let lineage = ColumnLineage::new(&[
            rule("ssn", RuleScope::Global, RuleAction::Mask),
            rule("ssn", RuleScope::User, RuleAction::ReadOnly),
            rule("total", RuleScope::Role, RuleAction::Hide),
        ]);
        assert_eq!(lineage.restricted_columns(), ["total".to_string()]);
        assert!(ColumnLineage::new(&[]).check("SELECT ssn AS s FROM invoices").is_ok());
    }

    #[test]
    fn test_restricted_columns_under_their_own_name_pass() {
        let lineage = lineage();
        for sql in [
            "SELECT id, ssn, total FROM invoices WHERE tenant_id = 't1'",
            "SELECT * FROM (SELECT * FROM invoices) AS __tenant_scope WHERE __tenant_scope.tenant_id = 't1'",
            "SELECT DISTINCT i.ssn, i.total AS total FROM invoices i",
            "SELECT upper(ssn) AS ssn, email AS contact, count(*) FROM invoices GROUP BY 1, 2",
            "SELECT * EXCLUDE (ssn) FROM invoices",
            "SELECT id, ssn FROM a UNION ALL SELECT id, ssn FROM b",
            "SELECT id FROM invoices WHERE ssn LIKE '123%' ORDER BY total",
            "SELECT n FROM generate_series(1, 3) AS g(n)",
            "SELECT price * qty AS amount FROM lines",
            "SELECT id, ssn || email AS ssn FROM invoices",
        ] {
            let result = lineage.check(sql);
            assert!(result.is_ok(), "{sql} -> {result:?}");
        }
    }

    #[test]
    fn test_renamed_restricted_columns_are_refused() {
        let lineage = lineage();
        for sql in [
            "SELECT id, ssn, ssn AS s FROM invoices",
            "SELECT total AS x FROM invoices",
            "SELECT i.ssn s FROM invoices i",
            "SELECT lower(ssn) FROM invoices",
            "SELECT ssn || total AS ssn FROM invoices",
            "SELECT (SELECT max(ssn) FROM invoices) AS top",
            "SELECT s FROM (SELECT ssn AS s FROM invoices) d",
            "WITH c AS (SELECT total AS amount FROM invoices) SELECT * FROM c",
            "SELECT * FROM (SELECT * FROM invoices) AS d(a, b, c, d)",
            "WITH c(a, b) AS (SELECT id, ssn FROM invoices) SELECT * FROM c",
            "SELECT name FROM customers UNION SELECT ssn FROM invoices",
            "SELECT * FROM a UNION SELECT * FROM b",
            "SELECT * RENAME (ssn AS s) FROM invoices",
            "SELECT i FROM invoices i",
            "SELECT to_json(invoices) FROM invoices",
            "SELECT struct_pack(i.*) FROM invoices i",
            "SELECT min(COLUMNS(*)) FROM invoices",
            "SELECT x FROM invoices i, unnest([i.ssn]) AS u(x)",
            "SELECT 1 AS id UNION ALL VALUES ((SELECT max(ssn) FROM invoices))",
        ] {
            let result = lineage.check(sql);
            assert!(
                matches!(result, Err(GuardError::RestrictedColumn(_))),
                "{sql} -> {result:?}"
            );
        }
    }

    #[test]
    fn test_reason_names_the_column() {
        let err = lineage().check("SELECT total AS x FROM invoices").unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"Restricted column: 'total' cannot reach the result as 'x'");
    }
}
