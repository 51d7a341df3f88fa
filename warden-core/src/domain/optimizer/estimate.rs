// warden-core/src/domain/optimizer/estimate.rs
//
// Row and cost figures derived from the shape of the query alone. There are
// no table statistics behind these numbers.

use std::ops::Range;

use crate::domain::error::GuardError;
use crate::domain::tenancy::lexer::TokenKind;
use crate::domain::tenancy::structure::{
    BranchKind, QueryExpr, RelationKind, SelectBranch, TokenStream,
};

const BASE_ROWS: f64 = 10_000.0;
const EQ_SELECTIVITY: f64 = 0.1;
const RANGE_SELECTIVITY: f64 = 0.33;
const LIKE_SELECTIVITY: f64 = 0.25;
const IN_SELECTIVITY: f64 = 0.2;
const MANY_JOINS: usize = 4;

// cost units per row
const SCAN_COST: f64 = 0.01;
const JOIN_COST: f64 = 0.02;
const SORT_COST: f64 = 0.001;
const SUBQUERY_COST: f64 = 100.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    pub rows: u64,
    pub cost: f64,
    pub warnings: Vec<String>,
}

pub fn estimate(sql: &str, max_rows: usize) -> Result<Estimate, GuardError> {
    let stream = TokenStream::new(sql)?;
    let mut end = stream.len();
    if end > 0 && stream.tokens()[end - 1].kind == TokenKind::Semicolon {
        end -= 1;
    }
    let query = stream.parse_statement(0..end)?;

    let mut walker = Walker {
        stream: &stream,
        cost: 0.0,
        warnings: Vec::new(),
    };
    let rows = walker.query(&query).clamp(0.0, max_rows as f64);

    Ok(Estimate {
        rows: rows.round() as u64,
        cost: (walker.cost * 100.0).round() / 100.0,
        warnings: walker.warnings,
    })
}

struct Walker<'s, 'a> {
    stream: &'s TokenStream<'a>,
    cost: f64,
    warnings: Vec<String>,
}

impl Walker<'_, '_> {
    fn warn(&mut self, warning: String) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    fn query(&mut self, query: &QueryExpr) -> f64 {
        for cte in &query.ctes {
            self.query(&cte.body);
        }

        let mut rows = 0.0;
        for branch in &query.branches {
            rows += match &branch.kind {
                BranchKind::Select(select) => self.select(select),
                BranchKind::Nested(inner) => self.query(inner),
                BranchKind::Values(subqueries) => {
                    for subquery in subqueries {
                        self.query(subquery);
                        self.cost += SUBQUERY_COST;
                    }
                    self.count_top_level(branch.range.clone(), TokenKind::LParen).max(1) as f64
                }
            };
        }

        for subquery in &query.tail_subqueries {
            self.query(subquery);
            self.cost += SUBQUERY_COST;
        }
        match &query.tail {
            Some(tail) => self.tail(tail.clone(), rows),
            None => rows,
        }
    }

    fn tail(&mut self, tail: Range<usize>, rows: f64) -> f64 {
        let tokens = self.stream.tokens();
        let top = self.stream.top_level(tail);
        let ordered = top
            .iter()
            .any(|&t| tokens[t].is_keyword("ORDER") && self.stream.is_keyword(t + 1, "BY"));
        let limit = top
            .iter()
            .find(|&&t| tokens[t].is_any_keyword(&["LIMIT", "FETCH"]))
            .copied();

        if ordered {
            self.cost += rows * rows.max(2.0).log2() * SORT_COST;
            if limit.is_none() {
                self.warn("ORDER BY without LIMIT sorts the entire result".to_string());
            }
        }

        // LIMIT n / FETCH FIRST n ROWS ONLY
        let bound = limit.and_then(|t| {
            tokens[t + 1..]
                .iter()
                .take(3)
                .find(|token| token.kind == TokenKind::Number)
                .and_then(|token| token.text.parse::<f64>().ok())
        });
        match bound {
            Some(bound) => rows.min(bound),
            None => rows,
        }
    }

    fn select(&mut self, select: &SelectBranch) -> f64 {
        if select.relations.is_empty() {
            for subquery in &select.subqueries {
                self.query(subquery);
                self.cost += SUBQUERY_COST;
            }
            return 1.0;
        }

        let mut relation_rows = Vec::with_capacity(select.relations.len());
        let mut reads_tables = false;
        for relation in &select.relations {
            let rows = match &relation.kind {
                RelationKind::Table { .. } | RelationKind::Function { .. } => {
                    reads_tables = true;
                    self.cost += BASE_ROWS * SCAN_COST;
                    BASE_ROWS
                }
                RelationKind::Derived(inner) => self.query(inner),
            };
            relation_rows.push(rows);
        }

        if reads_tables && self.projects_star(select.projection.clone()) {
            self.warn("SELECT * reads every column; list only the columns you need".to_string());
        }

        let joins = select.relations.len() - 1;
        let cartesian = self.is_cartesian(select);
        let mut rows = if cartesian {
            self.warn(format!(
                "cartesian product between {} relations",
                select.relations.len()
            ));
            relation_rows.iter().product()
        } else {
            relation_rows.iter().copied().fold(0.0, f64::max)
        };
        if joins > 0 {
            self.cost += rows * JOIN_COST * joins as f64;
        }
        if joins >= MANY_JOINS {
            self.warn(format!("{joins} joins in one SELECT; consider pre-aggregating"));
        }

        if let Some(clause) = &select.where_clause {
            rows *= self.selectivity(clause.clone());
        }
        if select.group_by.is_some() {
            rows = (rows / 10.0).max(1.0);
            self.cost += rows * SORT_COST * 10.0;
        }
        if let Some(having) = &select.having {
            rows *= self.selectivity(having.clone());
        }
        if self.stream.is_keyword(select.projection.start, "DISTINCT") {
            self.warn("DISTINCT hashes or sorts the full result".to_string());
            self.cost += rows * SORT_COST * 10.0;
            rows *= 0.5;
        }

        for subquery in &select.subqueries {
            self.query(subquery);
            self.cost += SUBQUERY_COST;
        }
        rows
    }

    fn selectivity(&mut self, clause: Range<usize>) -> f64 {
        let tokens = self.stream.tokens();
        let mut factor = 1.0;
        for t in self.stream.top_level(clause) {
            let token = &tokens[t];
            if token.is_op("=") {
                factor *= EQ_SELECTIVITY;
            } else if ["<", ">", "<=", ">="].iter().any(|op| token.is_op(op)) || token.is_keyword("BETWEEN") {
                factor *= RANGE_SELECTIVITY;
            } else if token.is_any_keyword(&["LIKE", "ILIKE"]) {
                factor *= LIKE_SELECTIVITY;
                let leading_wildcard = tokens
                    .get(t + 1)
                    .filter(|next| next.kind == TokenKind::StringLit)
                    .is_some_and(|next| next.text.starts_with("'%") || next.text.starts_with("'_"));
                if leading_wildcard {
                    self.warn("LIKE pattern with a leading wildcard cannot use an index".to_string());
                }
            } else if token.is_keyword("IN") {
                factor *= IN_SELECTIVITY;
                if self.stream.opens_subquery(t + 1) {
                    self.warn("IN (SELECT ...) filter; a join is usually cheaper".to_string());
                }
            } else if token.is_keyword("EXISTS") && self.stream.opens_subquery(t + 1) {
                self.warn("EXISTS subquery is evaluated per candidate row".to_string());
            }
        }
        factor
    }

    /// `*` or `q.*` as a projection item, not a multiplication.
    fn projects_star(&self, projection: Range<usize>) -> bool {
        let tokens = self.stream.tokens();
        let start = projection.start;
        self.stream.top_level(projection).into_iter().any(|t| {
            tokens[t].is_op("*")
                && (t == start
                    || tokens[t - 1].kind == TokenKind::Comma
                    || tokens[t - 1].kind == TokenKind::Dot
                    || tokens[t - 1].is_any_keyword(&["DISTINCT", "ALL"]))
        })
    }

    fn is_cartesian(&self, select: &SelectBranch) -> bool {
        let Some(from) = &select.from else {
            return false;
        };
        if select.relations.len() < 2 {
            return false;
        }
        let tokens = self.stream.tokens();
        let top = self.stream.top_level(from.clone());
        if top.iter().any(|&t| tokens[t].is_keyword("CROSS")) {
            return true;
        }
        let joined = top
            .iter()
            .any(|&t| tokens[t].is_any_keyword(&["ON", "USING", "NATURAL"]));
        !joined && select.where_clause.is_none()
    }

    fn count_top_level(&self, range: Range<usize>, kind: TokenKind) -> usize {
        self.stream
            .top_level(range)
            .into_iter()
            .filter(|&t| self.stream.tokens()[t].kind == kind)
            .count()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn warnings(sql: &str) -> Result<Vec<String>> {
        Ok(estimate(sql, 1_000)?.warnings)
    }

    #[test]
    fn test_equality_filter_reduces_rows() -> Result<()> {
        let full = estimate("SELECT id FROM invoices", 1_000_000)?;
        let filtered = estimate("SELECT id FROM invoices WHERE tenant_id = 't1'", 1_000_000)?;
        assert_eq!(full.rows, 10_000);
        assert_eq!(filtered.rows, 1_000);
        assert!(filtered.cost > 0.0);
        Ok(())
    }

    #[test]
    fn test_rows_are_capped_by_limit_and_max_rows() -> Result<()> {
        assert_eq!(estimate("SELECT id FROM invoices LIMIT 7", 1_000)?.rows, 7);
        assert_eq!(estimate("SELECT id FROM invoices", 250)?.rows, 250);
        Ok(())
    }

    #[test]
    fn test_select_star_warning_ignores_the_tenant_wrapper() -> Result<()> {
        let star = warnings("SELECT * FROM invoices")?;
        assert_eq!(star.len(), 1);
        assert!(star[0].starts_with("SELECT *"));

        let products = warnings("SELECT price * qty FROM lines")?;
        assert!(products.is_empty(), "{products:?}");

        let wrapped = warnings(
            "SELECT * FROM (SELECT id FROM invoices) AS __tenant_scope WHERE __tenant_scope.tenant_id = 't1'",
        )?;
        assert!(wrapped.is_empty(), "{wrapped:?}");
        Ok(())
    }

    #[test]
    fn test_shape_warnings() -> Result<()> {
        let like = warnings("SELECT id FROM t WHERE name LIKE '%smith'")?;
        assert!(like.iter().any(|w| w.contains("leading wildcard")));

        let cartesian = warnings("SELECT a.id FROM a, b")?;
        assert!(cartesian.iter().any(|w| w.contains("cartesian")));
        let joined = warnings("SELECT a.id FROM a JOIN b ON a.id = b.id")?;
        assert!(!joined.iter().any(|w| w.contains("cartesian")));

        let ordered = warnings("SELECT id FROM t ORDER BY id")?;
        assert!(ordered.iter().any(|w| w.contains("ORDER BY without LIMIT")));
        let limited = warnings("SELECT id FROM t ORDER BY id LIMIT 3")?;
        assert!(limited.is_empty());

        let sub = warnings("SELECT id FROM t WHERE id IN (SELECT id FROM u)")?;
        assert!(sub.iter().any(|w| w.starts_with("IN (SELECT")));

        let distinct = warnings("SELECT DISTINCT id FROM t")?;
        assert!(distinct.iter().any(|w| w.starts_with("DISTINCT")));
        let not_distinct = warnings("SELECT id FROM t WHERE a IS DISTINCT FROM b")?;
        assert!(!not_distinct.iter().any(|w| w.starts_with("DISTINCT")));
        Ok(())
    }

    #[test]
    fn test_many_joins() -> Result<()> {
        let sql = "SELECT a.id FROM a JOIN b ON a.id = b.id JOIN c ON b.id = c.id \
                   JOIN d ON c.id = d.id JOIN e ON d.id = e.id";
        assert!(warnings(sql)?.iter().any(|w| w.starts_with("4 joins")));
        Ok(())
    }

    #[test]
    fn test_malformed_text_is_an_error() {
        assert!(estimate("SELECT (", 10).is_err());
    }
}
