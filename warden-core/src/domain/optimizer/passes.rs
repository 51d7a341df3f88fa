// warden-core/src/domain/optimizer/passes.rs
//
// Structural rewrites on the sqlparser AST of the provider's dialect.

use std::ops::ControlFlow;

use sqlparser::ast::{
    BinaryOperator, Expr, Query, Select, SetExpr, Statement, TableFactor, visit_expressions,
    visit_expressions_mut,
};
use sqlparser::dialect::{
    Dialect, DuckDbDialect, GenericDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect,
    SQLiteDialect,
};
use sqlparser::parser::{Parser, ParserError};

use crate::domain::query::Provider;

pub fn dialect_for(provider: Provider) -> Box<dyn Dialect> {
    match provider {
        Provider::Postgres => Box::new(PostgreSqlDialect {}),
        Provider::MySql => Box::new(MySqlDialect {}),
        Provider::SqlServer => Box::new(MsSqlDialect {}),
        Provider::Sqlite => Box::new(SQLiteDialect {}),
        Provider::DuckDb => Box::new(DuckDbDialect {}),
        Provider::DataFusion => Box::new(GenericDialect {}),
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    pub flattened: usize,
    pub reordered: usize,
}

impl PassReport {
    pub fn changed(&self) -> bool {
        self.flattened > 0 || self.reordered > 0
    }
}

/// Re-renders `sql` after flattening redundant wrappers and reordering
/// conjuncts. `Ok(None)` means the AST passes found nothing to do.
pub fn apply(sql: &str, provider: Provider) -> Result<Option<(String, PassReport)>, ParserError> {
    let dialect = dialect_for(provider);
    let mut statements = Parser::parse_sql(dialect.as_ref(), sql)?;
    let [Statement::Query(query)] = statements.as_mut_slice() else {
        return Ok(None);
    };

    let mut report = PassReport::default();
    optimize_query(query, &mut report);
    if !report.changed() {
        return Ok(None);
    }
    Ok(Some((query.to_string(), report)))
}

fn optimize_query(query: &mut Query, report: &mut PassReport) {
    if let Some(with) = &mut query.with {
        for cte in &mut with.cte_tables {
            optimize_query(&mut cte.query, report);
        }
    }

    // ORDER BY alias.col would dangle once the alias disappears
    let mut ordered_by = Vec::new();
    if let Some(order_by) = &query.order_by {
        let _ = visit_expressions(order_by, |expr| {
            if let Expr::CompoundIdentifier(parts) = expr
                && let Some(first) = parts.first()
            {
                ordered_by.push(first.value.to_lowercase());
            }
            ControlFlow::<()>::Continue(())
        });
    }

    optimize_set_expr(&mut query.body, &ordered_by, report);
}

fn optimize_set_expr(body: &mut SetExpr, ordered_by: &[String], report: &mut PassReport) {
    match body {
        SetExpr::Select(select) => {
            for table in &mut select.from {
                if let TableFactor::Derived { subquery, .. } = &mut table.relation {
                    optimize_query(subquery, report);
                }
            }
            if flatten(select, ordered_by) {
                report.flattened += 1;
            }
            if reorder_predicates(select) {
                report.reordered += 1;
            }
        }
        SetExpr::SetOperation { left, right, .. } => {
            optimize_set_expr(left, &[], report);
            optimize_set_expr(right, &[], report);
        }
        SetExpr::Query(inner) => optimize_query(inner, report),
        _ => {}
    }
}

/// True when `select` is exactly `SELECT * FROM <relation> [WHERE ...]`.
fn is_bare_star_select(select: &Select) -> bool {
    let [table] = select.from.as_slice() else {
        return false;
    };
    if !table.joins.is_empty() {
        return false;
    }
    let mut bare = select.clone();
    bare.selection = None;
    bare.to_string() == format!("SELECT * FROM {}", table)
}

/// `SELECT * FROM (SELECT * FROM t [WHERE p]) AS a [WHERE q]`
/// becomes `SELECT * FROM t WHERE p AND q'` with `a.` stripped from q.
fn flatten(select: &mut Select, ordered_by: &[String]) -> bool {
    if !is_bare_star_select(select) {
        return false;
    }
    let TableFactor::Derived {
        lateral: false,
        subquery,
        alias: Some(alias),
        ..
    } = &select.from[0].relation
    else {
        return false;
    };
    if !alias.columns.is_empty() {
        return false;
    }
    let alias_name = alias.name.value.to_lowercase();
    if ordered_by.contains(&alias_name) {
        return false;
    }

    let SetExpr::Select(inner) = subquery.body.as_ref() else {
        return false;
    };
    // no WITH / ORDER BY / LIMIT / locking on the inner query
    if subquery.to_string() != inner.to_string() || !is_bare_star_select(inner) {
        return false;
    }

    let outer_filter = match select.selection.clone() {
        Some(mut expr) => {
            if !unqualify(&mut expr, &alias_name) {
                return false;
            }
            Some(expr)
        }
        None => None,
    };

    let mut flattened = inner.as_ref().clone();
    flattened.selection = match (flattened.selection.take(), outer_filter) {
        (Some(inner_filter), Some(outer_filter)) => Some(Expr::BinaryOp {
            left: Box::new(parenthesize_disjunction(inner_filter)),
            op: BinaryOperator::And,
            right: Box::new(parenthesize_disjunction(outer_filter)),
        }),
        (inner_filter, outer_filter) => inner_filter.or(outer_filter),
    };
    *select = flattened;
    true
}

/// OR and XOR bind looser than the AND that joins the two filters.
fn parenthesize_disjunction(expr: Expr) -> Expr {
    match expr {
        Expr::BinaryOp {
            op: BinaryOperator::Or | BinaryOperator::Xor,
            ..
        } => Expr::Nested(Box::new(expr)),
        other => other,
    }
}

/// Rewrites `alias.col` into `col`. Fails on subqueries and on columns
/// qualified by anything else.
fn unqualify(expr: &mut Expr, alias: &str) -> bool {
    let mut compatible = true;
    let _ = visit_expressions_mut(expr, |e| {
        if contains_subquery_node(e) {
            compatible = false;
            return ControlFlow::Break(());
        }
        let replacement = match e {
            Expr::CompoundIdentifier(parts)
                if parts.len() == 2 && parts[0].value.to_lowercase() == alias =>
            {
                Some(Expr::Identifier(parts[1].clone()))
            }
            Expr::CompoundIdentifier(_) => {
                compatible = false;
                return ControlFlow::Break(());
            }
            _ => None,
        };
        if let Some(replacement) = replacement {
            *e = replacement;
        }
        ControlFlow::Continue(())
    });
    compatible
}

fn contains_subquery_node(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Subquery(_) | Expr::Exists { .. } | Expr::InSubquery { .. }
    )
}

fn contains_subquery(expr: &Expr) -> bool {
    visit_expressions(expr, |e| {
        if contains_subquery_node(e) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })
    .is_break()
}

/// Cheap conjuncts first: column = literal, other comparisons, pattern and
/// list matches, then anything with a subquery. Stable within a class.
fn reorder_predicates(select: &mut Select) -> bool {
    let Some(selection) = select.selection.take() else {
        return false;
    };
    let mut conjuncts = Vec::new();
    split_conjunction(selection, &mut conjuncts);

    let mut ranked: Vec<(u8, Expr)> = conjuncts
        .into_iter()
        .map(|expr| (cost_class(&expr), expr))
        .collect();
    let before: Vec<u8> = ranked.iter().map(|(class, _)| *class).collect();
    ranked.sort_by_key(|(class, _)| *class);
    let changed = ranked.iter().map(|(class, _)| *class).ne(before.iter().copied());

    select.selection = ranked.into_iter().map(|(_, expr)| expr).reduce(|left, right| Expr::BinaryOp {
        left: Box::new(left),
        op: BinaryOperator::And,
        right: Box::new(right),
    });
    changed
}

fn split_conjunction(expr: Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            split_conjunction(*left, out);
            split_conjunction(*right, out);
        }
        other => out.push(other),
    }
}

fn cost_class(expr: &Expr) -> u8 {
    if contains_subquery(expr) {
        return 3;
    }
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } if (is_column(left) && is_literal(right)) || (is_literal(left) && is_column(right)) => 0,
        Expr::BinaryOp {
            op:
                BinaryOperator::Eq
                | BinaryOperator::NotEq
                | BinaryOperator::Lt
                | BinaryOperator::LtEq
                | BinaryOperator::Gt
                | BinaryOperator::GtEq,
            ..
        }
        | Expr::IsNull(_)
        | Expr::IsNotNull(_) => 1,
        _ => 2,
    }
}

fn is_column(expr: &Expr) -> bool {
    matches!(expr, Expr::Identifier(_) | Expr::CompoundIdentifier(_))
}

fn is_literal(expr: &Expr) -> bool {
    matches!(expr, Expr::Value(_))
}
