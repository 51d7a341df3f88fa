// warden-core/src/domain/tenancy/coverage.rs

use super::predicate::PredicateMatcher;
use super::structure::{BranchKind, QueryExpr, Relation, RelationKind, SelectBranch, TokenStream};
use super::lexer::TokenKind;

/// How rows of a query expression reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exposure {
    /// Rows flow straight to the caller: every relation needs its own proof.
    Direct,
    /// Rows are filtered by the enclosing query on the tenant column, so a
    /// single-relation branch projecting `*` is already scoped.
    Filtered,
}

/// Proves that every relation of a parsed statement is tenant-scoped.
pub struct CoverageChecker<'s, 'a> {
    stream: &'s TokenStream<'a>,
    matcher: &'s PredicateMatcher<'s>,
}

impl<'s, 'a> CoverageChecker<'s, 'a> {
    pub fn new(stream: &'s TokenStream<'a>, matcher: &'s PredicateMatcher<'s>) -> Self {
        Self { stream, matcher }
    }

    pub fn stream(&self) -> &'s TokenStream<'a> {
        self.stream
    }

    pub fn matcher(&self) -> &'s PredicateMatcher<'s> {
        self.matcher
    }

    pub fn check_query(&self, query: &QueryExpr, ctes: &[String], exposure: Exposure) -> Result<(), String> {
        let mut scope = ctes.to_vec();
        for cte in &query.ctes {
            let mut body_scope = scope.clone();
            if query.recursive {
                body_scope.push(cte.name.clone());
            }
            self.check_query(&cte.body, &body_scope, Exposure::Direct)
                .map_err(|reason| format!("in common table expression '{}': {reason}", cte.name))?;
            scope.push(cte.name.clone());
        }

        let exposure = branch_exposure(query, exposure);
        for branch in &query.branches {
            match &branch.kind {
                BranchKind::Select(select) => self.check_select(select, &scope, exposure)?,
                BranchKind::Nested(inner) => self.check_query(inner, &scope, exposure)?,
                BranchKind::Values(subqueries) => {
                    for subquery in subqueries {
                        self.check_query(subquery, &scope, Exposure::Direct)?;
                    }
                }
            }
        }
        for subquery in &query.tail_subqueries {
            self.check_query(subquery, &scope, Exposure::Direct)?;
        }
        Ok(())
    }

    pub fn check_select(&self, select: &SelectBranch, ctes: &[String], exposure: Exposure) -> Result<(), String> {
        for subquery in &select.subqueries {
            self.check_query(subquery, ctes, Exposure::Direct)?;
        }

        let proofs = self.proofs(select);
        for relation in &select.relations {
            let covered = self.is_covered(select, relation, &proofs, exposure);
            match &relation.kind {
                RelationKind::Table { .. } => {
                    let is_cte = relation
                        .cte_candidate()
                        .is_some_and(|name| ctes.iter().any(|cte| cte == name));
                    if !covered && !is_cte {
                        return Err(self.unscoped(relation));
                    }
                }
                // row generators carry no tenant data of their own
                RelationKind::Function { arguments, .. } => {
                    for argument in arguments {
                        self.check_query(argument, ctes, Exposure::Direct)?;
                    }
                }
                RelationKind::Derived(inner) => {
                    let inner_exposure = if covered { Exposure::Filtered } else { Exposure::Direct };
                    self.check_query(inner, ctes, inner_exposure)
                        .map_err(|reason| format!("in derived table '{}': {reason}", relation.qualifier))?;
                }
            }
        }
        Ok(())
    }

    /// Qualifiers proven by WHERE, plus HAVING proofs on grouped tenant columns.
    pub fn proofs(&self, select: &SelectBranch) -> Vec<Option<String>> {
        let mut proofs = select
            .where_clause
            .clone()
            .map(|clause| self.matcher.scoped_qualifiers(self.stream, clause))
            .unwrap_or_default();

        if let (Some(having), Some(group_by)) = (&select.having, &select.group_by) {
            let grouped = self.matcher.column_references(self.stream, group_by.clone());
            proofs.extend(
                self.matcher
                    .scoped_qualifiers(self.stream, having.clone())
                    .into_iter()
                    .filter(|qualifier| grouped.contains(qualifier)),
            );
        }
        proofs
    }

    pub fn is_covered(
        &self,
        select: &SelectBranch,
        relation: &Relation,
        proofs: &[Option<String>],
        exposure: Exposure,
    ) -> bool {
        // a renamed column list detaches the qualifier from the real tenant column
        if relation.column_aliases {
            return false;
        }
        let single = select.relations.len() == 1;
        let proven = proofs.iter().any(|proof| match proof {
            Some(qualifier) => *qualifier == relation.qualifier,
            None => single,
        });
        proven || (exposure == Exposure::Filtered && single && self.projects_all_columns(select, relation))
    }

    /// `SELECT *` or `SELECT q.*` over the relation: the tenant column seen by
    /// an enclosing filter is the relation's own column.
    pub fn projects_all_columns(&self, select: &SelectBranch, relation: &Relation) -> bool {
        let projection = self.stream.slice(select.projection.clone());
        match projection {
            [star] => star.is_op("*"),
            [qualifier, dot, star] => {
                qualifier.ident_key().as_deref() == Some(relation.qualifier.as_str())
                    && dot.kind == TokenKind::Dot
                    && star.is_op("*")
            }
            _ => false,
        }
    }

    fn unscoped(&self, relation: &Relation) -> String {
        format!(
            "relation '{}' is not filtered by {} = <tenant>",
            relation.qualifier,
            self.matcher.column()
        )
    }
}

/// Positional set operations can rename columns across branches, so only a
/// single-branch expression inherits the enclosing filter.
pub fn branch_exposure(query: &QueryExpr, exposure: Exposure) -> Exposure {
    if query.branches.len() == 1 {
        exposure
    } else {
        Exposure::Direct
    }
}
