// warden-core/src/domain/tenancy/rewrite.rs

use std::ops::Range;

use super::coverage::{CoverageChecker, Exposure, branch_exposure};
use super::lexer::TokenKind;
use super::structure::{Branch, BranchKind, QueryExpr, RelationKind, SelectBranch};

/// Alias of the derived table an unscoped branch is wrapped in.
pub const SCOPE_ALIAS: &str = "__tenant_scope";

/// A replacement of a token range; an empty range inserts before its start.
type Edit = (Range<usize>, String);

/// Rewrites a parsed statement so that every branch is provably scoped.
/// Subtrees that already pass coverage are re-emitted untouched.
pub struct Rewriter<'c, 's, 'a> {
    checker: &'c CoverageChecker<'s, 'a>,
    tenant_literal: String,
    injected: bool,
}

impl<'c, 's, 'a> Rewriter<'c, 's, 'a> {
    pub fn new(checker: &'c CoverageChecker<'s, 'a>, tenant_literal: String) -> Self {
        Self {
            checker,
            tenant_literal,
            injected: false,
        }
    }

    pub fn injected(&self) -> bool {
        self.injected
    }

    pub fn secure_query(&mut self, query: &QueryExpr, ctes: &[String], exposure: Exposure) -> String {
        if self.checker.check_query(query, ctes, exposure).is_ok() {
            return self.render(query.range.clone(), &[]);
        }

        let mut edits = Vec::new();
        let mut scope = ctes.to_vec();
        for cte in &query.ctes {
            let mut body_scope = scope.clone();
            if query.recursive {
                body_scope.push(cte.name.clone());
            }
            let body = self.secure_query(&cte.body, &body_scope, Exposure::Direct);
            edits.push((cte.body.range.clone(), body));
            scope.push(cte.name.clone());
        }

        let branch_exposure = branch_exposure(query, exposure);
        let mut wrapped = Vec::new();
        for branch in &query.branches {
            let (text, wrapped_qualifiers) = self.secure_branch(branch, &scope, branch_exposure);
            edits.push((branch.range.clone(), text));
            wrapped.push(wrapped_qualifiers);
        }

        for subquery in &query.tail_subqueries {
            let text = self.secure_query(subquery, &scope, Exposure::Direct);
            edits.push((subquery.range.clone(), text));
        }

        // ORDER BY t.x cannot see inside the wrapper of a lone branch
        if let (Some(tail), [Some(qualifiers)]) = (&query.tail, wrapped.as_slice()) {
            edits.extend(self.unqualify(tail.clone(), qualifiers, &query.tail_subqueries));
        }

        self.render(query.range.clone(), &edits)
    }

    /// Returns the branch text and, when it was wrapped, the qualifiers the
    /// wrapper hides from the enclosing query.
    fn secure_branch(&mut self, branch: &Branch, ctes: &[String], exposure: Exposure) -> (String, Option<Vec<String>>) {
        match &branch.kind {
            BranchKind::Nested(inner) => {
                let text = self.secure_query(inner, ctes, exposure);
                let edits = vec![(inner.range.clone(), text)];
                (self.render(branch.range.clone(), &edits), None)
            }
            BranchKind::Values(subqueries) => {
                let edits: Vec<Edit> = subqueries
                    .iter()
                    .map(|s| (s.range.clone(), self.secure_query(s, ctes, Exposure::Direct)))
                    .collect();
                (self.render(branch.range.clone(), &edits), None)
            }
            BranchKind::Select(select) => self.secure_select(branch.range.clone(), select, ctes, exposure),
        }
    }

    fn secure_select(
        &mut self,
        range: Range<usize>,
        select: &SelectBranch,
        ctes: &[String],
        exposure: Exposure,
    ) -> (String, Option<Vec<String>>) {
        if self.checker.check_select(select, ctes, exposure).is_ok() {
            return (self.render(range, &[]), None);
        }

        let mut edits: Vec<Edit> = Vec::new();
        for subquery in &select.subqueries {
            let text = self.secure_query(subquery, ctes, Exposure::Direct);
            edits.push((subquery.range.clone(), text));
        }

        let proofs = self.checker.proofs(select);
        let mut unscoped = Vec::new();
        for relation in &select.relations {
            let covered = self.checker.is_covered(select, relation, &proofs, exposure);
            match &relation.kind {
                RelationKind::Table { .. } => {
                    let is_cte = relation
                        .cte_candidate()
                        .is_some_and(|name| ctes.iter().any(|cte| cte == name));
                    if !covered && !is_cte {
                        unscoped.push(relation);
                    }
                }
                RelationKind::Function { arguments, .. } => {
                    for argument in arguments {
                        let text = self.secure_query(argument, ctes, Exposure::Direct);
                        edits.push((argument.range.clone(), text));
                    }
                }
                RelationKind::Derived(inner) => {
                    let inner_exposure = if covered { Exposure::Filtered } else { Exposure::Direct };
                    let text = self.secure_query(inner, ctes, inner_exposure);
                    edits.push((inner.range.clone(), text));
                }
            }
        }

        if unscoped.is_empty() {
            return (self.render(range, &edits), None);
        }
        self.injected = true;
        let column = self.checker.matcher().column().to_string();

        if let [relation] = select.relations.as_slice()
            && self.checker.projects_all_columns(select, relation)
        {
            let inner = self.render(range, &edits);
            let text = format!(
                "SELECT * FROM ({inner}) AS {SCOPE_ALIAS} WHERE {SCOPE_ALIAS}.{column} = {}",
                self.tenant_literal
            );
            return (text, Some(vec![relation.qualifier.clone()]));
        }

        let tokens = self.checker.stream().tokens();
        let conjuncts = unscoped
            .iter()
            .map(|relation| {
                format!(
                    "{}.{column} = {}",
                    tokens[relation.qualifier_token].text, self.tenant_literal
                )
            })
            .collect::<Vec<_>>()
            .join(" AND ");

        match &select.where_clause {
            Some(clause) => {
                let (inside, outside): (Vec<Edit>, Vec<Edit>) = edits
                    .into_iter()
                    .partition(|(r, _)| r.start >= clause.start && r.end <= clause.end);
                let original = self.render(clause.clone(), &inside);
                let mut edits = outside;
                edits.push((clause.clone(), format!("({original}) AND {conjuncts}")));
                (self.render(range, &edits), None)
            }
            None => {
                let at = select.where_insert_at;
                edits.push((at..at, format!("WHERE {conjuncts}")));
                (self.render(range, &edits), None)
            }
        }
    }

    fn unqualify(&self, tail: Range<usize>, qualifiers: &[String], subqueries: &[QueryExpr]) -> Vec<Edit> {
        let tokens = self.checker.stream().tokens();
        let mut edits = Vec::new();
        let mut i = tail.start;
        while i < tail.end {
            if let Some(subquery) = subqueries.iter().find(|s| s.range.contains(&i)) {
                i = subquery.range.end;
                continue;
            }
            let qualifies = i + 2 < tail.end
                && tokens[i].is_identifier()
                && tokens[i + 1].kind == TokenKind::Dot
                && tokens[i + 2].is_identifier()
                && (i == 0 || tokens[i - 1].kind != TokenKind::Dot)
                && tokens[i].ident_key().is_some_and(|k| qualifiers.contains(&k));
            if qualifies {
                edits.push((i..i + 2, String::new()));
                i += 2;
            } else {
                i += 1;
            }
        }
        edits
    }

    /// Re-emits `range`, applying `edits`. Comments are gone and every gap
    /// between tokens collapses to one space; token text is copied verbatim.
    fn render(&self, range: Range<usize>, edits: &[Edit]) -> String {
        let tokens = self.checker.stream().tokens();
        let mut out = String::new();
        let mut last_end: Option<usize> = None;
        let mut after_insert = false;

        let mut i = range.start;
        while i < range.end {
            for (_, text) in edits.iter().filter(|(r, _)| r.is_empty() && r.start == i) {
                push_piece(&mut out, text, true);
                after_insert = true;
            }

            let gap = after_insert || last_end.is_some_and(|end| tokens[i].start > end);
            if let Some((edited, text)) = edits.iter().find(|(r, _)| !r.is_empty() && r.start == i) {
                if !text.is_empty() {
                    push_piece(&mut out, text, gap);
                    last_end = Some(tokens[edited.end - 1].end);
                    after_insert = false;
                }
                i = edited.end;
                continue;
            }

            push_piece(&mut out, tokens[i].text, gap);
            last_end = Some(tokens[i].end);
            after_insert = false;
            i += 1;
        }

        for (_, text) in edits.iter().filter(|(r, _)| r.is_empty() && r.start == range.end) {
            push_piece(&mut out, text, true);
        }
        out
    }
}

fn push_piece(out: &mut String, text: &str, separated: bool) {
    if separated && !out.is_empty() {
        out.push(' ');
    }
    out.push_str(text);
}
