// warden-core/src/domain/tenancy/structure.rs
//
// Conservative structural model of a read-only statement: query expressions,
// set-operation branches, FROM relations and every nested subquery. Anything
// outside this shape is rejected as unparseable rather than guessed.

use std::ops::Range;

use super::lexer::{Token, TokenKind, tokenize};
use crate::domain::error::GuardError;

const SET_OPERATORS: [&str; 4] = ["UNION", "INTERSECT", "EXCEPT", "MINUS"];
const TAIL_KEYWORDS: [&str; 4] = ["LIMIT", "OFFSET", "FETCH", "FOR"];
const JOIN_SEPARATORS: [&str; 3] = ["JOIN", "STRAIGHT_JOIN", "APPLY"];
const JOIN_MODIFIERS: [&str; 12] = [
    "NATURAL",
    "INNER",
    "LEFT",
    "RIGHT",
    "FULL",
    "CROSS",
    "OUTER",
    "SEMI",
    "ANTI",
    "ASOF",
    "POSITIONAL",
    "GLOBAL",
];
const NOT_AN_ALIAS: [&str; 7] = ["TABLESAMPLE", "SAMPLE", "PIVOT", "UNPIVOT", "WITH", "FINAL", "AT"];
/// Table functions that only generate values from their arguments.
pub const ROW_GENERATORS: [&str; 3] = ["generate_series", "range", "unnest"];

pub(crate) fn unparseable(reason: impl Into<String>) -> GuardError {
    GuardError::UnparseableStructure(reason.into())
}

/// Tokens of one statement plus the matching index of every group opener and
/// closer: parentheses, brackets, braces and `CASE … END`.
#[derive(Debug)]
pub struct TokenStream<'a> {
    tokens: Vec<Token<'a>>,
    partners: Vec<Option<usize>>,
}

/// Closing text of the group `token` opens, if it opens one.
fn group_closer(token: &Token<'_>) -> Option<&'static str> {
    match (token.kind, token.text) {
        (TokenKind::LParen, _) => Some(")"),
        (TokenKind::Punct, "[") => Some("]"),
        (TokenKind::Punct, "{") => Some("}"),
        (TokenKind::Word, _) if token.is_keyword("CASE") => Some("END"),
        _ => None,
    }
}

fn closes_group(token: &Token<'_>) -> bool {
    match token.kind {
        TokenKind::RParen => true,
        TokenKind::Punct => matches!(token.text, "]" | "}"),
        TokenKind::Word => token.is_keyword("END"),
        _ => false,
    }
}

impl<'a> TokenStream<'a> {
    pub fn new(sql: &'a str) -> Result<Self, GuardError> {
        let tokens = tokenize(sql)?;
        let mut partners = vec![None; tokens.len()];
        let mut open: Vec<(usize, &'static str)> = Vec::new();

        for (i, token) in tokens.iter().enumerate() {
            if let Some(closer) = group_closer(token) {
                open.push((i, closer));
            } else if closes_group(token) {
                let (start, expected) = open
                    .pop()
                    .ok_or_else(|| unparseable(format!("unbalanced '{}'", token.text)))?;
                if !token.text.eq_ignore_ascii_case(expected) {
                    return Err(unparseable(format!(
                        "'{}' closes a group opened by '{}'",
                        token.text, tokens[start].text
                    )));
                }
                partners[start] = Some(i);
                partners[i] = Some(start);
            }
        }
        if let Some((start, _)) = open.last() {
            return Err(unparseable(format!("unbalanced '{}'", tokens[*start].text)));
        }

        Ok(Self { tokens, partners })
    }

    pub fn tokens(&self) -> &[Token<'a>] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn slice(&self, range: Range<usize>) -> &[Token<'a>] {
        &self.tokens[range]
    }

    pub fn partner(&self, i: usize) -> Option<usize> {
        self.partners.get(i).copied().flatten()
    }

    pub fn is_keyword(&self, i: usize, keyword: &str) -> bool {
        self.tokens.get(i).is_some_and(|t| t.is_keyword(keyword))
    }

    fn kind_at(&self, i: usize) -> Option<TokenKind> {
        self.tokens.get(i).map(|t| t.kind)
    }

    /// True when `i` opens a parenthesised SELECT / WITH query.
    pub fn opens_subquery(&self, i: usize) -> bool {
        self.kind_at(i) == Some(TokenKind::LParen)
            && (self.is_keyword(i + 1, "SELECT") || self.is_keyword(i + 1, "WITH"))
    }

    /// Index just past the token at `i`, skipping a whole group when `i` opens one.
    fn step(&self, i: usize) -> usize {
        match self.partner(i) {
            Some(close) if close > i => close + 1,
            _ => i + 1,
        }
    }

    /// Indices of the tokens of `range` that sit at its own nesting depth.
    /// A whole group is represented by its opening token.
    pub fn top_level(&self, range: Range<usize>) -> Vec<usize> {
        let mut out = Vec::new();
        let mut i = range.start;
        while i < range.end {
            out.push(i);
            i = self.step(i);
        }
        out
    }

    /// Parses `range` (the statement without its trailing `;`) and checks that
    /// every SELECT keyword of the statement belongs to a recognised branch.
    pub fn parse_statement(&self, range: Range<usize>) -> Result<QueryExpr, GuardError> {
        let query = self.parse_query(range.clone())?;

        let mut recognised = Vec::new();
        query.collect_selects(&mut recognised);
        let present = self.tokens[range]
            .iter()
            .filter(|t| t.is_keyword("SELECT"))
            .count();
        if present != recognised.len() {
            return Err(unparseable("SELECT used outside a recognised query position"));
        }
        Ok(query)
    }

    fn parse_query(&self, range: Range<usize>) -> Result<QueryExpr, GuardError> {
        if range.is_empty() {
            return Err(unparseable("empty query expression"));
        }

        let mut i = range.start;
        let mut recursive = false;
        let mut ctes = Vec::new();

        if self.is_keyword(i, "WITH") {
            i += 1;
            if self.is_keyword(i, "RECURSIVE") {
                recursive = true;
                i += 1;
            }
            loop {
                let name = self
                    .tokens
                    .get(i)
                    .filter(|t| i < range.end && t.is_identifier())
                    .and_then(Token::ident_key)
                    .ok_or_else(|| unparseable("expected a common table expression name"))?;
                i += 1;
                let column_aliases = self.kind_at(i) == Some(TokenKind::LParen);
                if column_aliases {
                    i = self.step(i);
                }
                if !self.is_keyword(i, "AS") {
                    return Err(unparseable(format!("expected AS after common table expression '{name}'")));
                }
                i += 1;
                if self.is_keyword(i, "NOT") {
                    i += 1;
                }
                if self.is_keyword(i, "MATERIALIZED") {
                    i += 1;
                }
                let close = match (self.kind_at(i), self.partner(i)) {
                    (Some(TokenKind::LParen), Some(close)) if close < range.end => close,
                    _ => {
                        return Err(unparseable(format!(
                            "common table expression '{name}' needs a parenthesised body"
                        )));
                    }
                };
                let body = self.parse_query(i + 1..close)?;
                ctes.push(Cte {
                    name,
                    body,
                    column_aliases,
                });
                i = close + 1;
                if i < range.end && self.kind_at(i) == Some(TokenKind::Comma) {
                    i += 1;
                } else {
                    break;
                }
            }
        }

        let mut segments = Vec::new();
        let mut set_operators = Vec::new();
        let mut segment_start = i;
        let mut skip_until = i;
        for t in self.top_level(i..range.end) {
            if t < skip_until {
                continue;
            }
            if self.tokens[t].is_any_keyword(&SET_OPERATORS) {
                segments.push(segment_start..t);
                let mut next = t + 1;
                if self.is_keyword(next, "ALL") || self.is_keyword(next, "DISTINCT") {
                    next += 1;
                }
                set_operators.push(t..next);
                segment_start = next;
                skip_until = next;
            }
        }
        segments.push(segment_start..range.end);

        let last = segments.len() - 1;
        let mut tail = None;
        for (n, segment) in segments.iter_mut().enumerate() {
            if let Some(start) = self.tail_start(segment.clone()) {
                if n != last {
                    return Err(unparseable(
                        "ORDER BY / LIMIT before a set operator must be parenthesised",
                    ));
                }
                tail = Some(start..segment.end);
                segment.end = start;
            }
        }

        let branches = segments
            .into_iter()
            .map(|segment| self.parse_branch(segment))
            .collect::<Result<Vec<_>, _>>()?;
        let tail_subqueries = match &tail {
            Some(tail) => self.find_subqueries(tail.clone())?,
            None => Vec::new(),
        };

        Ok(QueryExpr {
            range,
            recursive,
            ctes,
            branches,
            set_operators,
            tail,
            tail_subqueries,
        })
    }

    fn tail_start(&self, range: Range<usize>) -> Option<usize> {
        self.top_level(range).into_iter().find(|&t| {
            let token = &self.tokens[t];
            (token.is_keyword("ORDER") && self.is_keyword(t + 1, "BY"))
                || token.is_any_keyword(&TAIL_KEYWORDS)
        })
    }

    fn parse_branch(&self, range: Range<usize>) -> Result<Branch, GuardError> {
        let first = self
            .tokens
            .get(range.start)
            .filter(|_| !range.is_empty())
            .ok_or_else(|| unparseable("empty set-operation branch"))?;

        let kind = if first.is_keyword("SELECT") {
            BranchKind::Select(self.parse_select(range.clone())?)
        } else if first.kind == TokenKind::LParen && self.partner(range.start) == Some(range.end - 1) {
            BranchKind::Nested(Box::new(self.parse_query(range.start + 1..range.end - 1)?))
        } else if first.is_keyword("VALUES") {
            BranchKind::Values(self.find_subqueries(range.clone())?)
        } else {
            return Err(unparseable(format!(
                "unsupported query branch starting with '{}'",
                first.text
            )));
        };
        Ok(Branch { range, kind })
    }

    fn parse_select(&self, range: Range<usize>) -> Result<SelectBranch, GuardError> {
        let mut clauses: Vec<(Clause, usize, usize)> = Vec::new();
        for t in self.top_level(range.start + 1..range.end) {
            let token = &self.tokens[t];
            let found = if token.is_keyword("FROM") && !self.is_distinct_from(t) {
                Some((Clause::From, t + 1))
            } else if token.is_keyword("WHERE") {
                Some((Clause::Where, t + 1))
            } else if token.is_keyword("GROUP") && self.is_keyword(t + 1, "BY") {
                Some((Clause::GroupBy, t + 2))
            } else if token.is_keyword("HAVING") {
                Some((Clause::Having, t + 1))
            } else if token.is_keyword("WINDOW") {
                Some((Clause::Window, t + 1))
            } else if token.is_keyword("QUALIFY") {
                Some((Clause::Qualify, t + 1))
            } else {
                None
            };
            if let Some((clause, body_start)) = found {
                if clauses.iter().any(|(c, _, _)| *c == clause) {
                    return Err(unparseable(format!("duplicate {} clause", clause.keyword())));
                }
                clauses.push((clause, t, body_start));
            }
        }

        if clauses.iter().position(|(c, _, _)| *c == Clause::From).is_some_and(|p| p != 0) {
            return Err(unparseable("FROM must precede the other SELECT clauses"));
        }

        let projection_end = clauses.first().map_or(range.end, |(_, keyword, _)| *keyword);
        let projection = range.start + 1..projection_end;
        if projection.is_empty() {
            return Err(unparseable("SELECT without a projection"));
        }

        let mut bodies = Vec::new();
        for (n, (clause, _, body_start)) in clauses.iter().enumerate() {
            let body_end = clauses.get(n + 1).map_or(range.end, |(_, keyword, _)| *keyword);
            if *body_start >= body_end {
                return Err(unparseable(format!("empty {} clause", clause.keyword())));
            }
            bodies.push((*clause, *body_start..body_end));
        }
        let body_of = |wanted: Clause| {
            bodies
                .iter()
                .find(|(clause, _)| *clause == wanted)
                .map(|(_, body)| body.clone())
        };

        let from = body_of(Clause::From);
        let (relations, conditions) = match &from {
            Some(from) => self.parse_relations(from.clone())?,
            None => (Vec::new(), Vec::new()),
        };
        let where_insert_at = match clauses.first() {
            Some((Clause::From, _, _)) => clauses.get(1).map_or(range.end, |(_, keyword, _)| *keyword),
            _ => range.end,
        };

        let mut subqueries = self.find_subqueries(projection.clone())?;
        for (clause, body) in &bodies {
            if *clause != Clause::From {
                subqueries.extend(self.find_subqueries(body.clone())?);
            }
        }
        for condition in conditions {
            subqueries.extend(self.find_subqueries(condition)?);
        }

        Ok(SelectBranch {
            projection,
            from,
            relations,
            where_clause: body_of(Clause::Where),
            group_by: body_of(Clause::GroupBy),
            having: body_of(Clause::Having),
            where_insert_at,
            subqueries,
        })
    }

    /// `IS [NOT] DISTINCT FROM` is a comparison, not a FROM clause.
    fn is_distinct_from(&self, t: usize) -> bool {
        t >= 2
            && self.is_keyword(t - 1, "DISTINCT")
            && (self.is_keyword(t - 2, "IS")
                || (t >= 3 && self.is_keyword(t - 2, "NOT") && self.is_keyword(t - 3, "IS")))
    }

    fn parse_relations(
        &self,
        range: Range<usize>,
    ) -> Result<(Vec<Relation>, Vec<Range<usize>>), GuardError> {
        let mut items = Vec::new();
        let mut start = range.start;
        for t in self.top_level(range.clone()) {
            let token = &self.tokens[t];
            if token.kind == TokenKind::Comma || token.is_any_keyword(&JOIN_SEPARATORS) {
                items.push(start..t);
                start = t + 1;
            }
        }
        items.push(start..range.end);

        let mut relations: Vec<Relation> = Vec::new();
        let mut conditions = Vec::new();
        for item in items {
            let mut end = item.end;
            while end > item.start && self.tokens[end - 1].is_any_keyword(&JOIN_MODIFIERS) {
                end -= 1;
            }

            let mut relation_end = end;
            if let Some(on) = self
                .top_level(item.start..end)
                .into_iter()
                .find(|&t| self.tokens[t].is_any_keyword(&["ON", "USING"]))
            {
                if on + 1 >= end {
                    return Err(unparseable("empty join condition"));
                }
                relation_end = on;
                conditions.push(on + 1..end);
            }

            let mut relation_start = item.start;
            while relation_start < relation_end
                && self.tokens[relation_start].is_any_keyword(&["LATERAL", "ONLY"])
            {
                relation_start += 1;
            }

            let relation = self.parse_relation(relation_start..relation_end)?;
            if relations.iter().any(|r| r.qualifier == relation.qualifier) {
                return Err(unparseable(format!(
                    "relation name '{}' is used more than once",
                    relation.qualifier
                )));
            }
            relations.push(relation);
        }

        Ok((relations, conditions))
    }

    fn parse_relation(&self, range: Range<usize>) -> Result<Relation, GuardError> {
        let first = self
            .tokens
            .get(range.start)
            .filter(|_| !range.is_empty())
            .ok_or_else(|| unparseable("empty relation in FROM clause"))?;

        match first.kind {
            TokenKind::LParen => {
                if !self.opens_subquery(range.start) {
                    return Err(unparseable("parenthesised joins are not supported"));
                }
                let close = self
                    .partner(range.start)
                    .filter(|close| *close < range.end)
                    .ok_or_else(|| unparseable("unbalanced derived table"))?;
                let inner = self.parse_query(range.start + 1..close)?;
                let (alias, column_aliases) = self.parse_alias(close + 1, range.end)?;
                let alias = alias.ok_or_else(|| unparseable("derived tables must have an alias"))?;
                Ok(Relation {
                    range,
                    qualifier: self.key(alias),
                    qualifier_token: alias,
                    column_aliases,
                    kind: RelationKind::Derived(Box::new(inner)),
                })
            }
            TokenKind::Word | TokenKind::QuotedIdent => {
                let mut name = vec![self.key(range.start)];
                let mut last_part = range.start;
                let mut i = range.start + 1;
                while i + 1 < range.end
                    && self.kind_at(i) == Some(TokenKind::Dot)
                    && self.tokens[i + 1].is_identifier()
                {
                    name.push(self.key(i + 1));
                    last_part = i + 1;
                    i += 2;
                }

                if i < range.end && self.kind_at(i) == Some(TokenKind::LParen) {
                    let close = self
                        .partner(i)
                        .filter(|close| *close < range.end)
                        .ok_or_else(|| unparseable("unbalanced table function call"))?;
                    let function = self.row_generator(&name, i + 1..close)?;
                    let arguments = self.find_subqueries(i + 1..close)?;
                    let (alias, column_aliases) = self.parse_alias(close + 1, range.end)?;
                    let qualifier_token = alias.unwrap_or(last_part);
                    return Ok(Relation {
                        range,
                        qualifier: self.key(qualifier_token),
                        qualifier_token,
                        column_aliases,
                        kind: RelationKind::Function {
                            name: function,
                            arguments,
                        },
                    });
                }

                let (alias, column_aliases) = self.parse_alias(i, range.end)?;
                if column_aliases {
                    return Err(unparseable(format!(
                        "column alias lists on table '{}' are not supported",
                        name.join(".")
                    )));
                }
                let qualifier_token = alias.unwrap_or(last_part);
                Ok(Relation {
                    range,
                    qualifier: self.key(qualifier_token),
                    qualifier_token,
                    column_aliases,
                    kind: RelationKind::Table { name },
                })
            }
            _ => Err(unparseable(format!(
                "unsupported relation starting with '{}'",
                first.text
            ))),
        }
    }

    /// Only value generators may appear as table functions, and never with
    /// string or placeholder arguments: a string can carry a whole query or a
    /// file path the engine would read.
    fn row_generator(&self, name: &[String], arguments: Range<usize>) -> Result<String, GuardError> {
        let function = match name {
            [function] if ROW_GENERATORS.contains(&function.as_str()) => function.clone(),
            _ => {
                return Err(unparseable(format!(
                    "table function '{}' is not allowed",
                    name.join(".")
                )));
            }
        };
        if self.tokens[arguments]
            .iter()
            .any(|t| matches!(t.kind, TokenKind::StringLit | TokenKind::Placeholder))
        {
            return Err(unparseable(format!(
                "table function '{function}' cannot take string arguments"
            )));
        }
        Ok(function)
    }

    /// Optional `[AS] alias [(columns)]` filling exactly `i..end`. Returns the
    /// alias token and whether a column list follows it.
    fn parse_alias(&self, mut i: usize, end: usize) -> Result<(Option<usize>, bool), GuardError> {
        let mut alias = None;
        if i < end && self.tokens[i].is_keyword("AS") {
            if i + 1 < end && self.tokens[i + 1].is_identifier() {
                alias = Some(i + 1);
                i += 2;
            } else {
                return Err(unparseable("expected an alias after AS"));
            }
        } else if i < end
            && self.tokens[i].is_identifier()
            && !self.tokens[i].is_any_keyword(&NOT_AN_ALIAS)
        {
            alias = Some(i);
            i += 1;
        }
        let mut columns = false;
        if alias.is_some() && i < end && self.kind_at(i) == Some(TokenKind::LParen) {
            columns = true;
            i = self.step(i);
        }
        if i < end {
            return Err(unparseable(format!(
                "unsupported relation syntax near '{}'",
                self.tokens[i].text
            )));
        }
        Ok((alias, columns))
    }

    fn find_subqueries(&self, range: Range<usize>) -> Result<Vec<QueryExpr>, GuardError> {
        let mut found = Vec::new();
        let mut i = range.start;
        while i < range.end {
            if self.opens_subquery(i) {
                let close = self
                    .partner(i)
                    .ok_or_else(|| unparseable("unbalanced subquery"))?;
                found.push(self.parse_query(i + 1..close)?);
                i = close + 1;
            } else if self.kind_at(i) == Some(TokenKind::LParen)
                && (self.is_keyword(i + 1, "TABLE") || self.is_keyword(i + 1, "FROM"))
            {
                return Err(unparseable(format!(
                    "'({} ...)' subqueries are not supported",
                    self.tokens[i + 1].text
                )));
            } else {
                i += 1;
            }
        }
        Ok(found)
    }

    fn key(&self, i: usize) -> String {
        self.tokens[i].ident_key().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clause {
    From,
    Where,
    GroupBy,
    Having,
    Window,
    Qualify,
}

impl Clause {
    fn keyword(self) -> &'static str {
        match self {
            Clause::From => "FROM",
            Clause::Where => "WHERE",
            Clause::GroupBy => "GROUP BY",
            Clause::Having => "HAVING",
            Clause::Window => "WINDOW",
            Clause::Qualify => "QUALIFY",
        }
    }
}

/// `[WITH ctes] branch (set-op branch)* [tail]`
#[derive(Debug, Clone)]
pub struct QueryExpr {
    pub range: Range<usize>,
    pub recursive: bool,
    pub ctes: Vec<Cte>,
    pub branches: Vec<Branch>,
    pub set_operators: Vec<Range<usize>>,
    /// Trailing ORDER BY / LIMIT / OFFSET / FETCH / FOR of the whole expression.
    pub tail: Option<Range<usize>>,
    pub tail_subqueries: Vec<QueryExpr>,
}

impl QueryExpr {
    fn collect_selects(&self, out: &mut Vec<usize>) {
        for cte in &self.ctes {
            cte.body.collect_selects(out);
        }
        for branch in &self.branches {
            match &branch.kind {
                BranchKind::Select(select) => {
                    out.push(branch.range.start);
                    for relation in &select.relations {
                        match &relation.kind {
                            RelationKind::Derived(inner) => inner.collect_selects(out),
                            RelationKind::Function { arguments, .. } => {
                                arguments.iter().for_each(|a| a.collect_selects(out))
                            }
                            RelationKind::Table { .. } => {}
                        }
                    }
                    select.subqueries.iter().for_each(|s| s.collect_selects(out));
                }
                BranchKind::Nested(inner) => inner.collect_selects(out),
                BranchKind::Values(subqueries) => subqueries.iter().for_each(|s| s.collect_selects(out)),
            }
        }
        self.tail_subqueries.iter().for_each(|s| s.collect_selects(out));
    }
}

#[derive(Debug, Clone)]
pub struct Cte {
    pub name: String,
    pub body: QueryExpr,
    pub column_aliases: bool,
}

#[derive(Debug, Clone)]
pub struct Branch {
    pub range: Range<usize>,
    pub kind: BranchKind,
}

#[derive(Debug, Clone)]
pub enum BranchKind {
    Select(SelectBranch),
    Nested(Box<QueryExpr>),
    Values(Vec<QueryExpr>),
}

#[derive(Debug, Clone)]
pub struct SelectBranch {
    pub projection: Range<usize>,
    pub from: Option<Range<usize>>,
    pub relations: Vec<Relation>,
    pub where_clause: Option<Range<usize>>,
    pub group_by: Option<Range<usize>>,
    pub having: Option<Range<usize>>,
    /// Token index a new WHERE clause is inserted before.
    pub where_insert_at: usize,
    /// Subqueries of the projection, conditions and non-FROM clauses.
    pub subqueries: Vec<QueryExpr>,
}

#[derive(Debug, Clone)]
pub struct Relation {
    pub range: Range<usize>,
    pub kind: RelationKind,
    /// Name the relation is referenced by: its alias, else the last name part.
    pub qualifier: String,
    pub qualifier_token: usize,
    /// `alias(c1, c2, …)` renames columns by position.
    pub column_aliases: bool,
}

impl Relation {
    /// Single-part table names may refer to a common table expression.
    pub fn cte_candidate(&self) -> Option<&str> {
        match &self.kind {
            RelationKind::Table { name } if name.len() == 1 => Some(name[0].as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RelationKind {
    Table { name: Vec<String> },
    Function { name: String, arguments: Vec<QueryExpr> },
    Derived(Box<QueryExpr>),
}
