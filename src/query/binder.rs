//! Query binding: placeholder positions, parameter types and result columns.
//!
//! A text goes through trim, decoration stripping, placeholder scanning,
//! parsing, parameter typing and result inference, in that order. Binding is
//! pure: the same text against the same graph always yields the same
//! [`BoundQuery`].

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use super::ast::*;
use super::fields::parse_fields;
use super::parser::parse_single;
use super::placeholder::{marker, scan, Scan};
use super::strip::{decorations, Decoration};
use crate::config::{Engine, QueryConfig};
use crate::error::QueryBindError;
use crate::model::{
    ident_eq, BoundQuery, Column, Parameter, ResolvedType, ResultColumn, SchemaGraph, Table,
};

type Result<T> = std::result::Result<T, QueryBindError>;

/// Caller-supplied type hook, consulted for every parameter and result column
/// after built-in resolution. Returning `Some` replaces the resolved type.
pub trait TypeOverride: Send + Sync {
    fn parameter(&self, _query: &str, _param: &Parameter) -> Option<ResolvedType> {
        None
    }

    fn column(&self, _query: &str, _column: &ResultColumn) -> Option<ResolvedType> {
        None
    }
}

/// Binds query texts against one schema graph.
#[derive(Clone)]
pub struct Binder<'g> {
    graph: &'g SchemaGraph,
    engine: Engine,
    allow_nulls: bool,
    type_override: Option<Arc<dyn TypeOverride>>,
}

impl<'g> Binder<'g> {
    pub fn new(graph: &'g SchemaGraph, engine: Engine) -> Self {
        Self {
            graph,
            engine,
            allow_nulls: false,
            type_override: None,
        }
    }

    /// Default for queries that leave `allow_nulls` unset.
    pub fn allow_nulls(mut self, allow: bool) -> Self {
        self.allow_nulls = allow;
        self
    }

    pub fn with_override(mut self, type_override: Arc<dyn TypeOverride>) -> Self {
        self.type_override = Some(type_override);
        self
    }

    pub fn bind(&self, query: &QueryConfig, sql: &str) -> Result<BoundQuery> {
        if sql.trim().is_empty() {
            return Err(QueryBindError::EmptyQuery);
        }

        let source = if query.trim { trim_lines(sql) } else { sql.to_string() };
        let decorations = if query.strip {
            decorations(&source)?
        } else {
            Vec::new()
        };
        let scan = scan(&source, &query.placeholders, query.interpolate)?;

        let (parse_text, text, emitted) = self.rewrite(&source, &decorations, &scan);

        let fields = query.fields.as_deref().map(parse_fields).transpose()?;
        let parsed = match parse_single(&parse_text, self.engine) {
            Ok(parsed) => Some(parsed),
            Err(err) if query.mode.returns_rows() && fields.is_none() => return Err(err),
            Err(err) => {
                tracing::debug!(query = %query.name, error = %err, "parse failed, result inference skipped");
                None
            }
        };

        if let Some(parsed) = &parsed {
            if query.mode.returns_rows() && fields.is_none() && !parsed.returns_rows() {
                return Err(QueryBindError::NoResultSet {
                    mode: query.mode.as_str().to_string(),
                });
            }
        }

        let ctx = Context {
            graph: self.graph,
            decorations: &decorations,
            allow_nulls: query.allow_nulls.unwrap_or(self.allow_nulls),
        };

        let mut inferred_params = BTreeMap::new();
        if let Some(parsed) = &parsed {
            ctx.type_query(parsed, &Scope::root(), &mut inferred_params);
        }

        let params: Vec<Parameter> = scan
            .params
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                let position = index + 1;
                let ty = match &spec.declared {
                    Some(declared) => ResolvedType::Declared(declared.clone()),
                    None => inferred_params
                        .get(&position)
                        .cloned()
                        .unwrap_or(ResolvedType::Opaque),
                };
                Parameter {
                    position,
                    name: spec.name.clone(),
                    ty,
                    interpolate: spec.interpolate,
                }
            })
            .collect();
        let mut params = if self.engine.numbered_markers() {
            params
        } else {
            in_occurrence_order(params, &emitted)
        };

        let mut columns = if !query.mode.returns_rows() {
            Vec::new()
        } else {
            let inferred = match &parsed {
                Some(parsed) => ctx.query_columns(parsed, &Scope::root()),
                None => Ok(Vec::new()),
            };
            match fields {
                Some(fields) => {
                    let inferred = inferred.unwrap_or_default();
                    fields
                        .into_iter()
                        .map(|field| {
                            let found = inferred.iter().find(|c| ident_eq(&c.name, &field.name));
                            ResultColumn {
                                ty: match field.data_type {
                                    Some(t) => ResolvedType::Declared(t),
                                    None => found.map_or(ResolvedType::Opaque, |c| c.ty.clone()),
                                },
                                nullable: found.map_or(ctx.allow_nulls, |c| c.nullable),
                                name: field.name,
                            }
                        })
                        .collect()
                }
                None => inferred?,
            }
        };

        if let Some(hook) = &self.type_override {
            for param in &mut params {
                if let Some(ty) = hook.parameter(&query.name, param) {
                    param.ty = ty;
                }
            }
            for column in &mut columns {
                if let Some(ty) = hook.column(&query.name, column) {
                    column.ty = ty;
                }
            }
        }

        tracing::debug!(
            query = %query.name,
            params = params.len(),
            columns = columns.len(),
            "bound query"
        );

        Ok(BoundQuery {
            name: query.name.clone(),
            type_name: query.type_name.clone(),
            type_comment: query.type_comment.clone(),
            func_name: query.func_name.clone(),
            func_comment: query.func_comment.clone(),
            sql: sql.to_string(),
            text,
            mode: query.mode,
            flat: query.flat,
            params,
            columns,
        })
    }

    /// Build the text handed to the parser and the text handed downstream.
    ///
    /// The parser sees decorations intact and every placeholder as a marker
    /// identifier. Downstream text loses decorations, and bound placeholders
    /// become the engine's native bind markers. Also returns the parameter
    /// index of every placeholder written, in text order.
    fn rewrite(
        &self,
        source: &str,
        decorations: &[Decoration],
        scan: &Scan,
    ) -> (String, String, Vec<usize>) {
        enum Edit<'a> {
            Decoration,
            Placeholder(usize, &'a str),
        }

        let mut edits: Vec<(Range<usize>, Edit)> = decorations
            .iter()
            .map(|d| (d.range.clone(), Edit::Decoration))
            .chain(scan.occurrences.iter().map(|o| {
                (
                    o.range.clone(),
                    Edit::Placeholder(o.param, &source[o.range.clone()]),
                )
            }))
            .collect();
        edits.sort_by_key(|(range, _)| range.start);

        let mut parse_text = String::with_capacity(source.len());
        let mut text = String::with_capacity(source.len());
        let mut emitted = Vec::with_capacity(scan.occurrences.len());
        let mut cursor = 0;
        for (range, edit) in edits {
            if range.start < cursor {
                continue;
            }
            parse_text.push_str(&source[cursor..range.start]);
            text.push_str(&source[cursor..range.start]);
            match edit {
                Edit::Decoration => parse_text.push_str(&source[range.clone()]),
                Edit::Placeholder(param, original) => {
                    let position = param + 1;
                    emitted.push(param);
                    parse_text.push_str(&marker(position));
                    if scan.params[param].interpolate {
                        text.push_str(original);
                    } else {
                        text.push_str(&self.engine.bind_marker(position));
                    }
                }
            }
            cursor = range.end;
        }
        parse_text.push_str(&source[cursor..]);
        text.push_str(&source[cursor..]);
        (parse_text, text, emitted)
    }
}

/// Re-list parameters for positional markers: every bound occurrence gets
/// its own entry in text order, interpolated parameters appear once.
fn in_occurrence_order(unique: Vec<Parameter>, emitted: &[usize]) -> Vec<Parameter> {
    let mut listed = vec![false; unique.len()];
    let mut out: Vec<Parameter> = Vec::with_capacity(emitted.len());
    for &index in emitted {
        let param = &unique[index];
        if param.interpolate && std::mem::replace(&mut listed[index], true) {
            continue;
        }
        out.push(Parameter {
            position: out.len() + 1,
            ..param.clone()
        });
    }
    out
}

fn trim_lines(sql: &str) -> String {
    sql.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// A relation visible to column references.
#[derive(Debug, Clone)]
struct Relation<'a> {
    name: String,
    /// `None` for subqueries, CTEs, functions and unknown tables.
    table: Option<&'a Table>,
    /// On the optional side of an outer join.
    nullable: bool,
}

#[derive(Debug, Default)]
struct Scope<'a> {
    relations: Vec<Relation<'a>>,
    ctes: Vec<String>,
    parent: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    fn root() -> Self {
        Scope::default()
    }

    fn child(parent: &'a Scope<'a>) -> Self {
        Scope {
            parent: Some(parent),
            ..Default::default()
        }
    }

    fn is_cte(&self, name: &str) -> bool {
        self.ctes.iter().any(|c| ident_eq(c, name))
            || self.parent.is_some_and(|p| p.is_cte(name))
    }

    fn relation(&self, name: &str) -> Option<&Relation<'a>> {
        self.relations.iter().find(|r| ident_eq(&r.name, name))
    }

    /// Resolve a column reference to its catalog column and whether it sits
    /// on the nullable side of a join. Qualified references stop at the
    /// first scope that knows the qualifier. An unqualified name shared by
    /// several relations of one scope is ambiguous and resolves to nothing.
    fn resolve(&self, qualifier: Option<&str>, name: &str) -> Option<(&'a Column, bool)> {
        match qualifier {
            Some(q) => match self.relation(q) {
                Some(rel) => rel.table.and_then(|t| t.column(name)).map(|c| (c, rel.nullable)),
                None => self.parent.and_then(|p| p.resolve(qualifier, name)),
            },
            None => {
                let mut matches = self.relations.iter().filter_map(|rel| {
                    rel.table.and_then(|t| t.column(name)).map(|c| (c, rel.nullable))
                });
                match (matches.next(), matches.next()) {
                    (Some(found), None) => Some(found),
                    (Some(_), Some(_)) => None,
                    (None, _) => self.parent.and_then(|p| p.resolve(None, name)),
                }
            }
        }
    }
}

struct Context<'a> {
    graph: &'a SchemaGraph,
    decorations: &'a [Decoration],
    allow_nulls: bool,
}

impl<'a> Context<'a> {
    fn relation(&self, table: &TableRef, scope: &Scope<'_>, nullable: bool) -> Relation<'a> {
        let known = match table {
            TableRef::Table { name, .. } if !scope.is_cte(name) => self.graph.table(name),
            _ => None,
        };
        Relation {
            name: table.reference_name().to_string(),
            table: known,
            nullable,
        }
    }

    fn select_relations(&self, select: &SelectQuery, scope: &Scope<'_>) -> Vec<Relation<'a>> {
        let mut relations: Vec<Relation<'a>> = select
            .from
            .iter()
            .map(|t| self.relation(t, scope, false))
            .collect();
        for join in &select.joins {
            match join.join_type {
                JoinType::Left => relations.push(self.relation(&join.table, scope, true)),
                JoinType::Right => {
                    relations.iter_mut().for_each(|r| r.nullable = true);
                    relations.push(self.relation(&join.table, scope, false));
                }
                JoinType::Full => {
                    relations.iter_mut().for_each(|r| r.nullable = true);
                    relations.push(self.relation(&join.table, scope, true));
                }
                JoinType::Inner | JoinType::Cross => {
                    relations.push(self.relation(&join.table, scope, false))
                }
            }
        }
        relations
    }

    fn target_relation(&self, table: &TableRef, scope: &Scope<'_>) -> Vec<Relation<'a>> {
        vec![self.relation(table, scope, false)]
    }

    // ---- result columns ----

    fn query_columns(&self, query: &Query, scope: &Scope<'_>) -> Result<Vec<ResultColumn>> {
        match query {
            Query::Select(select) => {
                let mut inner = Scope::child(scope);
                inner.relations = self.select_relations(select, scope);
                self.projection(&select.projections, &inner)
            }
            Query::With(with) => {
                let mut inner = Scope::child(scope);
                inner.ctes = with.ctes.iter().map(|c| c.name.clone()).collect();
                self.query_columns(&with.body, &inner)
            }
            Query::Values(rows) => Ok(rows
                .first()
                .map(|row| {
                    (1..=row.len())
                        .map(|i| self.opaque(format!("column{i}")))
                        .collect()
                })
                .unwrap_or_default()),
            Query::Insert(insert) => {
                let mut inner = Scope::child(scope);
                inner.relations = self.target_relation(&insert.table, scope);
                self.projection(&insert.returning, &inner)
            }
            Query::Update(update) => {
                let mut inner = Scope::child(scope);
                inner.relations = self.target_relation(&update.table, scope);
                self.projection(&update.returning, &inner)
            }
            Query::Delete(delete) => {
                let mut inner = Scope::child(scope);
                inner.relations = self.target_relation(&delete.table, scope);
                self.projection(&delete.returning, &inner)
            }
            Query::Raw(_) => Ok(Vec::new()),
        }
    }

    fn projection(&self, items: &[SelectItem], scope: &Scope<'_>) -> Result<Vec<ResultColumn>> {
        let mut columns = Vec::new();
        for item in items {
            match item {
                SelectItem::Wildcard => {
                    for rel in &scope.relations {
                        columns.extend(self.expand(rel, &format!("{}.", rel.name))?);
                    }
                }
                SelectItem::QualifiedWildcard(qualifier) => {
                    let rel = scope.relation(qualifier).ok_or_else(|| {
                        QueryBindError::UnresolvedWildcard {
                            qualifier: format!("{qualifier}."),
                        }
                    })?;
                    columns.extend(self.expand(rel, &format!("{qualifier}."))?);
                }
                SelectItem::Expression { expr, alias } => {
                    let index = columns.len() + 1;
                    columns.push(self.expression_column(expr, alias.as_deref(), index, scope));
                }
            }
        }
        Ok(columns)
    }

    fn expand(&self, rel: &Relation<'_>, qualifier: &str) -> Result<Vec<ResultColumn>> {
        let table = rel.table.ok_or_else(|| QueryBindError::UnresolvedWildcard {
            qualifier: qualifier.to_string(),
        })?;
        Ok(table
            .columns
            .iter()
            .map(|c| self.native(c.name.clone(), c, rel.nullable))
            .collect())
    }

    fn expression_column(
        &self,
        expr: &Expression,
        alias: Option<&str>,
        index: usize,
        scope: &Scope<'_>,
    ) -> ResultColumn {
        let name = alias
            .map(str::to_string)
            .or_else(|| default_name(expr))
            .unwrap_or_else(|| format!("column_{index}"));

        match expr.unnested() {
            Expression::Column { table, name: column } => {
                match scope.resolve(table.as_deref(), column) {
                    Some((col, side_nullable)) => self.native(name, col, side_nullable),
                    None => self.opaque(name),
                }
            }
            Expression::Cast {
                expr: inner,
                shorthand: true,
                ..
            } => match alias.and_then(|a| self.decoration(a)) {
                Some(decoration) => {
                    // A cast keeps the nullability of the column it converts.
                    let nullable = match inner.unnested() {
                        Expression::Column { table, name: column } => scope
                            .resolve(table.as_deref(), column)
                            .map_or(self.allow_nulls, |(col, side_nullable)| {
                                col.nullable || side_nullable || self.allow_nulls
                            }),
                        _ => self.allow_nulls,
                    };
                    ResultColumn {
                        name,
                        ty: ResolvedType::Declared(decoration.data_type.clone()),
                        nullable,
                    }
                }
                None => self.opaque(name),
            },
            _ => self.opaque(name),
        }
    }

    fn decoration(&self, alias: &str) -> Option<&Decoration> {
        self.decorations.iter().find(|d| ident_eq(&d.alias, alias))
    }

    fn native(&self, name: String, column: &Column, side_nullable: bool) -> ResultColumn {
        ResultColumn {
            name,
            ty: ResolvedType::Native(column.data_type.clone()),
            nullable: column.nullable || side_nullable || self.allow_nulls,
        }
    }

    fn opaque(&self, name: String) -> ResultColumn {
        ResultColumn {
            name,
            ty: ResolvedType::Opaque,
            nullable: self.allow_nulls,
        }
    }

    // ---- parameter types ----

    fn type_query(&self, query: &Query, scope: &Scope<'_>, out: &mut BTreeMap<usize, ResolvedType>) {
        match query {
            Query::Select(select) => {
                let mut inner = Scope::child(scope);
                inner.relations = self.select_relations(select, scope);
                for table in select.from.iter().chain(select.joins.iter().map(|j| &j.table)) {
                    if let TableRef::Subquery { query, .. } = table {
                        self.type_query(query, scope, out);
                    }
                }
                for item in &select.projections {
                    if let SelectItem::Expression { expr, .. } = item {
                        self.type_expr(expr, &inner, out);
                    }
                }
                for join in &select.joins {
                    if let Some(cond) = &join.condition {
                        self.type_expr(cond, &inner, out);
                    }
                }
                let clauses = select
                    .filter
                    .iter()
                    .chain(&select.group_by)
                    .chain(&select.having)
                    .chain(&select.order_by)
                    .chain(&select.limit)
                    .chain(&select.offset);
                for expr in clauses {
                    self.type_expr(expr, &inner, out);
                }
                if let Some(rhs) = &select.set_op {
                    self.type_query(rhs, scope, out);
                }
            }
            Query::With(with) => {
                let mut inner = Scope::child(scope);
                inner.ctes = with.ctes.iter().map(|c| c.name.clone()).collect();
                for cte in &with.ctes {
                    self.type_query(&cte.query, &inner, out);
                }
                self.type_query(&with.body, &inner, out);
            }
            Query::Values(rows) => {
                for expr in rows.iter().flatten() {
                    self.type_expr(expr, scope, out);
                }
            }
            Query::Insert(insert) => {
                let mut inner = Scope::child(scope);
                inner.relations = self.target_relation(&insert.table, scope);
                let target = inner.relations[0].table;
                match &insert.source {
                    InsertSource::Values(rows) => {
                        for row in rows {
                            for (column, expr) in insert.columns.iter().zip(row) {
                                if let (Expression::Parameter(p), Some(col)) =
                                    (expr.unnested(), target.and_then(|t| t.column(column)))
                                {
                                    record(out, *p, col);
                                }
                            }
                            for expr in row {
                                self.type_expr(expr, &inner, out);
                            }
                        }
                    }
                    InsertSource::Query(source) => self.type_query(source, scope, out),
                }
                self.type_items(&insert.returning, &inner, out);
            }
            Query::Update(update) => {
                let mut inner = Scope::child(scope);
                inner.relations = self.target_relation(&update.table, scope);
                let target = inner.relations[0].table;
                for assignment in &update.assignments {
                    if let (Expression::Parameter(p), Some(col)) = (
                        assignment.value.unnested(),
                        target.and_then(|t| t.column(&assignment.column)),
                    ) {
                        record(out, *p, col);
                    }
                    self.type_expr(&assignment.value, &inner, out);
                }
                if let Some(filter) = &update.filter {
                    self.type_expr(filter, &inner, out);
                }
                self.type_items(&update.returning, &inner, out);
            }
            Query::Delete(delete) => {
                let mut inner = Scope::child(scope);
                inner.relations = self.target_relation(&delete.table, scope);
                if let Some(filter) = &delete.filter {
                    self.type_expr(filter, &inner, out);
                }
                self.type_items(&delete.returning, &inner, out);
            }
            Query::Raw(_) => {}
        }
    }

    fn type_items(&self, items: &[SelectItem], scope: &Scope<'_>, out: &mut BTreeMap<usize, ResolvedType>) {
        for item in items {
            if let SelectItem::Expression { expr, .. } = item {
                self.type_expr(expr, scope, out);
            }
        }
    }

    /// Give `param` the type of `other` when `param` is a bare parameter and
    /// `other` resolves to a catalog column.
    fn pair(&self, param: &Expression, other: &Expression, scope: &Scope<'_>, out: &mut BTreeMap<usize, ResolvedType>) {
        if let Expression::Parameter(p) = param.unnested() {
            if let Some(col) = column_of(other, scope) {
                record(out, *p, col);
            }
        }
    }

    fn type_expr(&self, expr: &Expression, scope: &Scope<'_>, out: &mut BTreeMap<usize, ResolvedType>) {
        match expr {
            Expression::BinaryOp { left, op, right } => {
                if op.is_comparison() {
                    self.pair(left, right, scope, out);
                    self.pair(right, left, scope, out);
                }
                self.type_expr(left, scope, out);
                self.type_expr(right, scope, out);
            }
            Expression::InList { expr, list, .. } => {
                for item in list {
                    self.pair(item, expr, scope, out);
                }
                self.type_expr(expr, scope, out);
                for item in list {
                    self.type_expr(item, scope, out);
                }
            }
            Expression::Between { expr, low, high, .. } => {
                self.pair(low, expr, scope, out);
                self.pair(high, expr, scope, out);
                for e in [expr, low, high] {
                    self.type_expr(e, scope, out);
                }
            }
            Expression::Cast {
                expr: inner,
                data_type,
                ..
            } => {
                if let Expression::Parameter(p) = inner.unnested() {
                    out.entry(*p)
                        .or_insert_with(|| ResolvedType::Declared(data_type.clone()));
                }
                self.type_expr(inner, scope, out);
            }
            Expression::InSubquery { expr, subquery, .. } => {
                self.type_expr(expr, scope, out);
                self.type_query(subquery, scope, out);
            }
            Expression::Subquery(query) | Expression::Exists(query) => {
                self.type_query(query, scope, out);
            }
            Expression::UnaryOp { expr } | Expression::IsNull { expr, .. } | Expression::Nested(expr) => {
                self.type_expr(expr, scope, out);
            }
            Expression::WindowFunction { function } => self.type_expr(function, scope, out),
            Expression::Function { args, .. }
            | Expression::Aggregate { args, .. }
            | Expression::Array(args) => {
                for arg in args {
                    self.type_expr(arg, scope, out);
                }
            }
            Expression::Case {
                operand,
                when_clauses,
                else_clause,
            } => {
                if let Some(operand) = operand {
                    for (when, _) in when_clauses {
                        self.pair(when, operand, scope, out);
                    }
                    self.type_expr(operand, scope, out);
                }
                for (when, then) in when_clauses {
                    self.type_expr(when, scope, out);
                    self.type_expr(then, scope, out);
                }
                if let Some(e) = else_clause {
                    self.type_expr(e, scope, out);
                }
            }
            Expression::Column { .. }
            | Expression::Literal(_)
            | Expression::Wildcard
            | Expression::Parameter(_)
            | Expression::Other(_) => {}
        }
    }
}

fn column_of<'a>(expr: &Expression, scope: &Scope<'a>) -> Option<&'a Column> {
    match expr.unnested() {
        Expression::Column { table, name } => scope.resolve(table.as_deref(), name).map(|(c, _)| c),
        _ => None,
    }
}

// First match wins.
fn record(out: &mut BTreeMap<usize, ResolvedType>, position: usize, column: &Column) {
    out.entry(position)
        .or_insert_with(|| ResolvedType::Native(column.data_type.clone()));
}

fn default_name(expr: &Expression) -> Option<String> {
    match expr.unnested() {
        Expression::Column { name, .. } => Some(name.clone()),
        Expression::Function { name, .. } | Expression::Aggregate { name, .. } => {
            Some(name.to_lowercase())
        }
        Expression::WindowFunction { function } => default_name(function),
        Expression::Cast { expr, .. } => default_name(expr),
        _ => None,
    }
}
