//! SQL → internal AST.
//!
//! `sqlparser` is the parsing frontend; its tree is folded into the smaller
//! [`ast`](super::ast) shapes the binder walks. Placeholders have already
//! been rewritten into marker identifiers, which come back out of here as
//! [`Expression::Parameter`].
use sqlparser::ast as sp;
use sqlparser::parser::Parser as SqlParser;

use super::ast::*;
use super::placeholder::parse_marker;
use crate::config::Engine;
use crate::error::QueryBindError;

type Result<T> = std::result::Result<T, QueryBindError>;

/// Parse exactly one statement with the engine's dialect.
pub fn parse_single(sql: &str, engine: Engine) -> Result<Query> {
    let dialect = engine.to_sqlparser_dialect();
    let statements = SqlParser::parse_sql(&*dialect, sql)
        .map_err(|e| QueryBindError::Parse(e.to_string()))?;
    if statements.len() != 1 {
        return Err(QueryBindError::Parse(format!(
            "expected 1 statement, found {}",
            statements.len()
        )));
    }
    statements
        .into_iter()
        .next()
        .map(convert_statement)
        .unwrap_or_else(|| Err(QueryBindError::Parse("empty statement list".into())))
}

fn convert_statement(stmt: sp::Statement) -> Result<Query> {
    match stmt {
        sp::Statement::Query(q) => convert_query(*q),
        sp::Statement::Insert(insert) => convert_insert(insert),
        sp::Statement::Update {
            table,
            assignments,
            selection,
            returning,
            ..
        } => convert_update(table, assignments, selection, returning),
        sp::Statement::Delete(delete) => convert_delete(delete),
        _ => Ok(Query::Raw(stmt.to_string())),
    }
}

fn convert_query(query: sp::Query) -> Result<Query> {
    let order_by: Vec<sp::OrderByExpr> = query.order_by.map(|ob| ob.exprs).unwrap_or_default();

    let body = convert_set_expr(*query.body)?;
    let body = apply_query_modifiers(body, order_by, query.limit, query.offset)?;

    match query.with {
        Some(with) => {
            let ctes = with
                .cte_tables
                .into_iter()
                .map(|cte| {
                    Ok(CTE {
                        name: cte.alias.name.value.clone(),
                        query: convert_query(*cte.query)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Query::With(CTEQuery {
                ctes,
                body: Box::new(body),
            }))
        }
        None => Ok(body),
    }
}

fn apply_query_modifiers(
    query: Query,
    order_by: Vec<sp::OrderByExpr>,
    limit: Option<sp::Expr>,
    offset: Option<sp::Offset>,
) -> Result<Query> {
    if let Query::Select(mut select) = query {
        select.order_by = order_by
            .into_iter()
            .map(|o| convert_expr(o.expr))
            .collect::<Result<Vec<_>>>()?;
        select.limit = limit.map(convert_expr).transpose()?;
        select.offset = offset.map(|o| convert_expr(o.value)).transpose()?;
        Ok(Query::Select(select))
    } else {
        Ok(query)
    }
}

fn convert_set_expr(expr: sp::SetExpr) -> Result<Query> {
    match expr {
        sp::SetExpr::Select(select) => convert_select(*select),
        sp::SetExpr::Query(query) => convert_query(*query),
        sp::SetExpr::SetOperation { left, right, .. } => {
            let left = convert_set_expr(*left)?;
            let right = convert_set_expr(*right)?;
            match left {
                Query::Select(mut s) => {
                    s.set_op = Some(Box::new(right));
                    Ok(Query::Select(s))
                }
                other => Ok(other),
            }
        }
        sp::SetExpr::Values(values) => Ok(Query::Values(
            values
                .rows
                .into_iter()
                .map(|row| row.into_iter().map(convert_expr).collect::<Result<Vec<_>>>())
                .collect::<Result<Vec<_>>>()?,
        )),
        sp::SetExpr::Insert(stmt) | sp::SetExpr::Update(stmt) => convert_statement(stmt),
        _ => Ok(Query::Raw(expr.to_string())),
    }
}

fn convert_select(select: sp::Select) -> Result<Query> {
    let projections = select
        .projection
        .into_iter()
        .map(convert_select_item)
        .collect::<Result<Vec<_>>>()?;

    let mut from = Vec::new();
    let mut joins = Vec::new();
    for twj in select.from {
        from.push(convert_table_factor(twj.relation)?);
        for join in twj.joins {
            joins.push(convert_join(join)?);
        }
    }

    let group_by = match select.group_by {
        sp::GroupByExpr::Expressions(exprs, _modifiers) => exprs
            .into_iter()
            .map(convert_expr)
            .collect::<Result<Vec<_>>>()?,
        sp::GroupByExpr::All(_) => vec![],
    };

    Ok(Query::Select(Box::new(SelectQuery {
        distinct: select.distinct.is_some(),
        projections,
        from,
        joins,
        filter: select.selection.map(convert_expr).transpose()?,
        group_by,
        having: select.having.map(convert_expr).transpose()?,
        ..Default::default()
    })))
}

fn convert_table_factor(tf: sp::TableFactor) -> Result<TableRef> {
    match tf {
        sp::TableFactor::Table { name, alias, .. } => {
            let mut parts: Vec<String> = name.0.into_iter().map(|p| p.value).collect();
            let table_name = parts.pop().unwrap_or_default();
            Ok(TableRef::Table {
                schema: parts.pop(),
                name: table_name,
                alias: alias.map(|a| a.name.value),
            })
        }
        sp::TableFactor::Derived {
            subquery, alias, ..
        } => Ok(TableRef::Subquery {
            query: Box::new(convert_query(*subquery)?),
            alias: alias
                .map(|a| a.name.value)
                .unwrap_or_else(|| "_subquery".into()),
        }),
        sp::TableFactor::TableFunction { expr, alias } => Ok(TableRef::Function {
            name: expr.to_string(),
            alias: alias.map(|a| a.name.value),
        }),
        other => Ok(TableRef::Function {
            name: other.to_string(),
            alias: None,
        }),
    }
}

fn convert_join(join: sp::Join) -> Result<Join> {
    let (join_type, constraint) = match join.join_operator {
        sp::JoinOperator::Inner(c) => (JoinType::Inner, Some(c)),
        sp::JoinOperator::LeftOuter(c) => (JoinType::Left, Some(c)),
        sp::JoinOperator::RightOuter(c) => (JoinType::Right, Some(c)),
        sp::JoinOperator::FullOuter(c) => (JoinType::Full, Some(c)),
        sp::JoinOperator::CrossJoin => (JoinType::Cross, None),
        _ => (JoinType::Inner, None),
    };

    let condition = match constraint {
        Some(sp::JoinConstraint::On(expr)) => Some(convert_expr(expr)?),
        _ => None,
    };

    Ok(Join {
        join_type,
        table: convert_table_factor(join.relation)?,
        condition,
    })
}

fn convert_select_item(item: sp::SelectItem) -> Result<SelectItem> {
    match item {
        sp::SelectItem::UnnamedExpr(expr) => Ok(SelectItem::Expression {
            expr: convert_expr(expr)?,
            alias: None,
        }),
        sp::SelectItem::ExprWithAlias { expr, alias } => Ok(SelectItem::Expression {
            expr: convert_expr(expr)?,
            alias: Some(alias.value),
        }),
        sp::SelectItem::Wildcard(_) => Ok(SelectItem::Wildcard),
        sp::SelectItem::QualifiedWildcard(name, _) => {
            let last = name.0.last().map(|i| i.value.clone()).unwrap_or_default();
            Ok(SelectItem::QualifiedWildcard(last))
        }
    }
}

fn convert_expr(expr: sp::Expr) -> Result<Expression> {
    match expr {
        sp::Expr::Identifier(ident) => Ok(match parse_marker(&ident.value) {
            Some(position) => Expression::Parameter(position),
            None => Expression::Column {
                table: None,
                name: ident.value,
            },
        }),
        sp::Expr::CompoundIdentifier(parts) => {
            let mut names: Vec<String> = parts.into_iter().map(|p| p.value).collect();
            let name = names.pop().unwrap_or_default();
            Ok(Expression::Column {
                table: names.pop(),
                name,
            })
        }
        sp::Expr::Value(val) => Ok(convert_value(val)),
        sp::Expr::BinaryOp { left, op, right } => Ok(Expression::BinaryOp {
            left: Box::new(convert_expr(*left)?),
            op: convert_binary_op(&op),
            right: Box::new(convert_expr(*right)?),
        }),
        sp::Expr::UnaryOp { expr, .. } => Ok(Expression::UnaryOp {
            expr: Box::new(convert_expr(*expr)?),
        }),
        sp::Expr::Function(func) => convert_function(func),
        sp::Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            let when_clauses = conditions
                .into_iter()
                .zip(results)
                .map(|(c, r)| Ok((convert_expr(c)?, convert_expr(r)?)))
                .collect::<Result<Vec<_>>>()?;
            Ok(Expression::Case {
                operand: operand.map(|o| convert_expr(*o)).transpose()?.map(Box::new),
                when_clauses,
                else_clause: else_result
                    .map(|e| convert_expr(*e))
                    .transpose()?
                    .map(Box::new),
            })
        }
        sp::Expr::Subquery(q) => Ok(Expression::Subquery(Box::new(convert_query(*q)?))),
        sp::Expr::Exists { subquery, .. } => {
            Ok(Expression::Exists(Box::new(convert_query(*subquery)?)))
        }
        sp::Expr::InList {
            expr,
            list,
            negated,
        } => Ok(Expression::InList {
            expr: Box::new(convert_expr(*expr)?),
            list: list
                .into_iter()
                .map(convert_expr)
                .collect::<Result<Vec<_>>>()?,
            negated,
        }),
        sp::Expr::InSubquery {
            expr,
            subquery,
            negated,
        } => Ok(Expression::InSubquery {
            expr: Box::new(convert_expr(*expr)?),
            subquery: Box::new(convert_query(*subquery)?),
            negated,
        }),
        sp::Expr::Between {
            expr,
            negated,
            low,
            high,
        } => Ok(Expression::Between {
            expr: Box::new(convert_expr(*expr)?),
            low: Box::new(convert_expr(*low)?),
            high: Box::new(convert_expr(*high)?),
            negated,
        }),
        sp::Expr::IsNull(expr) => Ok(Expression::IsNull {
            expr: Box::new(convert_expr(*expr)?),
            negated: false,
        }),
        sp::Expr::IsNotNull(expr) => Ok(Expression::IsNull {
            expr: Box::new(convert_expr(*expr)?),
            negated: true,
        }),
        sp::Expr::Cast {
            kind,
            expr,
            data_type,
            ..
        } => Ok(Expression::Cast {
            expr: Box::new(convert_expr(*expr)?),
            data_type: data_type.to_string(),
            shorthand: matches!(kind, sp::CastKind::DoubleColon),
        }),
        sp::Expr::Nested(expr) => Ok(Expression::Nested(Box::new(convert_expr(*expr)?))),
        sp::Expr::Like {
            negated,
            expr,
            pattern,
            ..
        } => Ok(Expression::BinaryOp {
            left: Box::new(convert_expr(*expr)?),
            op: if negated {
                BinaryOperator::NotLike
            } else {
                BinaryOperator::Like
            },
            right: Box::new(convert_expr(*pattern)?),
        }),
        sp::Expr::ILike {
            negated,
            expr,
            pattern,
            ..
        } => Ok(Expression::BinaryOp {
            left: Box::new(convert_expr(*expr)?),
            op: if negated {
                BinaryOperator::NotILike
            } else {
                BinaryOperator::ILike
            },
            right: Box::new(convert_expr(*pattern)?),
        }),
        sp::Expr::Array(arr) => Ok(Expression::Array(
            arr.elem
                .into_iter()
                .map(convert_expr)
                .collect::<Result<Vec<_>>>()?,
        )),
        other => Ok(Expression::Other(other.to_string())),
    }
}

fn convert_value(val: sp::Value) -> Expression {
    match val {
        sp::Value::Null => Expression::Literal(Literal::Null),
        sp::Value::Boolean(b) => Expression::Literal(Literal::Boolean(b)),
        sp::Value::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Expression::Literal(Literal::Integer(i))
            } else if let Ok(f) = n.parse::<f64>() {
                Expression::Literal(Literal::Float(f))
            } else {
                Expression::Literal(Literal::String(n))
            }
        }
        sp::Value::SingleQuotedString(s) => Expression::Literal(Literal::String(s)),
        sp::Value::Placeholder(p) => {
            if let Some(position) = p.strip_prefix('$').and_then(|n| n.parse::<usize>().ok()) {
                return Expression::Parameter(position);
            }
            Expression::Other(p)
        }
        other => Expression::Other(other.to_string()),
    }
}

fn convert_binary_op(op: &sp::BinaryOperator) -> BinaryOperator {
    match op {
        sp::BinaryOperator::Eq => BinaryOperator::Eq,
        sp::BinaryOperator::NotEq => BinaryOperator::NotEq,
        sp::BinaryOperator::Lt => BinaryOperator::Lt,
        sp::BinaryOperator::LtEq => BinaryOperator::LtEq,
        sp::BinaryOperator::Gt => BinaryOperator::Gt,
        sp::BinaryOperator::GtEq => BinaryOperator::GtEq,
        sp::BinaryOperator::And => BinaryOperator::And,
        sp::BinaryOperator::Or => BinaryOperator::Or,
        sp::BinaryOperator::Plus => BinaryOperator::Plus,
        sp::BinaryOperator::Minus => BinaryOperator::Minus,
        sp::BinaryOperator::Multiply => BinaryOperator::Multiply,
        sp::BinaryOperator::Divide => BinaryOperator::Divide,
        sp::BinaryOperator::Modulo => BinaryOperator::Modulo,
        sp::BinaryOperator::StringConcat => BinaryOperator::Concat,
        _ => BinaryOperator::Other,
    }
}

fn convert_function(func: sp::Function) -> Result<Expression> {
    let name = func.name.to_string().to_uppercase();

    let (args, distinct) = match func.args {
        sp::FunctionArguments::List(arg_list) => {
            let distinct = matches!(
                arg_list.duplicate_treatment,
                Some(sp::DuplicateTreatment::Distinct)
            );
            let args = arg_list
                .args
                .into_iter()
                .filter_map(|a| match a {
                    sp::FunctionArg::Unnamed(sp::FunctionArgExpr::Expr(e)) => Some(convert_expr(e)),
                    sp::FunctionArg::Unnamed(sp::FunctionArgExpr::Wildcard) => {
                        Some(Ok(Expression::Wildcard))
                    }
                    sp::FunctionArg::Named {
                        arg: sp::FunctionArgExpr::Expr(e),
                        ..
                    } => Some(convert_expr(e)),
                    _ => None,
                })
                .collect::<Result<Vec<_>>>()?;
            (args, distinct)
        }
        sp::FunctionArguments::None => (vec![], false),
        sp::FunctionArguments::Subquery(q) => (
            vec![Expression::Subquery(Box::new(convert_query(*q)?))],
            false,
        ),
    };

    if func.over.is_some() {
        return Ok(Expression::WindowFunction {
            function: Box::new(Expression::Function { name, args }),
        });
    }

    let is_aggregate = matches!(
        name.as_str(),
        "COUNT"
            | "SUM"
            | "AVG"
            | "MIN"
            | "MAX"
            | "ARRAY_AGG"
            | "STRING_AGG"
            | "BOOL_AND"
            | "BOOL_OR"
            | "JSON_AGG"
            | "JSONB_AGG"
            | "GROUP_CONCAT"
    );

    if is_aggregate {
        Ok(Expression::Aggregate {
            name,
            args,
            distinct,
        })
    } else {
        Ok(Expression::Function { name, args })
    }
}

fn convert_insert(insert: sp::Insert) -> Result<Query> {
    let mut parts: Vec<String> = insert.table_name.0.into_iter().map(|p| p.value).collect();
    let name = parts.pop().unwrap_or_default();
    let table = TableRef::Table {
        schema: parts.pop(),
        name,
        alias: None,
    };

    let columns: Vec<String> = insert.columns.into_iter().map(|c| c.value).collect();

    let source = match insert.source {
        Some(src) => match *src.body {
            sp::SetExpr::Values(values) => InsertSource::Values(
                values
                    .rows
                    .into_iter()
                    .map(|row| row.into_iter().map(convert_expr).collect::<Result<Vec<_>>>())
                    .collect::<Result<Vec<_>>>()?,
            ),
            other => InsertSource::Query(Box::new(convert_set_expr(other)?)),
        },
        None => InsertSource::Values(vec![]),
    };

    let returning = insert
        .returning
        .unwrap_or_default()
        .into_iter()
        .map(convert_select_item)
        .collect::<Result<Vec<_>>>()?;

    Ok(Query::Insert(InsertQuery {
        table,
        columns,
        source,
        returning,
    }))
}

fn convert_update(
    table: sp::TableWithJoins,
    assignments: Vec<sp::Assignment>,
    selection: Option<sp::Expr>,
    returning: Option<Vec<sp::SelectItem>>,
) -> Result<Query> {
    let table = convert_table_factor(table.relation)?;

    let assignments = assignments
        .into_iter()
        .map(|a| {
            let target = a.target.to_string();
            let column = target.rsplit('.').next().unwrap_or(&target).to_string();
            Ok(Assignment {
                column,
                value: convert_expr(a.value)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let returning = returning
        .unwrap_or_default()
        .into_iter()
        .map(convert_select_item)
        .collect::<Result<Vec<_>>>()?;

    Ok(Query::Update(UpdateQuery {
        table,
        assignments,
        filter: selection.map(convert_expr).transpose()?,
        returning,
    }))
}

fn convert_delete(delete: sp::Delete) -> Result<Query> {
    let from_tables = match delete.from {
        sp::FromTable::WithFromKeyword(tables) => tables,
        sp::FromTable::WithoutKeyword(tables) => tables,
    };

    let table = match from_tables.into_iter().next() {
        Some(twj) => convert_table_factor(twj.relation)?,
        None => return Err(QueryBindError::Parse("DELETE without table reference".into())),
    };

    let returning = delete
        .returning
        .unwrap_or_default()
        .into_iter()
        .map(convert_select_item)
        .collect::<Result<Vec<_>>>()?;

    Ok(Query::Delete(DeleteQuery {
        table,
        filter: delete.selection.map(convert_expr).transpose()?,
        returning,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::placeholder::marker;

    fn parse(sql: &str) -> Query {
        parse_single(sql, Engine::Postgres).unwrap()
    }

    #[test]
    fn test_parse_select_with_join() {
        match parse("SELECT u.name, o.total FROM users u LEFT JOIN orders o ON u.id = o.user_id") {
            Query::Select(s) => {
                assert_eq!(s.projections.len(), 2);
                assert_eq!(s.from[0].reference_name(), "u");
                assert_eq!(s.joins.len(), 1);
                assert_eq!(s.joins[0].join_type, JoinType::Left);
                assert!(s.joins[0].condition.is_some());
            }
            other => panic!("Expected Select query, got {other:?}"),
        }
    }

    #[test]
    fn test_markers_become_parameters() {
        let sql = format!("SELECT id FROM orders WHERE customer_id = {}", marker(1));
        match parse(&sql) {
            Query::Select(s) => match s.filter {
                Some(Expression::BinaryOp { right, .. }) => {
                    assert_eq!(*right, Expression::Parameter(1));
                }
                other => panic!("unexpected filter {other:?}"),
            },
            other => panic!("Expected Select query, got {other:?}"),
        }
    }

    #[test]
    fn test_double_colon_cast() {
        match parse("SELECT total::numeric AS amount, CAST(id AS text) FROM orders") {
            Query::Select(s) => {
                match &s.projections[0] {
                    SelectItem::Expression {
                        expr: Expression::Cast { shorthand, data_type, .. },
                        alias,
                    } => {
                        assert!(*shorthand);
                        assert_eq!(data_type.to_lowercase(), "numeric");
                        assert_eq!(alias.as_deref(), Some("amount"));
                    }
                    other => panic!("unexpected projection {other:?}"),
                }
                assert!(matches!(
                    &s.projections[1],
                    SelectItem::Expression {
                        expr: Expression::Cast { shorthand: false, .. },
                        ..
                    }
                ));
            }
            other => panic!("Expected Select query, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_cte_and_union() {
        let q = parse(
            "WITH recent AS (SELECT id FROM orders) SELECT id FROM recent UNION ALL SELECT id FROM archive",
        );
        match q {
            Query::With(cte) => {
                assert_eq!(cte.ctes[0].name, "recent");
                match *cte.body {
                    Query::Select(s) => assert!(s.set_op.is_some()),
                    other => panic!("unexpected body {other:?}"),
                }
            }
            other => panic!("Expected CTE query, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_dml_returning() {
        match parse("UPDATE orders SET total = 1 WHERE id = 2 RETURNING id, total") {
            Query::Update(u) => {
                assert_eq!(u.assignments[0].column, "total");
                assert_eq!(u.returning.len(), 2);
            }
            other => panic!("Expected Update query, got {other:?}"),
        }
        match parse("INSERT INTO public.orders (customer_id, total) VALUES (1, 2)") {
            Query::Insert(i) => {
                assert_eq!(i.columns, vec!["customer_id", "total"]);
                assert!(matches!(
                    i.table,
                    TableRef::Table { ref schema, ref name, .. }
                        if schema.as_deref() == Some("public") && name == "orders"
                ));
                assert!(!Query::Insert(i).returns_rows());
            }
            other => panic!("Expected Insert query, got {other:?}"),
        }
        assert!(matches!(parse("DELETE FROM orders WHERE id = 1"), Query::Delete(_)));
    }

    #[test]
    fn test_aggregate_and_window() {
        match parse("SELECT COUNT(DISTINCT status), ROW_NUMBER() OVER (ORDER BY id) FROM orders") {
            Query::Select(s) => {
                assert!(matches!(
                    &s.projections[0],
                    SelectItem::Expression {
                        expr: Expression::Aggregate { distinct: true, .. },
                        ..
                    }
                ));
                assert!(matches!(
                    &s.projections[1],
                    SelectItem::Expression {
                        expr: Expression::WindowFunction { .. },
                        ..
                    }
                ));
            }
            other => panic!("Expected Select query, got {other:?}"),
        }
    }

    #[test]
    fn test_ddl_is_raw() {
        assert!(matches!(parse("CREATE TABLE t (id int)"), Query::Raw(_)));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_single("SELCT * FORM users", Engine::Postgres),
            Err(QueryBindError::Parse(_))
        ));
        assert!(matches!(
            parse_single("SELECT 1; SELECT 2", Engine::Postgres),
            Err(QueryBindError::Parse(_))
        ));
    }

    #[test]
    fn test_other_dialects() {
        let sql = format!("SELECT `id` FROM orders WHERE id = {}", marker(1));
        assert!(matches!(parse_single(&sql, Engine::Mysql).unwrap(), Query::Select(_)));
        let sql = format!("SELECT [id] FROM orders WHERE id = {}", marker(1));
        assert!(matches!(parse_single(&sql, Engine::Mssql).unwrap(), Query::Select(_)));
    }
}
