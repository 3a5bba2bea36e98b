//! Internal query representation used by the binder.
//!
//! Only the shapes that matter for typing parameters and result columns are
//! kept: relations, projections, predicates and `RETURNING` lists. Anything
//! else collapses into [`Expression::Other`] or [`Query::Raw`].

/// Top-level statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Select(Box<SelectQuery>),
    Insert(InsertQuery),
    Update(UpdateQuery),
    Delete(DeleteQuery),
    /// Common Table Expressions wrapping an inner query.
    With(CTEQuery),
    /// A bare `VALUES` list.
    Values(Vec<Vec<Expression>>),
    /// Statements that never produce rows here (DDL, `SET`, ...).
    Raw(String),
}

impl Query {
    /// Whether executing the statement can yield rows.
    pub fn returns_rows(&self) -> bool {
        match self {
            Query::Select(_) | Query::Values(_) => true,
            Query::Insert(q) => !q.returning.is_empty(),
            Query::Update(q) => !q.returning.is_empty(),
            Query::Delete(q) => !q.returning.is_empty(),
            Query::With(cte) => cte.body.returns_rows(),
            Query::Raw(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectQuery {
    pub distinct: bool,
    pub projections: Vec<SelectItem>,
    pub from: Vec<TableRef>,
    pub joins: Vec<Join>,
    pub filter: Option<Expression>,
    pub group_by: Vec<Expression>,
    pub having: Option<Expression>,
    pub order_by: Vec<Expression>,
    pub limit: Option<Expression>,
    pub offset: Option<Expression>,
    /// UNION / INTERSECT / EXCEPT right-hand side.
    pub set_op: Option<Box<Query>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `*`
    Wildcard,
    /// `table.*`
    QualifiedWildcard(String),
    /// `expr [AS alias]`
    Expression {
        expr: Expression,
        alias: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    /// `schema.table AS alias`
    Table {
        schema: Option<String>,
        name: String,
        alias: Option<String>,
    },
    /// `(SELECT ...) AS alias`
    Subquery { query: Box<Query>, alias: String },
    /// Table-valued function or anything else with an optional alias.
    Function { name: String, alias: Option<String> },
}

impl TableRef {
    /// The name other clauses use to refer to this relation.
    pub fn reference_name(&self) -> &str {
        match self {
            TableRef::Table { name, alias, .. } => alias.as_deref().unwrap_or(name),
            TableRef::Subquery { alias, .. } => alias,
            TableRef::Function { name, alias } => alias.as_deref().unwrap_or(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    pub table: TableRef,
    pub condition: Option<Expression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// `table.column` or `column`.
    Column { table: Option<String>, name: String },
    Literal(Literal),
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    UnaryOp { expr: Box<Expression> },
    Function {
        name: String,
        args: Vec<Expression>,
    },
    Aggregate {
        name: String,
        args: Vec<Expression>,
        distinct: bool,
    },
    /// `fn(...) OVER (...)`
    WindowFunction { function: Box<Expression> },
    Case {
        operand: Option<Box<Expression>>,
        when_clauses: Vec<(Expression, Expression)>,
        else_clause: Option<Box<Expression>>,
    },
    Subquery(Box<Query>),
    Exists(Box<Query>),
    InList {
        expr: Box<Expression>,
        list: Vec<Expression>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expression>,
        subquery: Box<Query>,
        negated: bool,
    },
    Between {
        expr: Box<Expression>,
        low: Box<Expression>,
        high: Box<Expression>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expression>,
        negated: bool,
    },
    /// `CAST(expr AS type)`, or `expr::type` when `shorthand`.
    Cast {
        expr: Box<Expression>,
        data_type: String,
        shorthand: bool,
    },
    /// `*` inside `COUNT(*)`.
    Wildcard,
    /// Bind parameter by 1-based position.
    Parameter(usize),
    Array(Vec<Expression>),
    Nested(Box<Expression>),
    /// Anything without a dedicated shape, kept as SQL text.
    Other(String),
}

impl Expression {
    /// Strip redundant parentheses.
    pub fn unnested(&self) -> &Expression {
        match self {
            Expression::Nested(inner) => inner.unnested(),
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Like,
    NotLike,
    ILike,
    NotILike,
    Concat,
    Other,
}

impl BinaryOperator {
    /// Operators whose operands share a type.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::NotEq
                | BinaryOperator::Lt
                | BinaryOperator::LtEq
                | BinaryOperator::Gt
                | BinaryOperator::GtEq
                | BinaryOperator::Like
                | BinaryOperator::NotLike
                | BinaryOperator::ILike
                | BinaryOperator::NotILike
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CTEQuery {
    pub ctes: Vec<CTE>,
    pub body: Box<Query>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CTE {
    pub name: String,
    pub query: Query,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertQuery {
    pub table: TableRef,
    pub columns: Vec<String>,
    pub source: InsertSource,
    pub returning: Vec<SelectItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    Values(Vec<Vec<Expression>>),
    Query(Box<Query>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateQuery {
    pub table: TableRef,
    pub assignments: Vec<Assignment>,
    pub filter: Option<Expression>,
    pub returning: Vec<SelectItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteQuery {
    pub table: TableRef,
    pub filter: Option<Expression>,
    pub returning: Vec<SelectItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_name_prefers_alias() {
        let t = TableRef::Table {
            schema: None,
            name: "orders".into(),
            alias: Some("o".into()),
        };
        assert_eq!(t.reference_name(), "o");
        let t = TableRef::Table {
            schema: Some("public".into()),
            name: "orders".into(),
            alias: None,
        };
        assert_eq!(t.reference_name(), "orders");
    }

    #[test]
    fn test_returns_rows() {
        assert!(Query::Select(Box::default()).returns_rows());
        let delete = Query::Delete(DeleteQuery {
            table: TableRef::Function {
                name: "t".into(),
                alias: None,
            },
            filter: None,
            returning: vec![],
        });
        assert!(!delete.returns_rows());
        assert!(!Query::Raw("CREATE TABLE t ()".into()).returns_rows());
    }

    #[test]
    fn test_unnested() {
        let e = Expression::Nested(Box::new(Expression::Nested(Box::new(Expression::Parameter(1)))));
        assert_eq!(e.unnested(), &Expression::Parameter(1));
    }
}
