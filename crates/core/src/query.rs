//! Declarative queries over a single model table.
//!
//! A [`Query`] is a table plus ANDed [`Condition`]s, an optional ordering and
//! an optional offset/limit window. Rendering produces SQLite-flavoured SQL with
//! positional `?` parameters; the store binds them.

use serde_json::Value;

use crate::model::ModelMeta;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl Operator {
    fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
        }
    }
}

/// Predicate expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        column: String,
        op: Operator,
        value: Value,
    },
    IsNull(String),
    IsNotNull(String),
    In {
        column: String,
        values: Vec<Value>,
    },
    NotIn {
        column: String,
        values: Vec<Value>,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn and(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Self::And(conditions.into_iter().collect())
    }

    pub fn or(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Self::Or(conditions.into_iter().collect())
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Appends this condition to `sql`, pushing bound values to `params`.
    pub fn render(&self, sql: &mut String, params: &mut Vec<Value>) {
        match self {
            Self::Compare { column, op, value } => {
                sql.push_str(&format!("{} {} ?", quote_ident(column), op.as_sql()));
                params.push(value.clone());
            }
            Self::IsNull(column) => sql.push_str(&format!("{} IS NULL", quote_ident(column))),
            Self::IsNotNull(column) => {
                sql.push_str(&format!("{} IS NOT NULL", quote_ident(column)))
            }
            Self::In { values, .. } if values.is_empty() => sql.push_str("1 = 0"),
            Self::NotIn { values, .. } if values.is_empty() => sql.push_str("1 = 1"),
            Self::In { column, values } | Self::NotIn { column, values } => {
                let keyword = if matches!(self, Self::In { .. }) {
                    "IN"
                } else {
                    "NOT IN"
                };
                let marks = vec!["?"; values.len()].join(", ");
                sql.push_str(&format!("{} {} ({})", quote_ident(column), keyword, marks));
                params.extend(values.iter().cloned());
            }
            Self::And(parts) => render_joined(parts, " AND ", "1 = 1", sql, params),
            Self::Or(parts) => render_joined(parts, " OR ", "1 = 0", sql, params),
            Self::Not(inner) => {
                sql.push_str("NOT (");
                inner.render(sql, params);
                sql.push(')');
            }
        }
    }
}

impl std::ops::Not for Condition {
    type Output = Condition;

    fn not(self) -> Self::Output {
        self.negate()
    }
}

fn render_joined(
    parts: &[Condition],
    separator: &str,
    empty: &str,
    sql: &mut String,
    params: &mut Vec<Value>,
) {
    if parts.is_empty() {
        sql.push_str(empty);
        return;
    }
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            sql.push_str(separator);
        }
        sql.push('(');
        part.render(sql, params);
        sql.push(')');
    }
}

/// Column reference used to build conditions and orderings.
#[derive(Debug, Clone)]
pub struct ColumnRef(String);

/// Starts a condition or ordering on `name`.
pub fn col(name: impl Into<String>) -> ColumnRef {
    ColumnRef(name.into())
}

impl ColumnRef {
    fn compare(self, op: Operator, value: impl Into<Value>) -> Condition {
        Condition::Compare {
            column: self.0,
            op,
            value: value.into(),
        }
    }

    /// Equality; comparing with `NULL` becomes `IS NULL`.
    pub fn eq(self, value: impl Into<Value>) -> Condition {
        match value.into() {
            Value::Null => Condition::IsNull(self.0),
            value => self.compare(Operator::Eq, value),
        }
    }

    /// Inequality; comparing with `NULL` becomes `IS NOT NULL`.
    pub fn ne(self, value: impl Into<Value>) -> Condition {
        match value.into() {
            Value::Null => Condition::IsNotNull(self.0),
            value => self.compare(Operator::Ne, value),
        }
    }

    pub fn lt(self, value: impl Into<Value>) -> Condition {
        self.compare(Operator::Lt, value)
    }

    pub fn le(self, value: impl Into<Value>) -> Condition {
        self.compare(Operator::Le, value)
    }

    pub fn gt(self, value: impl Into<Value>) -> Condition {
        self.compare(Operator::Gt, value)
    }

    pub fn ge(self, value: impl Into<Value>) -> Condition {
        self.compare(Operator::Ge, value)
    }

    pub fn like(self, pattern: impl Into<String>) -> Condition {
        self.compare(Operator::Like, pattern.into())
    }

    pub fn is_null(self) -> Condition {
        Condition::IsNull(self.0)
    }

    pub fn is_not_null(self) -> Condition {
        Condition::IsNotNull(self.0)
    }

    pub fn in_<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Condition {
        Condition::In {
            column: self.0,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn not_in<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Condition {
        Condition::NotIn {
            column: self.0,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn asc(self) -> Order {
        Order {
            column: self.0,
            direction: Direction::Asc,
        }
    }

    pub fn desc(self) -> Order {
        Order {
            column: self.0,
            direction: Direction::Desc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub direction: Direction,
}

/// Query over one model table.
#[derive(Debug, Clone)]
pub struct Query {
    meta: &'static ModelMeta,
    conditions: Vec<Condition>,
    ordering: Vec<Order>,
    offset: Option<u64>,
    limit: Option<u64>,
}

impl Query {
    pub fn new(meta: &'static ModelMeta) -> Self {
        Self {
            meta,
            conditions: Vec::new(),
            ordering: Vec::new(),
            offset: None,
            limit: None,
        }
    }

    /// Adds conditions; all conditions of a query are ANDed.
    pub fn filter(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.conditions.extend(conditions);
        self
    }

    pub fn order_by(mut self, ordering: impl IntoIterator<Item = Order>) -> Self {
        self.ordering.extend(ordering);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn meta(&self) -> &'static ModelMeta {
        self.meta
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn ordering(&self) -> &[Order] {
        &self.ordering
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    fn push_where(&self, sql: &mut String, params: &mut Vec<Value>) {
        if self.conditions.is_empty() {
            return;
        }
        sql.push_str(" WHERE ");
        render_joined(&self.conditions, " AND ", "1 = 1", sql, params);
    }

    /// SELECT statement for every column of the table.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let columns = self
            .meta
            .columns
            .iter()
            .map(|c| quote_ident(c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("SELECT {} FROM {}", columns, quote_ident(self.meta.table));
        let mut params = Vec::new();
        self.push_where(&mut sql, &mut params);

        if !self.ordering.is_empty() {
            let terms = self
                .ordering
                .iter()
                .map(|o| {
                    let dir = match o.direction {
                        Direction::Asc => "ASC",
                        Direction::Desc => "DESC",
                    };
                    format!("{} {}", quote_ident(&o.column), dir)
                })
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms);
        }

        // SQLite only accepts OFFSET after a LIMIT clause
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset))
            }
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        (sql, params)
    }

    /// COUNT statement over the filtered rows, ignoring ordering and window.
    pub fn count_sql(&self) -> (String, Vec<Value>) {
        let mut sql = format!("SELECT COUNT(*) FROM {}", quote_ident(self.meta.table));
        let mut params = Vec::new();
        self.push_where(&mut sql, &mut params);
        (sql, params)
    }
}

impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        self.meta == other.meta
            && self.conditions == other.conditions
            && self.ordering == other.ordering
            && self.offset == other.offset
            && self.limit == other.limit
    }
}

/// Double-quotes an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
