use serde::Serialize;
use serde_json::Value;

/// Parsed query document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    /// Empty means every column
    pub select: Vec<SelectItem>,
    pub from: FromClause,
    pub wheres: Vec<Where>,
    pub orders: Vec<Order>,
    pub limit: Option<Limit>,
}

/// A selected column, optionally aliased or computed by an aggregate expression
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectItem {
    pub col: String,
    pub alias: Option<String>,
    pub opt: Option<String>,
}

impl SelectItem {
    pub fn column(col: impl Into<String>) -> Self {
        Self {
            col: col.into(),
            alias: None,
            opt: None,
        }
    }

    pub fn is_star(&self) -> bool {
        self.col == "*" && self.opt.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRef {
    pub entity: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FromClause {
    Entities(Vec<EntityRef>),
    SubQuery(Box<Query>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Tie {
    And,
    Or,
}

impl Tie {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Tie::And => "AND",
            Tie::Or => "OR",
        }
    }
}

/// Comparison applied to a column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Operator {
    Eq(Value),
    Ne(Value),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    /// Substring match; the string is the formatted operand
    Like(String),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    IsNull,
    NotNull,
    Between(Value, Value),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Condition {
    Compare { col: String, op: Operator },
    /// Raw SQL fragment with positional `?` arguments
    Expr { sql: String, args: Vec<Value> },
}

impl Condition {
    pub fn column(&self) -> Option<&str> {
        match self {
            Condition::Compare { col, .. } => Some(col),
            Condition::Expr { .. } => None,
        }
    }
}

/// Where node: an optional condition plus nested sub-conditions.
///
/// `tie` connects the node to its previous sibling and is `None` only for
/// the first node of a list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Where {
    pub tie: Option<Tie>,
    pub cond: Option<Condition>,
    pub sub: Vec<Where>,
}

impl Where {
    /// Columns referenced by this node and its descendants
    pub fn columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        if let Some(col) = self.cond.as_ref().and_then(Condition::column) {
            out.push(col);
        }
        for node in &self.sub {
            node.columns(out);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub col: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Limit {
    pub offset: u64,
    pub count: u64,
}
