// JSON query document -> Query AST
//
// Every shape is matched explicitly; anything unrecognised is a Parse error
// naming the offending key.

use serde_json::{Map, Value};

use crate::api::middleware::AppError;
use crate::models::data_table::json_kind;
use crate::models::query::{
    Condition, Direction, EntityRef, FromClause, Limit, Operator, Order, Query, SelectItem, Tie,
    Where,
};
use crate::validation::sql_validator::SqlValidator;

const QUERY_KEYS: &[&str] = &["select", "from", "where", "order", "limit", "version"];

/// Parse a raw query document
pub fn parse_query(data: &[u8]) -> Result<Query, AppError> {
    let value: Value = serde_json::from_slice(data)
        .map_err(|e| AppError::Parse(format!("invalid query json: {}", e)))?;
    parse_query_value(&value)
}

pub fn parse_query_value(value: &Value) -> Result<Query, AppError> {
    let Value::Object(obj) = value else {
        return Err(AppError::Parse(format!(
            "query must be an object, found {}",
            json_kind(value)
        )));
    };
    if let Some(key) = obj.keys().find(|k| !QUERY_KEYS.contains(&k.as_str())) {
        return Err(AppError::Parse(format!("unexpected key '{}' in query", key)));
    }

    let select = match obj.get("select") {
        Some(v) => parse_select(v)?,
        None => return Err(AppError::Parse("query does not contain 'select'".to_string())),
    };
    let from = match obj.get("from") {
        Some(v) => parse_from(v)?,
        None => return Err(AppError::Parse("query does not contain 'from'".to_string())),
    };
    let wheres = match obj.get("where") {
        None | Some(Value::Null) => Vec::new(),
        Some(v) => parse_where_list(v, "where")?,
    };
    let orders = match obj.get("order") {
        None | Some(Value::Null) => Vec::new(),
        Some(v) => parse_order(v)?,
    };
    let limit = match obj.get("limit") {
        None | Some(Value::Null) => None,
        Some(v) => Some(parse_limit(v)?),
    };

    Ok(Query {
        select,
        from,
        wheres,
        orders,
        limit,
    })
}

fn parse_select(value: &Value) -> Result<Vec<SelectItem>, AppError> {
    let Value::Array(items) = value else {
        return Err(AppError::Parse(format!(
            "'select' must be an array, found {}",
            json_kind(value)
        )));
    };
    items.iter().map(parse_select_item).collect()
}

fn parse_select_item(value: &Value) -> Result<SelectItem, AppError> {
    match value {
        Value::String(col) => {
            check_column_name(col, "select")?;
            Ok(SelectItem::column(col.clone()))
        }
        Value::Object(obj) => {
            if let Some(key) = obj.keys().find(|k| !["col", "alias", "opt"].contains(&k.as_str())) {
                return Err(AppError::Parse(format!("unexpected key '{}' in select item", key)));
            }
            let col = optional_str(obj, "col", "select item")?.unwrap_or_default();
            let alias = optional_str(obj, "alias", "select item")?.filter(|a| !a.is_empty());
            let opt = optional_str(obj, "opt", "select item")?.filter(|o| !o.is_empty());

            if let Some(alias) = &alias {
                if !SqlValidator::is_plain_identifier(alias) {
                    return Err(AppError::Parse(format!("invalid select alias '{}'", alias)));
                }
            }
            match &opt {
                Some(opt) => {
                    SqlValidator::parse_expression(opt)?;
                }
                None => check_column_name(&col, "select")?,
            }
            Ok(SelectItem { col, alias, opt })
        }
        other => Err(AppError::Parse(format!(
            "select item must be a string or an object, found {}",
            json_kind(other)
        ))),
    }
}

fn parse_from(value: &Value) -> Result<FromClause, AppError> {
    match value {
        Value::String(entity) => Ok(FromClause::Entities(vec![entity_ref(entity, None)?])),
        Value::Array(items) => {
            if items.is_empty() {
                return Err(AppError::Parse("'from' is empty".to_string()));
            }
            let refs = items
                .iter()
                .map(|item| match item {
                    Value::String(entity) => entity_ref(entity, None),
                    Value::Object(obj) => {
                        let entity = optional_str(obj, "entity", "from item")?.unwrap_or_default();
                        let alias = optional_str(obj, "alias", "from item")?;
                        entity_ref(&entity, alias)
                    }
                    other => Err(AppError::Parse(format!(
                        "'from' item must be a string or an object, found {}",
                        json_kind(other)
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(FromClause::Entities(refs))
        }
        Value::Object(_) => Ok(FromClause::SubQuery(Box::new(parse_query_value(value)?))),
        other => Err(AppError::Parse(format!(
            "'from' must be a string, an array or a query, found {}",
            json_kind(other)
        ))),
    }
}

fn entity_ref(entity: &str, alias: Option<String>) -> Result<EntityRef, AppError> {
    if entity.is_empty() {
        return Err(AppError::Parse("'from' is empty".to_string()));
    }
    Ok(EntityRef {
        entity: entity.to_string(),
        alias: alias.filter(|a| !a.is_empty()),
    })
}

fn parse_where_list(value: &Value, key: &str) -> Result<Vec<Where>, AppError> {
    let Value::Array(items) = value else {
        return Err(AppError::Parse(format!(
            "'{}' must be an array, found {}",
            key,
            json_kind(value)
        )));
    };
    if items.is_empty() {
        return Err(AppError::Parse(format!("'{}' is empty", key)));
    }
    items
        .iter()
        .enumerate()
        .map(|(pos, item)| parse_where_node(item, pos))
        .collect()
}

fn parse_where_node(value: &Value, pos: usize) -> Result<Where, AppError> {
    let Value::Object(obj) = value else {
        return Err(AppError::Parse(format!(
            "where item {} must be an object, found {}",
            pos,
            json_kind(value)
        )));
    };
    if let Some(key) = obj
        .keys()
        .find(|k| !["col", "op", "val", "tie", "where"].contains(&k.as_str()))
    {
        return Err(AppError::Parse(format!("unexpected key '{}' in where item {}", key, pos)));
    }

    let tie = match optional_str(obj, "tie", "where item")?.as_deref() {
        None | Some("") => None,
        Some(t) if t.eq_ignore_ascii_case("and") => Some(Tie::And),
        Some(t) if t.eq_ignore_ascii_case("or") => Some(Tie::Or),
        Some(t) => {
            return Err(AppError::Parse(format!(
                "where tie '{}' at position {} must be 'and' or 'or'",
                t, pos
            )))
        }
    };
    if pos > 0 && tie.is_none() {
        return Err(AppError::Parse(format!("where tie is empty at position {}", pos)));
    }

    let sub = match obj.get("where") {
        None | Some(Value::Null) => Vec::new(),
        Some(v) => parse_where_list(v, "where")?,
    };

    let col = optional_str(obj, "col", "where item")?.unwrap_or_default();
    let op = optional_str(obj, "op", "where item")?.unwrap_or_default();
    let val = obj.get("val").unwrap_or(&Value::Null);

    let cond = if op.eq_ignore_ascii_case("expr") {
        Some(parse_expr_condition(val, pos)?)
    } else if col.is_empty() {
        if sub.is_empty() || !op.is_empty() || obj.contains_key("val") {
            return Err(AppError::Parse(format!("where item {} has no 'col'", pos)));
        }
        None
    } else {
        check_column_name(&col, "where")?;
        let op = if op.is_empty() { "eq".to_string() } else { op.to_lowercase() };
        Some(Condition::Compare {
            op: parse_operator(&op, val, &col)?,
            col,
        })
    };

    Ok(Where { tie, cond, sub })
}

fn parse_operator(op: &str, val: &Value, col: &str) -> Result<Operator, AppError> {
    let scalar = |name: &str| -> Result<Value, AppError> {
        match val {
            Value::Null | Value::Array(_) | Value::Object(_) => Err(AppError::Parse(format!(
                "operator '{}' on '{}' requires a scalar value, found {}",
                name,
                col,
                json_kind(val)
            ))),
            v => Ok(v.clone()),
        }
    };
    let list = |name: &str| -> Result<Vec<Value>, AppError> {
        match val {
            Value::Array(items) => Ok(items.clone()),
            other => Err(AppError::Parse(format!(
                "operator '{}' on '{}' requires an array value, found {}",
                name,
                col,
                json_kind(other)
            ))),
        }
    };

    match op {
        // null compares as IS NULL / IS NOT NULL
        "eq" => Ok(Operator::Eq(val.clone())),
        "ne" => Ok(Operator::Ne(val.clone())),
        "lt" => Ok(Operator::Lt(scalar(op)?)),
        "lte" => Ok(Operator::Lte(scalar(op)?)),
        "gt" => Ok(Operator::Gt(scalar(op)?)),
        "gte" => Ok(Operator::Gte(scalar(op)?)),
        "like" => Ok(Operator::Like(match scalar(op)? {
            Value::String(s) => s,
            other => other.to_string(),
        })),
        "in" => Ok(Operator::In(list(op)?)),
        "notin" => Ok(Operator::NotIn(list(op)?)),
        "isnull" => Ok(Operator::IsNull),
        "notnull" => Ok(Operator::NotNull),
        "between" => match list(op)?.as_slice() {
            [low, high] => Ok(Operator::Between(low.clone(), high.clone())),
            other => Err(AppError::Parse(format!(
                "operator 'between' on '{}' requires 2 values, found {}",
                col,
                other.len()
            ))),
        },
        unknown => Err(AppError::Parse(format!(
            "unknown where operator '{}' on '{}'",
            unknown, col
        ))),
    }
}

fn parse_expr_condition(val: &Value, pos: usize) -> Result<Condition, AppError> {
    let Value::Object(obj) = val else {
        return Err(AppError::Parse(format!(
            "expr at position {} requires {{sql, args}}, found {}",
            pos,
            json_kind(val)
        )));
    };
    let sql = match obj.get("sql") {
        Some(Value::String(sql)) if !sql.trim().is_empty() => sql.clone(),
        _ => {
            return Err(AppError::Parse(format!(
                "expr at position {} requires a non-empty 'sql' string",
                pos
            )))
        }
    };
    let args = match obj.get("args") {
        Some(Value::Array(args)) => args.clone(),
        _ => {
            return Err(AppError::Parse(format!(
                "expr at position {} requires an 'args' array",
                pos
            )))
        }
    };
    SqlValidator::validate_expr_fragment(&sql, args.len())?;
    Ok(Condition::Expr { sql, args })
}

fn parse_order(value: &Value) -> Result<Vec<Order>, AppError> {
    let Value::Array(items) = value else {
        return Err(AppError::Parse(format!(
            "'order' must be an array, found {}",
            json_kind(value)
        )));
    };

    items
        .iter()
        .map(|item| {
            let Value::Object(obj) = item else {
                return Err(AppError::Parse(format!(
                    "order item must be an object, found {}",
                    json_kind(item)
                )));
            };
            let col = optional_str(obj, "col", "order item")?.unwrap_or_default();
            check_column_name(&col, "order")?;
            let direction = match optional_str(obj, "opt", "order item")?.as_deref() {
                None | Some("") => Direction::Asc,
                Some(d) if d.eq_ignore_ascii_case("asc") => Direction::Asc,
                Some(d) if d.eq_ignore_ascii_case("desc") => Direction::Desc,
                Some(d) => {
                    return Err(AppError::Parse(format!(
                        "order option '{}' must be 'asc' or 'desc'",
                        d
                    )))
                }
            };
            Ok(Order { col, direction })
        })
        .collect()
}

fn parse_limit(value: &Value) -> Result<Limit, AppError> {
    let Value::Object(obj) = value else {
        return Err(AppError::Parse(format!(
            "'limit' must be an object, found {}",
            json_kind(value)
        )));
    };
    let offset = optional_u64(obj, &["offset", "off"])?.unwrap_or(0);
    let count = optional_u64(obj, &["count", "num"])?
        .ok_or_else(|| AppError::Parse("'limit' requires 'count'".to_string()))?;
    Ok(Limit { offset, count })
}

fn optional_u64(obj: &Map<String, Value>, keys: &[&str]) -> Result<Option<u64>, AppError> {
    for key in keys {
        match obj.get(*key) {
            None | Some(Value::Null) => continue,
            Some(v) => {
                return v.as_u64().map(Some).ok_or_else(|| {
                    AppError::Parse(format!(
                        "limit '{}' must be a non-negative integer, found {}",
                        key, v
                    ))
                })
            }
        }
    }
    Ok(None)
}

fn optional_str(
    obj: &Map<String, Value>,
    key: &str,
    context: &str,
) -> Result<Option<String>, AppError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(AppError::Parse(format!(
            "'{}' in {} must be a string, found {}",
            key,
            context,
            json_kind(other)
        ))),
    }
}

fn check_column_name(col: &str, context: &str) -> Result<(), AppError> {
    if col == "*" && context == "select" {
        return Ok(());
    }
    if !SqlValidator::is_plain_identifier(col) {
        return Err(AppError::Parse(format!(
            "invalid column name '{}' in {}",
            col, context
        )));
    }
    Ok(())
}
