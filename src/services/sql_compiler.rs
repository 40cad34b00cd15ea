// Query AST + EntityMeta -> parametrised SQL
//
// Clause order is fixed: SELECT, FROM/JOIN, WHERE, ORDER BY, LIMIT/OFFSET.
// Every value is bound through `?`; only validated identifiers and
// fragments reach the SQL text.

use serde::Serialize;
use serde_json::Value;

use crate::api::middleware::AppError;
use crate::models::entity_meta::EntityMeta;
use crate::models::query::{Condition, FromClause, Operator, Query, Tie, Where};
use crate::validation::sql_validator::SqlValidator;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledSql {
    pub sql: String,
    pub args: Vec<Value>,
}

pub struct SqlCompiler;

impl SqlCompiler {
    /// The single entity a query reads from
    pub fn entity_name(query: &Query) -> Result<&str, AppError> {
        match &query.from {
            FromClause::Entities(refs) => match refs.as_slice() {
                [single] => Ok(single.entity.as_str()),
                _ => Err(AppError::NotImplemented(format!(
                    "queries across {} entities are not supported",
                    refs.len()
                ))),
            },
            FromClause::SubQuery(_) => Err(AppError::NotImplemented(
                "sub-query in 'from' is not supported".to_string(),
            )),
        }
    }

    pub fn compile_select(query: &Query, meta: &EntityMeta) -> Result<CompiledSql, AppError> {
        let entity = Self::entity_name(query)?;
        if entity != meta.name() {
            return Err(AppError::Internal(format!(
                "query on '{}' compiled against meta of '{}'",
                entity,
                meta.name()
            )));
        }

        let tables = Self::required_tables(query, meta)?;
        let planner = Planner {
            meta,
            tables: &tables,
        };

        let mut sql = String::from("SELECT ");
        sql.push_str(&planner.select_list(query)?);
        sql.push_str(" FROM ");
        sql.push_str(meta.primary_table());

        let key = meta.primary_column();
        for table in tables.iter().filter(|t| !meta.is_primary_table(t)) {
            sql.push_str(&format!(
                " LEFT JOIN {table} ON {primary}.{key} = {table}.{key}",
                table = table,
                primary = meta.primary_table(),
                key = key
            ));
        }

        let mut args = Vec::new();
        if !query.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&planner.where_chain(&query.wheres, &mut args)?);
        }

        if !query.orders.is_empty() {
            let orders = query
                .orders
                .iter()
                .map(|o| Ok(format!("{} {}", planner.column(&o.col)?, o.direction.as_sql())))
                .collect::<Result<Vec<_>, AppError>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders.join(","));
        }

        if let Some(limit) = &query.limit {
            sql.push_str(&format!(" LIMIT {}", limit.count));
            if limit.offset > 0 {
                sql.push_str(&format!(" OFFSET {}", limit.offset));
            }
        }

        tracing::debug!("Compiled query on '{}': {}", entity, sql);
        Ok(CompiledSql { sql, args })
    }

    /// Tables a query touches, in attribute-group order, primary table first
    fn required_tables(query: &Query, meta: &EntityMeta) -> Result<Vec<String>, AppError> {
        let mut cols: Vec<String> = vec![meta.primary_column().to_string()];

        if query.select.is_empty() || query.select.iter().any(|s| s.is_star()) {
            cols.push("*".to_string());
        }
        for item in &query.select {
            match &item.opt {
                Some(opt) => cols.extend(fragment_columns(opt, meta)?),
                None if item.is_star() => {}
                None => cols.push(item.col.clone()),
            }
        }

        for node in &query.wheres {
            collect_where_columns(node, meta, &mut cols)?;
        }
        cols.extend(query.orders.iter().map(|o| o.col.clone()));

        meta.attr_group_tables_from_columns(&cols)
    }

    /// `INSERT INTO t (a,b) VALUES (?,?)`, columns in the given order
    pub fn build_insert<S: AsRef<str>>(table: &str, cols: &[S]) -> String {
        let names: Vec<&str> = cols.iter().map(AsRef::as_ref).collect();
        let marks = vec!["?"; names.len()];
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            names.join(","),
            marks.join(",")
        )
    }

    /// `UPDATE t SET a=?,b=? WHERE k=?`; bind set values first, then keys
    pub fn build_update<S: AsRef<str>, K: AsRef<str>>(
        table: &str,
        set_cols: &[S],
        key_cols: &[K],
    ) -> String {
        let sets: Vec<String> = set_cols
            .iter()
            .map(|c| format!("{}=?", c.as_ref()))
            .collect();
        let keys: Vec<String> = key_cols
            .iter()
            .map(|c| format!("{}=?", c.as_ref()))
            .collect();
        format!(
            "UPDATE {} SET {} WHERE {}",
            table,
            sets.join(","),
            keys.join(" AND ")
        )
    }
}

/// Known columns referenced inside a raw fragment
fn fragment_columns(fragment: &str, meta: &EntityMeta) -> Result<Vec<String>, AppError> {
    Ok(SqlValidator::words(fragment)?
        .into_iter()
        .filter(|w| meta.column(w).is_some())
        .collect())
}

fn collect_where_columns(
    node: &Where,
    meta: &EntityMeta,
    out: &mut Vec<String>,
) -> Result<(), AppError> {
    match &node.cond {
        Some(Condition::Compare { col, .. }) => out.push(col.clone()),
        Some(Condition::Expr { sql, .. }) => out.extend(fragment_columns(sql, meta)?),
        None => {}
    }
    for sub in &node.sub {
        collect_where_columns(sub, meta, out)?;
    }
    Ok(())
}

struct Planner<'a> {
    meta: &'a EntityMeta,
    tables: &'a [String],
}

impl Planner<'_> {
    fn joined(&self) -> bool {
        self.tables.len() > 1
    }

    /// Column reference, qualified when more than one joined table carries it
    fn column(&self, col: &str) -> Result<String, AppError> {
        let owner = self.meta.column_owner(col)?;
        Ok(self.qualify(owner, col))
    }

    fn qualify(&self, owner: &str, col: &str) -> String {
        if self.joined() && self.meta.tables_having_column(col, self.tables) > 1 {
            format!("{}.{}", owner, col)
        } else {
            col.to_string()
        }
    }

    /// Raw `opt` / `expr` text with its entity columns qualified like plain ones
    fn fragment(&self, sql: &str) -> Result<String, AppError> {
        if !self.joined() {
            return Ok(sql.to_string());
        }
        SqlValidator::rewrite_words(sql, |word| {
            self.meta
                .column(word)
                .map(|c| self.qualify(&c.table, word))
        })
    }

    /// `*` spelled out so each entity column appears once; the joined tables
    /// all carry the key, and a bare `*` would repeat it
    fn star_columns(&self) -> Result<String, AppError> {
        let cols = self
            .meta
            .indexed_columns()
            .into_iter()
            .map(|c| self.column(&c.schema.name))
            .collect::<Result<Vec<_>, AppError>>()?;
        Ok(cols.join(","))
    }

    fn select_list(&self, query: &Query) -> Result<String, AppError> {
        if query.select.is_empty() {
            return self.star_columns();
        }

        let items = query
            .select
            .iter()
            .map(|item| {
                if item.is_star() {
                    return self.star_columns();
                }
                let expr = match &item.opt {
                    Some(opt) => self.fragment(opt)?,
                    None => self.column(&item.col)?,
                };
                Ok(match &item.alias {
                    Some(alias) => format!("{} AS {}", expr, alias),
                    None => expr,
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;
        Ok(items.join(","))
    }

    /// Left-to-right chain; the accumulated left side is parenthesised
    /// whenever the connective changes, so `a OR b AND c` reads as
    /// `(a OR b) AND c`.
    fn where_chain(&self, nodes: &[Where], args: &mut Vec<Value>) -> Result<String, AppError> {
        let mut acc = String::new();
        let mut last_tie: Option<Tie> = None;

        for (pos, node) in nodes.iter().enumerate() {
            let part = self.where_node(node, args)?;
            if pos == 0 {
                acc = part;
                continue;
            }
            let tie = node.tie.unwrap_or(Tie::And);
            if last_tie.is_some_and(|prev| prev != tie) {
                acc = format!("({})", acc);
            }
            acc = format!("{} {} {}", acc, tie.as_sql(), part);
            last_tie = Some(tie);
        }
        Ok(acc)
    }

    fn where_node(&self, node: &Where, args: &mut Vec<Value>) -> Result<String, AppError> {
        let own = match &node.cond {
            Some(cond) => Some(self.condition(cond, args)?),
            None => None,
        };
        let sub = if node.sub.is_empty() {
            None
        } else {
            let chain = self.where_chain(&node.sub, args)?;
            Some(if node.sub.len() > 1 {
                format!("({})", chain)
            } else {
                chain
            })
        };

        match (own, sub) {
            (Some(own), None) => Ok(own),
            (None, Some(sub)) => Ok(sub),
            (Some(own), Some(sub)) => Ok(format!("({} AND {})", own, sub)),
            (None, None) => Err(AppError::Parse("empty where node".to_string())),
        }
    }

    fn condition(&self, cond: &Condition, args: &mut Vec<Value>) -> Result<String, AppError> {
        let (col, op) = match cond {
            Condition::Expr { sql, args: extra } => {
                let sql = self.fragment(sql)?;
                args.extend(extra.iter().cloned());
                return Ok(format!("({})", sql));
            }
            Condition::Compare { col, op } => (self.column(col)?, op),
        };

        let mut bind = |sql: String, values: &[Value]| {
            args.extend(values.iter().cloned());
            sql
        };

        Ok(match op {
            Operator::Eq(Value::Null) => format!("{} IS NULL", col),
            Operator::Ne(Value::Null) => format!("{} IS NOT NULL", col),
            Operator::Eq(v) => bind(format!("{}=?", col), std::slice::from_ref(v)),
            Operator::Ne(v) => bind(format!("{}<>?", col), std::slice::from_ref(v)),
            Operator::Lt(v) => bind(format!("{}<?", col), std::slice::from_ref(v)),
            Operator::Lte(v) => bind(format!("{}<=?", col), std::slice::from_ref(v)),
            Operator::Gt(v) => bind(format!("{}>?", col), std::slice::from_ref(v)),
            Operator::Gte(v) => bind(format!("{}>=?", col), std::slice::from_ref(v)),
            Operator::Like(pattern) => {
                let pattern = if pattern.contains('%') {
                    pattern.clone()
                } else {
                    format!("%{}%", pattern)
                };
                bind(format!("{} LIKE ?", col), &[Value::String(pattern)])
            }
            // an empty list matches nothing, its negation everything
            Operator::In(values) if values.is_empty() => "0=1".to_string(),
            Operator::NotIn(values) if values.is_empty() => "0=0".to_string(),
            Operator::In(values) => bind(
                format!("{} IN ({})", col, vec!["?"; values.len()].join(",")),
                values,
            ),
            Operator::NotIn(values) => bind(
                format!("{} NOT IN ({})", col, vec!["?"; values.len()].join(",")),
                values,
            ),
            Operator::IsNull => format!("{} IS NULL", col),
            Operator::NotNull => format!("{} IS NOT NULL", col),
            Operator::Between(low, high) => bind(
                format!("{} BETWEEN ? AND ?", col),
                &[low.clone(), high.clone()],
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_meta;
    use crate::validation::query_parser::parse_query_value;
    use serde_json::json;

    fn compile(query: Value) -> Result<CompiledSql, AppError> {
        let query = parse_query_value(&query).unwrap();
        SqlCompiler::compile_select(&query, &sample_meta())
    }

    #[test]
    fn test_single_table_has_no_join() {
        let compiled = compile(json!({"select": ["name", "email"], "from": "user"})).unwrap();
        assert_eq!(compiled.sql, "SELECT name,email FROM user");
        assert!(compiled.args.is_empty());
    }

    #[test]
    fn test_join_on_shared_key() {
        let compiled = compile(json!({"select": ["name", "dept_name"], "from": "user"})).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT name,dept_name FROM user LEFT JOIN user_department ON user.user_idx = user_department.user_idx"
        );
    }

    #[test]
    fn test_one_join_per_required_table() {
        let compiled = compile(json!({
            "select": ["age"], "from": "user",
            "where": [{"col": "dept_name", "val": "eng"}]
        }))
        .unwrap();
        assert_eq!(compiled.sql.matches("LEFT JOIN").count(), 2);
        let department = compiled.sql.find("user_department").unwrap();
        let profile = compiled.sql.find("user_profile").unwrap();
        assert!(department < profile);
    }

    #[test]
    fn test_where_chain_binds_in_order() {
        let compiled = compile(json!({
            "select": ["name"], "from": "user",
            "where": [
                {"col": "name", "op": "eq", "val": "v"},
                {"col": "email", "op": "lt", "val": 1, "tie": "and"}
            ]
        }))
        .unwrap();
        assert_eq!(compiled.sql, "SELECT name FROM user WHERE name=? AND email<?");
        assert_eq!(compiled.args, vec![json!("v"), json!(1)]);
    }

    #[test]
    fn test_tie_change_groups_left_side() {
        let compiled = compile(json!({
            "select": ["name"], "from": "user",
            "where": [
                {"col": "name", "val": "a"},
                {"col": "name", "val": "b", "tie": "or"},
                {"col": "email", "op": "notnull", "tie": "and"}
            ]
        }))
        .unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT name FROM user WHERE (name=? OR name=?) AND email IS NOT NULL"
        );
    }

    #[test]
    fn test_nested_where_group() {
        let compiled = compile(json!({
            "select": ["name"], "from": "user",
            "where": [
                {"col": "email", "op": "isnull"},
                {"tie": "and", "where": [
                    {"col": "name", "val": "a"},
                    {"col": "name", "op": "like", "val": "b", "tie": "or"}
                ]}
            ]
        }))
        .unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT name FROM user WHERE email IS NULL AND (name=? OR name LIKE ?)"
        );
        assert_eq!(compiled.args, vec![json!("a"), json!("%b%")]);
    }

    #[test]
    fn test_operator_rendering() {
        let compiled = compile(json!({
            "select": ["name"], "from": "user",
            "where": [
                {"col": "age", "op": "between", "val": [18, 30]},
                {"col": "name", "op": "in", "val": ["a", "b"], "tie": "and"},
                {"col": "bio", "op": "notin", "val": [], "tie": "and"},
                {"col": "email", "op": "ne", "tie": "and"},
                {"col": "email", "op": "like", "val": "%@x.io", "tie": "and"}
            ]
        }))
        .unwrap();
        assert!(compiled.sql.ends_with(
            "WHERE age BETWEEN ? AND ? AND name IN (?,?) AND 0=0 AND email IS NOT NULL AND email LIKE ?"
        ));
        assert_eq!(
            compiled.args,
            vec![json!(18), json!(30), json!("a"), json!("b"), json!("%@x.io")]
        );
    }

    #[test]
    fn test_expr_condition_and_aggregate() {
        let compiled = compile(json!({
            "select": [{"opt": "count(age)", "alias": "n"}], "from": "user",
            "where": [{"op": "expr", "val": {"sql": "age > ? OR age < ?", "args": [60, 18]}}]
        }))
        .unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT count(age) AS n FROM user LEFT JOIN user_profile ON user.user_idx = user_profile.user_idx WHERE (age > ? OR age < ?)"
        );
        assert_eq!(compiled.args, vec![json!(60), json!(18)]);
    }

    #[test]
    fn test_shared_key_is_qualified_when_joined() {
        let compiled = compile(json!({
            "select": ["user_idx", {"col": "dept_name", "alias": "dept"}], "from": "user",
            "order": [{"col": "user_idx", "opt": "desc"}]
        }))
        .unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT user.user_idx,dept_name AS dept FROM user LEFT JOIN user_department ON user.user_idx = user_department.user_idx ORDER BY user.user_idx DESC"
        );

        let single = compile(json!({"select": ["user_idx"], "from": "user"})).unwrap();
        assert_eq!(single.sql, "SELECT user_idx FROM user");
    }

    #[test]
    fn test_star_joins_every_table() {
        let compiled = compile(json!({"select": ["*"], "from": "user", "limit": {"count": 10}})).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT user.user_idx,name,email,dept_name,bio,age FROM user LEFT JOIN user_department ON user.user_idx = user_department.user_idx LEFT JOIN user_profile ON user.user_idx = user_profile.user_idx LIMIT 10"
        );

        let empty = compile(json!({"select": [], "from": "user"})).unwrap();
        assert!(empty.sql.starts_with("SELECT user.user_idx,name,email,dept_name,bio,age FROM user LEFT JOIN"));
    }

    #[test]
    fn test_star_next_to_other_items() {
        let compiled = compile(json!({
            "select": [{"opt": "length(bio)", "alias": "bio_len"}, "*"],
            "from": "user"
        }))
        .unwrap();
        assert!(compiled
            .sql
            .starts_with("SELECT length(bio) AS bio_len,user.user_idx,name,email,dept_name,bio,age FROM user"));
    }

    #[test]
    fn test_fragments_qualify_shared_columns() {
        let compiled = compile(json!({
            "select": [{"opt": "count(user_idx)", "alias": "n"}, "dept_name"],
            "from": "user"
        }))
        .unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT count(user.user_idx) AS n,dept_name FROM user LEFT JOIN user_department ON user.user_idx = user_department.user_idx"
        );

        let compiled = compile(json!({
            "select": ["dept_name"], "from": "user",
            "where": [{"op": "expr", "val": {"sql": "user_idx > ? AND user_department.dept_name <> 'user_idx'", "args": [3]}}]
        }))
        .unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT dept_name FROM user LEFT JOIN user_department ON user.user_idx = user_department.user_idx WHERE (user.user_idx > ? AND user_department.dept_name <> 'user_idx')"
        );
        assert_eq!(compiled.args, vec![json!(3)]);
    }

    #[test]
    fn test_fragments_untouched_without_join() {
        let compiled = compile(json!({
            "select": [{"opt": "count(user_idx)", "alias": "n"}], "from": "user",
            "where": [{"op": "expr", "val": {"sql": "user_idx > ?", "args": [3]}}]
        }))
        .unwrap();
        assert_eq!(compiled.sql, "SELECT count(user_idx) AS n FROM user WHERE (user_idx > ?)");
    }

    #[test]
    fn test_clause_order() {
        let compiled = compile(json!({
            "select": ["name"], "from": "user",
            "where": [{"col": "name", "val": "x"}],
            "order": [{"col": "name"}, {"col": "email", "opt": "desc"}],
            "limit": {"offset": 40, "count": 20}
        }))
        .unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT name FROM user WHERE name=? ORDER BY name ASC,email DESC LIMIT 20 OFFSET 40"
        );
    }

    #[test]
    fn test_unknown_column_fails() {
        let err = compile(json!({"select": ["salary"], "from": "user"})).unwrap_err();
        assert!(matches!(err, AppError::ColumnNotFound(ref c) if c == "salary"));

        let err = compile(json!({
            "select": ["name"], "from": "user",
            "where": [{"col": "ghost", "val": 1}]
        }))
        .unwrap_err();
        assert!(matches!(err, AppError::ColumnNotFound(_)));
    }

    #[test]
    fn test_unsupported_from_shapes() {
        let err = compile(json!({"select": ["name"], "from": ["user", "dept"]})).unwrap_err();
        assert!(matches!(err, AppError::NotImplemented(_)));

        let err = compile(json!({
            "select": ["name"],
            "from": {"select": ["name"], "from": "user"}
        }))
        .unwrap_err();
        assert!(matches!(err, AppError::NotImplemented(_)));
    }

    #[test]
    fn test_statement_builders_keep_column_order() {
        assert_eq!(
            SqlCompiler::build_insert("user", &["name", "email"]),
            "INSERT INTO user (name,email) VALUES (?,?)"
        );
        assert_eq!(
            SqlCompiler::build_update("user_profile", &["bio", "age"], &["user_idx"]),
            "UPDATE user_profile SET bio=?,age=? WHERE user_idx=?"
        );
    }
}
