use serde_json::{Map, Value};

use crate::api::middleware::AppError;
use crate::models::entity_meta::EntityMeta;

/// Rectangular write payload: ordered unique columns plus row-major values
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataTable {
    cols: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// Columns of one owning table: the shared key columns plus that table's payload columns
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnKeyVal {
    pub table: String,
    pub key_cols: Vec<String>,
    pub val_cols: Vec<String>,
}

impl ColumnKeyVal {
    pub fn all_cols(&self) -> Vec<String> {
        self.key_cols
            .iter()
            .chain(self.val_cols.iter())
            .cloned()
            .collect()
    }
}

impl DataTable {
    pub fn new(cols: Vec<String>) -> Result<Self, AppError> {
        if cols.is_empty() {
            return Err(AppError::Parse("'cols' is empty".to_string()));
        }
        for (i, col) in cols.iter().enumerate() {
            if col.is_empty() {
                return Err(AppError::Parse(format!("column name at position {} is empty", i)));
            }
            if cols[..i].contains(col) {
                return Err(AppError::Parse(format!("duplicate column '{}'", col)));
            }
        }
        Ok(Self {
            cols,
            rows: Vec::new(),
        })
    }

    /// Parse a write payload in any of its three shapes:
    /// `{cols:[..], vals:[[..], ..]}`, `{vals:{..}}` or `{vals:[{..}, ..]}`
    pub fn parse_values(data: &[u8]) -> Result<Self, AppError> {
        let value: Value = serde_json::from_slice(data)
            .map_err(|e| AppError::Parse(format!("invalid values json: {}", e)))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, AppError> {
        let Value::Object(payload) = value else {
            return Err(AppError::Parse(format!(
                "values payload must be an object, found {}",
                json_kind(value)
            )));
        };
        if let Some(key) = payload.keys().find(|k| *k != "cols" && *k != "vals") {
            return Err(AppError::Parse(format!("unexpected key '{}' in values payload", key)));
        }

        let vals = payload
            .get("vals")
            .ok_or_else(|| AppError::Parse("'vals' is required".to_string()))?;

        match (payload.get("cols"), vals) {
            (Some(cols), vals) => Self::from_cols_vals(cols, vals),
            (None, Value::Object(row)) => Self::from_objects(std::slice::from_ref(vals), row),
            (None, Value::Array(items)) => match items.first() {
                Some(Value::Object(first)) => Self::from_objects(items, first),
                Some(other) => Err(AppError::Parse(format!(
                    "'vals' items must be objects when 'cols' is absent, found {}",
                    json_kind(other)
                ))),
                None => Err(AppError::Parse("'vals' is empty".to_string())),
            },
            (None, other) => Err(AppError::Parse(format!(
                "'vals' must be an object or an array, found {}",
                json_kind(other)
            ))),
        }
    }

    fn from_cols_vals(cols: &Value, vals: &Value) -> Result<Self, AppError> {
        let Value::Array(cols) = cols else {
            return Err(AppError::Parse("'cols' must be an array of column names".to_string()));
        };
        let names = cols
            .iter()
            .map(|c| match c {
                Value::String(s) => Ok(s.clone()),
                other => Err(AppError::Parse(format!(
                    "column name must be a string, found {}",
                    json_kind(other)
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let Value::Array(rows) = vals else {
            return Err(AppError::Parse(
                "'vals' must be an array of rows when 'cols' is given".to_string(),
            ));
        };

        let mut table = Self::new(names)?;
        for (i, row) in rows.iter().enumerate() {
            let Value::Array(cells) = row else {
                return Err(AppError::Parse(format!(
                    "row {} must be an array, found {}",
                    i,
                    json_kind(row)
                )));
            };
            table.push_row(cells.clone())?;
        }
        Ok(table)
    }

    fn from_objects(items: &[Value], first: &Map<String, Value>) -> Result<Self, AppError> {
        let mut table = Self::new(first.keys().cloned().collect())?;
        for (i, item) in items.iter().enumerate() {
            let Value::Object(obj) = item else {
                return Err(AppError::Parse(format!(
                    "row {} must be an object, found {}",
                    i,
                    json_kind(item)
                )));
            };
            if obj.len() != table.cols.len() {
                return Err(AppError::Parse(format!(
                    "row {} has {} columns, expected {}",
                    i,
                    obj.len(),
                    table.cols.len()
                )));
            }
            let row = table
                .cols
                .iter()
                .map(|col| {
                    obj.get(col).cloned().ok_or_else(|| {
                        AppError::Parse(format!("row {} is missing column '{}'", i, col))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            table.rows.push(row);
        }
        Ok(table)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), AppError> {
        if row.len() != self.cols.len() {
            return Err(AppError::Parse(format!(
                "row {} has {} values, expected {}",
                self.rows.len(),
                row.len(),
                self.cols.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn cols(&self) -> &[String] {
        &self.cols
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, col: &str) -> Option<usize> {
        self.cols.iter().position(|c| c == col)
    }

    /// Positions of `cols`, in the order given
    pub fn columns_index<S: AsRef<str>>(&self, cols: &[S]) -> Result<Vec<usize>, AppError> {
        cols.iter()
            .map(|c| {
                self.column_index(c.as_ref())
                    .ok_or_else(|| AppError::ColumnNotFound(c.as_ref().to_string()))
            })
            .collect()
    }

    /// Append a column, filling existing rows with null; returns its position
    pub fn add_column(&mut self, col: &str) -> usize {
        if let Some(idx) = self.column_index(col) {
            return idx;
        }
        self.cols.push(col.to_string());
        for row in &mut self.rows {
            row.push(Value::Null);
        }
        self.cols.len() - 1
    }

    pub fn value(&self, row: usize, col: usize) -> Option<&Value> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// Project one row onto the given column positions
    pub fn fetch_row(&self, row: usize, idx: &[usize]) -> Vec<Value> {
        idx.iter()
            .map(|&i| self.value(row, i).cloned().unwrap_or(Value::Null))
            .collect()
    }

    pub fn update_cell(&mut self, row: usize, col: usize, value: Value) -> Result<(), AppError> {
        let cell = self
            .rows
            .get_mut(row)
            .and_then(|r| r.get_mut(col))
            .ok_or_else(|| AppError::Internal(format!("cell ({}, {}) out of range", row, col)))?;
        *cell = value;
        Ok(())
    }

    /// Split the columns across their owning tables.
    ///
    /// The primary table comes first, the rest follow attribute-group order.
    /// Every partition's key columns are the entity key column; a table only
    /// gets a partition when the payload carries one of its columns.
    pub fn division_columns_key_val(&self, meta: &EntityMeta) -> Result<Vec<ColumnKeyVal>, AppError> {
        let key = meta.primary_column();
        let mut partitions: Vec<ColumnKeyVal> = Vec::new();

        for col in &self.cols {
            let owner = meta.column_owner(col)?;
            let pos = match partitions.iter().position(|p| p.table == owner) {
                Some(pos) => pos,
                None => {
                    partitions.push(ColumnKeyVal {
                        table: owner.to_string(),
                        key_cols: vec![key.to_string()],
                        val_cols: Vec::new(),
                    });
                    partitions.len() - 1
                }
            };
            if col != key {
                partitions[pos].val_cols.push(col.clone());
            }
        }

        partitions.sort_by_key(|p| meta.table_position(&p.table).unwrap_or(usize::MAX));
        Ok(partitions)
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
