use serde::{Deserialize, Serialize};

/// Physical column definition obtained by introspection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    /// Lower-cased base type name, e.g. `varchar` for `VARCHAR(64)`
    #[serde(rename = "type")]
    pub sql_type: String,
    pub length1: Option<i64>,
    pub length2: Option<i64>,
    pub nullable: bool,
    pub default_value: Option<String>,
    pub is_primary_key: bool,
    pub is_auto_increment: bool,
    pub comment: Option<String>,
}

impl ColumnSchema {
    /// Build a column from a declared type such as `VARCHAR(255)` or `DECIMAL(10, 2)`
    pub fn from_declared_type(name: &str, declared: &str) -> Self {
        let (sql_type, length1, length2) = split_declared_type(declared);
        Self {
            name: name.to_string(),
            sql_type,
            length1,
            length2,
            nullable: true,
            default_value: None,
            is_primary_key: false,
            is_auto_increment: false,
            comment: None,
        }
    }
}

/// Split `DECIMAL(10, 2)` into `("decimal", Some(10), Some(2))`
pub fn split_declared_type(declared: &str) -> (String, Option<i64>, Option<i64>) {
    let declared = declared.trim();
    let Some(open) = declared.find('(') else {
        return (declared.to_lowercase(), None, None);
    };

    let base = declared[..open].trim().to_lowercase();
    let inner = declared[open + 1..].trim_end_matches(')');
    let mut lengths = inner.split(',').map(|part| part.trim().parse::<i64>().ok());
    let length1 = lengths.next().flatten();
    let length2 = lengths.next().flatten();
    (base, length1, length2)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexSchema {
    pub name: String,
    pub unique: bool,
    pub columns: Vec<String>,
}

/// Physical table definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    pub indexes: Vec<IndexSchema>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn primary_keys(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Name of the auto-increment column, if the table has one
    pub fn auto_increment(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.is_auto_increment)
            .map(|c| c.name.as_str())
    }

    pub fn unique_indexes(&self) -> impl Iterator<Item = &IndexSchema> {
        self.indexes.iter().filter(|idx| idx.unique)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_declared_type() {
        assert_eq!(split_declared_type("INTEGER"), ("integer".to_string(), None, None));
        assert_eq!(
            split_declared_type("VARCHAR(255)"),
            ("varchar".to_string(), Some(255), None)
        );
        assert_eq!(
            split_declared_type("DECIMAL(10, 2)"),
            ("decimal".to_string(), Some(10), Some(2))
        );
        assert_eq!(split_declared_type(""), (String::new(), None, None));
    }

    #[test]
    fn test_table_lookups() {
        let mut table = TableSchema::new("user");
        let mut id = ColumnSchema::from_declared_type("user_idx", "INTEGER");
        id.is_primary_key = true;
        id.is_auto_increment = true;
        table.columns.push(id);
        table
            .columns
            .push(ColumnSchema::from_declared_type("email", "VARCHAR(128)"));
        table.indexes.push(IndexSchema {
            name: "uq_email".to_string(),
            unique: true,
            columns: vec!["email".to_string()],
        });

        assert_eq!(table.primary_keys(), vec!["user_idx".to_string()]);
        assert_eq!(table.auto_increment(), Some("user_idx"));
        assert!(table.has_column("email"));
        assert_eq!(table.unique_indexes().count(), 1);
    }
}
