use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::middleware::AppError;
use crate::models::entity::{AttrGroup, Entity};
use crate::models::schema::{ColumnSchema, IndexSchema, TableSchema};

/// Column index entry: the table owning a column plus its definition
#[derive(Debug, Clone, Serialize)]
pub struct IndexedColumn {
    pub table: String,
    pub schema: ColumnSchema,
}

/// Resolved entity: groups, physical schemas and the flattened column index
#[derive(Debug, Clone)]
pub struct EntityMeta {
    entity: Entity,
    attr_groups: Vec<AttrGroup>,
    attr_tables: HashMap<String, TableSchema>,
    columns: HashMap<String, IndexedColumn>,
    loaded_at: DateTime<Utc>,
}

impl EntityMeta {
    /// Create the meta with the primary table's group first, followed by `groups`
    pub fn new(entity: Entity, groups: Vec<AttrGroup>) -> Self {
        let primary = AttrGroup::primary_of(&entity);
        let mut meta = Self {
            entity,
            attr_groups: Vec::with_capacity(groups.len() + 1),
            attr_tables: HashMap::new(),
            columns: HashMap::new(),
            loaded_at: Utc::now(),
        };

        match groups.iter().position(|g| g.attr_table == primary.attr_table) {
            Some(pos) => meta.attr_groups.push(groups[pos].clone()),
            None => meta.attr_groups.push(primary),
        }
        for group in groups {
            meta.add_attr_group(group);
        }
        meta
    }

    /// Add a group unless one already maps to the same table
    pub fn add_attr_group(&mut self, group: AttrGroup) -> bool {
        if self
            .attr_groups
            .iter()
            .any(|g| g.attr_table == group.attr_table)
        {
            return false;
        }
        self.attr_groups.push(group);
        true
    }

    /// Attach the physical schema of every group and rebuild the column index.
    ///
    /// Fails with `TableNotFound` naming the first group whose table is absent
    /// from `tables`.
    pub fn attach_schemas(&mut self, tables: &HashMap<String, TableSchema>) -> Result<(), AppError> {
        let mut attached = HashMap::with_capacity(self.attr_groups.len());
        for group in &self.attr_groups {
            let schema = tables
                .get(&group.attr_table)
                .ok_or_else(|| AppError::TableNotFound {
                    table: group.attr_table.clone(),
                    entity: self.entity.entity_name.clone(),
                })?;
            attached.insert(group.attr_table.clone(), schema.clone());
        }
        self.attr_tables = attached;

        let primary = self.primary_schema()?;
        if !primary.has_column(&self.entity.pk_attr_column) {
            return Err(AppError::Schema(format!(
                "key column '{}' not found in primary table '{}' of entity '{}'",
                self.entity.pk_attr_column, self.entity.pk_attr_table, self.entity.entity_name
            )));
        }

        self.build_column_index();
        self.verify()
    }

    fn build_column_index(&mut self) {
        let key = self.entity.pk_attr_column.clone();
        let mut columns: HashMap<String, IndexedColumn> = HashMap::new();

        // attr_groups starts with the primary table, so it claims its columns first
        for group in &self.attr_groups {
            let Some(table) = self.attr_tables.get(&group.attr_table) else {
                continue;
            };
            let is_primary = table.name == self.entity.pk_attr_table;
            for column in &table.columns {
                if !is_primary && column.name == key {
                    continue;
                }
                if let Some(owner) = columns.get(&column.name) {
                    tracing::warn!(
                        "Column '{}' of table '{}' is shadowed by table '{}' in entity '{}'",
                        column.name,
                        table.name,
                        owner.table,
                        self.entity.entity_name
                    );
                    continue;
                }
                columns.insert(
                    column.name.clone(),
                    IndexedColumn {
                        table: table.name.clone(),
                        schema: column.clone(),
                    },
                );
            }
        }

        self.columns = columns;
    }

    /// Collect every structural problem of the meta into one error
    pub fn verify(&self) -> Result<(), AppError> {
        let mut problems = Vec::new();
        if self.attr_groups.is_empty() {
            problems.push("no attr groups".to_string());
        }
        if self.attr_tables.is_empty() {
            problems.push("no attr tables".to_string());
        }
        if self.attr_groups.len() != self.attr_tables.len() {
            problems.push(format!(
                "attr group count {} does not match attr table count {}",
                self.attr_groups.len(),
                self.attr_tables.len()
            ));
        }
        for group in &self.attr_groups {
            if !self.attr_tables.contains_key(&group.attr_table) {
                problems.push(format!("attr table '{}' has no schema", group.attr_table));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(AppError::Schema(format!(
                "entity '{}': {}",
                self.entity.entity_name,
                problems.join("; ")
            )))
        }
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn name(&self) -> &str {
        &self.entity.entity_name
    }

    pub fn attr_groups(&self) -> &[AttrGroup] {
        &self.attr_groups
    }

    pub fn attr_table(&self, table: &str) -> Option<&TableSchema> {
        self.attr_tables.get(table)
    }

    pub fn attr_table_count(&self) -> usize {
        self.attr_tables.len()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn primary_table(&self) -> &str {
        &self.entity.pk_attr_table
    }

    pub fn primary_column(&self) -> &str {
        &self.entity.pk_attr_column
    }

    pub fn is_primary_table(&self, table: &str) -> bool {
        self.entity.pk_attr_table == table
    }

    fn primary_schema(&self) -> Result<&TableSchema, AppError> {
        self.attr_tables
            .get(&self.entity.pk_attr_table)
            .ok_or_else(|| AppError::TableNotFound {
                table: self.entity.pk_attr_table.clone(),
                entity: self.entity.entity_name.clone(),
            })
    }

    /// Whether the primary table generates the key column
    pub fn has_auto_increment(&self) -> bool {
        self.attr_tables
            .get(&self.entity.pk_attr_table)
            .and_then(|t| t.column(&self.entity.pk_attr_column))
            .map(|c| c.is_auto_increment)
            .unwrap_or(false)
    }

    /// Unique indexes of the primary table
    pub fn unique_keys(&self) -> Vec<&IndexSchema> {
        self.attr_tables
            .get(&self.entity.pk_attr_table)
            .map(|t| t.unique_indexes().collect())
            .unwrap_or_default()
    }

    /// Columns of `cols` that belong to a unique index of the primary table, in `cols` order
    pub fn filter_primary_unique_cols<S: AsRef<str>>(&self, cols: &[S]) -> Vec<String> {
        let unique: HashSet<&str> = self
            .unique_keys()
            .into_iter()
            .flat_map(|idx| idx.columns.iter().map(String::as_str))
            .collect();

        cols.iter()
            .map(AsRef::as_ref)
            .filter(|c| *c != self.entity.pk_attr_column && unique.contains(c))
            .map(str::to_string)
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&IndexedColumn> {
        self.columns.get(name)
    }

    /// Every indexed column once, primary table first, in attribute-group then
    /// table-definition order
    pub fn indexed_columns(&self) -> Vec<&IndexedColumn> {
        let mut out = Vec::with_capacity(self.columns.len());
        for group in &self.attr_groups {
            let Some(table) = self.attr_tables.get(&group.attr_table) else {
                continue;
            };
            out.extend(
                table
                    .columns
                    .iter()
                    .filter_map(|c| self.columns.get(&c.name))
                    .filter(|c| c.table == table.name),
            );
        }
        out
    }

    /// Table owning `column`
    pub fn column_owner(&self, column: &str) -> Result<&str, AppError> {
        self.columns
            .get(column)
            .map(|c| c.table.as_str())
            .ok_or_else(|| AppError::ColumnNotFound(column.to_string()))
    }

    /// Position of `table` in attribute-group order
    pub fn table_position(&self, table: &str) -> Option<usize> {
        self.attr_groups.iter().position(|g| g.attr_table == table)
    }

    /// Tables touched by a column list, in attribute-group order; `*` means every table
    pub fn attr_group_tables_from_columns<S: AsRef<str>>(
        &self,
        cols: &[S],
    ) -> Result<Vec<String>, AppError> {
        if cols.iter().any(|c| c.as_ref() == "*") {
            return Ok(self
                .attr_groups
                .iter()
                .map(|g| g.attr_table.clone())
                .collect());
        }

        let mut touched = HashSet::new();
        for col in cols {
            touched.insert(self.column_owner(col.as_ref())?);
        }

        Ok(self
            .attr_groups
            .iter()
            .filter(|g| touched.contains(g.attr_table.as_str()))
            .map(|g| g.attr_table.clone())
            .collect())
    }

    /// Number of `tables` that physically carry a column named `column`
    pub fn tables_having_column(&self, column: &str, tables: &[String]) -> usize {
        tables
            .iter()
            .filter_map(|t| self.attr_tables.get(t))
            .filter(|t| t.has_column(column))
            .count()
    }

    /// Public metadata document
    pub fn to_jmeta(&self) -> JMeta {
        let mut attrs = Vec::new();
        for group in &self.attr_groups {
            let Some(table) = self.attr_tables.get(&group.attr_table) else {
                continue;
            };
            for column in &table.columns {
                attrs.push(JAttr {
                    name: column.name.clone(),
                    sql_type: column.sql_type.clone(),
                    comment: column.comment.clone(),
                    length1: column.length1,
                    length2: column.length2,
                    attr_table: table.name.clone(),
                    nullable: column.nullable,
                });
            }
        }

        let primary_keys = self
            .attr_tables
            .get(&self.entity.pk_attr_table)
            .map(TableSchema::primary_keys)
            .unwrap_or_default();

        JMeta {
            entity: self.entity.entity_name.clone(),
            attrs,
            entity_info: self.entity.clone(),
            group_info: self.attr_groups.clone(),
            primary_keys,
            loaded_at: self.loaded_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JAttr {
    pub name: String,
    #[serde(rename = "type")]
    pub sql_type: String,
    pub comment: Option<String>,
    pub length1: Option<i64>,
    pub length2: Option<i64>,
    pub attr_table: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct JMeta {
    pub entity: String,
    pub attrs: Vec<JAttr>,
    pub entity_info: Entity,
    pub group_info: Vec<AttrGroup>,
    pub primary_keys: Vec<String>,
    pub loaded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_entity, sample_group, sample_meta, sample_tables, table};

    #[test]
    fn test_attach_resolves_every_group() {
        let meta = sample_meta();
        assert_eq!(meta.attr_groups().len(), 3);
        assert_eq!(meta.attr_table_count(), 3);
        assert!(meta.verify().is_ok());
        assert_eq!(meta.attr_groups()[0].group_idx, 0);
        assert_eq!(meta.attr_groups()[0].attr_table, "user");
    }

    #[test]
    fn test_attach_missing_table_names_it() {
        let mut tables = sample_tables();
        tables.remove("user_profile");

        let entity = sample_entity();
        let groups = vec![
            sample_group(1, "user_department"),
            sample_group(2, "user_profile"),
        ];
        let mut meta = EntityMeta::new(entity, groups);
        let err = meta.attach_schemas(&tables).unwrap_err();
        match err {
            AppError::TableNotFound { table, entity } => {
                assert_eq!(table, "user_profile");
                assert_eq!(entity, "user");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_primary_group_is_not_duplicated() {
        let entity = sample_entity();
        let groups = vec![sample_group(7, "user"), sample_group(8, "user_department")];
        let mut meta = EntityMeta::new(entity, groups);
        assert_eq!(meta.attr_groups().len(), 2);
        assert_eq!(meta.attr_groups()[0].group_idx, 7);
        assert!(!meta.add_attr_group(sample_group(9, "user_department")));
    }

    #[test]
    fn test_key_column_belongs_to_primary_table() {
        let meta = sample_meta();
        assert_eq!(meta.column_owner("user_idx").unwrap(), "user");
        assert_eq!(meta.column_owner("dept_name").unwrap(), "user_department");
        assert_eq!(meta.column_owner("bio").unwrap(), "user_profile");
        assert!(matches!(
            meta.column_owner("missing"),
            Err(AppError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_indexed_columns_list_each_name_once() {
        let meta = sample_meta();
        let listed: Vec<(&str, &str)> = meta
            .indexed_columns()
            .into_iter()
            .map(|c| (c.table.as_str(), c.schema.name.as_str()))
            .collect();
        assert_eq!(
            listed,
            vec![
                ("user", "user_idx"),
                ("user", "name"),
                ("user", "email"),
                ("user_department", "dept_name"),
                ("user_profile", "bio"),
                ("user_profile", "age"),
            ]
        );
    }

    #[test]
    fn test_shadowed_column_keeps_first_owner() {
        let mut tables = sample_tables();
        tables.insert(
            "user_extra".to_string(),
            table("user_extra", &[("user_idx", "INTEGER"), ("name", "TEXT")], "user_idx"),
        );
        let mut meta = EntityMeta::new(sample_entity(), vec![sample_group(3, "user_extra")]);
        meta.attach_schemas(&tables).unwrap();
        assert_eq!(meta.column_owner("name").unwrap(), "user");
    }

    #[test]
    fn test_tables_from_columns() {
        let meta = sample_meta();
        let tables = meta
            .attr_group_tables_from_columns(&["bio", "name"])
            .unwrap();
        assert_eq!(tables, vec!["user".to_string(), "user_profile".to_string()]);

        let all = meta.attr_group_tables_from_columns(&["*"]).unwrap();
        assert_eq!(all.len(), 3);

        assert!(meta.attr_group_tables_from_columns(&["nope"]).is_err());
    }

    #[test]
    fn test_auto_increment_and_unique_keys() {
        let meta = sample_meta();
        assert!(meta.has_auto_increment());
        assert_eq!(meta.unique_keys().len(), 1);
        assert_eq!(
            meta.filter_primary_unique_cols(&["name", "email", "user_idx"]),
            vec!["email".to_string()]
        );
    }

    #[test]
    fn test_verify_reports_all_problems() {
        let meta = EntityMeta::new(sample_entity(), vec![sample_group(1, "user_department")]);
        let err = meta.verify().unwrap_err().to_string();
        assert!(err.contains("no attr tables"));
        assert!(err.contains("does not match"));
    }

    #[test]
    fn test_jmeta_document() {
        let jmeta = sample_meta().to_jmeta();
        assert_eq!(jmeta.entity, "user");
        assert_eq!(jmeta.primary_keys, vec!["user_idx".to_string()]);
        assert_eq!(jmeta.group_info.len(), 3);
        assert!(jmeta
            .attrs
            .iter()
            .any(|a| a.name == "dept_name" && a.attr_table == "user_department"));

        let value = serde_json::to_value(&jmeta).unwrap();
        assert_eq!(value["attrs"][0]["type"], "integer");
    }
}
