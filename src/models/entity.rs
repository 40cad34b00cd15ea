use serde::{Deserialize, Serialize};

pub const STATUS_ACTIVE: i32 = 1;
pub const STATUS_DELETED: i32 = 2;

/// Logical record type whose attributes are spread over several tables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub entity_idx: i64,
    pub entity_name: String,
    pub description: Option<String>,
    /// Primary table; owns the shared key column
    pub pk_attr_table: String,
    /// Key column shared by every attribute table of the entity
    pub pk_attr_column: String,
    pub status: i32,
}

impl Entity {
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }
}

/// One attribute group, mapped 1:1 to a physical table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttrGroup {
    /// 0 for the group synthesized for the primary table
    pub group_idx: i64,
    pub entity_idx: i64,
    pub attr_table: String,
    pub group_name: Option<String>,
    pub description: Option<String>,
}

impl AttrGroup {
    /// Group standing for the entity's primary table when no row registers it
    pub fn primary_of(entity: &Entity) -> Self {
        Self {
            group_idx: 0,
            entity_idx: entity.entity_idx,
            attr_table: entity.pk_attr_table.clone(),
            group_name: Some(entity.entity_name.clone()),
            description: entity.description.clone(),
        }
    }
}

/// Tenant row, routing requests to a data source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tenant {
    pub tenant_idx: i64,
    pub tenant_uid: String,
    pub name: String,
    pub driver: String,
    pub data_source: String,
    pub environment: Option<String>,
    pub status: i32,
}
