//! Default table catalog of a restaurant tenant.
//!
//! Deployments with their own tables load a [`Schema`] from JSON instead;
//! the catalog is what the server and the device agent fall back to.

use crate::{FieldDef, FieldType, Schema, SchemaVersion, TableSchema};

pub const CATALOG_VERSION: SchemaVersion = 1;

/// Tables every point-of-sale tenant syncs.
pub fn default_catalog() -> Schema {
    Schema::new(CATALOG_VERSION)
        .with_table(TableSchema::new(
            "menu_items",
            vec![
                FieldDef::required("name", FieldType::String),
                FieldDef::required("price", FieldType::Float),
                FieldDef::optional("category", FieldType::String),
                FieldDef::optional("available", FieldType::Bool),
            ],
        ))
        .with_table(TableSchema::new(
            "orders",
            vec![
                FieldDef::required("status", FieldType::String),
                FieldDef::required("total", FieldType::Float),
                FieldDef::optional("tableNumber", FieldType::Int),
                FieldDef::optional("openedAt", FieldType::Timestamp),
                FieldDef::optional("closedAt", FieldType::Timestamp),
                FieldDef::optional("notes", FieldType::String),
            ],
        ))
        .with_table(TableSchema::new(
            "order_items",
            vec![
                FieldDef::required("orderId", FieldType::String),
                FieldDef::required("menuItemId", FieldType::String),
                FieldDef::required("quantity", FieldType::Int),
                FieldDef::optional("unitPrice", FieldType::Float),
                FieldDef::optional("modifiers", FieldType::Json),
            ],
        ))
        .with_table(TableSchema::new(
            "customers",
            vec![
                FieldDef::required("name", FieldType::String),
                FieldDef::optional("phone", FieldType::String),
                FieldDef::optional("email", FieldType::String),
                FieldDef::optional("visits", FieldType::Int),
            ],
        ))
        .with_table(TableSchema::new(
            "payments",
            vec![
                FieldDef::required("orderId", FieldType::String),
                FieldDef::required("amount", FieldType::Float),
                FieldDef::required("method", FieldType::String),
                FieldDef::optional("paidAt", FieldType::Timestamp),
            ],
        ))
}

/// Parse a schema from its JSON form.
pub fn schema_from_json(json: &str) -> crate::error::Result<Schema> {
    serde_json::from_str(json).map_err(|e| crate::Error::InvalidPayload(format!("schema: {}", e)))
}
