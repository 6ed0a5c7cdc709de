//! Per-table schemas supplied by the entity layer.
//!
//! The engine treats payloads as opaque, but a change is still checked
//! against its table's field definitions before it is queued, and the
//! server runs the same check before applying a pushed change.

use crate::{error::Result, ChangeAction, Error, Payload, SchemaVersion, TableName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    Timestamp,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Timestamp => write!(f, "Timestamp"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// Definition of a field in a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: FieldType,
    /// Whether the field must be present on a full record
    pub required: bool,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    /// Validate a value for this field. `partial` skips the required check,
    /// for patches that only carry changed fields.
    pub fn validate(&self, value: Option<&serde_json::Value>, partial: bool) -> Result<()> {
        let enforce_required = self.required && !partial;
        match value {
            None if enforce_required => Err(Error::MissingRequiredField(self.name.clone())),
            None => Ok(()),
            Some(serde_json::Value::Null) if self.required => {
                Err(Error::MissingRequiredField(self.name.clone()))
            }
            Some(serde_json::Value::Null) => Ok(()),
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &serde_json::Value) -> Result<()> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => value.is_u64() || value.is_i64(),
            FieldType::Json => true,
        };

        if valid {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "Null",
        serde_json::Value::Bool(_) => "Bool",
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        serde_json::Value::Number(_) => "Float",
        serde_json::Value::String(_) => "String",
        serde_json::Value::Array(_) => "Array",
        serde_json::Value::Object(_) => "Object",
    }
}

/// Schema for one synced table. Fields not listed are passed through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub name: TableName,
    pub fields: Vec<FieldDef>,
}

impl TableSchema {
    pub fn new(name: impl Into<TableName>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// A table that accepts any payload.
    pub fn open(name: impl Into<TableName>) -> Self {
        Self::new(name, Vec::new())
    }

    /// Validate a full record payload.
    pub fn validate_payload(&self, payload: &Payload) -> Result<()> {
        for field in &self.fields {
            field.validate(payload.get(&field.name), false)?;
        }
        Ok(())
    }

    /// Validate a patch: only the fields present are checked.
    pub fn validate_patch(&self, patch: &Payload) -> Result<()> {
        for field in &self.fields {
            field.validate(patch.get(&field.name), true)?;
        }
        Ok(())
    }
}

/// All tables a tenant syncs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub version: SchemaVersion,
    pub tables: BTreeMap<TableName, TableSchema>,
}

impl Schema {
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            tables: BTreeMap::new(),
        }
    }

    pub fn add_table(&mut self, table: TableSchema) -> &mut Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    /// Builder-style method to add a table.
    pub fn with_table(mut self, table: TableSchema) -> Self {
        self.add_table(table);
        self
    }

    pub fn get_table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> Vec<TableName> {
        self.tables.keys().cloned().collect()
    }

    /// Validate a change before it is queued or applied.
    pub fn validate_change(
        &self,
        table: &str,
        action: ChangeAction,
        payload: &Payload,
    ) -> Result<()> {
        let table_schema = self
            .tables
            .get(table)
            .ok_or_else(|| Error::TableNotFound(table.to_string()))?;

        match action {
            ChangeAction::Create => table_schema.validate_payload(payload),
            ChangeAction::Update => table_schema.validate_patch(payload),
            ChangeAction::Delete => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn menu_schema() -> Schema {
        Schema::new(1).with_table(TableSchema::new(
            "menu_items",
            vec![
                FieldDef::required("name", FieldType::String),
                FieldDef::optional("price", FieldType::Float),
                FieldDef::optional("available", FieldType::Bool),
            ],
        ))
    }

    #[test]
    fn create_requires_required_fields() {
        let schema = menu_schema();
        let result =
            schema.validate_change("menu_items", ChangeAction::Create, &payload(json!({"price": 3})));
        assert_eq!(result, Err(Error::MissingRequiredField("name".into())));

        assert!(schema
            .validate_change(
                "menu_items",
                ChangeAction::Create,
                &payload(json!({"name": "Soup", "price": 3.5}))
            )
            .is_ok());
    }

    #[test]
    fn update_is_partial() {
        let schema = menu_schema();
        assert!(schema
            .validate_change("menu_items", ChangeAction::Update, &payload(json!({"price": 4})))
            .is_ok());
    }

    #[test]
    fn update_still_checks_types() {
        let schema = menu_schema();
        let result = schema.validate_change(
            "menu_items",
            ChangeAction::Update,
            &payload(json!({"available": "yes"})),
        );
        assert!(matches!(result, Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn required_field_cannot_be_nulled() {
        let schema = menu_schema();
        let result =
            schema.validate_change("menu_items", ChangeAction::Update, &payload(json!({"name": null})));
        assert_eq!(result, Err(Error::MissingRequiredField("name".into())));
    }

    #[test]
    fn unknown_table_rejected() {
        let schema = menu_schema();
        let result = schema.validate_change("invoices", ChangeAction::Delete, &Payload::new());
        assert_eq!(result, Err(Error::TableNotFound("invoices".into())));
    }

    #[test]
    fn open_table_accepts_anything() {
        let schema = Schema::new(1).with_table(TableSchema::open("notes"));
        assert!(schema
            .validate_change("notes", ChangeAction::Create, &payload(json!({"x": [1, 2]})))
            .is_ok());
    }

    #[test]
    fn extra_fields_pass_through() {
        let schema = menu_schema();
        assert!(schema
            .validate_change(
                "menu_items",
                ChangeAction::Create,
                &payload(json!({"name": "Tea", "translations": {"fr": "Thé"}}))
            )
            .is_ok());
    }
}
