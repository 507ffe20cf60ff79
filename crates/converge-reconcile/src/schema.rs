//! Resource schema types
//!
//! Per-field classification used by the diff engine: which fields can be
//! changed in place, which are fixed at creation, and which are owned by the
//! remote side.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use converge_core::CompareMode;

/// How a field participates in reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldClassification {
    /// Can be changed on an existing resource.
    Mutable,
    /// Fixed at creation; a change requires replacing the resource.
    Immutable,
    /// Set by the remote side; never sent.
    Computed,
}

impl FieldClassification {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldClassification::Mutable => "mutable",
            FieldClassification::Immutable => "immutable",
            FieldClassification::Computed => "computed",
        }
    }
}

impl fmt::Display for FieldClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Declaration of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub classification: FieldClassification,

    /// How list values are compared.
    #[serde(default)]
    pub compare: CompareMode,

    /// The remote never returns this field (passwords, secrets), so drift is
    /// measured against the previously applied value instead.
    #[serde(default)]
    pub write_only: bool,
}

impl FieldSchema {
    fn new(classification: FieldClassification) -> Self {
        Self {
            classification,
            compare: CompareMode::Ordered,
            write_only: false,
        }
    }

    /// A field that can be updated in place.
    #[must_use]
    pub fn mutable() -> Self {
        Self::new(FieldClassification::Mutable)
    }

    /// A field fixed at creation.
    #[must_use]
    pub fn immutable() -> Self {
        Self::new(FieldClassification::Immutable)
    }

    /// A field owned by the remote side.
    #[must_use]
    pub fn computed() -> Self {
        Self::new(FieldClassification::Computed)
    }

    /// Compare lists as multisets.
    #[must_use]
    pub fn unordered(mut self) -> Self {
        self.compare = CompareMode::Unordered;
        self
    }

    /// Mark the field as never returned by reads.
    #[must_use]
    pub fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }
}

/// Field declarations of one resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSchema {
    pub resource_type: String,
    #[serde(default)]
    fields: BTreeMap<String, FieldSchema>,
}

impl ResourceSchema {
    /// Create a schema with no fields.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Declare a field using builder pattern.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, schema: FieldSchema) -> Self {
        self.fields.insert(name.into(), schema);
        self
    }

    /// Declare a mutable field.
    #[must_use]
    pub fn mutable(self, name: impl Into<String>) -> Self {
        self.field(name, FieldSchema::mutable())
    }

    /// Declare an immutable field.
    #[must_use]
    pub fn immutable(self, name: impl Into<String>) -> Self {
        self.field(name, FieldSchema::immutable())
    }

    /// Declare a computed field.
    #[must_use]
    pub fn computed(self, name: impl Into<String>) -> Self {
        self.field(name, FieldSchema::computed())
    }

    /// Look up a field.
    pub fn get(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.get(name)
    }

    /// Classification of every field, by name.
    pub fn classifications(&self) -> BTreeMap<&str, FieldClassification> {
        self.fields
            .iter()
            .map(|(name, field)| (name.as_str(), field.classification))
            .collect()
    }

    /// Names of fields with the given classification.
    pub fn fields_of(&self, classification: FieldClassification) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(move |(_, f)| f.classification == classification)
            .map(|(name, _)| name.as_str())
    }

    /// Get the number of declared fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if no field is declared.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Source of resource schemas.
pub trait SchemaProvider: Send + Sync {
    /// Schema for a resource type, or `None` if the type is unknown.
    fn field_classification(&self, resource_type: &str) -> Option<ResourceSchema>;
}

/// In-memory schema catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticSchemaProvider {
    schemas: HashMap<String, ResourceSchema>,
}

impl StaticSchemaProvider {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema, replacing any previous one for the same type.
    pub fn register(&mut self, schema: ResourceSchema) {
        self.schemas.insert(schema.resource_type.clone(), schema);
    }

    /// Register a schema using builder pattern.
    #[must_use]
    pub fn with(mut self, schema: ResourceSchema) -> Self {
        self.register(schema);
        self
    }

    /// Load a catalog from a JSON array of schemas.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let schemas: Vec<ResourceSchema> = serde_json::from_str(json)?;
        Ok(schemas.into_iter().fold(Self::new(), Self::with))
    }
}

impl SchemaProvider for StaticSchemaProvider {
    fn field_classification(&self, resource_type: &str) -> Option<ResourceSchema> {
        self.schemas.get(resource_type).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance_schema() -> ResourceSchema {
        ResourceSchema::new("cdwpg_instance")
            .mutable("instance_name")
            .immutable("zone")
            .immutable("charge_type")
            .computed("status")
            .field("security_group_ids", FieldSchema::mutable().unordered())
            .field("admin_password", FieldSchema::immutable().write_only())
    }

    #[test]
    fn test_builder() {
        let schema = instance_schema();
        assert_eq!(schema.len(), 6);
        assert_eq!(
            schema.get("zone").map(|f| f.classification),
            Some(FieldClassification::Immutable)
        );
        assert_eq!(
            schema.get("security_group_ids").map(|f| f.compare),
            Some(CompareMode::Unordered)
        );
        assert!(schema.get("admin_password").is_some_and(|f| f.write_only));
        assert!(schema.get("unknown").is_none());
    }

    #[test]
    fn test_fields_of() {
        let schema = instance_schema();
        let immutable: Vec<_> = schema.fields_of(FieldClassification::Immutable).collect();
        assert_eq!(immutable, vec!["admin_password", "charge_type", "zone"]);
        assert_eq!(
            schema.classifications().get("status"),
            Some(&FieldClassification::Computed)
        );
    }

    #[test]
    fn test_static_provider() {
        let provider = StaticSchemaProvider::new().with(instance_schema());
        assert!(provider.field_classification("cdwpg_instance").is_some());
        assert!(provider.field_classification("cvm_instance").is_none());
    }

    #[test]
    fn test_provider_from_json() {
        let json = r#"[
            {
                "resource_type": "cam_role",
                "fields": {
                    "name": {"classification": "immutable"},
                    "document": {"classification": "mutable"},
                    "tags": {"classification": "mutable", "compare": "unordered"},
                    "create_time": {"classification": "computed"}
                }
            }
        ]"#;
        let provider = StaticSchemaProvider::from_json(json).unwrap();
        let schema = provider.field_classification("cam_role").unwrap();
        assert_eq!(schema.len(), 4);
        assert_eq!(
            schema.get("tags").map(|f| f.compare),
            Some(CompareMode::Unordered)
        );
        assert!(!schema.get("name").is_some_and(|f| f.write_only));
    }
}
