//! Schema facts consumed by the validator and compiler.
//!
//! Metadata is owned by an external [`MetadataProvider`]. Names are matched
//! case-insensitively; the canonical spelling recorded here is what the
//! compiler uses for natural aliases.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::QueryResult;
use crate::types::FieldType;

/// A concrete, column-backed field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMeta {
    pub name: String,
    pub column: String,
    pub field_type: FieldType,
    pub filterable: bool,
    pub sortable: bool,
    pub groupable: bool,
    pub aggregatable: bool,
}

impl FieldMeta {
    /// New field with every capability enabled that makes sense for its type.
    pub fn new(name: impl Into<String>, column: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            field_type,
            filterable: true,
            sortable: true,
            groupable: true,
            aggregatable: field_type.is_numeric(),
        }
    }

    pub fn not_filterable(mut self) -> Self {
        self.filterable = false;
        self
    }

    pub fn not_sortable(mut self) -> Self {
        self.sortable = false;
        self
    }

    pub fn not_groupable(mut self) -> Self {
        self.groupable = false;
        self
    }

    pub fn not_aggregatable(mut self) -> Self {
        self.aggregatable = false;
        self
    }
}

/// A child-to-parent pointer. `field` names the foreign-key field on the
/// owning object; more than one target makes the lookup polymorphic.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupMeta {
    pub name: String,
    pub field: String,
    pub targets: Vec<String>,
    /// Field holding the referenced object's API name (polymorphic lookups only)
    pub type_field: Option<String>,
}

impl LookupMeta {
    pub fn new(name: impl Into<String>, field: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            targets: vec![target.into()],
            type_field: None,
        }
    }

    pub fn polymorphic(
        name: impl Into<String>,
        field: impl Into<String>,
        type_field: impl Into<String>,
        targets: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            targets: targets.iter().map(|t| t.to_string()).collect(),
            type_field: Some(type_field.into()),
        }
    }

    pub fn is_polymorphic(&self) -> bool {
        self.targets.len() > 1
    }

    pub fn targets_object(&self, api_name: &str) -> bool {
        self.targets.iter().any(|t| t.eq_ignore_ascii_case(api_name))
    }
}

/// A parent-to-child link: rows of `child_object` whose `child_field`
/// equals this object's `parent_field`.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipMeta {
    pub name: String,
    pub child_object: String,
    pub child_field: String,
    pub parent_field: String,
}

impl RelationshipMeta {
    pub fn new(
        name: impl Into<String>,
        child_object: impl Into<String>,
        child_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            child_object: child_object.into(),
            child_field: child_field.into(),
            parent_field: "Id".to_string(),
        }
    }
}

/// Schema of one queryable object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    pub api_name: String,
    pub table_name: String,
    /// Logical name of the identity field used as the pagination tie-breaker
    pub id_field: String,
    fields: HashMap<String, FieldMeta>,
    lookups: HashMap<String, LookupMeta>,
    relationships: HashMap<String, RelationshipMeta>,
}

impl ObjectMeta {
    pub fn new(api_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            api_name: api_name.into(),
            table_name: table_name.into(),
            id_field: "Id".to_string(),
            fields: HashMap::new(),
            lookups: HashMap::new(),
            relationships: HashMap::new(),
        }
    }

    pub fn with_id_field(mut self, name: impl Into<String>) -> Self {
        self.id_field = name.into();
        self
    }

    pub fn with_field(mut self, field: FieldMeta) -> Self {
        self.fields.insert(field.name.to_lowercase(), field);
        self
    }

    pub fn with_lookup(mut self, lookup: LookupMeta) -> Self {
        self.lookups.insert(lookup.name.to_lowercase(), lookup);
        self
    }

    pub fn with_relationship(mut self, relationship: RelationshipMeta) -> Self {
        self.relationships
            .insert(relationship.name.to_lowercase(), relationship);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.get(&name.to_lowercase())
    }

    pub fn lookup(&self, name: &str) -> Option<&LookupMeta> {
        self.lookups.get(&name.to_lowercase())
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipMeta> {
        self.relationships.get(&name.to_lowercase())
    }

    /// The identity field, if the object declares one as a column.
    pub fn id(&self) -> Option<&FieldMeta> {
        self.field(&self.id_field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldMeta> {
        self.fields.values()
    }
}

/// Read-only source of object metadata.
pub trait MetadataProvider: Send + Sync {
    /// Look up an object by API name. `Ok(None)` means the object does not exist.
    fn get_object(&self, name: &str) -> QueryResult<Option<Arc<ObjectMeta>>>;

    fn list_objects(&self) -> QueryResult<Vec<String>>;
}

/// Metadata held in memory, built up front.
#[derive(Debug, Default, Clone)]
pub struct InMemoryMetadata {
    objects: HashMap<String, Arc<ObjectMeta>>,
}

impl InMemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, object: ObjectMeta) -> Self {
        self.insert(object);
        self
    }

    /// Add or replace an object definition.
    pub fn insert(&mut self, object: ObjectMeta) {
        self.objects
            .insert(object.api_name.to_lowercase(), Arc::new(object));
    }
}

impl MetadataProvider for InMemoryMetadata {
    fn get_object(&self, name: &str) -> QueryResult<Option<Arc<ObjectMeta>>> {
        Ok(self.objects.get(&name.to_lowercase()).cloned())
    }

    fn list_objects(&self) -> QueryResult<Vec<String>> {
        let mut names: Vec<String> = self
            .objects
            .values()
            .map(|o| o.api_name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> ObjectMeta {
        ObjectMeta::new("Account", "accounts")
            .with_field(FieldMeta::new("Id", "id", FieldType::Id))
            .with_field(FieldMeta::new("Name", "name", FieldType::String))
            .with_field(FieldMeta::new("OwnerId", "owner_id", FieldType::Id))
            .with_lookup(LookupMeta::new("Owner", "OwnerId", "User"))
            .with_relationship(RelationshipMeta::new("Contacts", "Contact", "AccountId"))
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let meta = account();
        assert_eq!(meta.field("NAME").map(|f| f.column.as_str()), Some("name"));
        assert_eq!(meta.lookup("owner").map(|l| l.field.as_str()), Some("OwnerId"));
        assert!(meta.relationship("contacts").is_some());
        assert!(meta.field("Missing").is_none());
        assert_eq!(meta.id().map(|f| f.column.as_str()), Some("id"));
    }

    #[test]
    fn test_default_capabilities() {
        let name = FieldMeta::new("Name", "name", FieldType::String);
        assert!(name.filterable && name.sortable && name.groupable);
        assert!(!name.aggregatable);

        let amount = FieldMeta::new("Amount", "amount", FieldType::Float).not_sortable();
        assert!(amount.aggregatable);
        assert!(!amount.sortable);
    }

    #[test]
    fn test_polymorphic_lookup() {
        let what = LookupMeta::polymorphic("What", "WhatId", "WhatType", &["Account", "Opportunity"]);
        assert!(what.is_polymorphic());
        assert!(what.targets_object("opportunity"));
        assert!(!what.targets_object("Case"));
        assert!(!LookupMeta::new("Owner", "OwnerId", "User").is_polymorphic());
    }

    #[test]
    fn test_in_memory_provider() {
        let provider = InMemoryMetadata::new()
            .with_object(account())
            .with_object(ObjectMeta::new("Contact", "contacts"));

        let found = provider.get_object("account").unwrap().unwrap();
        assert_eq!(found.table_name, "accounts");
        assert!(provider.get_object("Lead").unwrap().is_none());
        assert_eq!(provider.list_objects().unwrap(), vec!["Account", "Contact"]);
    }
}
