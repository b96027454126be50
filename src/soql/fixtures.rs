//! Shared metadata catalog for unit tests.

use crate::metadata::{FieldMeta, InMemoryMetadata, LookupMeta, ObjectMeta, RelationshipMeta};
use crate::types::FieldType;

pub(crate) fn catalog() -> InMemoryMetadata {
    InMemoryMetadata::new()
        .with_object(
            ObjectMeta::new("Account", "accounts")
                .with_field(FieldMeta::new("Id", "id", FieldType::Id))
                .with_field(FieldMeta::new("Name", "name", FieldType::String))
                .with_field(FieldMeta::new("Industry", "industry", FieldType::String))
                .with_field(FieldMeta::new("Phone", "phone", FieldType::String))
                .with_field(FieldMeta::new("AnnualRevenue", "annual_revenue", FieldType::Float))
                .with_field(FieldMeta::new("NumberOfEmployees", "employees", FieldType::Integer))
                .with_field(FieldMeta::new("IsActive", "is_active", FieldType::Boolean))
                .with_field(FieldMeta::new("CreatedDate", "created_date", FieldType::DateTime))
                .with_field(FieldMeta::new("OwnerId", "owner_id", FieldType::Id))
                .with_field(
                    FieldMeta::new("Description", "description", FieldType::String)
                        .not_filterable()
                        .not_sortable()
                        .not_groupable(),
                )
                .with_lookup(LookupMeta::new("Owner", "OwnerId", "User"))
                .with_relationship(RelationshipMeta::new("Contacts", "Contact", "AccountId"))
                .with_relationship(RelationshipMeta::new("Opportunities", "Opportunity", "AccountId")),
        )
        .with_object(
            ObjectMeta::new("Contact", "contacts")
                .with_field(FieldMeta::new("Id", "id", FieldType::Id))
                .with_field(FieldMeta::new("FirstName", "first_name", FieldType::String))
                .with_field(FieldMeta::new("LastName", "last_name", FieldType::String))
                .with_field(FieldMeta::new("Email", "email", FieldType::String))
                .with_field(FieldMeta::new("AccountId", "account_id", FieldType::Id))
                .with_field(FieldMeta::new("CreatedDate", "created_date", FieldType::DateTime))
                .with_lookup(LookupMeta::new("Account", "AccountId", "Account")),
        )
        .with_object(
            ObjectMeta::new("User", "users")
                .with_field(FieldMeta::new("Id", "id", FieldType::Id))
                .with_field(FieldMeta::new("Name", "name", FieldType::String))
                .with_field(FieldMeta::new("Email", "email", FieldType::String))
                .with_field(FieldMeta::new("ManagerId", "manager_id", FieldType::Id))
                .with_lookup(LookupMeta::new("Manager", "ManagerId", "User")),
        )
        .with_object(
            ObjectMeta::new("Opportunity", "opportunities")
                .with_field(FieldMeta::new("Id", "id", FieldType::Id))
                .with_field(FieldMeta::new("Name", "name", FieldType::String))
                .with_field(FieldMeta::new("Amount", "amount", FieldType::Float))
                .with_field(FieldMeta::new("StageName", "stage_name", FieldType::String))
                .with_field(FieldMeta::new("CloseDate", "close_date", FieldType::Date))
                .with_field(FieldMeta::new("AccountId", "account_id", FieldType::Id))
                .with_lookup(LookupMeta::new("Account", "AccountId", "Account")),
        )
        .with_object(
            ObjectMeta::new("Task", "tasks")
                .with_field(FieldMeta::new("Id", "id", FieldType::Id))
                .with_field(FieldMeta::new("Subject", "subject", FieldType::String))
                .with_field(FieldMeta::new("WhatId", "what_id", FieldType::Id))
                .with_field(FieldMeta::new("WhatType", "what_type", FieldType::String))
                .with_field(FieldMeta::new("OwnerId", "owner_id", FieldType::Id))
                .with_lookup(LookupMeta::polymorphic(
                    "What",
                    "WhatId",
                    "WhatType",
                    &["Account", "Opportunity"],
                ))
                .with_lookup(LookupMeta::new("Owner", "OwnerId", "User")),
        )
}
