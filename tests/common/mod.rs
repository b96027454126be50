//! Common test utilities for query engine tests
//!
//! Provides shared helpers for:
//! - Building an in-memory metadata catalog
//! - Creating engines with a fixed cursor secret and clock
//! - Turning JSON literals into result rows

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::Value;
use soql_engine::soql::dates::CalendarDateResolver;
use soql_engine::{
    AccessController, AllowAll, FieldMeta, FieldType, InMemoryMetadata, LookupMeta, ObjectMeta,
    QueryConfig, QueryEngine, RelationshipMeta, Row, StaticSecret,
};

pub fn catalog() -> InMemoryMetadata {
    InMemoryMetadata::new()
        .with_object(
            ObjectMeta::new("Account", "accounts")
                .with_field(FieldMeta::new("Id", "id", FieldType::Id))
                .with_field(FieldMeta::new("Name", "name", FieldType::String))
                .with_field(FieldMeta::new("Industry", "industry", FieldType::String))
                .with_field(FieldMeta::new("AnnualRevenue", "annual_revenue", FieldType::Float))
                .with_field(FieldMeta::new("CreatedDate", "created_date", FieldType::DateTime))
                .with_field(FieldMeta::new("OwnerId", "owner_id", FieldType::Id))
                .with_lookup(LookupMeta::new("Owner", "OwnerId", "User"))
                .with_relationship(RelationshipMeta::new("Contacts", "Contact", "AccountId"))
                .with_relationship(RelationshipMeta::new("Cases", "Case", "AccountId")),
        )
        .with_object(
            ObjectMeta::new("Contact", "contacts")
                .with_field(FieldMeta::new("Id", "id", FieldType::Id))
                .with_field(FieldMeta::new("FirstName", "first_name", FieldType::String))
                .with_field(FieldMeta::new("LastName", "last_name", FieldType::String))
                .with_field(FieldMeta::new("Name", "full_name", FieldType::String))
                .with_field(FieldMeta::new("AccountId", "account_id", FieldType::Id))
                .with_lookup(LookupMeta::new("Account", "AccountId", "Account")),
        )
        .with_object(
            ObjectMeta::new("User", "users")
                .with_field(FieldMeta::new("Id", "id", FieldType::Id))
                .with_field(FieldMeta::new("Name", "name", FieldType::String)),
        )
        .with_object(
            ObjectMeta::new("Opportunity", "opportunities")
                .with_field(FieldMeta::new("Id", "id", FieldType::Id))
                .with_field(FieldMeta::new("Name", "name", FieldType::String))
                .with_field(FieldMeta::new("Amount", "amount", FieldType::Float))
                .with_field(FieldMeta::new("AccountId", "account_id", FieldType::Id))
                .with_lookup(LookupMeta::new("Account", "AccountId", "Account")),
        )
        .with_object(
            ObjectMeta::new("Case", "cases")
                .with_field(FieldMeta::new("Id", "id", FieldType::Id))
                .with_field(FieldMeta::new("Subject", "subject", FieldType::String))
                .with_field(FieldMeta::new("Status", "status", FieldType::String))
                .with_field(FieldMeta::new("Priority", "priority", FieldType::Integer))
                .with_field(FieldMeta::new("AccountId", "account_id", FieldType::Id))
                .with_lookup(LookupMeta::new("Account", "AccountId", "Account")),
        )
        .with_object(
            ObjectMeta::new("Task", "tasks")
                .with_field(FieldMeta::new("Id", "id", FieldType::Id))
                .with_field(FieldMeta::new("Subject", "subject", FieldType::String))
                .with_field(FieldMeta::new("WhatId", "what_id", FieldType::Id))
                .with_field(FieldMeta::new("WhatType", "what_type", FieldType::String))
                .with_lookup(LookupMeta::polymorphic(
                    "What",
                    "WhatId",
                    "WhatType",
                    &["Account", "Opportunity", "Case"],
                )),
        )
}

pub fn create_engine_with(access: Arc<dyn AccessController>, config: &QueryConfig) -> QueryEngine {
    let now = Utc
        .with_ymd_and_hms(2024, 3, 15, 12, 0, 0)
        .single()
        .expect("valid fixed clock");
    QueryEngine::new(Arc::new(catalog()), access, config)
        .with_date_resolver(Arc::new(CalendarDateResolver::fixed(now)))
        .with_cursor_secret(Arc::new(StaticSecret::new("test-secret")))
}

pub fn create_engine() -> QueryEngine {
    create_engine_with(Arc::new(AllowAll), &QueryConfig::default())
}

pub fn row(value: Value) -> Row {
    value.as_object().cloned().expect("row literal must be an object")
}
