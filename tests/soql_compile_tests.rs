//! Query compilation tests
//!
//! Tests for:
//! - End-to-end compilation through the engine
//! - Join planning and natural aliases
//! - Relationship subqueries and TYPEOF shapes
//! - Error kinds and source positions

mod common;

use common::create_engine;
use soql_engine::error::{ParseError, ValidationCode};
use soql_engine::{FieldType, ParamValue, QueryError};

#[test]
fn test_select_adds_hidden_identity_column() {
    let engine = create_engine();
    let compiled = engine.prepare(&engine.context("u1"), "SELECT Name FROM Account").unwrap();

    assert!(compiled.sql.contains("FROM \"accounts\" AS t0"));
    assert!(compiled.shape.field("Name").is_some());
    let id = compiled.shape.field("Id").expect("hidden identity column");
    assert!(id.hidden);
    assert_eq!(compiled.shape.visible().count(), 1);

    let info = compiled.pagination.as_ref().unwrap();
    assert_eq!(info.tie_breakers, vec!["Id"]);
    assert_eq!(info.page_size, 200);
}

#[test]
fn test_two_level_lookup_joins() {
    let engine = create_engine();
    let compiled = engine
        .prepare(&engine.context("u1"), "SELECT Name, Account.Owner.Name FROM Contact")
        .unwrap();

    assert_eq!(compiled.sql.matches("LEFT JOIN").count(), 2);
    assert!(compiled
        .sql
        .contains("LEFT JOIN \"accounts\" AS t1 ON t1.\"id\" = t0.\"account_id\""));
    assert!(compiled
        .sql
        .contains("LEFT JOIN \"users\" AS t2 ON t2.\"id\" = t1.\"owner_id\""));
    assert!(compiled.sql.contains("t2.\"name\" AS \"Account_Owner_Name\""));

    let names: Vec<&str> = compiled.shape.visible().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["Name", "Account.Owner.Name"]);
}

#[test]
fn test_join_reuse_across_clauses() {
    let engine = create_engine();
    let compiled = engine
        .prepare(
            &engine.context("u1"),
            "SELECT Account.Name, Account.Industry FROM Contact \
             WHERE Account.Industry = 'Tech' ORDER BY Account.Name",
        )
        .unwrap();
    assert_eq!(compiled.sql.matches("LEFT JOIN").count(), 1);
    assert!(!compiled.sql.contains("t2"));
}

#[test]
fn test_relationship_subquery_shape() {
    let engine = create_engine();
    let compiled = engine
        .prepare(
            &engine.context("u1"),
            "SELECT Name, (SELECT FirstName FROM Contacts LIMIT 5) FROM Account",
        )
        .unwrap();

    assert!(compiled.sql.contains("json_agg(json_build_object('FirstName', r.\"FirstName\"))"));
    assert!(compiled.sql.contains("LIMIT 5) AS r) AS \"Contacts\""));
    assert!(compiled.sql.contains("ORDER BY sq0_t0.\"first_name\" ASC LIMIT 5"));

    let nested: Vec<_> = compiled
        .shape
        .visible()
        .filter(|f| f.nested.is_some())
        .collect();
    assert_eq!(nested.len(), 1);
    assert_eq!(nested[0].name, "Contacts");
    assert!(nested[0].ty.array);
    assert_eq!(nested[0].ty.base, FieldType::Object);

    let serialized = serde_json::to_value(&compiled.shape).unwrap();
    assert_eq!(serialized["fields"][1]["type"], "object");
    assert_eq!(serialized["fields"][1]["array"], true);
}

#[test]
fn test_date_macro_is_deferred() {
    let engine = create_engine();
    let ctx = engine.context("u1");
    let text = "SELECT Name FROM Account WHERE CreatedDate = LAST_N_DAYS:30";

    let compiled = engine.prepare(&ctx, text).unwrap();
    assert_eq!(compiled.date_params.len(), 1);
    let slot = &compiled.date_params[0];
    assert_eq!(compiled.params[slot.index], ParamValue::Null);
    assert!(compiled.sql.contains("t0.\"created_date\" = $1"));
    assert!(!compiled.sql.contains("2024"));

    let resolved = engine.prepare_and_resolve(&ctx, text).unwrap();
    match &resolved.params[slot.index] {
        ParamValue::Timestamp(ts) => assert_eq!(ts.to_rfc3339(), "2024-02-14T00:00:00+00:00"),
        other => panic!("expected timestamp, got {:?}", other),
    }
}

#[test]
fn test_typeof_with_else_branch() {
    let engine = create_engine();
    let compiled = engine
        .prepare(
            &engine.context("u1"),
            "SELECT Subject, TYPEOF What WHEN Account THEN Industry ELSE Id END FROM Task",
        )
        .unwrap();

    assert!(compiled.sql.contains("WHEN t0.\"what_type\" = 'Account' THEN json_build_object('Industry'"));
    assert!(compiled.sql.contains("WHEN t0.\"what_type\" = 'Opportunity' THEN json_build_object('Id'"));
    assert!(compiled.sql.contains("WHEN t0.\"what_type\" = 'Case' THEN json_build_object('Id'"));
    assert_eq!(compiled.sql.matches("LEFT JOIN").count(), 3);
    assert_eq!(
        compiled.dependencies.iter().collect::<Vec<_>>(),
        vec!["Account", "Case", "Opportunity", "Task"]
    );
}

#[test]
fn test_hostile_literals_are_parameters() {
    let engine = create_engine();
    let ctx = engine.context("u1");

    for hostile in ["'; DROP TABLE accounts; --", "x' OR '1'='1", "Robert'); DROP TABLE accounts;--"] {
        let escaped = hostile.replace('\'', "\\'");
        let text = format!("SELECT Id FROM Account WHERE Name = '{}'", escaped);
        let compiled = engine.prepare(&ctx, &text).unwrap();

        assert!(!compiled.sql.contains("DROP"), "{}", compiled.sql);
        assert!(!compiled.sql.contains(';'), "{}", compiled.sql);
        assert_eq!(compiled.params.len(), 1);
        assert!(matches!(&compiled.params[0], ParamValue::Text(_)));
    }
}

#[test]
fn test_unknown_field_position() {
    let engine = create_engine();
    let err = engine
        .prepare(&engine.context("u1"), "SELECT Name,\n  Bogus FROM Account")
        .unwrap_err();

    match err {
        QueryError::Validation(e) => {
            assert_eq!(e.code, ValidationCode::UnknownField);
            let pos = e.position.expect("position");
            assert_eq!((pos.line, pos.column), (2, 3));
        }
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[test]
fn test_parse_error_position() {
    let engine = create_engine();
    let err = engine
        .prepare(&engine.context("u1"), "SELECT Name FROM")
        .unwrap_err();

    match err {
        QueryError::Parse(ParseError { line, column, .. }) => {
            assert_eq!(line, 1);
            assert_eq!(column, 17);
        }
        other => panic!("expected parse error, got {:?}", other),
    }
}

#[test]
fn test_error_kinds_are_distinct() {
    let engine = create_engine();
    let ctx = engine.context("u1");

    let limit = engine
        .prepare(&ctx, "SELECT Id FROM Account LIMIT 100000")
        .unwrap_err();
    assert_eq!(limit.kind(), "limit");

    let validation = engine
        .prepare(&ctx, "SELECT Id FROM Account WHERE Name = 5")
        .unwrap_err();
    assert_eq!(validation.kind(), "validation");

    let parse = engine.prepare(&ctx, "SELEC Id FROM Account").unwrap_err();
    assert_eq!(parse.kind(), "parse");
}

#[test]
fn test_deeply_nested_filter_is_rejected() {
    let engine = create_engine();
    let text = format!(
        "SELECT Id FROM Account WHERE {}Id = '1'{}",
        "(".repeat(3000),
        ")".repeat(3000)
    );
    assert!(text.len() < engine.limits().max_query_length);

    let err = engine.prepare(&engine.context("u1"), &text).unwrap_err();
    assert_eq!(err.kind(), "limit");
    assert!(err.to_string().contains("expression depth"));
}
