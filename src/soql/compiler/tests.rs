//! Unit tests for SQL generation.

use chrono::TimeZone;

use super::*;
use crate::access::AllowAll;
use crate::config::Limits;
use crate::soql::dates::{CalendarDateResolver, DynamicDate};
use crate::soql::fixtures::catalog;
use crate::soql::parser::parse;
use crate::soql::validator::Validator;

fn compile_with(text: &str, limits: &Limits) -> CompiledQuery {
    let metadata = catalog();
    let ctx = QueryContext::new("u1");
    let query = parse(text).unwrap();
    let validated = Validator::new(&metadata, &AllowAll, &ctx, limits)
        .validate(query)
        .unwrap();
    compile(&validated).unwrap()
}

fn compile_query(text: &str) -> CompiledQuery {
    compile_with(text, &Limits::default())
}

fn text(s: &str) -> ParamValue {
    ParamValue::Text(s.to_string())
}

#[test]
fn test_simple_select() {
    let compiled = compile_query("SELECT Name, Id FROM Account");
    assert_eq!(
        compiled.sql,
        "SELECT t0.\"name\" AS \"Name\", t0.\"id\" AS \"Id\" FROM \"accounts\" AS t0 \
         ORDER BY t0.\"id\" ASC LIMIT 201"
    );
    assert!(compiled.params.is_empty());
    assert_eq!(
        compiled.dependencies.iter().collect::<Vec<_>>(),
        vec!["Account"]
    );

    let names: Vec<&str> = compiled.shape.visible().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["Name", "Id"]);
}

#[test]
fn test_lookup_joined_once() {
    let compiled = compile_query(
        "SELECT Account.Name, Account.Industry FROM Contact \
         WHERE Account.Name != NULL ORDER BY Account.Name",
    );
    assert_eq!(
        compiled.sql,
        "SELECT t1.\"name\" AS \"Account_Name\", t1.\"industry\" AS \"Account_Industry\", \
         t0.\"id\" AS \"Id\" \
         FROM \"contacts\" AS t0 LEFT JOIN \"accounts\" AS t1 ON t1.\"id\" = t0.\"account_id\" \
         WHERE t1.\"name\" IS NOT NULL \
         ORDER BY t1.\"name\" ASC, t0.\"id\" ASC LIMIT 201"
    );
    assert_eq!(compiled.sql.matches("LEFT JOIN").count(), 1);
    assert_eq!(
        compiled.dependencies.iter().collect::<Vec<_>>(),
        vec!["Account", "Contact"]
    );

    // The hidden tie-breaker never reaches callers
    let id = compiled.shape.field("Id").unwrap();
    assert!(id.hidden);
    assert_eq!(compiled.shape.visible().count(), 2);
    assert_eq!(compiled.shape.field("Account.Name").unwrap().column, "Account_Name");
}

#[test]
fn test_chained_lookups() {
    let compiled = compile_query("SELECT Id, Account.Owner.Name FROM Contact");
    assert_eq!(
        compiled.sql,
        "SELECT t0.\"id\" AS \"Id\", t2.\"name\" AS \"Account_Owner_Name\" \
         FROM \"contacts\" AS t0 \
         LEFT JOIN \"accounts\" AS t1 ON t1.\"id\" = t0.\"account_id\" \
         LEFT JOIN \"users\" AS t2 ON t2.\"id\" = t1.\"owner_id\" \
         ORDER BY t0.\"id\" ASC LIMIT 201"
    );
}

#[test]
fn test_string_literals_are_bound() {
    let compiled = compile_query("SELECT Id FROM Account WHERE Name = 'x\\' OR 1=1 --'");
    assert!(compiled.sql.contains("WHERE t0.\"name\" = $1 "));
    assert!(!compiled.sql.contains("OR 1=1"));
    assert_eq!(compiled.params, vec![text("x' OR 1=1 --")]);
}

#[test]
fn test_parameters_numbered_in_emission_order() {
    let compiled = compile_query(
        "SELECT Id FROM Account WHERE Name = 'a' OR Name = 'b' AND NumberOfEmployees > 10",
    );
    assert!(compiled.sql.contains(
        "WHERE t0.\"name\" = $1 OR (t0.\"name\" = $2 AND t0.\"employees\" > $3)"
    ));
    assert_eq!(compiled.params, vec![text("a"), text("b"), ParamValue::Int(10)]);
}

#[test]
fn test_null_and_boolean_literals() {
    let compiled = compile_query(
        "SELECT Id FROM Account WHERE Phone = NULL AND IsActive = TRUE AND Industry NOT IN ('a', 'b')",
    );
    assert!(compiled.sql.contains(
        "WHERE t0.\"phone\" IS NULL AND t0.\"is_active\" = TRUE AND t0.\"industry\" NOT IN ($1, $2)"
    ));
    assert_eq!(compiled.params, vec![text("a"), text("b")]);
}

#[test]
fn test_not_keeps_grouping() {
    let compiled = compile_query("SELECT Id FROM Account WHERE NOT (IsActive = TRUE OR Name LIKE 'A%')");
    assert!(compiled
        .sql
        .contains("WHERE NOT (t0.\"is_active\" = TRUE OR t0.\"name\" LIKE $1)"));
}

#[test]
fn test_date_macros_bind_late() {
    let mut compiled = compile_query(
        "SELECT Id FROM Account WHERE CreatedDate > LAST_N_DAYS:30 AND Name = 'a'",
    );
    assert!(compiled
        .sql
        .contains("WHERE t0.\"created_date\" > $1 AND t0.\"name\" = $2"));
    assert_eq!(compiled.params, vec![ParamValue::Null, text("a")]);
    assert_eq!(compiled.date_params.len(), 1);
    assert_eq!(compiled.date_params[0].index, 0);
    assert_eq!(
        compiled.date_params[0].date_macro,
        DateMacro::Dynamic(DynamicDate::LastNDays, 30)
    );

    let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
    compiled
        .resolve_dates(&CalendarDateResolver::fixed(now), &QueryContext::new("u1"))
        .unwrap();
    assert_eq!(
        compiled.params[0],
        ParamValue::Timestamp(Utc.with_ymd_and_hms(2024, 2, 14, 0, 0, 0).unwrap())
    );
    assert_eq!(compiled.params[1], text("a"));
}

#[test]
fn test_date_literals() {
    let compiled = compile_query("SELECT Id FROM Opportunity WHERE CloseDate >= 2024-01-31");
    assert_eq!(
        compiled.params,
        vec![ParamValue::Date(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap())]
    );
    assert!(compiled.date_params.is_empty());
}

#[test]
fn test_relationship_subquery() {
    let compiled = compile_query(
        "SELECT Name, (SELECT LastName FROM Contacts ORDER BY LastName LIMIT 5) FROM Account",
    );
    assert_eq!(
        compiled.sql,
        "SELECT t0.\"name\" AS \"Name\", \
         (SELECT COALESCE(json_agg(json_build_object('LastName', r.\"LastName\")), '[]'::json) \
         FROM (SELECT sq0_t0.\"last_name\" AS \"LastName\" FROM \"contacts\" AS sq0_t0 \
         WHERE sq0_t0.\"account_id\" = t0.\"id\" ORDER BY sq0_t0.\"last_name\" ASC LIMIT 5) AS r) \
         AS \"Contacts\", t0.\"id\" AS \"Id\" \
         FROM \"accounts\" AS t0 ORDER BY t0.\"id\" ASC LIMIT 201"
    );
    assert!(compiled.dependencies.contains("Contact"));

    let contacts = compiled.shape.field("Contacts").unwrap();
    assert!(contacts.ty.array);
    assert_eq!(contacts.ty.base, FieldType::Object);
    let nested = contacts.nested.as_ref().unwrap();
    assert_eq!(nested.object, "Contact");
    assert_eq!(nested.fields[0].name, "LastName");
}

#[test]
fn test_relationship_subquery_params_and_default_order() {
    let compiled = compile_query(
        "SELECT (SELECT Email FROM Contacts WHERE LastName = 'x') FROM Account WHERE Name = 'y'",
    );
    assert!(compiled.sql.contains(
        "WHERE sq0_t0.\"account_id\" = t0.\"id\" AND (sq0_t0.\"last_name\" = $1) \
         ORDER BY sq0_t0.\"email\" ASC) AS r)"
    ));
    assert!(compiled.sql.contains("WHERE t0.\"name\" = $2"));
    assert_eq!(compiled.params, vec![text("x"), text("y")]);
}

#[test]
fn test_where_subquery() {
    let compiled = compile_query(
        "SELECT Name FROM Account WHERE Id IN (SELECT AccountId FROM Contact WHERE LastName = 'x')",
    );
    assert!(compiled.sql.contains(
        "WHERE t0.\"id\" IN (SELECT w0_t0.\"account_id\" FROM \"contacts\" AS w0_t0 \
         WHERE w0_t0.\"last_name\" = $1)"
    ));
    assert_eq!(compiled.params, vec![text("x")]);
    assert!(compiled.dependencies.contains("Contact"));
}

#[test]
fn test_typeof_projection() {
    let compiled = compile_query(
        "SELECT Subject, TYPEOF What WHEN Account THEN Name, Phone WHEN Opportunity THEN Amount END FROM Task",
    );
    assert!(compiled.sql.contains(
        "CASE WHEN t0.\"what_type\" = 'Account' THEN json_build_object('Name', t1.\"name\", 'Phone', t1.\"phone\") \
         WHEN t0.\"what_type\" = 'Opportunity' THEN json_build_object('Amount', t2.\"amount\") \
         ELSE NULL END AS \"What\""
    ));
    assert!(compiled.sql.contains(
        "LEFT JOIN \"accounts\" AS t1 ON t1.\"id\" = t0.\"what_id\" AND t0.\"what_type\" = 'Account'"
    ));
    assert!(compiled.sql.contains(
        "LEFT JOIN \"opportunities\" AS t2 ON t2.\"id\" = t0.\"what_id\" AND t0.\"what_type\" = 'Opportunity'"
    ));

    let what = compiled.shape.field("What").unwrap();
    assert!(!what.ty.array);
    let names: Vec<&str> = what
        .nested
        .as_ref()
        .unwrap()
        .fields
        .iter()
        .map(|f| f.name.as_str())
        .collect();
    assert_eq!(names, vec!["Name", "Phone", "Amount"]);
}

#[test]
fn test_aggregates() {
    let compiled = compile_query("SELECT COUNT(), COUNT_DISTINCT(Industry) FROM Account");
    assert_eq!(
        compiled.sql,
        "SELECT COUNT(*) AS \"COUNT\", COUNT(DISTINCT t0.\"industry\") AS \"COUNT_DISTINCT_Industry\" \
         FROM \"accounts\" AS t0"
    );
    assert!(compiled.pagination.is_none());
}

#[test]
fn test_grouped_query_breaks_ties_on_group_keys() {
    let compiled = compile_query("SELECT Industry, COUNT(Id) FROM Account GROUP BY Industry HAVING COUNT(Id) > 1");
    assert_eq!(
        compiled.sql,
        "SELECT t0.\"industry\" AS \"Industry\", COUNT(t0.\"id\") AS \"COUNT_Id\" \
         FROM \"accounts\" AS t0 GROUP BY t0.\"industry\" HAVING COUNT(t0.\"id\") > $1 \
         ORDER BY t0.\"industry\" ASC LIMIT 201"
    );
    let info = compiled.pagination.unwrap();
    assert_eq!(info.tie_breakers, vec!["Industry"]);
    assert_eq!(info.descriptors(), vec!["industry:asc:nulls_last"]);
}

#[test]
fn test_aggregate_ordering_is_not_paginated() {
    let compiled = compile_query(
        "SELECT Industry, COUNT(Id) cnt FROM Account GROUP BY Industry ORDER BY COUNT(Id) DESC LIMIT 10",
    );
    assert!(compiled.pagination.is_none());
    assert!(compiled.sql.ends_with("ORDER BY COUNT(t0.\"id\") DESC LIMIT 10"));
    assert!(compiled.sql.contains("COUNT(t0.\"id\") AS \"cnt\""));
}

#[test]
fn test_pagination_plan() {
    let compiled = compile_query(
        "SELECT Name FROM Account WHERE Industry = 'Tech' ORDER BY CreatedDate DESC LIMIT 5 OFFSET 4",
    );
    assert_eq!(
        compiled.sql,
        "SELECT t0.\"name\" AS \"Name\", t0.\"created_date\" AS \"CreatedDate\", t0.\"id\" AS \"Id\" \
         FROM \"accounts\" AS t0 WHERE t0.\"industry\" = $1 \
         ORDER BY t0.\"created_date\" DESC, t0.\"id\" DESC LIMIT 6 OFFSET 4"
    );

    let info = compiled.pagination.as_ref().unwrap();
    assert_eq!(info.page_size, 5);
    assert_eq!(info.row_limit, Some(5));
    assert_eq!(info.tie_breakers, vec!["Id"]);
    assert_eq!(
        info.descriptors(),
        vec!["createddate:desc:nulls_first", "id:desc:nulls_first"]
    );
    assert!(compiled.shape.field("CreatedDate").unwrap().hidden);
    assert_eq!(compiled.shape.visible().count(), 1);

    let state = CursorState {
        values: vec![
            ParamValue::Timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            text("001"),
        ],
        returned: 2,
    };
    let next = compiled.resume(&state).unwrap();
    assert_eq!(
        next.sql,
        "SELECT t0.\"name\" AS \"Name\", t0.\"created_date\" AS \"CreatedDate\", t0.\"id\" AS \"Id\" \
         FROM \"accounts\" AS t0 WHERE (t0.\"industry\" = $1) AND (t0.\"created_date\", t0.\"id\") < ($2, $3) \
         ORDER BY t0.\"created_date\" DESC, t0.\"id\" DESC LIMIT 3"
    );
    assert_eq!(next.returned, 2);
    assert_eq!(next.params.len(), 3);
    assert_eq!(next.params[0], text("Tech"));
}

#[test]
fn test_explicit_id_order_needs_no_tie_breaker() {
    let compiled = compile_query("SELECT Id, Name FROM Account ORDER BY Id DESC");
    let info = compiled.pagination.unwrap();
    assert!(info.tie_breakers.is_empty());
    assert_eq!(info.sort_keys.len(), 1);
    assert!(compiled.sql.ends_with("ORDER BY t0.\"id\" DESC LIMIT 201"));
}

#[test]
fn test_page_size_bounds() {
    let limits = Limits {
        max_page_size: 50,
        default_page_size: 20,
        ..Limits::default()
    };
    let compiled = compile_with("SELECT Id FROM Account LIMIT 1000", &limits);
    assert_eq!(compiled.pagination.as_ref().unwrap().page_size, 50);
    assert!(compiled.sql.ends_with("LIMIT 51"));
    assert_eq!(compiled.pagination.as_ref().unwrap().row_limit, Some(1000));

    let compiled = compile_with("SELECT Id FROM Account", &limits);
    assert_eq!(compiled.pagination.as_ref().unwrap().page_size, 20);

    let compiled = compile_query("SELECT Id FROM Account LIMIT 0");
    assert!(compiled.pagination.is_none());
    assert_eq!(compiled.sql, "SELECT t0.\"id\" AS \"Id\" FROM \"accounts\" AS t0 LIMIT 0");
}

#[test]
fn test_for_update_locks_root_only() {
    let compiled = compile_query("SELECT Id, Owner.Name FROM Account LIMIT 10 FOR UPDATE");
    assert!(compiled.for_update);
    assert!(compiled.sql.ends_with("LIMIT 10 FOR UPDATE OF t0"));
}

#[test]
fn test_security_enforced_flag() {
    let compiled = compile_query("SELECT Id FROM Account WITH SECURITY_ENFORCED");
    assert!(compiled.security_enforced);
    assert!(!compiled.sql.contains("SECURITY"));
}

#[test]
fn test_duplicate_aliases_are_suffixed() {
    let compiled = compile_query("SELECT Name, Name FROM Account");
    assert!(compiled
        .sql
        .starts_with("SELECT t0.\"name\" AS \"Name\", t0.\"name\" AS \"Name_2\""));
}

#[test]
fn test_resume_requires_pagination() {
    let compiled = compile_query("SELECT COUNT() FROM Account");
    let err = compiled.resume(&CursorState { values: vec![], returned: 0 }).unwrap_err();
    assert!(matches!(err, QueryError::Cursor(CursorError::NotPaginated)));
}

#[test]
fn test_caller_page_size() {
    let limits = Limits::default();
    let compiled = compile_query("SELECT Name FROM Account")
        .with_page_size(25, &limits)
        .unwrap();
    assert_eq!(compiled.pagination.as_ref().unwrap().page_size, 25);
    assert!(compiled.sql.ends_with("ORDER BY t0.\"id\" ASC LIMIT 26"));

    let err = compile_query("SELECT Name FROM Account")
        .with_page_size(limits.max_page_size + 1, &limits)
        .unwrap_err();
    assert!(matches!(err, QueryError::Limit(LimitError { kind: LimitKind::PageSize, .. })));
    assert!(compile_query("SELECT Name FROM Account").with_page_size(0, &limits).is_err());
}

#[test]
fn test_query_limit_caps_every_page() {
    let compiled = compile_query("SELECT Name FROM Account LIMIT 2");
    assert!(compiled.sql.ends_with("ORDER BY t0.\"id\" ASC LIMIT 2"));

    let compiled = compile_query("SELECT Name FROM Account LIMIT 7")
        .with_page_size(3, &Limits::default())
        .unwrap();
    assert!(compiled.sql.ends_with("LIMIT 4"));

    let next = compiled
        .resume(&CursorState { values: vec![text("003")], returned: 3 })
        .unwrap();
    assert!(next.sql.ends_with("ORDER BY t0.\"id\" ASC LIMIT 4"));

    let last = compiled
        .resume(&CursorState { values: vec![text("006")], returned: 6 })
        .unwrap();
    assert!(last.sql.ends_with("ORDER BY t0.\"id\" ASC LIMIT 1"));
    assert_eq!(last.returned, 6);
}
