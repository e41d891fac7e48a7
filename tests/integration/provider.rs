#![allow(missing_docs)]

#[path = "../support/mod.rs"]
mod support;

use hiveq::connection::{MemoryConnection, MemoryResult};
use hiveq::query::builder::{col, param};
use hiveq::query::ops::QueryOp;
use hiveq::query::{
    CancelToken, Entity, EntityProvider, FromRecord, Record, TransformScript, Value,
};
use hiveq::types::{HiveError, Result};
use support::{film_data, film_mapping, init_tracing};

fn provider() -> (MemoryConnection, EntityProvider) {
    init_tracing();
    let connection = MemoryConnection::new();
    let provider = EntityProvider::new(Box::new(connection.clone()), film_mapping());
    (connection, provider)
}

/// Scripts the rows the engine would return for `op` over the sample data.
fn script(connection: &MemoryConnection, provider: &EntityProvider, op: &QueryOp) {
    let translation = provider.translate(op).expect("translate");
    let projection = translation.projection().expect("projection");
    connection.push_result(film_data().result(projection));
}

#[derive(Debug, PartialEq)]
struct Title {
    name: String,
    year: i64,
}

impl Entity for Title {
    const ENTITY: &'static str = "Title";
}

impl FromRecord for Title {
    fn from_record(record: Record) -> Result<Self> {
        let name = match record.require("Name")? {
            Value::String(name) => name.clone(),
            _ => return Err(HiveError::Invalid("Name must be text")),
        };
        let year = match record.require("Year")? {
            Value::Int(year) => *year,
            _ => return Err(HiveError::Invalid("Year must be an integer")),
        };
        Ok(Title { name, year })
    }
}

#[test]
fn fetch_materializes_typed_records() {
    let (connection, provider) = provider();
    let op = provider
        .entities::<Title>("t")
        .filter(col("t.Year").lt(1990))
        .order_by(col("t.Year"))
        .build()
        .expect("build");
    script(&connection, &provider, &op);

    let records: Vec<Record> = provider.fetch(&op).expect("fetch");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].get("Name"), Some(&Value::from("Alien")));
    assert_eq!(records[0].get("Year"), Some(&Value::Int(1979)));
    assert_eq!(records[1].get("Rating"), Some(&Value::Float(7.9)));
    assert_eq!(connection.statements().len(), 1);
    assert_eq!(connection.opens(), 1);
    assert_eq!(connection.closes(), 1);
    assert_eq!(provider.active_leases(), 0);
}

#[test]
fn entity_types_are_built_from_records() {
    let (connection, provider) = provider();
    let op = provider
        .entities::<Title>("t")
        .filter(col("t.Year").ge(1995))
        .order_by_desc(col("t.Year"))
        .take(2)
        .build()
        .expect("build");
    script(&connection, &provider, &op);

    let titles: Vec<Title> = provider.fetch(&op).expect("fetch");
    assert_eq!(
        titles,
        vec![
            Title {
                name: "Arrival".into(),
                year: 2016
            },
            Title {
                name: "Memento".into(),
                year: 2000
            },
        ]
    );
}

#[test]
fn scalar_count_returns_one_value() {
    let (connection, provider) = provider();
    let op = provider
        .entities::<Title>("t")
        .filter(col("t.StudioId").eq(1))
        .count()
        .build()
        .expect("build");
    script(&connection, &provider, &op);

    let count = provider.scalar::<Value>(&op).expect("scalar");
    assert_eq!(count, Some(Value::Int(2)));
}

#[test]
fn single_rejects_more_than_one_row() {
    let (connection, provider) = provider();
    let op = provider
        .entities::<Title>("t")
        .filter(col("t.StudioId").eq(2))
        .single()
        .build()
        .expect("build");
    script(&connection, &provider, &op);

    let err = provider.scalar::<Record>(&op).unwrap_err();
    assert_eq!(err.code(), "Invalid");
}

#[test]
fn parameters_travel_with_the_command() {
    let (connection, provider) = provider();
    let op = provider
        .entities::<Title>("t")
        .filter(col("t.Year").gt(param("since", 1990)))
        .build()
        .expect("build");
    script(&connection, &provider, &op);

    let titles: Vec<Title> = provider.fetch(&op).expect("fetch");
    assert_eq!(titles.len(), 4);
    let bindings = connection.bindings();
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0][0].name, "since");
    assert_eq!(bindings[0][0].value, Value::Int(1990));
    assert!(connection.statements()[0].contains("${hivevar:since}"));
}

#[test]
fn created_tables_become_queryable_entities() {
    let (connection, provider) = provider();
    let op = provider
        .entities::<Title>("t")
        .filter(col("t.Rating").gt(8.2))
        .select("r", [("Name", col("t.Name")), ("Year", col("t.Year"))])
        .build()
        .expect("build");

    let table = provider.create_table(&op, "top_titles").expect("create");
    assert_eq!(table.name(), "top_titles");
    assert_eq!(table.entity().columns.len(), 2);
    let statements = connection.statements();
    assert!(
        statements[0].starts_with("CREATE TABLE IF NOT EXISTS top_titles AS SELECT"),
        "{}",
        statements[0]
    );

    let follow_up = table.query("x").build().expect("build");
    let translation = provider.translate(&follow_up).expect("translate");
    assert!(translation.command.text().contains("FROM top_titles"));

    provider.drop_table(&table).expect("drop");
    assert_eq!(
        connection.statements().last().map(String::as_str),
        Some("DROP TABLE IF EXISTS top_titles")
    );
    assert_eq!(
        provider.translate(&follow_up).unwrap_err().code(),
        "UnknownEntity"
    );
}

#[test]
fn table_names_must_be_plain_identifiers() {
    let (connection, provider) = provider();
    let op = provider.entities::<Title>("t").build().expect("build");
    assert!(provider.create_table(&op, "top titles").is_err());
    assert!(provider.create_table(&op, "db.top_titles").is_err());
    assert!(connection.statements().is_empty());
}

#[test]
fn streams_run_lazily() {
    let (connection, provider) = provider();
    let op = provider.entities::<Title>("t").build().expect("build");
    script(&connection, &provider, &op);

    let mut stream = provider.query::<Title>(&op).expect("query");
    assert!(connection.statements().is_empty());
    assert_eq!(connection.opens(), 0);
    let first = stream.next().expect("row").expect("title");
    assert_eq!(first.name, "Brazil");
    assert_eq!(connection.statements().len(), 1);
    assert!(connection.reader_open());
    drop(stream);
    assert_eq!(provider.active_leases(), 0);
    assert_eq!(connection.closes(), 1);
}

#[test]
fn cancelled_streams_stop_and_release_the_connection() {
    let (connection, provider) = provider();
    let op = provider.entities::<Title>("t").build().expect("build");
    script(&connection, &provider, &op);

    let token = CancelToken::new();
    let mut stream = provider
        .query::<Record>(&op)
        .expect("query")
        .with_cancel(token.clone());
    assert!(stream.next().expect("row").is_ok());
    token.cancel();
    let err = stream.next().expect("cancellation").unwrap_err();
    assert_eq!(err.code(), "Cancelled");
    assert!(stream.next().is_none());
    assert!(stream.is_done());
    drop(stream);
    assert_eq!(provider.active_leases(), 0);
    assert_eq!(connection.closes(), 1);
}

#[test]
fn refused_connections_surface_as_connection_errors() {
    let (connection, provider) = provider();
    connection.refuse_open("host unreachable");
    let op = provider.entities::<Title>("t").build().expect("build");
    let err = provider.fetch::<Record>(&op).unwrap_err();
    assert_eq!(err.code(), "Connection");
    assert!(err.to_string().contains("host unreachable"));
    assert_eq!(provider.active_leases(), 0);
}

#[test]
fn engine_failures_keep_the_server_message() {
    let (connection, provider) = provider();
    let message = "FAILED: SemanticException [Error 10001]: Table not found titles";
    connection.push_failure(10001, message);
    let op = provider.entities::<Title>("t").build().expect("build");
    let err = provider.fetch::<Record>(&op).unwrap_err();
    assert_eq!(err.code(), "Execution");
    assert!(err.to_string().ends_with(message), "{err}");
    assert_eq!(provider.active_leases(), 0);
}

#[test]
fn projectors_are_cached_per_query_shape() {
    let (connection, provider) = provider();
    let op = provider
        .entities::<Title>("t")
        .filter(col("t.Year").gt(2000))
        .build()
        .expect("build");
    for _ in 0..3 {
        script(&connection, &provider, &op);
        let titles: Vec<Title> = provider.fetch(&op).expect("fetch");
        assert_eq!(titles.len(), 1);
    }
    assert_eq!(provider.cached_projectors(), 1);
}

#[test]
fn transform_scripts_run_on_a_lease() {
    let (connection, provider) = provider();
    connection.push_result(MemoryResult::new(["k", "v"], vec![]));
    let script = TransformScript::new(
        r"C:\jobs\HiveDriver.exe",
        "/opt/jobs/wordcount",
        "WordCount",
        "Map",
        "kv_input",
    );
    let command = script.to_command().expect("command");
    provider.lease().expect("lease").run(&command, &[]).expect("run");
    let statements = connection.statements();
    assert!(statements[0].starts_with("add file C:/jobs/HiveDriver.exe;"));
    assert!(statements[0].contains("USING 'HiveDriver.exe wordcount WordCount TWFw'"));
    assert_eq!(provider.active_leases(), 0);
}
