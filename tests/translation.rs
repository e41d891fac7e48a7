#![allow(missing_docs)]

mod support;

use hiveq::query::ast::Aggregator;
use hiveq::query::builder::{col, count_all, param};
use hiveq::query::mapping::{EntityMapping, StaticMapping};
use hiveq::query::translator::{translate, Translator};
use hiveq::query::value::WireType;
use hiveq::query::{QueryBuilder, Value};
use support::{film_data, film_mapping, init_tracing, sorted, NAMES_BY_YEAR};

fn names(records: &[Vec<(String, Value)>], member: &str) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            match record.iter().find(|(name, _)| name == member) {
                Some((_, Value::String(text))) => text.clone(),
                other => panic!("member {member} missing or not text: {other:?}"),
            }
        })
        .collect()
}

#[test]
fn sample_table_filter_and_order_formats_flat_select() {
    init_tracing();
    let mut entity = EntityMapping::new("hivesampletable", "hivesampletable");
    for name in [
        "clientid",
        "country",
        "devicemake",
        "devicemodel",
        "deviceplatform",
        "market",
        "querydwelltime",
        "querytime",
        "sessionid",
        "sessionpagevieworder",
        "state",
    ] {
        entity = entity.column(name, WireType::String);
    }
    let mapping = StaticMapping::new().with_entity(entity).expect("mapping");
    let op = QueryBuilder::table("hivesampletable", "row")
        .filter(col("row.state").eq("Oregon"))
        .order_by(col("row.deviceplatform"))
        .build()
        .expect("build");
    let translation = translate(&op, &mapping).expect("translate");
    assert_eq!(
        translation.command.text(),
        "SELECT t0.clientid, t0.country, t0.devicemake, t0.devicemodel, t0.deviceplatform, \
         t0.market, t0.querydwelltime, t0.querytime, t0.sessionid, t0.sessionpagevieworder, \
         t0.state FROM hivesampletable t0 WHERE (t0.state = 'Oregon') ORDER BY t0.deviceplatform"
    );
}

#[test]
fn navigation_becomes_join_and_keeps_results() {
    init_tracing();
    let op = QueryBuilder::table("Title", "t")
        .navigate("t", "Studio", "s")
        .filter(col("t.Year").gt(1990))
        .order_by(col("t.Year"))
        .select("r", [("Title", col("t.Name")), ("Studio", col("s.Name"))])
        .build()
        .expect("build");
    let translation = translate(&op, &film_mapping()).expect("translate");
    let text = translation.command.text();
    assert!(text.contains("INNER JOIN"), "{text}");
    assert!(text.contains("studios"), "{text}");
    assert!(text.contains("ORDER BY"), "{text}");

    let data = film_data();
    let bound = data.records(&translation.stages[0].projection);
    let rewritten = data.records(translation.projection().expect("projection"));
    assert_eq!(bound, rewritten);
    assert_eq!(names(&rewritten, "Title"), ["Heat", "Fargo", "Memento"]);
    assert_eq!(names(&rewritten, "Studio"), ["Warner", "Embassy", "Fox"]);
}

#[test]
fn optional_navigation_keeps_rows_without_target() {
    let op = QueryBuilder::table("Title", "t")
        .navigate_optional("t", "Studio", "s")
        .select("r", [("Title", col("t.Name")), ("Studio", col("s.Name"))])
        .build()
        .expect("build");
    let translation = translate(&op, &film_mapping()).expect("translate");
    assert!(translation.command.text().contains("LEFT OUTER JOIN"));
    let records = film_data().records(translation.projection().expect("projection"));
    assert_eq!(records.len(), 6);
    assert!(records
        .iter()
        .any(|r| r[0].1 == Value::from("Arrival") && r[1].1 == Value::Null));
}

#[test]
fn group_by_counts_per_key() {
    let op = QueryBuilder::table("Title", "t")
        .group_by(
            "g",
            [("Studio", col("t.StudioId"))],
            [("Titles", count_all())],
        )
        .build()
        .expect("build");
    let translation = translate(&op, &film_mapping()).expect("translate");
    let text = translation.command.text();
    assert!(text.contains("COUNT(*)"), "{text}");
    assert!(text.contains("GROUP BY"), "{text}");

    let data = film_data();
    let rewritten = data.records(translation.projection().expect("projection"));
    assert_eq!(
        sorted(data.records(&translation.stages[0].projection)),
        sorted(rewritten.clone())
    );
    let count_for = |studio: Value| {
        rewritten
            .iter()
            .find(|r| r[0].1 == studio)
            .map(|r| r[1].1.clone())
    };
    assert_eq!(count_for(Value::Int(1)), Some(Value::Int(2)));
    assert_eq!(count_for(Value::Int(3)), Some(Value::Int(1)));
    assert_eq!(count_for(Value::Null), Some(Value::Int(1)));
}

#[test]
fn scalar_count_is_a_single_aggregate_column() {
    let op = QueryBuilder::table("Title", "t")
        .filter(col("t.Year").gt(1990))
        .count()
        .build()
        .expect("build");
    let translation = translate(&op, &film_mapping()).expect("translate");
    let projection = translation.projection().expect("projection");
    assert_eq!(projection.aggregator, Some(Aggregator::Single));
    assert_eq!(projection.select.columns.len(), 1);
    assert!(translation.command.text().starts_with("SELECT COUNT(*)"));
    assert_eq!(film_data().run(projection), vec![vec![Value::Int(4)]]);
}

#[test]
fn skip_and_take_page_through_a_rank_window() {
    let op = QueryBuilder::table("Title", "t")
        .order_by(col("t.Year"))
        .skip(2)
        .take(3)
        .build()
        .expect("build");
    let translation = translate(&op, &film_mapping()).expect("translate");
    let text = translation.command.text();
    assert!(text.contains("ROW_NUMBER() OVER (ORDER BY"), "{text}");
    assert!(text.contains(".rownum > 2)"), "{text}");
    assert!(text.contains(".rownum <= 5)"), "{text}");
    assert!(!text.contains("LIMIT"), "{text}");

    let records = film_data().records(translation.projection().expect("projection"));
    assert_eq!(names(&records, "Name"), NAMES_BY_YEAR[2..5]);
}

#[test]
fn filters_after_take_apply_to_the_page() {
    let op = QueryBuilder::table("Title", "t")
        .order_by(col("t.Year"))
        .take(3)
        .filter(col("t.Year").gt(1985))
        .select("r", [("Name", col("t.Name"))])
        .build()
        .expect("build");
    let translation = translate(&op, &film_mapping()).expect("translate");
    let text = translation.command.text();
    let limit = text.find("LIMIT 3").expect("limit");
    let filter = text.find("> 1985").expect("filter");
    assert!(filter > limit, "filter moved under the limit: {text}");

    let data = film_data();
    let bound = data.records(&translation.stages[0].projection);
    let rewritten = data.records(translation.projection().expect("projection"));
    assert_eq!(names(&rewritten, "Name"), ["Heat"]);
    assert_eq!(sorted(bound), sorted(rewritten));
}

#[test]
fn take_alone_formats_as_limit() {
    let op = QueryBuilder::table("Title", "t")
        .order_by_desc(col("t.Rating"))
        .take(2)
        .build()
        .expect("build");
    let translation = translate(&op, &film_mapping()).expect("translate");
    let text = translation.command.text();
    assert!(text.ends_with("LIMIT 2"), "{text}");
    assert!(!text.contains("ROW_NUMBER"), "{text}");
    let records = film_data().records(translation.projection().expect("projection"));
    assert_eq!(names(&records, "Name"), ["Alien", "Memento"]);
}

#[test]
fn parameters_are_referenced_as_variables() {
    let op = QueryBuilder::table("Title", "t")
        .filter(col("t.Year").ge(param("year", 1995)))
        .build()
        .expect("build");
    let translation = translate(&op, &film_mapping()).expect("translate");
    assert!(translation.command.text().contains("${hivevar:year}"));
    assert_eq!(translation.command.parameters().len(), 1);
    assert_eq!(translation.values[0].name, "year");
    assert_eq!(translation.values[0].value, Value::Int(1995));
    let records = film_data().records(translation.projection().expect("projection"));
    assert_eq!(records.len(), 4);
}

#[test]
fn correlated_apply_is_rewritten_to_a_join() {
    let studios = QueryBuilder::table("Studio", "s").filter(col("s.Id").eq(col("t.StudioId")));
    let op = QueryBuilder::table("Title", "t")
        .cross_apply(studios)
        .build()
        .expect("build");
    let translation = translate(&op, &film_mapping()).expect("translate");
    let text = translation.command.text();
    assert!(text.contains(" JOIN "), "{text}");
    assert!(!text.contains("APPLY"), "{text}");
    let records = film_data().records(translation.projection().expect("projection"));
    assert_eq!(records.len(), 5);
}

#[test]
fn correlated_apply_over_distinct_years_becomes_a_join() {
    let years = QueryBuilder::table("Title", "t")
        .filter(col("t.StudioId").eq(col("s.Id")))
        .select("y", [("Year", col("t.Year"))])
        .distinct();
    let op = QueryBuilder::table("Studio", "s")
        .cross_apply(years)
        .build()
        .expect("build");
    let translation = translate(&op, &film_mapping()).expect("translate");
    let text = translation.command.text();
    assert!(text.contains("INNER JOIN (SELECT DISTINCT"), "{text}");
    assert!(!text.contains("APPLY"), "{text}");
    let records = film_data().records(translation.projection().expect("projection"));
    assert_eq!(records.len(), 5);

    let ranged = QueryBuilder::table("Title", "t")
        .filter(col("t.StudioId").gt(col("s.Id")))
        .select("y", [("Year", col("t.Year"))])
        .distinct();
    let op = QueryBuilder::table("Studio", "s")
        .cross_apply(ranged)
        .build()
        .expect("build");
    let err = translate(&op, &film_mapping()).unwrap_err();
    assert_eq!(err.code(), "UnsupportedOperator", "{err}");
}

#[test]
fn cluster_by_combined_with_order_is_rejected() {
    let clustered = QueryBuilder::table("Title", "t")
        .cluster_by([col("t.StudioId")])
        .build()
        .expect("build");
    let text = translate(&clustered, &film_mapping())
        .expect("translate")
        .command
        .text()
        .to_owned();
    assert!(text.contains("CLUSTER BY"), "{text}");

    let ordered = QueryBuilder::table("Title", "t")
        .order_by(col("t.Year"))
        .cluster_by([col("t.StudioId")])
        .build()
        .expect("build");
    let err = translate(&ordered, &film_mapping()).unwrap_err();
    assert_eq!(err.code(), "ClusterWithOrder");
}

#[test]
fn unknown_names_fail_with_mapping_codes() {
    let unknown_entity = QueryBuilder::table("Award", "a").build().expect("build");
    assert_eq!(
        translate(&unknown_entity, &film_mapping()).unwrap_err().code(),
        "UnknownEntity"
    );
    let unknown_assoc = QueryBuilder::table("Title", "t")
        .navigate("t", "Director", "d")
        .build()
        .expect("build");
    assert_eq!(
        translate(&unknown_assoc, &film_mapping()).unwrap_err().code(),
        "UnknownAssociation"
    );
}

#[test]
fn every_stage_is_kept_for_explain() {
    let op = QueryBuilder::table("Title", "t")
        .filter(col("t.Year").gt(1990))
        .skip(1)
        .build()
        .expect("build");
    let translator = Translator::new();
    let translation = translator.translate(&op, &film_mapping()).expect("translate");
    let stages = translation.explain_stages();
    let names: Vec<_> = stages.iter().map(|(name, _)| *name).collect();
    let mut expected = vec!["bind"];
    expected.extend(translator.pass_names());
    assert_eq!(names, expected);
    let (_, last) = stages.last().expect("stages");
    assert_eq!(last.shape_hash, translation.shape_hash);
    assert!(last.render(true).starts_with("Project"));
}
