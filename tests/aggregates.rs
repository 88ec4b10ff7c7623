mod common;

use common::*;
use trellis::prelude::*;

#[tokio::test]
async fn count_projects_a_single_aggregate_column() {
    let (db, adapter) = mock_db();
    adapter.queue(vec![row([("aggregate", 3.into())])]);

    let count = db
        .query::<User>()
        .r#where("role", "=", "admin")
        .unwrap()
        .count()
        .await
        .unwrap();
    assert_eq!(count, 3);

    let (sql, bindings) = adapter.log().last().cloned().unwrap();
    assert_eq!(
        sql,
        "SELECT COUNT(*) AS aggregate FROM \"users\" WHERE role = ?"
    );
    assert_eq!(bindings, vec![Value::Text("admin".into())]);
}

#[tokio::test]
async fn count_of_no_rows_is_zero() {
    let (db, adapter) = mock_db();
    adapter.queue(vec![]);
    assert_eq!(db.query::<User>().count().await.unwrap(), 0);
}

#[tokio::test]
async fn grouped_count_counts_the_groups() {
    let (db, adapter) = mock_db();
    adapter.queue(vec![row([("aggregate", 2.into())])]);

    let count = db
        .query::<User>()
        .group_by(&["role"])
        .unwrap()
        .count()
        .await
        .unwrap();
    assert_eq!(count, 2);

    let (sql, _) = adapter.log().last().cloned().unwrap();
    assert_eq!(
        sql,
        "SELECT COUNT(*) AS aggregate FROM (SELECT * FROM \"users\" GROUP BY role) AS aggregate_table"
    );
}

#[tokio::test]
async fn non_count_aggregates_reject_grouping() {
    let (db, _) = mock_db();
    let err = db
        .query::<User>()
        .group_by(&["role"])
        .unwrap()
        .sum("age")
        .await
        .unwrap_err();
    assert!(matches!(err, TrellisError::AggregateConflict(_)));

    let err = db
        .query::<User>()
        .having("COUNT(*)", ">", 1)
        .unwrap()
        .avg("age")
        .await
        .unwrap_err();
    assert!(matches!(err, TrellisError::AggregateConflict(_)));
}

#[tokio::test]
async fn scalar_aggregates_read_the_aggregate_column() {
    let (db, adapter) = mock_db();

    adapter.queue(vec![row([("aggregate", Value::Real(10.5))])]);
    assert_eq!(db.query::<User>().sum("age").await.unwrap(), 10.5);

    adapter.queue(vec![row([("aggregate", Value::Real(32.0))])]);
    assert_eq!(db.query::<User>().avg("age").await.unwrap(), 32.0);

    adapter.queue(vec![row([("aggregate", 28.into())])]);
    assert_eq!(db.query::<User>().min("age").await.unwrap(), Value::Integer(28));

    let (sql, _) = adapter.log().last().cloned().unwrap();
    assert_eq!(sql, "SELECT MIN(age) AS aggregate FROM \"users\"");
}

#[tokio::test]
async fn aggregates_drop_ordering() {
    let (db, adapter) = mock_db();
    adapter.queue(vec![row([("aggregate", 1.into())])]);

    db.query::<User>()
        .order_by("name", "ASC")
        .unwrap()
        .count()
        .await
        .unwrap();

    let (sql, _) = adapter.log().last().cloned().unwrap();
    assert!(!sql.contains("ORDER BY"), "got: {sql}");
}

#[tokio::test]
async fn pluck_and_value() {
    let (db, adapter) = mock_db();
    seed_blog(&adapter);

    let names = db.query::<User>().pluck("name").await.unwrap();
    assert_eq!(
        names,
        vec![Value::Text("Ada".into()), Value::Text("Lin".into())]
    );
    let (sql, _) = adapter.log().last().cloned().unwrap();
    assert_eq!(sql, "SELECT name FROM \"users\"");

    let role = db.query::<User>().value("role").await.unwrap();
    assert_eq!(role, Some(Value::Text("admin".into())));

    // Columns absent from the result set pluck as NULL, not as an error.
    let missing = db.query::<Tag>().value("missing").await.unwrap();
    assert_eq!(missing, Some(Value::Null));
}

#[tokio::test]
async fn exists_runs_a_limited_probe() {
    let (db, adapter) = mock_db();
    seed_blog(&adapter);

    assert!(db.query::<User>().exists().await.unwrap());
    let (sql, _) = adapter.log().last().cloned().unwrap();
    assert_eq!(sql, "SELECT * FROM \"users\" LIMIT 1");

    assert!(db.query::<Image>().not_exists().await.unwrap());
}
