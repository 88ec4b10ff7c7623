mod common;

use common::*;
use futures_util::StreamExt;
use trellis::prelude::*;

#[tokio::test]
async fn watch_emits_current_results_first() {
    let (db, adapter) = mock_db();
    seed_blog(&adapter);

    let stream = db.query::<User>().watch().unwrap();
    tokio::pin!(stream);

    let initial = stream.next().await.unwrap().unwrap();
    assert_eq!(initial.len(), 2);
    assert_eq!(adapter.select_count(), 1);
}

#[tokio::test]
async fn watch_stream_outlives_its_builder() {
    let (db, adapter) = mock_db();
    seed_blog(&adapter);

    // The stream must own everything it needs; the builder that produced
    // it is gone before the first poll.
    let stream = {
        let builder = db.query::<User>().r#where("role", "=", "admin").unwrap();
        builder.watch().unwrap()
    };
    tokio::pin!(stream);

    stream.next().await.unwrap().unwrap();
    let (sql, bindings) = adapter.log().last().unwrap().clone();
    assert_eq!(sql, "SELECT * FROM \"users\" WHERE role = ?");
    assert_eq!(bindings, vec![Value::from("admin")]);
}

#[tokio::test]
async fn watch_requeries_after_writes_to_its_table() {
    let (db, adapter) = mock_db();
    seed_blog(&adapter);

    let stream = db.query::<User>().watch().unwrap();
    tokio::pin!(stream);
    stream.next().await.unwrap().unwrap();

    db.query::<User>()
        .r#where("id", "=", 1)
        .unwrap()
        .update(vec![("role".into(), "owner".into())])
        .await
        .unwrap();

    let refreshed = stream.next().await.unwrap().unwrap();
    assert_eq!(refreshed.len(), 2);
    assert_eq!(adapter.select_count(), 2);
}

#[tokio::test]
async fn watch_ignores_writes_to_other_tables() {
    let (db, adapter) = mock_db();
    seed_blog(&adapter);

    let stream = db.query::<User>().watch().unwrap();
    tokio::pin!(stream);
    stream.next().await.unwrap().unwrap();

    // A posts write followed by a users write: the stream skips straight
    // to the users notification.
    db.query::<Post>().delete().await.unwrap();
    db.query::<User>().delete().await.unwrap();

    stream.next().await.unwrap().unwrap();
    assert_eq!(adapter.select_count(), 2);
}

#[tokio::test]
async fn transaction_commits_and_flushes_notifications() {
    let (db, adapter) = mock_db();
    let mut rx = db.adapter().notifier().unwrap().subscribe();

    db.transaction(|tx| async move {
        tx.query::<User>()
            .insert(vec![("name".into(), "Ben".into())])
            .await?;
        // Uncommitted writes stay invisible to watch subscribers.
        Ok(())
    })
    .await
    .unwrap();

    assert_eq!(rx.recv().await.unwrap(), "users");
    let statements: Vec<String> = adapter.log().into_iter().map(|(sql, _)| sql).collect();
    assert_eq!(statements.first().map(String::as_str), Some("BEGIN"));
    assert_eq!(statements.last().map(String::as_str), Some("COMMIT"));
}

#[tokio::test]
async fn transaction_buffers_notifications_until_commit() {
    let (db, _) = mock_db();
    let mut rx = db.adapter().notifier().unwrap().subscribe();

    db.transaction(|tx| async move {
        tx.query::<User>()
            .insert(vec![("name".into(), "Ben".into())])
            .await
    })
    .await
    .unwrap();

    // Exactly one event, delivered post-commit.
    assert_eq!(rx.recv().await.unwrap(), "users");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn failed_transaction_rolls_back_and_discards_notifications() {
    let (db, adapter) = mock_db();
    let mut rx = db.adapter().notifier().unwrap().subscribe();

    let err = db
        .transaction(|tx| async move {
            tx.query::<User>()
                .insert(vec![("name".into(), "Ben".into())])
                .await?;
            Err::<(), _>(TrellisError::Adapter("write conflict".into()))
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TrellisError::Transaction {
            rolled_back: true,
            ..
        }
    ));
    assert!(rx.try_recv().is_err());
    let statements: Vec<String> = adapter.log().into_iter().map(|(sql, _)| sql).collect();
    assert!(statements.contains(&"ROLLBACK".to_string()));
}
