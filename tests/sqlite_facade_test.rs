//! End-to-end tests against a file-backed SQLite database.

use serde_json::json;
use sqlroute::bridge::BackendServer;
use sqlroute::config::{DatabaseSettings, RemoteSettings};
use sqlroute::models::QueryParam;
use sqlroute::{Database, DbError, Settings, TaskIdentity};
use tempfile::TempDir;
use tokio::net::TcpListener;

const SCHEMA: &str =
    "CREATE TABLE accounts (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, balance INTEGER NOT NULL)";

fn settings(dir: &TempDir) -> Settings {
    let path = dir.path().join("facade.db");
    let url = format!("sqlite://{}?max_connections=4", path.display());
    Settings::new(DatabaseSettings::parse(&url).unwrap())
}

async fn open(dir: &TempDir) -> Database {
    let db = Database::connect(&settings(dir)).await.unwrap();
    db.execute(TaskIdentity::new(0, 1), SCHEMA, &[]).await.unwrap();
    db
}

fn account(name: &str, balance: i64) -> Vec<QueryParam> {
    vec![QueryParam::String(name.to_string()), QueryParam::Int(balance)]
}

const INSERT: &str = "INSERT INTO accounts (name, balance) VALUES (?, ?)";

#[tokio::test]
async fn test_facade_operations() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir).await;
    let task = TaskIdentity::new(0, 1);

    assert_eq!(db.insert(task, INSERT, &account("alice", 100)).await.unwrap(), 1);
    assert_eq!(db.insert(task, INSERT, &account("bob", 50)).await.unwrap(), 2);
    assert_eq!(db.insert(task, INSERT, &account("carol", 25)).await.unwrap(), 3);

    let rows = db
        .select(task, "SELECT id, name, balance FROM accounts ORDER BY id", &[])
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["name"], "alice");
    assert_eq!(rows[2]["balance"], 25);

    let bob = db
        .first(
            task,
            "SELECT name, balance FROM accounts WHERE name = ?",
            &[QueryParam::String("bob".into())],
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bob.get("balance"), Some(&json!(50)));

    let nobody = db
        .first(task, "SELECT name FROM accounts WHERE id = ?", &[QueryParam::Int(99)])
        .await
        .unwrap();
    assert!(nobody.is_none());

    assert_eq!(db.count(task, "SELECT COUNT(*) FROM accounts", &[]).await.unwrap(), 3);
    assert_eq!(
        db.sum(task, "SELECT SUM(balance) AS sum FROM accounts", &[]).await.unwrap(),
        175.0
    );

    let updated = db
        .update(task, "UPDATE accounts SET balance = balance + 1 WHERE balance < ?", &[QueryParam::Int(60)])
        .await
        .unwrap();
    assert_eq!(updated, 2);

    let deleted = db
        .delete(task, "DELETE FROM accounts WHERE name = ?", &[QueryParam::String("carol".into())])
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(db.count(task, "SELECT COUNT(*) FROM accounts", &[]).await.unwrap(), 2);

    let err = db.select(task, "SELECT * FROM missing", &[]).await.unwrap_err();
    assert!(matches!(err, DbError::Database { .. }));
    assert!(err.to_string().contains("no such table"));
}

#[tokio::test]
async fn test_rows_keep_select_column_order() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir).await;
    let task = TaskIdentity::new(0, 1);
    for name in ["a", "b", "c"] {
        db.insert(task, INSERT, &account(name, 1)).await.unwrap();
    }

    // The counted column does not sort first by name
    let total = db
        .count(task, "SELECT COUNT(*) AS total, 0 AS a_flag FROM accounts", &[])
        .await
        .unwrap();
    assert_eq!(total, 3);

    let sum = db
        .sum(task, "SELECT 'x' AS label, SUM(balance) AS z_total, 0 AS a_flag FROM accounts", &[])
        .await
        .unwrap();
    assert_eq!(sum, 3.0);

    let row = db.first(task, "SELECT 1 AS z, 2 AS a", &[]).await.unwrap().unwrap();
    assert_eq!(row.keys().collect::<Vec<_>>(), ["z", "a"]);
}

#[tokio::test]
async fn test_detached_calls_use_ad_hoc_connections() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir).await;
    let task = TaskIdentity::detached();

    db.insert(task, INSERT, &account("dave", 10)).await.unwrap();
    assert_eq!(db.count(task, "SELECT COUNT(*) FROM accounts", &[]).await.unwrap(), 1);
}

#[tokio::test]
async fn test_transaction_commit_and_rollback() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir).await;
    let task = TaskIdentity::new(0, 2);
    db.insert(task, INSERT, &account("alice", 100)).await.unwrap();
    db.insert(task, INSERT, &account("bob", 0)).await.unwrap();

    db.transaction(task, |tx| async move {
        tx.update(task, "UPDATE accounts SET balance = balance - 40 WHERE name = 'alice'", &[])
            .await?;
        tx.update(task, "UPDATE accounts SET balance = balance + 40 WHERE name = 'bob'", &[])
            .await?;
        Ok(())
    })
    .await
    .unwrap();

    let balance = |name: &'static str| {
        let db = db.clone();
        async move {
            db.count(
                TaskIdentity::new(0, 3),
                "SELECT balance FROM accounts WHERE name = ?",
                &[QueryParam::String(name.into())],
            )
            .await
            .unwrap()
        }
    };
    assert_eq!(balance("alice").await, 60);
    assert_eq!(balance("bob").await, 40);

    let result: Result<(), DbError> = db
        .transaction(task, |tx| async move {
            tx.insert(task, INSERT, &account("mallory", 1000)).await?;
            tx.update(task, "UPDATE accounts SET balance = 0 WHERE name = 'alice'", &[])
                .await?;
            tx.execute(task, "INSERT INTO missing VALUES (1)", &[]).await?;
            Ok(())
        })
        .await;

    assert!(matches!(result, Err(DbError::RolledBack { .. })));
    assert_eq!(balance("alice").await, 60);
    assert_eq!(
        db.count(task, "SELECT COUNT(*) FROM accounts WHERE name = 'mallory'", &[])
            .await
            .unwrap(),
        0
    );
    assert!(db.registry().lookup(task).is_none());
}

#[tokio::test]
async fn test_remote_round_trip_through_backend_server() {
    let dir = TempDir::new().unwrap();
    let backend = open(&dir).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = BackendServer::new(backend.clone()).unwrap();
    tokio::spawn(async move { server.serve(listener).await });

    let mut client_settings = settings(&dir);
    client_settings.pooling = false;
    client_settings.remote = Some(RemoteSettings::new("127.0.0.1", port));
    let client = Database::connect(&client_settings).await.unwrap();
    assert!(client.has_remote());
    assert!(BackendServer::new(client.clone()).is_err());

    let task = TaskIdentity::new(0, 4);
    assert_eq!(client.insert(task, INSERT, &account("erin", 7)).await.unwrap(), 1);
    assert_eq!(client.insert(task, INSERT, &account("frank", 8)).await.unwrap(), 2);

    let rows = client
        .select(task, "SELECT name FROM accounts ORDER BY id", &[])
        .await
        .unwrap();
    assert_eq!(rows, vec![
        json!({ "name": "erin" }).as_object().unwrap().clone(),
        json!({ "name": "frank" }).as_object().unwrap().clone(),
    ]);

    let first = client
        .first(task, "SELECT balance FROM accounts WHERE name = ?", &[QueryParam::String("frank".into())])
        .await
        .unwrap();
    assert_eq!(first.unwrap()["balance"], 8);

    assert_eq!(client.count(task, "SELECT COUNT(*) FROM accounts", &[]).await.unwrap(), 2);
    assert_eq!(
        client.sum(task, "SELECT SUM(balance) AS sum FROM accounts", &[]).await.unwrap(),
        15.0
    );
    assert_eq!(
        client
            .update(task, "UPDATE accounts SET balance = 0", &[])
            .await
            .unwrap(),
        2
    );
    assert_eq!(
        client
            .delete(task, "DELETE FROM accounts WHERE name = 'erin'", &[])
            .await
            .unwrap(),
        1
    );
    client
        .execute(task, "CREATE TABLE audit (id INTEGER)", &[])
        .await
        .unwrap();

    // The backend saw every write
    assert_eq!(
        backend.count(task, "SELECT COUNT(*) FROM accounts", &[]).await.unwrap(),
        1
    );

    let err = client.select(task, "SELECT * FROM missing", &[]).await.unwrap_err();
    match err {
        DbError::Database { message, .. } => assert!(message.contains("no such table: missing")),
        other => panic!("unexpected error: {:?}", other),
    }
}
