/// Transaction tests
///
/// Tests for connection transactions (BEGIN, COMMIT, ROLLBACK) and commit faults
/// Run with: cargo test --test transaction_tests

use resilientdb::testing::{FaultInjector, TestDatabase};
use resilientdb::{
    Column, ConnectionState, DataType, Database, DatabaseConfig, DbError, TableSchema, Value,
};
use std::sync::Arc;

fn accounts_config() -> DatabaseConfig {
    DatabaseConfig::new("bank").table(
        TableSchema::new(
            "accounts",
            vec![
                Column::new("id", DataType::Integer).not_null(),
                Column::new("balance", DataType::Integer).not_null(),
            ],
        )
        .primary_key("id"),
    )
}

fn account(id: i64, balance: i64) -> Vec<Value> {
    vec![Value::Integer(id), Value::Integer(balance)]
}

#[tokio::test]
async fn test_transaction_begin_commit() {
    let db = Database::new(accounts_config()).unwrap();
    let mut conn = db.open().await.unwrap();

    // Begin transaction
    assert!(conn.begin().await.is_ok());
    assert!(conn.is_in_transaction());

    // Execute operations
    conn.insert("accounts", account(1, 100)).await.unwrap();
    conn.insert("accounts", account(2, 50)).await.unwrap();

    // Commit
    assert!(conn.commit().await.is_ok());
    assert!(!conn.is_in_transaction());

    // Verify data was committed
    assert_eq!(db.committed_count("accounts").await.unwrap(), 2);
}

#[tokio::test]
async fn test_transaction_begin_rollback() {
    let db = Database::new(accounts_config()).unwrap();
    let mut conn = db.open().await.unwrap();

    conn.begin().await.unwrap();
    conn.insert("accounts", account(1, 100)).await.unwrap();

    // Rollback instead of commit
    assert!(conn.rollback().await.is_ok());
    assert!(!conn.is_in_transaction());

    // Verify data was NOT committed
    assert_eq!(db.committed_count("accounts").await.unwrap(), 0);
}

#[tokio::test]
async fn test_transaction_isolation_from_other_connections() {
    let db = Database::new(accounts_config()).unwrap();
    let mut writer = db.open().await.unwrap();
    let mut reader = db.open().await.unwrap();

    writer.begin().await.unwrap();
    writer.insert("accounts", account(1, 100)).await.unwrap();

    // Staged rows are visible to the writer only
    assert_eq!(writer.count("accounts").await.unwrap(), 1);
    assert_eq!(reader.count("accounts").await.unwrap(), 0);

    writer.commit().await.unwrap();
    assert_eq!(reader.count("accounts").await.unwrap(), 1);
}

#[tokio::test]
async fn test_transaction_update_and_delete() {
    let db = Database::new(accounts_config()).unwrap();
    let mut conn = db.open().await.unwrap();
    conn.insert_batch("accounts", vec![account(1, 100), account(2, 50)])
        .await
        .unwrap();

    conn.begin().await.unwrap();
    assert_eq!(
        conn.update_where("accounts", "id", 1, "balance", 70).await.unwrap(),
        1
    );
    assert_eq!(conn.delete_where("accounts", "id", 2).await.unwrap(), 1);
    assert_eq!(
        conn.find("accounts", "id", 1).await.unwrap(),
        vec![account(1, 70)]
    );
    conn.commit().await.unwrap();

    assert_eq!(
        db.committed_rows("accounts").await.unwrap(),
        vec![account(1, 70)]
    );
}

#[tokio::test]
async fn test_failed_commit_applies_nothing() {
    let db = Database::new(accounts_config()).unwrap();
    let mut first = db.open().await.unwrap();
    let mut second = db.open().await.unwrap();

    first.begin().await.unwrap();
    second.begin().await.unwrap();
    first.insert("accounts", account(1, 100)).await.unwrap();
    second.insert("accounts", account(2, 10)).await.unwrap();
    second.insert("accounts", account(1, 999)).await.unwrap();

    first.commit().await.unwrap();

    // The second transaction now collides with the committed row
    let err = second.commit().await.unwrap_err();
    assert!(matches!(err, DbError::ConstraintViolation(_)));
    assert_eq!(
        db.committed_rows("accounts").await.unwrap(),
        vec![account(1, 100)]
    );
}

#[tokio::test]
async fn test_lost_commit_ack_after_apply() {
    let injector = Arc::new(FaultInjector::new().with_commit_failures([Some(false)]));
    let test_db = TestDatabase::setup(accounts_config(), injector).unwrap();
    let db = test_db.db();

    let mut conn = db.open().await.unwrap();
    conn.begin().await.unwrap();
    conn.insert("accounts", account(1, 100)).await.unwrap();

    let err = conn.commit().await.unwrap_err();
    assert!(matches!(err, DbError::CommitOutcomeUnknown(_)));
    assert_eq!(conn.state(), ConnectionState::Broken);

    // The commit took effect
    assert_eq!(db.committed_count("accounts").await.unwrap(), 1);
}

#[tokio::test]
async fn test_lost_commit_before_apply() {
    let injector = Arc::new(FaultInjector::new().with_commit_failures([Some(true)]));
    let test_db = TestDatabase::setup(accounts_config(), injector).unwrap();
    let db = test_db.db();

    let mut conn = db.open().await.unwrap();
    conn.begin().await.unwrap();
    conn.insert("accounts", account(1, 100)).await.unwrap();

    let err = conn.commit().await.unwrap_err();
    assert!(matches!(err, DbError::CommitOutcomeUnknown(_)));
    assert!(conn.is_broken());
    assert!(matches!(
        conn.begin().await,
        Err(DbError::ConnectionFailure(_))
    ));

    assert_eq!(db.committed_count("accounts").await.unwrap(), 0);
}

#[tokio::test]
async fn test_transaction_rollback_on_drop() {
    let db = Database::new(accounts_config()).unwrap();

    {
        let mut conn = db.open().await.unwrap();
        conn.begin().await.unwrap();
        conn.insert("accounts", account(1, 100)).await.unwrap();
        // Connection dropped without commit
    }

    assert_eq!(db.committed_count("accounts").await.unwrap(), 0);
}

#[tokio::test]
async fn test_broken_connection_discards_transaction() {
    let injector =
        Arc::new(FaultInjector::new().with_execution_failures([None, Some(true)]));
    let test_db = TestDatabase::setup(accounts_config(), injector).unwrap();
    let db = test_db.db();

    let mut conn = db.open().await.unwrap();
    conn.begin().await.unwrap();
    conn.insert("accounts", account(1, 100)).await.unwrap();

    let err = conn.insert("accounts", account(2, 50)).await.unwrap_err();
    assert!(matches!(err, DbError::ConnectionFailure(_)));
    assert!(!conn.is_in_transaction());
    assert!(conn.transaction_id().is_none());

    // A fresh connection works and sees nothing from the lost transaction
    let mut fresh = db.open().await.unwrap();
    assert_eq!(fresh.count("accounts").await.unwrap(), 0);
}
