//! Integration tests for commit-timestamp columns.

use commitdb_codec::{CommitTimestamp, NullTime, Timestamp, Value};
use commitdb_core::{bind, Context, CoreError, Statement, TransactionState};
use commitdb_testkit::{Account, StampedRow, TestDatabase, TestRow, TEST_TABLE};

fn read_test_row(db: &TestDatabase, id: &str) -> Option<TestRow> {
    let rows = db
        .query(
            &Context::background(),
            &Statement::new("SELECT * FROM test WHERE id = @id").with_param("id", id),
        )
        .unwrap();
    rows.first().map(|r| r.decode().unwrap())
}

fn seed(db: &TestDatabase, id: &str) {
    db.read_write_transaction(&Context::background(), |txn| {
        txn.insert(TEST_TABLE, &TestRow::new(id))
    })
    .unwrap();
}

#[test]
fn null_timestamps_round_trip() {
    let db = TestDatabase::memory();
    seed(&db, "X");

    let row = read_test_row(&db, "X").unwrap();
    assert_eq!(row.id, "X");
    assert!(!row.t1.is_valid());
    assert!(!row.t2.is_valid());
}

#[test]
fn literal_then_pending_update_in_one_transaction() {
    let db = TestDatabase::memory();
    seed(&db, "X");
    let ctx = Context::background();

    let mut txn = db.transaction();
    txn.begin(&ctx).unwrap();
    assert!(txn.read_row(&ctx, TEST_TABLE, "X", &["id"]).unwrap().is_some());

    let literal = Statement::new("UPDATE test SET t1 = @T1 WHERE id = @id")
        .with_param("T1", Timestamp::now())
        .with_param("id", "X");
    let err = txn.update(&ctx, &literal).unwrap_err();
    assert_eq!(
        err,
        CoreError::InvalidCommitTimestampLiteral {
            column: "t1".into()
        }
    );
    assert_eq!(txn.state(), TransactionState::Open);
    assert_eq!(txn.mutation_count(), 0);

    let pending = Statement::new(
        "UPDATE test SET t1 = PENDING_COMMIT_TIMESTAMP(), t2 = PENDING_COMMIT_TIMESTAMP() \
         WHERE id = @id",
    )
    .with_param("id", "X");
    assert_eq!(txn.update(&ctx, &pending).unwrap(), 1);

    let snapshot = txn.snapshot().unwrap();
    let response = txn.commit(&ctx).unwrap();
    assert!(response.commit_timestamp > snapshot);

    let row = read_test_row(&db, "X").unwrap();
    assert_eq!(row.t1, NullTime::new(response.commit_timestamp));
    assert_eq!(row.t2, row.t1);
}

#[test]
fn rejected_literal_leaves_row_unchanged() {
    let db = TestDatabase::memory();
    seed(&db, "X");
    let ctx = Context::background();

    let mut txn = db.transaction();
    txn.begin(&ctx).unwrap();
    let literal = Statement::new("UPDATE test SET t1 = @T1 WHERE id = @id")
        .with_param("T1", Timestamp::from_unix_nanos(1))
        .with_param("id", "X");
    assert!(txn.update(&ctx, &literal).is_err());
    txn.rollback().unwrap();

    assert_eq!(read_test_row(&db, "X").unwrap(), TestRow::new("X"));
}

#[test]
fn literal_rejected_through_record_writes() {
    let db = TestDatabase::memory();
    let ctx = Context::background();
    let mut row = TestRow::new("X");
    row.t1 = NullTime::new(Timestamp::now());

    let err = db
        .read_write_transaction(&ctx, |txn| txn.insert(TEST_TABLE, &row))
        .unwrap_err();
    assert_eq!(
        err,
        CoreError::InvalidCommitTimestampLiteral {
            column: "t1".into()
        }
    );
    assert!(read_test_row(&db, "X").is_none());
}

#[test]
fn one_commit_timestamp_across_rows_and_tables() {
    let db = TestDatabase::memory();
    let ctx = Context::background();

    let ((), response) = db
        .read_write_transaction(&ctx, |txn| {
            txn.insert(TEST_TABLE, &StampedRow::pending("a"))?;
            txn.insert(TEST_TABLE, &StampedRow::pending("b"))?;
            txn.update(
                &ctx,
                &Statement::new(
                    "INSERT INTO accounts (id, balance, updated) \
                     VALUES ('acct', 10, PENDING_COMMIT_TIMESTAMP())",
                ),
            )?;
            Ok(())
        })
        .unwrap();
    assert_eq!(response.mutation_count, 3);

    let expected = NullTime::new(response.commit_timestamp);
    for id in ["a", "b"] {
        let row = read_test_row(&db, id).unwrap();
        assert_eq!(row.t1, expected);
        assert_eq!(row.t2, expected);
    }
    let accounts = db
        .query(&ctx, &Statement::new("SELECT * FROM accounts"))
        .unwrap();
    let account: Account = accounts[0].decode().unwrap();
    assert_eq!(account.updated, CommitTimestamp::At(response.commit_timestamp));
}

#[test]
fn later_transactions_commit_later() {
    let db = TestDatabase::memory();
    let ctx = Context::background();
    let mut last = Timestamp::UNIX_EPOCH;
    for i in 0..10 {
        let ((), response) = db
            .read_write_transaction(&ctx, |txn| {
                txn.insert_or_update(TEST_TABLE, &StampedRow::pending(format!("r{i}")))
            })
            .unwrap();
        assert!(response.commit_timestamp > last);
        last = response.commit_timestamp;
    }
}

#[test]
fn pending_column_is_unreadable_before_commit() {
    let db = TestDatabase::memory();
    let ctx = Context::background();
    let mut txn = db.transaction();
    txn.begin(&ctx).unwrap();
    txn.insert(TEST_TABLE, &StampedRow::pending("a")).unwrap();

    let ids = txn
        .read(&ctx, &Statement::new("SELECT id FROM test"))
        .unwrap()
        .collect_rows()
        .unwrap();
    assert_eq!(ids.len(), 1);

    let err = txn
        .read(&ctx, &Statement::new("SELECT t1 FROM test"))
        .unwrap()
        .collect_rows()
        .unwrap_err();
    assert_eq!(
        err,
        CoreError::PendingCommitTimestampRead {
            column: "t1".into()
        }
    );
}

#[test]
fn binding_is_repeatable() {
    let db = TestDatabase::memory();
    let schema = db.database().schema();
    let statement = Statement::new("UPDATE test SET t1 = PENDING_COMMIT_TIMESTAMP() WHERE id = @id")
        .with_param("id", "X");
    assert_eq!(bind(&statement, &schema), bind(&statement, &schema));

    let literal = Statement::new("UPDATE test SET t1 = @t WHERE id = 'X'")
        .with_param("t", Value::Timestamp(Timestamp::from_unix_nanos(5)));
    assert_eq!(bind(&literal, &schema), bind(&literal, &schema));
    assert!(bind(&literal, &schema).is_err());
}

#[test]
fn zero_matches_is_not_an_error() {
    let db = TestDatabase::memory();
    let ctx = Context::background();
    let (count, response) = db
        .read_write_transaction(&ctx, |txn| {
            txn.update(
                &ctx,
                &Statement::new("UPDATE test SET t1 = PENDING_COMMIT_TIMESTAMP() WHERE id = 'none'"),
            )
        })
        .unwrap();
    assert_eq!(count, 0);
    assert_eq!(response.mutation_count, 0);
}
