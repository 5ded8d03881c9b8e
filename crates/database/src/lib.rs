pub mod disqualifications;
pub mod leader_pg_lock;
pub mod ledger_entries;
pub mod listings;
pub mod stalls;

use sqlx::Executor;

// Design:
//
// Functions that execute multiple statements which must succeed or fail
// together take `&mut PgTransaction`. Functions that execute a single
// statement take `&mut PgConnection`. We usually call the parameter `ex` for
// `Executor` which is the trait whose methods we use to run queries.
// This lets callers decide whether a query is part of a bigger transaction
// or runs standalone. `PgTransaction` derefs to `PgConnection`. Callers are
// responsible for calling `commit` on the transaction.
//
// For tests a useful pattern is to start a transaction at the beginning of the
// test, use it for all queries and never commit it. When the uncommitted
// transaction gets dropped it is rolled back. This allows postgres tests to run
// in parallel and makes clearing all tables at the beginning of a test
// obsolete.

pub type PgTransaction<'a> = sqlx::Transaction<'a, sqlx::Postgres>;

pub type ListingId = i64;
pub type StallId = i64;
pub type ApplicantId = i64;
pub type ManagerId = i64;
pub type EntryId = i64;

/// The names of tables we use in the db, children before parents.
pub const TABLES: &[&str] = &["ledger_entries", "listings", "disqualifications", "stalls"];

/// Delete all data in the database. Only used by tests.
#[allow(non_snake_case)]
pub async fn clear_DANGER_(ex: &mut PgTransaction<'_>) -> sqlx::Result<()> {
    for table in TABLES {
        ex.execute(format!("TRUNCATE {table} CASCADE;").as_str())
            .await?;
    }
    Ok(())
}
