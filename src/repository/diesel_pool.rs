//! Diesel connection pool management for SQLite.
//!
//! diesel-async has no SQLite backend, so everything runs as sync Diesel
//! with r2d2 pooling, wrapped in spawn_blocking.

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use std::path::Path;
use std::time::Duration;

pub type DieselError = diesel::result::Error;

pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

pub type PooledConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Applies SQLite pragmas to every connection the pool opens.
/// `foreign_keys` and `busy_timeout` are per-connection state.
#[derive(Debug)]
struct ConnectionPragmas;

impl diesel::r2d2::CustomizeConnection<SqliteConnection, diesel::r2d2::Error>
    for ConnectionPragmas
{
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        init_connection_pragmas(conn).map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Create a Diesel connection pool for a SQLite database file.
pub fn create_diesel_pool(db_path: &Path) -> Result<SqlitePool, diesel::r2d2::PoolError> {
    let manager = ConnectionManager::<SqliteConnection>::new(db_path.display().to_string());

    Pool::builder()
        .max_size(10)
        .connection_timeout(Duration::from_secs(30))
        .connection_customizer(Box::new(ConnectionPragmas))
        .build(manager)
}

/// Initialize SQLite pragmas for a connection.
pub fn init_connection_pragmas(conn: &mut SqliteConnection) -> Result<(), DieselError> {
    diesel::sql_query("PRAGMA journal_mode = WAL").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous = NORMAL").execute(conn)?;
    diesel::sql_query("PRAGMA foreign_keys = ON").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout = 5000").execute(conn)?;
    Ok(())
}

/// Run a blocking Diesel operation asynchronously.
///
/// Wraps a sync closure in spawn_blocking so Diesel can be used from async
/// contexts without stalling the runtime.
pub async fn run_blocking<F, T>(pool: SqlitePool, f: F) -> Result<T, DieselError>
where
    F: FnOnce(&mut SqliteConnection) -> Result<T, DieselError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(|e| {
            DieselError::DatabaseError(
                diesel::result::DatabaseErrorKind::Unknown,
                Box::new(e.to_string()),
            )
        })?;
        f(&mut conn)
    })
    .await
    .map_err(|e| {
        DieselError::DatabaseError(
            diesel::result::DatabaseErrorKind::Unknown,
            Box::new(e.to_string()),
        )
    })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(QueryableByName)]
    struct BusyTimeout {
        #[diesel(sql_type = diesel::sql_types::Integer)]
        timeout: i32,
    }

    #[test]
    fn test_every_pooled_connection_gets_pragmas() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_diesel_pool(&dir.path().join("pragmas.db")).unwrap();

        // hold two connections at once so the second cannot be a re-checkout
        // of the first
        let mut first = pool.get().unwrap();
        let mut second = pool.get().unwrap();
        for conn in [&mut *first, &mut *second] {
            let row: BusyTimeout = diesel::sql_query("PRAGMA busy_timeout")
                .get_result(conn)
                .unwrap();
            assert_eq!(row.timeout, 5000);
        }
    }
}
