use std::env;

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, PooledConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::types::{Error, Result};

pub mod schema;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub type Pool = diesel::r2d2::Pool<ConnectionManager<SqliteConnection>>;
pub type Conn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// SQLite leaves referential integrity off unless asked; every connection
/// handed out by the pool gets it switched on.
#[derive(Debug, Clone, Copy)]
struct EnforceForeignKeys;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for EnforceForeignKeys {
    fn on_acquire(
        &self,
        conn: &mut SqliteConnection,
    ) -> std::result::Result<(), diesel::r2d2::Error> {
        diesel::sql_query("PRAGMA foreign_keys = ON")
            .execute(conn)
            .map(|_| ())
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Single standalone connection, foreign keys enforced. Callers pass this
/// (or a pooled one) explicitly into every core operation; there is no
/// ambient database handle.
pub fn establish(database_url: &str) -> Result<SqliteConnection> {
    let mut conn = SqliteConnection::establish(database_url)?;
    diesel::sql_query("PRAGMA foreign_keys = ON").execute(&mut conn)?;
    Ok(conn)
}

pub fn run_migrations(conn: &mut SqliteConnection) -> Result<()> {
    conn.run_pending_migrations(MIGRATIONS)
        .map(|_| ())
        .map_err(|e| Error::Migration(e.to_string()))
}

pub fn init_pool() -> Result<Pool> {
    dotenvy::dotenv().ok();
    let database_url =
        env::var("DATABASE_URL").map_err(|_| Error::Config("DATABASE_URL".to_owned()))?;
    init_pool_with_url(&database_url)
}

pub fn init_pool_with_url(database_url: &str) -> Result<Pool> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = Pool::builder()
        .connection_customizer(Box::new(EnforceForeignKeys))
        .build(manager)?;
    Ok(pool)
}

/// Fresh in-memory store with the full schema applied; every test gets its
/// own isolated instance.
#[cfg(test)]
pub(crate) fn test_conn() -> SqliteConnection {
    let mut conn = SqliteConnection::establish(":memory:").expect("in-memory sqlite");
    diesel::sql_query("PRAGMA foreign_keys = ON")
        .execute(&mut conn)
        .expect("enable foreign keys");
    conn.run_pending_migrations(MIGRATIONS).expect("migrations");
    conn
}
