use std::time::Duration;

use diesel::{
    connection::SimpleConnection,
    r2d2::{self, ConnectionManager, CustomizeConnection},
    sqlite::SqliteConnection,
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::{
    config::app::DatabaseConfig,
    error::{ServiceError, ServiceResult},
};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type Connection = SqliteConnection;
pub type Pool = r2d2::Pool<ConnectionManager<Connection>>;

/// Per-connection settings. SQLite scopes both pragmas to the connection, so
/// they are applied every time the pool hands one out for the first time.
#[derive(Debug, Clone, Copy)]
struct ConnectionPragmas {
    busy_timeout: Duration,
}

impl CustomizeConnection<Connection, r2d2::Error> for ConnectionPragmas {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
            self.busy_timeout.as_millis()
        ))
        .map_err(r2d2::Error::QueryError)
    }
}

/// Opens the document file, switches it to WAL and applies pending migrations.
pub fn init_db_pool(config: &DatabaseConfig) -> ServiceResult<Pool> {
    log::info!("Configuring SQLite document store at {}", config.url);

    let manager = ConnectionManager::<Connection>::new(config.url.as_str());
    let pool = r2d2::Pool::builder()
        .max_size(config.pool_size)
        .connection_customizer(Box::new(ConnectionPragmas {
            busy_timeout: config.busy_timeout,
        }))
        .build(manager)
        .map_err(|err| {
            log::error!("Failed to create database pool: {}", err);
            ServiceError::from(err).with_context(|ctx| ctx.with_metadata("url", config.url.clone()))
        })?;

    let mut conn = pool.get()?;
    conn.batch_execute("PRAGMA journal_mode = WAL;")
        .map_err(|err| {
            log::error!("Failed to enable WAL journal: {}", err);
            ServiceError::from(err).with_tag("pool")
        })?;
    run_migrations(&mut conn)?;

    Ok(pool)
}

pub fn run_migrations(conn: &mut Connection) -> ServiceResult<()> {
    let applied = conn.run_pending_migrations(MIGRATIONS).map_err(|err| {
        log::error!("Failed to run database migrations: {}", err);
        ServiceError::storage_failure("Failed to run database migrations")
            .with_context(|ctx| ctx.with_tag("migrations").with_detail(err.to_string()))
    })?;

    for version in &applied {
        log::info!("Applied migration {}", version);
    }
    Ok(())
}
