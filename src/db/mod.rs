//! Postgres ledger backend: connection pool, migrations, health check.
//!
//! Item and actor operations live in the submodules and together
//! implement [`crate::ledger::Ledger`] for [`Db`].

pub mod actors;
pub mod items;

use crate::content::ContentKey;
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::model::{Actor, ActorId, Item, ItemId};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Database handle. Owns the connection pool.
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Ledger for Db {
    async fn create_item(&self, content_key: &ContentKey) -> Result<Item> {
        self.insert_item(content_key).await
    }

    async fn get_item(&self, id: ItemId) -> Result<Item> {
        self.fetch_item(id).await
    }

    async fn claim_next(&self) -> Result<Option<Item>> {
        self.claim_next_item().await
    }

    async fn assign(&self, id: ItemId, assignee_id: ActorId) -> Result<Item> {
        self.assign_item(id, assignee_id).await
    }

    async fn release(&self, id: ItemId) -> Result<Item> {
        self.release_item(id).await
    }

    async fn release_expired(&self, lease: Duration) -> Result<Vec<ItemId>> {
        self.release_claims_older_than(lease).await
    }

    async fn find_or_create_actor(&self, name: &str) -> Result<Actor> {
        self.upsert_actor(name).await
    }

    async fn get_actor(&self, id: ActorId) -> Result<Actor> {
        self.fetch_actor(id).await
    }
}

/// Translate constraint violations into domain errors; everything else
/// stays a persistence error.
pub(crate) fn classify(err: sqlx::Error, context: impl FnOnce() -> String) -> Error {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() {
            return Error::Constraint(format!("{}: {}", context(), db_err.message()));
        }
        if db_err.is_foreign_key_violation() {
            return Error::NotFound(context());
        }
    }
    Error::Persistence(err)
}
