//! Actor operations: find-or-create by name, lookup by id.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::{Actor, ActorId};

impl super::Db {
    /// Find the actor named `name`, inserting it if absent.
    ///
    /// `ON CONFLICT DO NOTHING` lets the unique index arbitrate a race on a
    /// new name: the loser gets no row back and re-reads the winner's.
    pub async fn upsert_actor(&self, name: &str) -> Result<Actor> {
        let inserted: Option<ActorRow> = sqlx::query_as(
            "INSERT INTO actors (name) VALUES ($1)
             ON CONFLICT (name) DO NOTHING
             RETURNING id, name, created_at",
        )
        .bind(name)
        .fetch_optional(self.pool())
        .await?;

        if let Some(row) = inserted {
            return Ok(row.into());
        }

        let existing: Option<ActorRow> =
            sqlx::query_as("SELECT id, name, created_at FROM actors WHERE name = $1")
                .bind(name)
                .fetch_optional(self.pool())
                .await?;

        existing
            .map(Actor::from)
            .ok_or_else(|| Error::NotFound(format!("actor {name:?}")))
    }

    pub async fn fetch_actor(&self, id: ActorId) -> Result<Actor> {
        let row: Option<ActorRow> =
            sqlx::query_as("SELECT id, name, created_at FROM actors WHERE id = $1")
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;

        row.map(Actor::from)
            .ok_or_else(|| Error::NotFound(format!("actor {id}")))
    }
}

#[derive(sqlx::FromRow)]
struct ActorRow {
    id: i64,
    name: String,
    created_at: DateTime<Utc>,
}

impl From<ActorRow> for Actor {
    fn from(row: ActorRow) -> Self {
        Self {
            id: ActorId(row.id),
            name: row.name,
            created_at: row.created_at,
        }
    }
}
