//! Item operations: insert, lookup, skip-locked claim, assign, release.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::classify;
use crate::content::ContentKey;
use crate::error::{Error, Result};
use crate::model::{ActorId, Item, ItemId, ItemState};

impl super::Db {
    /// Insert a new unassigned item referencing `content_key`.
    pub async fn insert_item(&self, content_key: &ContentKey) -> Result<Item> {
        let row: ItemRow = sqlx::query_as(
            "INSERT INTO items (content_key, state)
             VALUES ($1, 'unassigned')
             RETURNING id, content_key, assignee_id, state, claimed_at, created_at, updated_at",
        )
        .bind(content_key.as_str())
        .fetch_one(self.pool())
        .await
        .map_err(|e| classify(e, || format!("content key {content_key}")))?;

        row.try_into_item()
    }

    /// Get an item by ID.
    pub async fn fetch_item(&self, id: ItemId) -> Result<Item> {
        let row: Option<ItemRow> = sqlx::query_as(
            "SELECT id, content_key, assignee_id, state, claimed_at, created_at, updated_at
             FROM items WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("item {id}")))?
            .try_into_item()
    }

    /// Claim the lowest-id unassigned item in one statement.
    ///
    /// `FOR UPDATE SKIP LOCKED` makes concurrent claimers step over a row
    /// that another transaction is mid-claiming instead of queueing behind it.
    pub async fn claim_next_item(&self) -> Result<Option<Item>> {
        let row: Option<ItemRow> = sqlx::query_as(
            "UPDATE items SET state = 'claimed', claimed_at = now(), updated_at = now()
             WHERE id = (
                 SELECT id FROM items
                 WHERE state = 'unassigned'
                 ORDER BY id ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, content_key, assignee_id, state, claimed_at, created_at, updated_at",
        )
        .fetch_optional(self.pool())
        .await?;

        row.map(ItemRow::try_into_item).transpose()
    }

    /// Assign an unassigned or claimed item.
    pub async fn assign_item(&self, id: ItemId, assignee_id: ActorId) -> Result<Item> {
        let row: Option<ItemRow> = sqlx::query_as(
            "UPDATE items SET assignee_id = $2, state = 'assigned', claimed_at = NULL, updated_at = now()
             WHERE id = $1 AND state IN ('unassigned', 'claimed')
             RETURNING id, content_key, assignee_id, state, claimed_at, created_at, updated_at",
        )
        .bind(id.0)
        .bind(assignee_id.0)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| classify(e, || format!("actor {assignee_id}")))?;

        match row {
            Some(row) => row.try_into_item(),
            None => Err(self.rejected_transition(id, ItemState::Assigned).await),
        }
    }

    /// Return a claimed item to the queue.
    pub async fn release_item(&self, id: ItemId) -> Result<Item> {
        let row: Option<ItemRow> = sqlx::query_as(
            "UPDATE items SET state = 'unassigned', claimed_at = NULL, updated_at = now()
             WHERE id = $1 AND state = 'claimed'
             RETURNING id, content_key, assignee_id, state, claimed_at, created_at, updated_at",
        )
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => row.try_into_item(),
            None => Err(self.rejected_transition(id, ItemState::Unassigned).await),
        }
    }

    /// Release every claim held for longer than `lease`. The cutoff is
    /// computed by Postgres, on the same clock that stamped `claimed_at`.
    pub async fn release_claims_older_than(&self, lease: Duration) -> Result<Vec<ItemId>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "UPDATE items SET state = 'unassigned', claimed_at = NULL, updated_at = now()
             WHERE state = 'claimed' AND claimed_at < now() - make_interval(secs => $1)
             RETURNING id",
        )
        .bind(lease.as_secs_f64())
        .fetch_all(self.pool())
        .await?;

        let mut ids: Vec<ItemId> = rows.into_iter().map(|(id,)| ItemId(id)).collect();
        ids.sort();
        Ok(ids)
    }

    /// Explain why a guarded UPDATE matched no row.
    async fn rejected_transition(&self, id: ItemId, to: ItemState) -> Error {
        match self.fetch_item(id).await {
            Ok(item) => Error::InvalidTransition {
                id,
                from: item.state,
                to,
            },
            Err(e) => e,
        }
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct ItemRow {
    id: i64,
    content_key: String,
    assignee_id: Option<i64>,
    state: String,
    claimed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ItemRow {
    fn try_into_item(self) -> Result<Item> {
        let content_key = ContentKey::parse(&self.content_key).map_err(|_| {
            Error::ConsistencyFault(format!(
                "item {} has malformed content key {:?}",
                self.id, self.content_key
            ))
        })?;

        Ok(Item {
            id: ItemId(self.id),
            content_key,
            assignee_id: self.assignee_id.map(ActorId),
            state: self.state.parse()?,
            claimed_at: self.claimed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
