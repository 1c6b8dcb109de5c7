//! Assignment ledger: the authoritative catalog of items and actors.
//!
//! Two backends implement [`Ledger`]: [`crate::db::Db`] on Postgres and
//! [`MemoryLedger`] in process. Both must uphold the same claim contract:
//! `claim_next` never hands the same item to two callers and never waits
//! on a row another caller is mid-claiming.

pub mod memory;

pub use memory::MemoryLedger;

use std::future::Future;
use std::time::Duration;

use crate::content::ContentKey;
use crate::error::Result;
use crate::model::{Actor, ActorId, Item, ItemId};

pub trait Ledger: Send + Sync {
    /// Insert a new unassigned item. Duplicate keys are `Constraint` errors.
    fn create_item(&self, content_key: &ContentKey) -> impl Future<Output = Result<Item>> + Send;

    fn get_item(&self, id: ItemId) -> impl Future<Output = Result<Item>> + Send;

    /// Atomically claim the lowest-id unassigned item, skipping rows that
    /// another caller is currently claiming. `None` when nothing is available.
    fn claim_next(&self) -> impl Future<Output = Result<Option<Item>>> + Send;

    /// Record `assignee_id` on the item and move it to `assigned`.
    fn assign(
        &self,
        id: ItemId,
        assignee_id: ActorId,
    ) -> impl Future<Output = Result<Item>> + Send;

    /// Return a claimed item to the queue.
    fn release(&self, id: ItemId) -> impl Future<Output = Result<Item>> + Send;

    /// Release every claim held for longer than `lease`, measured against the
    /// backend's own clock (the one that stamped `claimed_at`). Returns the ids
    /// released.
    fn release_expired(&self, lease: Duration) -> impl Future<Output = Result<Vec<ItemId>>> + Send;

    /// Return the actor with this name, creating it if absent.
    fn find_or_create_actor(&self, name: &str) -> impl Future<Output = Result<Actor>> + Send;

    fn get_actor(&self, id: ActorId) -> impl Future<Output = Result<Actor>> + Send;
}
