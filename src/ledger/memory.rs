//! In-process ledger backend.
//!
//! All state sits behind one mutex that is never held across an await,
//! so every operation is atomic and a claim can never be observed half
//! done. Used for tests and single-process embedding.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::Ledger;
use crate::content::ContentKey;
use crate::error::{Error, Result};
use crate::model::{Actor, ActorId, Item, ItemId, ItemState};

#[derive(Debug, Default)]
struct Tables {
    // BTreeMap keeps ids ordered, so the first unassigned entry is the lowest id.
    items: BTreeMap<ItemId, Item>,
    actors: BTreeMap<ActorId, Actor>,
    actor_names: HashMap<String, ActorId>,
    content_keys: HashMap<ContentKey, ItemId>,
    next_item_id: i64,
    next_actor_id: i64,
}

/// Mutex-guarded ledger with the same semantics as the Postgres backend.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    tables: Mutex<Tables>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| Error::Other("memory ledger lock poisoned".to_string()))
    }
}

fn transition(item: &mut Item, to: ItemState, now: DateTime<Utc>) -> Result<()> {
    if !item.state.can_transition_to(to) {
        return Err(Error::InvalidTransition {
            id: item.id,
            from: item.state,
            to,
        });
    }
    item.state = to;
    item.updated_at = now;
    item.claimed_at = (to == ItemState::Claimed).then_some(now);
    Ok(())
}

impl Ledger for MemoryLedger {
    async fn create_item(&self, content_key: &ContentKey) -> Result<Item> {
        let mut tables = self.tables()?;
        if tables.content_keys.contains_key(content_key) {
            return Err(Error::Constraint(format!(
                "content key {content_key} already referenced"
            )));
        }

        tables.next_item_id += 1;
        let id = ItemId(tables.next_item_id);
        let now = Utc::now();
        let item = Item {
            id,
            content_key: content_key.clone(),
            assignee_id: None,
            state: ItemState::Unassigned,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        };
        tables.content_keys.insert(content_key.clone(), id);
        tables.items.insert(id, item.clone());
        Ok(item)
    }

    async fn get_item(&self, id: ItemId) -> Result<Item> {
        self.tables()?
            .items
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("item {id}")))
    }

    async fn claim_next(&self) -> Result<Option<Item>> {
        let mut tables = self.tables()?;
        let Some(item) = tables
            .items
            .values_mut()
            .find(|item| item.state == ItemState::Unassigned)
        else {
            return Ok(None);
        };
        transition(item, ItemState::Claimed, Utc::now())?;
        Ok(Some(item.clone()))
    }

    async fn assign(&self, id: ItemId, assignee_id: ActorId) -> Result<Item> {
        let mut tables = self.tables()?;
        if !tables.actors.contains_key(&assignee_id) {
            return Err(Error::NotFound(format!("actor {assignee_id}")));
        }
        let item = tables
            .items
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("item {id}")))?;
        transition(item, ItemState::Assigned, Utc::now())?;
        item.assignee_id = Some(assignee_id);
        Ok(item.clone())
    }

    async fn release(&self, id: ItemId) -> Result<Item> {
        let mut tables = self.tables()?;
        let item = tables
            .items
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("item {id}")))?;
        if item.state != ItemState::Claimed {
            return Err(Error::InvalidTransition {
                id,
                from: item.state,
                to: ItemState::Unassigned,
            });
        }
        transition(item, ItemState::Unassigned, Utc::now())?;
        Ok(item.clone())
    }

    async fn release_expired(&self, lease: Duration) -> Result<Vec<ItemId>> {
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| Error::InvalidInput(format!("claim lease out of range: {e}")))?;
        let mut tables = self.tables()?;
        let now = Utc::now();
        let claimed_before = now
            .checked_sub_signed(lease)
            .ok_or_else(|| Error::InvalidInput("claim lease out of range".to_string()))?;
        let mut released = Vec::new();
        for item in tables.items.values_mut() {
            let expired = item.state == ItemState::Claimed
                && item.claimed_at.is_some_and(|at| at < claimed_before);
            if expired {
                transition(item, ItemState::Unassigned, now)?;
                released.push(item.id);
            }
        }
        Ok(released)
    }

    async fn find_or_create_actor(&self, name: &str) -> Result<Actor> {
        let mut tables = self.tables()?;
        if let Some(id) = tables.actor_names.get(name) {
            return tables
                .actors
                .get(id)
                .cloned()
                .ok_or_else(|| Error::Other(format!("actor index out of sync for {name:?}")));
        }

        tables.next_actor_id += 1;
        let actor = Actor {
            id: ActorId(tables.next_actor_id),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        tables.actor_names.insert(actor.name.clone(), actor.id);
        tables.actors.insert(actor.id, actor.clone());
        Ok(actor)
    }

    async fn get_actor(&self, id: ActorId) -> Result<Actor> {
        self.tables()?
            .actors
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("actor {id}")))
    }
}
