//! Queue service: submit, claim, edit-and-assign.
//!
//! Composes a [`Ledger`] (who owns what) with a [`ContentStore`] (the
//! bytes). There is no transaction spanning the two, so each workflow
//! fixes an order of steps and reports any failure as a single error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tracing::{Instrument, error, info, warn};

use crate::content::ContentStore;
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::model::{Actor, ActorId, Item, ItemId, ItemState, ItemView};
use crate::telemetry::metrics;
use crate::telemetry::queue::{record_item, record_state_transition, start_queue_span};

pub struct QueueService<L> {
    ledger: Arc<L>,
    content: ContentStore,
}

impl<L> Clone for QueueService<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            content: self.content.clone(),
        }
    }
}

impl<L: Ledger> QueueService<L> {
    pub fn new(ledger: Arc<L>, content: ContentStore) -> Self {
        Self { ledger, content }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    /// Store `content` and queue a new unassigned item for it.
    ///
    /// The blob is written first. If the ledger insert then fails the blob
    /// is left orphaned: logged and counted, never deleted here.
    pub async fn submit(&self, content: &str) -> Result<ItemId> {
        let span = start_queue_span("submit");
        async {
            let started = Instant::now();
            let key = self.content.write_new(content).await?;

            let item = match self.ledger.create_item(&key).await {
                Ok(item) => item,
                Err(e) => {
                    warn!(content_key = %key, error = %e, "ledger insert failed, blob orphaned");
                    metrics::orphaned_blobs().add(1, &[]);
                    metrics::items_submitted().add(1, &[KeyValue::new("result", "error")]);
                    return Err(e);
                }
            };

            record_item(&span, item.id.0);
            info!(id = %item.id, content_key = %key, "item submitted");
            metrics::items_submitted().add(1, &[KeyValue::new("result", "ok")]);
            record_duration("submit", started);
            Ok(item.id)
        }
        .instrument(span.clone())
        .await
    }

    /// Claim the next available item and read its content.
    ///
    /// `Ok(None)` means nothing is claimable right now. A claimed row whose
    /// blob is missing is a [`Error::ConsistencyFault`]; the claim is kept
    /// so other callers do not trip over the same row.
    pub async fn next_available(&self) -> Result<Option<ItemView>> {
        let span = start_queue_span("next_available");
        async {
            let started = Instant::now();
            let claimed = self.ledger.claim_next().await.inspect_err(|_| {
                metrics::item_claims().add(1, &[KeyValue::new("result", "error")]);
            })?;

            let Some(item) = claimed else {
                metrics::item_claims().add(1, &[KeyValue::new("result", "empty")]);
                return Ok(None);
            };

            record_item(&span, item.id.0);
            record_state_transition(&span, "unassigned", "claimed");
            metrics::item_claims().add(1, &[KeyValue::new("result", "claimed")]);

            let content = self
                .content
                .read(&item.content_key)
                .await
                .map_err(|e| missing_content(&item, "next_available", e))?;

            record_duration("next_available", started);
            Ok(Some(ItemView { item, content }))
        }
        .instrument(span.clone())
        .await
    }

    /// Overwrite an item's content and assign it to `assignee_id`.
    ///
    /// Order: check actor and item state, snapshot the old content,
    /// overwrite, then assign. The content lock for the item is held
    /// throughout. If the assignment fails after the overwrite landed, the
    /// snapshot is written back and the assignment error returned; if that
    /// restore also fails the result is a [`Error::ConsistencyFault`].
    pub async fn edit_and_assign(
        &self,
        id: ItemId,
        new_content: &str,
        assignee_id: ActorId,
    ) -> Result<ItemId> {
        let span = start_queue_span("edit_and_assign");
        record_item(&span, id.0);
        async {
            let started = Instant::now();
            let result = self.apply_edit(id, new_content, assignee_id).await;
            match &result {
                Ok((from, item)) => {
                    record_state_transition(&span, from.as_str(), "assigned");
                    info!(id = %item.id, assignee = %assignee_id, "item edited and assigned");
                    metrics::item_edits().add(1, &[KeyValue::new("result", "ok")]);
                    record_duration("edit_and_assign", started);
                }
                Err(e) => {
                    warn!(id = %id, error = %e, "edit and assign failed");
                    metrics::item_edits().add(1, &[KeyValue::new("result", "error")]);
                }
            }
            result.map(|(_, item)| item.id)
        }
        .instrument(span.clone())
        .await
    }

    /// Returns the state the item was in before the assignment.
    async fn apply_edit(
        &self,
        id: ItemId,
        new_content: &str,
        assignee_id: ActorId,
    ) -> Result<(ItemState, Item)> {
        self.ledger.get_actor(assignee_id).await?;

        // content_key is immutable, so it is safe to lock before re-reading state.
        let key = self.ledger.get_item(id).await?.content_key;
        let blob = self.content.lock(&key).await;

        let item = self.ledger.get_item(id).await?;
        if !item.state.can_transition_to(ItemState::Assigned) {
            return Err(Error::InvalidTransition {
                id,
                from: item.state,
                to: ItemState::Assigned,
            });
        }

        let previous = blob
            .read()
            .await
            .map_err(|e| missing_content(&item, "edit_and_assign", e))?;
        blob.overwrite(new_content)
            .await
            .map_err(|e| missing_content(&item, "edit_and_assign", e))?;

        let assign_err = match self.ledger.assign(id, assignee_id).await {
            Ok(assigned) => return Ok((item.state, assigned)),
            Err(e) => e,
        };

        match blob.overwrite(&previous).await {
            Ok(()) => {
                warn!(id = %id, error = %assign_err, "assignment failed, previous content restored");
                metrics::item_edits().add(1, &[KeyValue::new("result", "compensated")]);
                Err(assign_err)
            }
            Err(restore_err) => {
                error!(
                    id = %id,
                    content_key = %key,
                    assign_error = %assign_err,
                    restore_error = %restore_err,
                    "content edited but not assigned"
                );
                metrics::consistency_faults()
                    .add(1, &[KeyValue::new("operation", "edit_and_assign")]);
                Err(Error::ConsistencyFault(format!(
                    "item {id}: assignment failed ({assign_err}) and restoring content failed ({restore_err})"
                )))
            }
        }
    }

    /// Return the actor called `name`, creating it on first reference.
    pub async fn find_or_create_actor(&self, name: &str) -> Result<Actor> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("actor name must not be empty".to_string()));
        }
        let actor = self.ledger.find_or_create_actor(name).await?;
        info!(actor = %actor.id, name = %actor.name, "actor resolved");
        Ok(actor)
    }

    /// Read an item and its current content without claiming it.
    pub async fn get(&self, id: ItemId) -> Result<ItemView> {
        let item = self.ledger.get_item(id).await?;
        let content = self
            .content
            .read(&item.content_key)
            .await
            .map_err(|e| missing_content(&item, "get", e))?;
        Ok(ItemView { item, content })
    }

    /// Give up a claim, returning the item to the queue.
    pub async fn release(&self, id: ItemId) -> Result<Item> {
        let item = self.ledger.release(id).await?;
        info!(id = %id, "claim released");
        metrics::items_released().add(1, &[KeyValue::new("reason", "explicit")]);
        Ok(item)
    }

    /// Release every claim older than `lease`.
    pub async fn release_expired(&self, lease: Duration) -> Result<Vec<ItemId>> {
        let released = self.ledger.release_expired(lease).await?;
        if !released.is_empty() {
            info!(count = released.len(), ids = ?released, "expired claims released");
            metrics::items_released().add(
                released.len() as u64,
                &[KeyValue::new("reason", "lease")],
            );
        }
        Ok(released)
    }
}

/// A ledger row whose blob is gone is a consistency fault, not a plain miss.
fn missing_content(item: &Item, operation: &'static str, err: Error) -> Error {
    match err {
        Error::NotFound(_) => {
            error!(
                id = %item.id,
                content_key = %item.content_key,
                operation,
                "ledger row references missing content"
            );
            metrics::consistency_faults().add(1, &[KeyValue::new("operation", operation)]);
            Error::ConsistencyFault(format!(
                "item {} references missing content {}",
                item.id, item.content_key
            ))
        }
        other => other,
    }
}

fn record_duration(operation: &'static str, started: Instant) {
    metrics::operation_duration_ms().record(
        started.elapsed().as_secs_f64() * 1000.0,
        &[KeyValue::new("operation", operation)],
    );
}
