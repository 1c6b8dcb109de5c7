//! Core data model.
//!
//! An item is a queued message: a ledger row pointing at a content blob,
//! optionally assigned to an actor. Actors are the people who write and
//! review messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::ContentKey;
use crate::error::Error;

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

/// A queue entry tracked by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Monotonically assigned identity. Claims prefer the lowest id.
    pub id: ItemId,

    /// Handle into the content store. Immutable after creation.
    pub content_key: ContentKey,

    /// Who the item is assigned to. None means unassigned.
    pub assignee_id: Option<ActorId>,

    /// Current lifecycle state.
    pub state: ItemState,

    /// When the current claim was taken. Cleared on assign and release.
    pub claimed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Newtype for item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub i64);

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Submitted, waiting to be claimed.
    Unassigned,
    /// Handed out by `claim_next`, edit in progress.
    Claimed,
    /// Edited and assigned. Terminal.
    Assigned,
}

impl ItemState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: ItemState) -> bool {
        use ItemState::*;
        matches!(
            (self, to),
            (Unassigned, Claimed)
                | (Unassigned, Assigned) // direct edit of a known id
                | (Claimed, Assigned)
                | (Claimed, Unassigned) // release or lease expiry
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ItemState::Assigned)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemState::Unassigned => "unassigned",
            ItemState::Claimed => "claimed",
            ItemState::Assigned => "assigned",
        }
    }
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unassigned" => Ok(ItemState::Unassigned),
            "claimed" => Ok(ItemState::Claimed),
            "assigned" => Ok(ItemState::Assigned),
            other => Err(Error::Other(format!("unknown item state: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// A message author or assignee. Created lazily by name, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    /// Unique, immutable handle.
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(pub i64);

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// An item together with its content as read at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemView {
    pub item: Item,
    pub content: String,
}
