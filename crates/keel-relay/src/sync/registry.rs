//! Mapping from approvals to the chat messages that show them.
//!
//! Owned by the sync engine task; not synchronized.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use keel_relay_core::{ChatId, MessageId};
use tracing::debug;

use super::MessageRef;

/// Messages per chat for one approval.
pub type Locations = BTreeMap<ChatId, BTreeSet<MessageId>>;

#[derive(Debug, Default)]
struct Entry {
    /// Display only; the map key is the approval id.
    identifier: String,
    locations: Locations,
}

/// Registry of sent approval notifications, keyed by approval id.
#[derive(Debug, Default)]
pub struct MessageRegistry {
    entries: HashMap<String, Entry>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `location` shows approval `approval_id`. Idempotent.
    ///
    /// Returns `true` if the location was not known before.
    pub fn register(&mut self, approval_id: &str, identifier: &str, location: MessageRef) -> bool {
        let entry = self
            .entries
            .entry(approval_id.to_string())
            .or_insert_with(|| Entry {
                identifier: identifier.to_string(),
                locations: Locations::new(),
            });
        if entry.identifier != identifier {
            entry.identifier = identifier.to_string();
        }
        let added = entry
            .locations
            .entry(location.chat_id)
            .or_default()
            .insert(location.message_id);
        if added {
            debug!(
                approval_id,
                identifier,
                chat_id = location.chat_id,
                message_id = location.message_id,
                "Registered approval message"
            );
        }
        added
    }

    /// Known locations of an approval. Empty if none.
    pub fn locations_for(&self, approval_id: &str) -> Locations {
        self.entries
            .get(approval_id)
            .map(|e| e.locations.clone())
            .unwrap_or_default()
    }

    /// Known locations of an approval as a flat list, ordered by chat then message.
    pub fn message_refs(&self, approval_id: &str) -> Vec<MessageRef> {
        self.entries
            .get(approval_id)
            .map(|e| {
                e.locations
                    .iter()
                    .flat_map(|(chat_id, ids)| {
                        ids.iter().map(|message_id| MessageRef {
                            chat_id: *chat_id,
                            message_id: *message_id,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ids of every approval with at least one location, in no particular order.
    pub fn approval_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Identifier recorded when the approval was last registered.
    pub fn identifier(&self, approval_id: &str) -> Option<&str> {
        self.entries.get(approval_id).map(|e| e.identifier.as_str())
    }

    /// Remove one location. An approval whose last location is removed is
    /// dropped from the registry.
    ///
    /// Returns `true` if the location was known.
    pub fn forget(&mut self, approval_id: &str, location: MessageRef) -> bool {
        let Some(entry) = self.entries.get_mut(approval_id) else {
            return false;
        };
        let Some(ids) = entry.locations.get_mut(&location.chat_id) else {
            return false;
        };
        let removed = ids.remove(&location.message_id);
        if ids.is_empty() {
            entry.locations.remove(&location.chat_id);
        }
        if removed {
            debug!(
                approval_id,
                identifier = %entry.identifier,
                chat_id = location.chat_id,
                message_id = location.message_id,
                "Forgot approval message"
            );
        }
        if entry.locations.is_empty() {
            self.entries.remove(approval_id);
        }
        removed
    }

    pub fn contains(&self, approval_id: &str) -> bool {
        self.entries.contains_key(approval_id)
    }

    /// Number of approvals with at least one location.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of tracked messages.
    pub fn message_count(&self) -> usize {
        self.entries
            .values()
            .flat_map(|e| e.locations.values())
            .map(BTreeSet::len)
            .sum()
    }
}
