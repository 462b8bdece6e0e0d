//! Per-chat identifier filter rules.
//!
//! A chat without rules receives everything. A chat with rules only receives
//! approvals and notifications whose identifier matches at least one of its
//! regexes. Chats that are not configured receive nothing.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ChatId;
use crate::error::{Error, Result};

/// Filter rule as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterRule {
    pub chat_id: ChatId,
    /// Regex matched against approval and resource identifiers.
    pub identifier: String,
}

impl FilterRule {
    pub(crate) fn compile(&self) -> Result<Regex> {
        Regex::new(&self.identifier).map_err(|source| Error::InvalidFilter {
            chat_id: self.chat_id,
            pattern: self.identifier.clone(),
            source,
        })
    }
}

/// Compiled suppression predicate for the configured chats.
#[derive(Debug, Clone, Default)]
pub struct ChatFilters {
    chat_ids: Vec<ChatId>,
    known: HashSet<ChatId>,
    rules: HashMap<ChatId, Vec<Regex>>,
}

impl ChatFilters {
    /// Compile the rules for the given destination chats.
    pub fn new(chat_ids: &[ChatId], rules: &[FilterRule]) -> Result<Self> {
        let mut compiled: HashMap<ChatId, Vec<Regex>> = HashMap::new();
        for rule in rules {
            compiled.entry(rule.chat_id).or_default().push(rule.compile()?);
        }

        let mut ordered = Vec::with_capacity(chat_ids.len());
        let mut known = HashSet::with_capacity(chat_ids.len());
        for id in chat_ids {
            if known.insert(*id) {
                ordered.push(*id);
            }
        }

        Ok(Self {
            chat_ids: ordered,
            known,
            rules: compiled,
        })
    }

    /// Configured destination chats, in config order without duplicates.
    pub fn chat_ids(&self) -> &[ChatId] {
        &self.chat_ids
    }

    pub fn is_configured(&self, chat_id: ChatId) -> bool {
        self.known.contains(&chat_id)
    }

    /// Whether `identifier` must not be delivered to `chat_id`.
    pub fn is_suppressed(&self, chat_id: ChatId, identifier: &str) -> bool {
        if !self.is_configured(chat_id) {
            debug!(chat_id, identifier, "Suppressed: chat is not configured");
            return true;
        }
        let Some(patterns) = self.rules.get(&chat_id) else {
            return false;
        };
        let suppressed = !patterns.iter().any(|re| re.is_match(identifier));
        if suppressed {
            debug!(chat_id, identifier, "Suppressed: no filter rule matches");
        }
        suppressed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const IDENT: &str = "deployment/local-path-storage/local-path-provisioner:v0.0.22";

    fn rule(chat_id: ChatId, identifier: &str) -> FilterRule {
        FilterRule {
            chat_id,
            identifier: identifier.into(),
        }
    }

    #[test]
    fn chat_with_non_matching_rule_is_suppressed() {
        let filters = ChatFilters::new(
            &[123_456_789, -123_456_789_123_456],
            &[
                rule(123_456_789, ".*satisfactory.*"),
                rule(-123_456_789_123_456, ".*"),
            ],
        )
        .unwrap();

        assert!(filters.is_suppressed(123_456_789, IDENT));
        assert!(!filters.is_suppressed(-123_456_789_123_456, IDENT));
    }

    #[test]
    fn matching_rule_delivers() {
        let filters =
            ChatFilters::new(&[123_456], &[rule(123_456, ".*satisfactory.*")]).unwrap();
        assert!(!filters.is_suppressed(123_456, "deployment/gameservers/satisfactory"));
        assert!(filters.is_suppressed(123_456, "deployment/wiki/wiki"));
    }

    #[test]
    fn any_of_several_rules_may_match() {
        let filters = ChatFilters::new(
            &[1],
            &[rule(1, ".*wiki.*"), rule(1, ".*satisfactory.*")],
        )
        .unwrap();
        assert!(!filters.is_suppressed(1, "deployment/gameservers/satisfactory"));
        assert!(!filters.is_suppressed(1, "deployment/docs/wiki"));
        assert!(filters.is_suppressed(1, "deployment/db/postgres"));
    }

    #[test]
    fn rules_for_other_chats_do_not_apply() {
        let filters =
            ChatFilters::new(&[123_456], &[rule(654_321, ".*satisfactory.*")]).unwrap();
        assert!(!filters.is_suppressed(123_456, "deployment/gameservers/satisfactory"));
        assert!(!filters.is_suppressed(123_456, IDENT));
    }

    #[test]
    fn unknown_chat_is_always_suppressed() {
        let filters = ChatFilters::new(&[1], &[]).unwrap();
        assert!(filters.is_suppressed(2, IDENT));
    }

    #[test]
    fn chat_ids_are_deduplicated_in_order() {
        let filters = ChatFilters::new(&[3, 1, 3, 2], &[]).unwrap();
        assert_eq!(filters.chat_ids(), &[3, 1, 2]);
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let err = ChatFilters::new(&[1], &[rule(1, "[")]).unwrap_err();
        assert!(matches!(err, Error::InvalidFilter { chat_id: 1, .. }));
    }
}
