//! Detection of newly appeared approvals.

use std::collections::HashSet;

use keel_relay_core::ApprovalRecord;

/// Items of `current` whose `id` does not occur in `previous`, in `current`
/// order.
///
/// Identity is the `id` alone; `identifier` can recur across approval cycles.
/// If `current` repeats an id, only its first occurrence is returned.
pub fn new_items<'a>(
    previous: &[ApprovalRecord],
    current: &'a [ApprovalRecord],
) -> Vec<&'a ApprovalRecord> {
    let known: HashSet<&str> = previous.iter().map(|a| a.id.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::with_capacity(current.len());
    current
        .iter()
        .filter(|a| !known.contains(a.id.as_str()))
        .filter(|a| seen.insert(a.id.as_str()))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use keel_relay_core::Provider;

    use super::*;

    fn approval(id: &str, identifier: &str) -> ApprovalRecord {
        let t = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        ApprovalRecord {
            id: id.into(),
            identifier: identifier.into(),
            provider: Provider::Kubernetes,
            event: String::new(),
            message: String::new(),
            current_version: String::new(),
            new_version: String::new(),
            digest: String::new(),
            votes_required: 1,
            votes_received: 0,
            voters: Vec::new(),
            archived: false,
            rejected: false,
            deadline: t,
            created_at: t,
            updated_at: t,
        }
    }

    fn ids(items: &[&ApprovalRecord]) -> Vec<String> {
        items.iter().map(|a| a.id.clone()).collect()
    }

    #[test]
    fn returns_items_missing_from_previous() {
        let previous = vec![approval("1", "a")];
        let current = vec![approval("1", "a"), approval("2", "b"), approval("3", "c")];
        assert_eq!(ids(&new_items(&previous, &current)), vec!["2", "3"]);
    }

    #[test]
    fn empty_previous_returns_everything() {
        let current = vec![approval("1", "a")];
        assert_eq!(ids(&new_items(&[], &current)), vec!["1"]);
    }

    #[test]
    fn subset_yields_nothing() {
        let previous = vec![approval("1", "a"), approval("2", "b")];
        let current = vec![approval("2", "b")];
        assert!(new_items(&previous, &current).is_empty());
    }

    #[test]
    fn recurring_identifier_with_new_id_is_new() {
        let previous = vec![approval("1", "deployment/default/wiki:1.1.0")];
        let current = vec![approval("2", "deployment/default/wiki:1.1.0")];
        assert_eq!(ids(&new_items(&previous, &current)), vec!["2"]);
    }

    #[test]
    fn duplicate_ids_first_occurrence_wins() {
        let current = vec![approval("1", "first"), approval("1", "second")];
        let out = new_items(&[], &current);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].identifier, "first");
    }

    #[test]
    fn matches_set_definition() {
        let previous = vec![approval("a", "x"), approval("c", "x")];
        let current = vec![
            approval("a", "x"),
            approval("b", "x"),
            approval("c", "x"),
            approval("d", "x"),
        ];
        let prev_ids: HashSet<&str> = previous.iter().map(|a| a.id.as_str()).collect();
        let expected: Vec<String> = current
            .iter()
            .filter(|a| !prev_ids.contains(a.id.as_str()))
            .map(|a| a.id.clone())
            .collect();
        assert_eq!(ids(&new_items(&previous, &current)), expected);
    }
}
