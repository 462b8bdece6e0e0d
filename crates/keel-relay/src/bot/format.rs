//! Reply texts for chat commands.

use chrono::{DateTime, Utc};
use keel_relay_core::{ApprovalRecord, ApprovalState};
use regex::Regex;

use super::commands::ListOptions;
use crate::keel::{DailyStats, Resource, TrackedImage};
use crate::render::approval_text;

/// Grouped HTML listing for `/list`. Pending is always included.
pub fn approval_list(approvals: &[ApprovalRecord], options: ListOptions, now: DateTime<Utc>) -> String {
    let shown = [
        (ApprovalState::Archived, options.archived),
        (ApprovalState::Approved, options.approved),
        (ApprovalState::Rejected, options.rejected),
        (ApprovalState::Pending, true),
    ];
    shown
        .into_iter()
        .filter(|&(_, show)| show)
        .map(|(state, _)| {
            let items: Vec<&ApprovalRecord> =
                approvals.iter().filter(|a| a.state() == state).collect();
            section(state, &items, now)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn section(state: ApprovalState, items: &[&ApprovalRecord], now: DateTime<Utc>) -> String {
    let header = format!("<b>=== {} ({}) ===</b>", state.label(), items.len());
    if items.is_empty() {
        return header;
    }
    let body: Vec<String> = items
        .iter()
        .map(|a| format!("&gt; {}", approval_text(a, now)))
        .collect();
    format!("{header}\n\n{}", body.join("\n\n"))
}

/// Find the approval an `/approve`-style argument refers to: exact `id`
/// first, then exact `identifier`.
pub fn resolve_target<'a>(approvals: &'a [ApprovalRecord], key: &str) -> Option<&'a ApprovalRecord> {
    approvals
        .iter()
        .find(|a| a.id == key)
        .or_else(|| approvals.iter().find(|a| a.identifier == key))
}

/// Whether a resource matches the `/resources` regex on name, namespace,
/// policy or any of its images.
pub fn resource_matches(resource: &Resource, filter: &Regex) -> bool {
    filter.is_match(&resource.name)
        || filter.is_match(&resource.namespace)
        || filter.is_match(&resource.policy)
        || resource.images.iter().any(|i| filter.is_match(i))
}

pub fn resource_list(resources: &[&Resource]) -> String {
    if resources.is_empty() {
        return "No resources found".to_string();
    }
    resources
        .iter()
        .map(|r| {
            format!(
                "> {}/{} {} {}",
                r.namespace,
                r.name,
                if r.policy.is_empty() { "-" } else { &r.policy },
                r.images.join(", ")
            )
            .trim_end()
            .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn tracked_list(images: &[TrackedImage]) -> String {
    if images.is_empty() {
        return "No tracked images".to_string();
    }
    images
        .iter()
        .map(|t| {
            let mut line = format!("> {}", t.image);
            if !t.trigger.is_empty() {
                line.push_str(&format!(" trigger={}", t.trigger));
            }
            if !t.poll_schedule.is_empty() {
                line.push_str(&format!(" schedule={}", t.poll_schedule));
            }
            if !t.policy.is_empty() {
                line.push_str(&format!(" policy={}", t.policy));
            }
            if !t.namespace.is_empty() {
                line.push_str(&format!(" namespace={}", t.namespace));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn stats_list(stats: &[DailyStats]) -> String {
    if stats.is_empty() {
        return "No statistics available".to_string();
    }
    stats
        .iter()
        .map(|s| {
            let day = DateTime::from_timestamp(s.timestamp, 0)
                .map_or_else(|| s.timestamp.to_string(), |d| d.format("%Y-%m-%d").to_string());
            format!(
                "{day}: {} updates, {} approved, {} rejected, {} webhooks",
                s.updates, s.approvals_approved, s.approvals_rejected, s.webhooks_received
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use keel_relay_core::Provider;

    use super::*;
    use crate::keel::K8sStatus;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    fn approval(id: &str, identifier: &str) -> ApprovalRecord {
        ApprovalRecord {
            id: id.into(),
            identifier: identifier.into(),
            provider: Provider::Kubernetes,
            event: String::new(),
            message: format!("Update {identifier}"),
            current_version: "1".into(),
            new_version: "2".into(),
            digest: String::new(),
            votes_required: 1,
            votes_received: 0,
            voters: Vec::new(),
            archived: false,
            rejected: false,
            deadline: now(),
            created_at: now(),
            updated_at: now(),
        }
    }

    fn resource(name: &str, images: &[&str]) -> Resource {
        Resource {
            provider: Provider::Kubernetes,
            identifier: format!("deployment/default/{name}"),
            name: name.into(),
            namespace: "default".into(),
            kind: "deployment".into(),
            policy: "minor".into(),
            images: images.iter().map(|s| (*s).to_string()).collect(),
            labels: Default::default(),
            annotations: Default::default(),
            status: K8sStatus::default(),
        }
    }

    #[test]
    fn list_shows_pending_only_by_default() {
        let mut archived = approval("2", "b");
        archived.archived = true;
        let text = approval_list(&[approval("1", "a"), archived], ListOptions::default(), now());
        assert!(text.starts_with("<b>=== Pending (1) ===</b>"));
        assert!(text.contains("Id: 1"));
        assert!(!text.contains("Id: 2"));
        assert!(!text.contains("Archived"));
    }

    #[test]
    fn list_includes_requested_groups_in_order() {
        let mut archived = approval("2", "b");
        archived.archived = true;
        let mut rejected = approval("3", "c");
        rejected.rejected = true;
        let options = ListOptions {
            archived: true,
            approved: true,
            rejected: true,
        };
        let text = approval_list(&[approval("1", "a"), archived, rejected], options, now());
        let archived_at = text.find("=== Archived (1) ===").unwrap();
        let approved_at = text.find("=== Approved (0) ===").unwrap();
        let rejected_at = text.find("=== Rejected (1) ===").unwrap();
        let pending_at = text.find("=== Pending (1) ===").unwrap();
        assert!(archived_at < approved_at && approved_at < rejected_at && rejected_at < pending_at);
    }

    #[test]
    fn resolve_prefers_id_over_identifier() {
        let approvals = vec![approval("x", "abc"), approval("abc", "other")];
        assert_eq!(resolve_target(&approvals, "abc").unwrap().id, "abc");
        assert_eq!(resolve_target(&approvals, "other").unwrap().id, "abc");
        assert!(resolve_target(&approvals, "ab").is_none());
    }

    #[test]
    fn resource_filter_checks_images() {
        let re = Regex::new("nginx").unwrap();
        assert!(resource_matches(&resource("web", &["docker.io/nginx:1.25"]), &re));
        assert!(!resource_matches(&resource("db", &["postgres:16"]), &re));
    }

    #[test]
    fn resource_lines() {
        let r = resource("web", &["nginx:1", "sidecar:2"]);
        assert_eq!(resource_list(&[&r]), "> default/web minor nginx:1, sidecar:2");
        assert_eq!(resource_list(&[]), "No resources found");
    }

    #[test]
    fn stats_lines_use_dates() {
        let stats = vec![DailyStats {
            timestamp: 1_893_456_000,
            webhooks_received: 1,
            approvals_approved: 2,
            approvals_rejected: 3,
            updates: 4,
        }];
        assert_eq!(
            stats_list(&stats),
            "2030-01-01: 4 updates, 2 approved, 3 rejected, 1 webhooks"
        );
    }
}
