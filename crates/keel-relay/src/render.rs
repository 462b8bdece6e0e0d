//! Approval notification rendering.
//!
//! Pure functions: the output depends only on the record and the `now` passed
//! in, so reconciliation re-renders get a fresh countdown every tick.

use chrono::{DateTime, Utc};
use keel_relay_core::{ApprovalRecord, ApprovalState};

const CALLBACK_APPROVE: &str = "approve:";
const CALLBACK_REJECT: &str = "reject:";
const CALLBACK_NOOP: &str = "noop";

/// What an inline button does when clicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Approve(String),
    Reject(String),
    /// Informational indicator, clicking does nothing.
    Noop,
}

impl CallbackAction {
    /// Encode as Telegram `callback_data`.
    pub fn to_data(&self) -> String {
        match self {
            Self::Approve(id) => format!("{CALLBACK_APPROVE}{id}"),
            Self::Reject(id) => format!("{CALLBACK_REJECT}{id}"),
            Self::Noop => CALLBACK_NOOP.to_string(),
        }
    }

    /// Decode `callback_data`. Returns `None` for anything unrecognized.
    pub fn parse(data: &str) -> Option<Self> {
        if data == CALLBACK_NOOP {
            return Some(Self::Noop);
        }
        if let Some(id) = data.strip_prefix(CALLBACK_APPROVE).filter(|id| !id.is_empty()) {
            return Some(Self::Approve(id.to_string()));
        }
        if let Some(id) = data.strip_prefix(CALLBACK_REJECT).filter(|id| !id.is_empty()) {
            return Some(Self::Reject(id.to_string()));
        }
        None
    }
}

/// One inline button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionButton {
    pub label: String,
    pub action: CallbackAction,
}

/// Buttons attached to a notification, shown one per row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionMenu {
    pub buttons: Vec<ActionButton>,
}

impl ActionMenu {
    pub const fn empty() -> Self {
        Self {
            buttons: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buttons.is_empty()
    }

    fn indicator(label: &str) -> Self {
        Self {
            buttons: vec![ActionButton {
                label: label.to_string(),
                action: CallbackAction::Noop,
            }],
        }
    }

    /// Whether the menu offers a real vote rather than an indicator.
    pub fn is_actionable(&self) -> bool {
        self.buttons
            .iter()
            .any(|b| b.action != CallbackAction::Noop)
    }
}

/// Text and menu of an approval notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedApproval {
    pub text: String,
    pub menu: ActionMenu,
}

/// Render the notification for `approval` as of `now`.
pub fn render(approval: &ApprovalRecord, now: DateTime<Utc>) -> RenderedApproval {
    RenderedApproval {
        text: approval_text(approval, now),
        menu: action_menu(approval),
    }
}

/// HTML body of an approval notification.
pub fn approval_text(approval: &ApprovalRecord, now: DateTime<Utc>) -> String {
    let title = if approval.message.is_empty() {
        &approval.identifier
    } else {
        &approval.message
    };
    [
        format!("<b>{}</b>", escape_html(title)),
        format!("Id: {}", escape_html(&approval.id)),
        format!("Identifier: {}", escape_html(&approval.identifier)),
        format!(
            "Version: {} -&gt; {}",
            escape_html(&approval.current_version),
            escape_html(&approval.new_version)
        ),
        format!(
            "Votes: {}/{}",
            approval.votes_received, approval.votes_required
        ),
        format!(
            "Deadline: {} ({})",
            approval.deadline.format("%Y-%m-%d %H:%M:%S UTC"),
            countdown(approval.deadline, now)
        ),
    ]
    .join("\n")
}

/// Menu for the approval's current state.
pub fn action_menu(approval: &ApprovalRecord) -> ActionMenu {
    match approval.state() {
        ApprovalState::Archived => ActionMenu::indicator("Approved"),
        ApprovalState::Rejected => ActionMenu::indicator("Rejected"),
        ApprovalState::Pending => ActionMenu {
            buttons: vec![
                ActionButton {
                    label: "Approve".to_string(),
                    action: CallbackAction::Approve(approval.id.clone()),
                },
                ActionButton {
                    label: "Reject".to_string(),
                    action: CallbackAction::Reject(approval.id.clone()),
                },
            ],
        },
        ApprovalState::Approved => ActionMenu::empty(),
    }
}

/// Relative time until `deadline`, largest unit first with zero units omitted,
/// e.g. `2d3h` or `45m10s`. Past deadlines render as `expired`.
pub fn countdown(deadline: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let total = (deadline - now).num_seconds();
    if total <= 0 {
        return "expired".to_string();
    }

    let units = [
        (total / 86_400, 'd'),
        (total % 86_400 / 3_600, 'h'),
        (total % 3_600 / 60, 'm'),
        (total % 60, 's'),
    ];
    units
        .iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, unit)| format!("{n}{unit}"))
        .collect()
}

/// HTML text relayed for an inbound Keel webhook notification.
pub fn notification_text(name: &str, level: &str, identifier: &str, kind: &str, message: &str) -> String {
    [
        format!("<b>{}: {}</b>", escape_html(name), escape_html(level)),
        escape_html(identifier),
        escape_html(kind),
        escape_html(message),
    ]
    .join("\n")
}

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
