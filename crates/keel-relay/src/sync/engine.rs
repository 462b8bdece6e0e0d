//! The sync engine actor.
//!
//! One task owns the [`MessageRegistry`] and the previous poll snapshot. It
//! runs a tick on every interval and serves reconciliation requests from a
//! command channel, so ticks and on-demand reconciliations never overlap.
//!
//! A tick fetches every approval once and then:
//! 1. Reconciles: re-renders each approval that has registered messages and
//!    edits those messages in place. Permanent edit failures forget the
//!    message; transient ones keep it for the next tick.
//! 2. Discovers: diffs the decidable approvals against the previous snapshot
//!    and sends a notification to every chat that does not suppress it. The
//!    first tick only records the baseline.
//! 3. Stores the decidable approvals as the new snapshot.
//!
//! A failed fetch aborts the tick and leaves the snapshot untouched.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use keel_relay_core::{ApprovalRecord, ChatFilters, metrics};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::diff::new_items;
use super::registry::MessageRegistry;
use super::{ApprovalSource, ChatDelivery};
use crate::keel::ApprovalFilter;
use crate::render::render;

/// Capacity of the engine command channel.
const COMMAND_BUFFER: usize = 16;

/// Errors returned by [`SyncHandle`].
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync engine is not running")]
    Stopped,
}

/// Counters describing one tick or reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// The upstream fetch failed; nothing else ran.
    pub fetch_failed: bool,
    /// First successful tick, only the snapshot was recorded.
    pub baseline: bool,
    pub fetched: usize,
    pub new: usize,
    pub sent: usize,
    pub send_failures: usize,
    pub edited: usize,
    pub edit_failures: usize,
    pub forgotten: usize,
    /// Registered approvals missing from the fetch, deleted upstream.
    pub vanished: usize,
}

impl TickReport {
    fn is_quiet(&self) -> bool {
        self.new == 0 && self.send_failures == 0 && self.edit_failures == 0 && self.forgotten == 0
    }
}

#[derive(Debug)]
enum SyncCommand {
    /// Run the reconciliation phase now and report back.
    Reconcile { done: oneshot::Sender<TickReport> },
    Shutdown,
}

/// Cloneable handle to a running [`SyncEngine`].
#[derive(Debug, Clone)]
pub struct SyncHandle {
    command_tx: mpsc::Sender<SyncCommand>,
}

impl SyncHandle {
    /// Re-render and edit all registered messages now. Waits until the pass
    /// has finished, queueing behind a tick that is already running.
    pub async fn trigger_reconciliation(&self) -> Result<TickReport, SyncError> {
        let (done, rx) = oneshot::channel();
        self.command_tx
            .send(SyncCommand::Reconcile { done })
            .await
            .map_err(|_| SyncError::Stopped)?;
        rx.await.map_err(|_| SyncError::Stopped)
    }

    /// Ask the engine to stop after the current tick.
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        self.command_tx
            .send(SyncCommand::Shutdown)
            .await
            .map_err(|_| SyncError::Stopped)
    }
}

/// Approval poller and message synchronizer.
pub struct SyncEngine<S, C> {
    source: Arc<S>,
    chat: Arc<C>,
    filters: Arc<ChatFilters>,
    registry: MessageRegistry,
    /// Decidable approvals of the last successful fetch. `None` until the
    /// baseline tick.
    previous: Option<Vec<ApprovalRecord>>,
    /// Forget settled approvals after their first successful edit.
    skip_settled: bool,
}

impl<S, C> SyncEngine<S, C>
where
    S: ApprovalSource,
    C: ChatDelivery,
{
    pub fn new(source: Arc<S>, chat: Arc<C>, filters: Arc<ChatFilters>) -> Self {
        Self {
            source,
            chat,
            filters,
            registry: MessageRegistry::new(),
            previous: None,
            skip_settled: false,
        }
    }

    #[must_use]
    pub fn with_skip_settled(mut self, skip_settled: bool) -> Self {
        self.skip_settled = skip_settled;
        self
    }

    pub const fn registry(&self) -> &MessageRegistry {
        &self.registry
    }

    pub fn snapshot(&self) -> Option<&[ApprovalRecord]> {
        self.previous.as_deref()
    }

    /// Run one full tick.
    pub async fn tick(&mut self) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();

        let approvals = match self.source.fetch_approvals(ApprovalFilter::ALL).await {
            Ok(approvals) => approvals,
            Err(e) => {
                warn!(error = %e, "Failed to fetch approvals, skipping tick");
                report.fetch_failed = true;
                return report;
            }
        };
        report.fetched = approvals.len();

        self.reconcile_with(&approvals, &mut report).await;

        let decidable: Vec<ApprovalRecord> = approvals
            .into_iter()
            .filter(|a| ApprovalFilter::DECIDABLE.matches(a))
            .collect();

        match self.previous.take() {
            Some(previous) => {
                let fresh: Vec<ApprovalRecord> =
                    new_items(&previous, &decidable).into_iter().cloned().collect();
                self.discover(&fresh, &mut report).await;
            }
            None => {
                report.baseline = true;
                info!(
                    pending = decidable.len(),
                    "Recorded baseline of pending approvals"
                );
            }
        }
        self.previous = Some(decidable);

        metrics::record_tick_duration(started.elapsed().as_secs_f64());
        if report.is_quiet() {
            debug!(?report, "Sync tick finished");
        } else {
            info!(?report, "Sync tick finished");
        }
        report
    }

    /// Run only the reconciliation phase against a fresh fetch.
    pub async fn reconcile(&mut self) -> TickReport {
        let mut report = TickReport::default();
        match self.source.fetch_approvals(ApprovalFilter::ALL).await {
            Ok(approvals) => {
                report.fetched = approvals.len();
                self.reconcile_with(&approvals, &mut report).await;
                debug!(?report, "Reconciliation finished");
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch approvals for reconciliation");
                report.fetch_failed = true;
            }
        }
        report
    }

    async fn reconcile_with(&mut self, approvals: &[ApprovalRecord], report: &mut TickReport) {
        let fetched: HashSet<&str> = approvals.iter().map(|a| a.id.as_str()).collect();
        for approval_id in self.registry.approval_ids() {
            if fetched.contains(approval_id) {
                continue;
            }
            debug!(
                approval_id,
                identifier = self.registry.identifier(approval_id).unwrap_or_default(),
                "Registered approval no longer reported by Keel"
            );
            report.vanished += 1;
        }

        let now = Utc::now();
        for approval in approvals {
            let locations = self.registry.message_refs(&approval.id);
            if locations.is_empty() {
                continue;
            }
            let rendered = render(approval, now);
            let settled = approval.state().is_settled();

            for location in locations {
                if self
                    .filters
                    .is_suppressed(location.chat_id, &approval.identifier)
                {
                    continue;
                }
                match self
                    .chat
                    .edit_message(
                        location.chat_id,
                        location.message_id,
                        &rendered.text,
                        &rendered.menu,
                    )
                    .await
                {
                    Ok(()) => {
                        report.edited += 1;
                        if self.skip_settled && settled {
                            debug!(
                                approval_id = %approval.id,
                                identifier = %approval.identifier,
                                chat_id = location.chat_id,
                                message_id = location.message_id,
                                "Approval settled, no further edits"
                            );
                            self.registry.forget(&approval.id, location);
                            report.forgotten += 1;
                        }
                    }
                    Err(e) if e.is_permanent() => {
                        warn!(
                            approval_id = %approval.id,
                            identifier = %approval.identifier,
                            chat_id = location.chat_id,
                            message_id = location.message_id,
                            error = %e,
                            "Message can no longer be edited, forgetting it"
                        );
                        metrics::record_edit_failure();
                        report.edit_failures += 1;
                        self.registry.forget(&approval.id, location);
                        report.forgotten += 1;
                    }
                    Err(e) => {
                        warn!(
                            approval_id = %approval.id,
                            identifier = %approval.identifier,
                            chat_id = location.chat_id,
                            message_id = location.message_id,
                            error = %e,
                            "Failed to edit message, retrying next tick"
                        );
                        metrics::record_edit_failure();
                        report.edit_failures += 1;
                    }
                }
            }
        }
    }

    async fn discover(&mut self, fresh: &[ApprovalRecord], report: &mut TickReport) {
        report.new = fresh.len();
        if fresh.is_empty() {
            return;
        }
        metrics::record_new_pending(fresh.len() as u64);

        let now = Utc::now();
        for approval in fresh {
            info!(
                approval_id = %approval.id,
                identifier = %approval.identifier,
                "New pending approval"
            );
            let rendered = render(approval, now);

            for &chat_id in self.filters.chat_ids() {
                if self.filters.is_suppressed(chat_id, &approval.identifier) {
                    debug!(
                        approval_id = %approval.id,
                        chat_id,
                        "Skipping chat due to filters"
                    );
                    continue;
                }
                match self
                    .chat
                    .send_message(chat_id, &rendered.text, &rendered.menu)
                    .await
                {
                    Ok(location) => {
                        self.registry
                            .register(&approval.id, &approval.identifier, location);
                        report.sent += 1;
                    }
                    Err(e) => {
                        warn!(
                            approval_id = %approval.id,
                            identifier = %approval.identifier,
                            chat_id,
                            error = %e,
                            "Failed to send approval notification"
                        );
                        report.send_failures += 1;
                    }
                }
            }
        }
    }

    /// Spawn the engine on its own task. The first tick runs immediately.
    pub fn spawn(self, interval: Duration) -> (SyncHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let task = tokio::spawn(self.run(interval, command_rx));
        (SyncHandle { command_tx }, task)
    }

    async fn run(mut self, interval: Duration, mut commands: mpsc::Receiver<SyncCommand>) {
        let mut timer = time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "Sync engine started");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.tick().await;
                }
                cmd = commands.recv() => match cmd {
                    Some(SyncCommand::Reconcile { done }) => {
                        let report = self.reconcile().await;
                        let _ = done.send(report);
                    }
                    Some(SyncCommand::Shutdown) | None => break,
                },
            }
        }
        info!(
            tracked_approvals = self.registry.len(),
            tracked_messages = self.registry.message_count(),
            "Sync engine stopped"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use chrono::TimeZone;
    use keel_relay_core::{ChatId, MessageId, Provider};

    use super::*;
    use crate::keel::KeelError;
    use crate::render::ActionMenu;
    use crate::sync::MessageRef;
    use crate::telegram::TelegramError;

    #[derive(Default)]
    struct ScriptedSource {
        polls: Mutex<VecDeque<Result<Vec<ApprovalRecord>, KeelError>>>,
    }

    impl ScriptedSource {
        fn push(&self, poll: Result<Vec<ApprovalRecord>, KeelError>) {
            self.polls.lock().unwrap().push_back(poll);
        }
    }

    impl ApprovalSource for ScriptedSource {
        async fn fetch_approvals(
            &self,
            filter: ApprovalFilter,
        ) -> Result<Vec<ApprovalRecord>, KeelError> {
            let next = self.polls.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(Vec::new())).map(|mut list| {
                list.retain(|a| filter.matches(a));
                list
            })
        }
    }

    #[derive(Default)]
    struct RecordingChat {
        sent: Mutex<Vec<(ChatId, String)>>,
        edited: Mutex<Vec<(ChatId, MessageId, ActionMenu)>>,
        edit_error: Mutex<Option<u16>>,
        next_id: Mutex<MessageId>,
    }

    impl ChatDelivery for RecordingChat {
        async fn send_message(
            &self,
            chat_id: ChatId,
            text: &str,
            _menu: &ActionMenu,
        ) -> Result<MessageRef, TelegramError> {
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            Ok(MessageRef {
                chat_id,
                message_id: *next,
            })
        }

        async fn edit_message(
            &self,
            chat_id: ChatId,
            message_id: MessageId,
            _text: &str,
            menu: &ActionMenu,
        ) -> Result<(), TelegramError> {
            if let Some(code) = *self.edit_error.lock().unwrap() {
                return Err(TelegramError::Api {
                    code,
                    description: "edit failed".into(),
                    retry_after: None,
                });
            }
            self.edited
                .lock()
                .unwrap()
                .push((chat_id, message_id, menu.clone()));
            Ok(())
        }
    }

    fn approval(id: &str) -> ApprovalRecord {
        let t = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        ApprovalRecord {
            id: id.into(),
            identifier: format!("deployment/default/app-{id}:1.1.0"),
            provider: Provider::Kubernetes,
            event: String::new(),
            message: format!("Update app-{id}"),
            current_version: "1.0.0".into(),
            new_version: "1.1.0".into(),
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

    fn engine(
        chats: &[ChatId],
    ) -> (
        SyncEngine<ScriptedSource, RecordingChat>,
        Arc<ScriptedSource>,
        Arc<RecordingChat>,
    ) {
        let source = Arc::new(ScriptedSource::default());
        let chat = Arc::new(RecordingChat::default());
        let filters = Arc::new(ChatFilters::new(chats, &[]).unwrap());
        let engine = SyncEngine::new(Arc::clone(&source), Arc::clone(&chat), filters);
        (engine, source, chat)
    }

    #[tokio::test]
    async fn first_tick_is_baseline_only() {
        let (mut engine, source, chat) = engine(&[1]);
        source.push(Ok(vec![approval("a")]));

        let report = engine.tick().await;
        assert!(report.baseline);
        assert_eq!(report.new, 0);
        assert!(chat.sent.lock().unwrap().is_empty());
        assert_eq!(engine.snapshot().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_snapshot() {
        let (mut engine, source, chat) = engine(&[1]);
        source.push(Ok(vec![approval("a")]));
        source.push(Err(KeelError::Config("boom".into())));
        source.push(Ok(vec![approval("a"), approval("b")]));

        engine.tick().await;
        let report = engine.tick().await;
        assert!(report.fetch_failed);
        assert_eq!(engine.snapshot().unwrap().len(), 1);

        let report = engine.tick().await;
        assert_eq!(report.new, 1);
        assert_eq!(chat.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn settled_approvals_are_not_discovered() {
        let (mut engine, source, chat) = engine(&[1]);
        source.push(Ok(vec![]));
        let mut archived = approval("a");
        archived.archived = true;
        source.push(Ok(vec![archived]));

        engine.tick().await;
        let report = engine.tick().await;
        assert_eq!(report.new, 0);
        assert!(chat.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transient_edit_failure_keeps_location() {
        let (mut engine, source, chat) = engine(&[1]);
        source.push(Ok(vec![]));
        source.push(Ok(vec![approval("a")]));
        engine.tick().await;
        engine.tick().await;
        assert_eq!(engine.registry().len(), 1);

        *chat.edit_error.lock().unwrap() = Some(429);
        source.push(Ok(vec![approval("a")]));
        let report = engine.tick().await;
        assert_eq!(report.edit_failures, 1);
        assert_eq!(report.forgotten, 0);
        assert_eq!(engine.registry().message_refs("a").len(), 1);
    }

    #[tokio::test]
    async fn vanished_approval_is_reported_but_kept() {
        let (mut engine, source, chat) = engine(&[1]);
        source.push(Ok(vec![]));
        source.push(Ok(vec![approval("a"), approval("b")]));
        engine.tick().await;
        engine.tick().await;
        assert_eq!(engine.registry().len(), 2);

        source.push(Ok(vec![approval("b")]));
        let report = engine.tick().await;
        assert_eq!(report.vanished, 1);
        assert_eq!(report.edited, 1);
        assert_eq!(chat.edited.lock().unwrap().len(), 1);
        assert!(engine.registry().contains("a"));
        assert_eq!(
            engine.registry().identifier("a"),
            Some("deployment/default/app-a:1.1.0")
        );
    }

    #[tokio::test]
    async fn skip_settled_forgets_after_terminal_edit() {
        let (engine, source, chat) = engine(&[1]);
        let mut engine = engine.with_skip_settled(true);
        source.push(Ok(vec![]));
        source.push(Ok(vec![approval("a")]));
        engine.tick().await;
        engine.tick().await;

        let mut rejected = approval("a");
        rejected.rejected = true;
        source.push(Ok(vec![rejected.clone()]));
        let report = engine.tick().await;
        assert_eq!(report.edited, 1);
        assert_eq!(report.forgotten, 1);
        assert!(!engine.registry().contains("a"));

        source.push(Ok(vec![rejected]));
        let report = engine.tick().await;
        assert_eq!(report.edited, 0);
        assert_eq!(chat.edited.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn settled_messages_keep_updating_by_default() {
        let (mut engine, source, chat) = engine(&[1]);
        source.push(Ok(vec![]));
        source.push(Ok(vec![approval("a")]));
        engine.tick().await;
        engine.tick().await;

        let mut rejected = approval("a");
        rejected.rejected = true;
        source.push(Ok(vec![rejected.clone()]));
        source.push(Ok(vec![rejected]));
        engine.tick().await;
        engine.tick().await;
        assert_eq!(chat.edited.lock().unwrap().len(), 2);
        assert!(engine.registry().contains("a"));
    }

    #[tokio::test]
    async fn handle_reconciles_and_shuts_down() {
        let (engine, source, chat) = engine(&[1]);
        source.push(Ok(vec![]));
        let (handle, task) = engine.spawn(Duration::from_secs(3600));

        let report = handle.trigger_reconciliation().await.unwrap();
        assert!(!report.fetch_failed);
        assert!(chat.edited.lock().unwrap().is_empty());

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(matches!(
            handle.trigger_reconciliation().await,
            Err(SyncError::Stopped)
        ));
    }
}
