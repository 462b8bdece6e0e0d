//! Tests for update handling: permissions, replies and button clicks.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use keel_relay_core::config::{Config, KeelConfig, TelegramConfig};
use keel_relay_core::{ApprovalRecord, ChatFilters};
use serde_json::json;
use wiremock::matchers::{body_json, body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::Bot;
use crate::keel::{ApprovalFilter, KeelClient, KeelError};
use crate::sync::{ApprovalSource, SyncEngine};
use crate::telegram::{TelegramClient, Update};

const TOKEN: &str = "123:abc";
const CONFIGURED_CHAT: i64 = 10;

/// The engine under the bot never sees approvals in these tests.
struct NoApprovals;

impl ApprovalSource for NoApprovals {
    async fn fetch_approvals(
        &self,
        _filter: ApprovalFilter,
    ) -> Result<Vec<ApprovalRecord>, KeelError> {
        Ok(Vec::new())
    }
}

struct Harness {
    telegram: MockServer,
    keel: MockServer,
    bot: Bot,
}

async fn harness() -> Harness {
    let telegram_server = MockServer::start().await;
    let keel_server = MockServer::start().await;

    let config = Config {
        telegram: TelegramConfig {
            bot_token: TOKEN.into(),
            api_url: telegram_server.uri(),
            admin_usernames: vec!["@jane".into()],
            chat_ids: vec![CONFIGURED_CHAT],
            poll_timeout_secs: 0,
            ..TelegramConfig::default()
        },
        keel: KeelConfig {
            host: "keel.example.com".into(),
            username: "keel".into(),
            password: "secret".into(),
            ..KeelConfig::default()
        },
        ..Config::default()
    };

    let telegram = Arc::new(TelegramClient::new(&config.telegram).unwrap());
    let keel = KeelClient::new(&config.keel)
        .unwrap()
        .with_base_url(&keel_server.uri());
    let filters = Arc::new(ChatFilters::new(&config.telegram.chat_ids, &[]).unwrap());
    let (sync, _task) = SyncEngine::new(Arc::new(NoApprovals), Arc::clone(&telegram), Arc::clone(&filters))
        .spawn(Duration::from_secs(3600));

    let bot = Bot::new(telegram, keel, filters, sync, Arc::new(config))
        .with_bot_username(Some("keel_bot".into()));
    Harness {
        telegram: telegram_server,
        keel: keel_server,
        bot,
    }
}

fn tg_path(method: &str) -> String {
    format!("/bot{TOKEN}/{method}")
}

fn user(username: &str) -> serde_json::Value {
    json!({"id": 7, "first_name": "Jane", "last_name": "Doe", "username": username})
}

fn text_update(chat_id: i64, username: &str, text: &str) -> Update {
    serde_json::from_value(json!({
        "update_id": 1,
        "message": {
            "message_id": 5,
            "date": 1_700_000_000,
            "chat": {"id": chat_id, "type": "group"},
            "from": user(username),
            "text": text
        }
    }))
    .unwrap()
}

fn click_update(chat_id: i64, username: &str, data: &str) -> Update {
    serde_json::from_value(json!({
        "update_id": 2,
        "callback_query": {
            "id": "cb1",
            "from": user(username),
            "message": {
                "message_id": 9,
                "date": 1_700_000_000,
                "chat": {"id": chat_id, "type": "group"}
            },
            "data": data
        }
    }))
    .unwrap()
}

fn sent_message() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "ok": true,
        "result": {
            "message_id": 100,
            "date": 1_700_000_000,
            "chat": {"id": CONFIGURED_CHAT, "type": "group"}
        }
    }))
}

fn answered() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": true}))
}

fn approvals_body() -> serde_json::Value {
    json!([{
        "id": "42",
        "identifier": "deployment/default/wiki:1.1.0",
        "provider": "kubernetes",
        "message": "New image",
        "currentVersion": "1.0.0",
        "newVersion": "1.1.0",
        "votesRequired": 1,
        "votesReceived": 0,
        "archived": false,
        "rejected": false,
        "deadline": "2030-01-02T00:00:00Z",
        "createdAt": "2030-01-01T00:00:00Z",
        "updatedAt": "2030-01-01T00:00:00Z"
    }])
}

// =============================================================================
// Commands
// =============================================================================

#[tokio::test]
async fn non_admin_start_is_refused() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path(tg_path("sendMessage")))
        .and(body_partial_json(json!({
            "chat_id": CONFIGURED_CHAT,
            "text": "Sorry, you do not have permissions to use this bot."
        })))
        .respond_with(sent_message())
        .expect(1)
        .mount(&h.telegram)
        .await;

    h.bot
        .handle_update(text_update(CONFIGURED_CHAT, "mallory", "/start"))
        .await;
}

#[tokio::test]
async fn non_admin_commands_are_ignored() {
    let h = harness().await;
    Mock::given(method("POST"))
        .respond_with(sent_message())
        .expect(0)
        .mount(&h.telegram)
        .await;

    h.bot
        .handle_update(text_update(CONFIGURED_CHAT, "mallory", "/list"))
        .await;
    h.bot
        .handle_update(text_update(CONFIGURED_CHAT, "mallory", "/nonsense"))
        .await;
}

#[tokio::test]
async fn admin_in_unconfigured_chat_gets_chat_id_only() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path(tg_path("sendMessage")))
        .and(body_partial_json(json!({"chat_id": 99, "text": "99"})))
        .respond_with(sent_message())
        .expect(1)
        .mount(&h.telegram)
        .await;

    h.bot.handle_update(text_update(99, "jane", "/chatid")).await;
    h.bot.handle_update(text_update(99, "jane", "/list")).await;
}

#[tokio::test]
async fn command_for_other_bot_is_ignored() {
    let h = harness().await;
    Mock::given(method("POST"))
        .respond_with(sent_message())
        .expect(0)
        .mount(&h.telegram)
        .await;

    h.bot
        .handle_update(text_update(CONFIGURED_CHAT, "jane", "/help@other_bot"))
        .await;
}

#[tokio::test]
async fn approve_command_votes_with_full_name() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/v1/approvals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(approvals_body()))
        .mount(&h.keel)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/approvals"))
        .and(body_json(json!({
            "id": "42",
            "identifier": "deployment/default/wiki:1.1.0",
            "voter": "Jane Doe",
            "action": "approve"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&h.keel)
        .await;
    Mock::given(method("POST"))
        .and(path(tg_path("sendMessage")))
        .and(body_partial_json(json!({
            "text": "Approved deployment/default/wiki:1.1.0"
        })))
        .respond_with(sent_message())
        .expect(1)
        .mount(&h.telegram)
        .await;

    h.bot
        .handle_update(text_update(
            CONFIGURED_CHAT,
            "jane",
            "/approve deployment/default/wiki:1.1.0",
        ))
        .await;
}

#[tokio::test]
async fn unknown_target_is_reported() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/v1/approvals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(approvals_body()))
        .mount(&h.keel)
        .await;
    Mock::given(method("POST"))
        .and(path(tg_path("sendMessage")))
        .and(body_partial_json(json!({
            "text": "No matching approval found for 'nope'"
        })))
        .respond_with(sent_message())
        .expect(1)
        .mount(&h.telegram)
        .await;

    h.bot
        .handle_update(text_update(CONFIGURED_CHAT, "jane", "/reject nope"))
        .await;
}

// =============================================================================
// Button clicks
// =============================================================================

#[tokio::test]
async fn approve_button_votes_and_answers() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/v1/approvals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(approvals_body()))
        .mount(&h.keel)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/approvals"))
        .and(body_partial_json(json!({"id": "42", "action": "approve", "voter": "Jane Doe"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&h.keel)
        .await;
    Mock::given(method("POST"))
        .and(path(tg_path("answerCallbackQuery")))
        .and(body_json(json!({
            "callback_query_id": "cb1",
            "text": "Approved 'deployment/default/wiki:1.1.0'"
        })))
        .respond_with(answered())
        .expect(1)
        .mount(&h.telegram)
        .await;

    h.bot
        .handle_update(click_update(CONFIGURED_CHAT, "jane", "approve:42"))
        .await;
}

#[tokio::test]
async fn button_error_answers_with_api_body() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/v1/approvals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(approvals_body()))
        .mount(&h.keel)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/approvals"))
        .respond_with(ResponseTemplate::new(400).set_body_string("approval already rejected"))
        .mount(&h.keel)
        .await;
    Mock::given(method("POST"))
        .and(path(tg_path("answerCallbackQuery")))
        .and(body_json(json!({
            "callback_query_id": "cb1",
            "text": "approval already rejected"
        })))
        .respond_with(answered())
        .expect(1)
        .mount(&h.telegram)
        .await;

    h.bot
        .handle_update(click_update(CONFIGURED_CHAT, "jane", "reject:42"))
        .await;
}

#[tokio::test]
async fn non_admin_click_is_refused_without_voting() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/v1/approvals"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.keel)
        .await;
    Mock::given(method("POST"))
        .and(path(tg_path("answerCallbackQuery")))
        .and(body_partial_json(json!({
            "text": "Sorry, you do not have permissions to use this bot."
        })))
        .respond_with(answered())
        .expect(1)
        .mount(&h.telegram)
        .await;

    h.bot
        .handle_update(click_update(CONFIGURED_CHAT, "mallory", "approve:42"))
        .await;
}

#[tokio::test]
async fn indicator_click_is_acknowledged_silently() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path(tg_path("answerCallbackQuery")))
        .and(body_json(json!({"callback_query_id": "cb1"})))
        .respond_with(answered())
        .expect(1)
        .mount(&h.telegram)
        .await;

    h.bot
        .handle_update(click_update(CONFIGURED_CHAT, "mallory", "noop"))
        .await;
}
