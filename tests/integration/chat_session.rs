//! Integration tests for the chat session state machine
//!
//! Flow: handle command -> session actor -> mock transport frames -> editor,
//! panel and published updates.

use std::time::Duration;

use aiconsole::chat::mock::{MockFrame, MockTransport};
use aiconsole::chat::{ChatState, DisplayTarget, Notice, PromptType, QrPurpose, SessionUpdate};
use aiconsole::EditorSurface;

use super::common::fixture::{settle, states, SessionFixture};

#[tokio::test(start_paused = true)]
async fn test_prompt_without_credential_starts_login_without_stream() {
    let mut fx = SessionFixture::builder().spawn();

    fx.handle.submit(PromptType::NlToSql, "list all tables").unwrap();
    settle().await;

    assert_eq!(fx.transport.open_count(), 0);
    assert_eq!(fx.backend.login_qr_calls(), 1);

    let updates = fx.drain_updates();
    assert_eq!(states(&updates), vec![ChatState::AuthRecovery]);
    assert!(updates.iter().any(|u| matches!(
        u,
        SessionUpdate::QrShown(qr) if qr.purpose == QrPurpose::Login && qr.token.as_deref() == Some("login-token")
    )));

    let snapshot = fx.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ChatState::AuthRecovery);
    assert_eq!(snapshot.open_channels, 0);
    assert_eq!(snapshot.poll.map(|p| p.attempts_remaining), Some(60));
}

#[tokio::test(start_paused = true)]
async fn test_chat_response_flushes_panel_once() {
    let mut fx = SessionFixture::builder()
        .logged_in("sk-test")
        .transport(MockTransport::new().with_script(vec![
            MockFrame::content("SELECT"),
            MockFrame::content(" * FROM t"),
            MockFrame::done(),
        ]))
        .spawn();

    fx.handle.submit(PromptType::Chat, "show me t").unwrap();
    settle().await;

    let updates = fx.drain_updates();
    let panel: Vec<&String> = updates
        .iter()
        .filter_map(|u| match u {
            SessionUpdate::PanelContent(text) => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(panel, vec!["SELECT * FROM t\n\n\n"]);
    assert_eq!(
        states(&updates),
        vec![
            ChatState::Requesting,
            ChatState::Streaming,
            ChatState::Completed,
            ChatState::Idle
        ]
    );
    assert!(updates.contains(&SessionUpdate::PanelOpened));
    assert!(updates.contains(&SessionUpdate::Loading {
        target: DisplayTarget::Panel,
        active: false
    }));

    // Panel output never touches the editor
    assert_eq!(fx.editor.write_count(), 0);
    assert_eq!(fx.transport.live_channels(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_nl_to_sql_streams_into_editor() {
    let fx = SessionFixture::builder()
        .logged_in("sk-test")
        .editor_text("-- old draft")
        .transport(MockTransport::new().with_script(vec![
            MockFrame::content("SELECT *"),
            MockFrame::content("SELECT * FROM orders"),
            MockFrame::done(),
        ]))
        .spawn();

    fx.handle
        .submit(PromptType::NlToSql, "all orders")
        .unwrap();
    settle().await;

    assert_eq!(fx.editor.get_all_content(), "SELECT * FROM orders\n\n\n");
    assert_eq!(fx.handle.snapshot().await.unwrap().panel, "");
}

#[tokio::test(start_paused = true)]
async fn test_request_carries_console_context() {
    let fx = SessionFixture::builder()
        .logged_in("sk-ctx")
        .session_id("console-ctx")
        .spawn();

    fx.handle
        .set_known_tables(vec!["orders".into(), "users".into(), "items".into()])
        .unwrap();
    fx.handle
        .select_tables(vec!["users".into(), "ghost".into(), "orders".into()])
        .unwrap();
    fx.handle.submit(PromptType::Optimize, "select 1").unwrap();
    settle().await;

    let requests = fx.transport.captured_requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.session_id.as_str(), "console-ctx");
    assert_eq!(request.credential, "sk-ctx");
    assert_eq!(request.prompt.prompt_type, PromptType::Optimize);
    assert_eq!(request.prompt.data_source_id, Some(42));
    assert_eq!(request.prompt.database_name.as_deref(), Some("shop"));
    assert_eq!(request.prompt.schema_name.as_deref(), Some("public"));
    assert_eq!(request.prompt.table_names, vec!["users", "orders"]);
}

#[tokio::test(start_paused = true)]
async fn test_selection_prompt_uses_selected_text() {
    let fx = SessionFixture::builder()
        .logged_in("sk-test")
        .editor_text("select 1; select * from orders;")
        .spawn();

    fx.editor.select(10, 31);
    fx.handle.submit_selection(PromptType::Explain).unwrap();
    settle().await;

    fx.editor.clear_selection();
    fx.handle.submit_selection(PromptType::Convert).unwrap();
    settle().await;

    let requests = fx.transport.captured_requests();
    assert_eq!(requests[0].prompt.message, "select * from orders;");
    assert_eq!(requests[1].prompt.message, "select 1; select * from orders;");
}

#[tokio::test(start_paused = true)]
async fn test_at_most_one_open_channel() {
    let fx = SessionFixture::builder().logged_in("sk-test").spawn();

    for i in 0..5 {
        fx.handle.submit(PromptType::Chat, format!("q{i}")).unwrap();
    }
    settle().await;

    assert_eq!(fx.transport.open_count(), 5);
    assert_eq!(fx.transport.live_channels(), 1);
    assert_eq!(fx.handle.snapshot().await.unwrap().open_channels, 1);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frames_are_skipped() {
    let fx = SessionFixture::builder()
        .logged_in("sk-test")
        .transport(MockTransport::new().with_script(vec![
            MockFrame::content("a"),
            MockFrame::raw("{not json"),
            MockFrame::content("b"),
            MockFrame::done(),
        ]))
        .spawn();

    fx.handle.submit(PromptType::Chat, "hi").unwrap();
    settle().await;

    let snapshot = fx.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.panel, "ab\n\n\n");
    assert_eq!(snapshot.state, ChatState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_channel_error_fails_without_retry() {
    let mut fx = SessionFixture::builder()
        .logged_in("sk-test")
        .transport(
            MockTransport::new()
                .with_script(vec![MockFrame::Error("connection reset".into())]),
        )
        .spawn();

    fx.handle.submit(PromptType::NlToSql, "count users").unwrap();
    settle().await;

    let updates = fx.drain_updates();
    assert!(updates.contains(&SessionUpdate::Notice(Notice::ChannelFailed(
        "connection reset".into()
    ))));
    assert_eq!(fx.transport.open_count(), 1);
    let snapshot = fx.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ChatState::Failed);
    assert_eq!(snapshot.loading, None);
    assert_eq!(snapshot.open_channels, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_stream_discards_later_frames() {
    let fx = SessionFixture::builder()
        .logged_in("sk-test")
        .transport(
            MockTransport::new()
                .with_delay(Duration::from_millis(100))
                .with_script(vec![
                    MockFrame::content("one"),
                    MockFrame::content("one two"),
                    MockFrame::content("one two three"),
                    MockFrame::done(),
                ]),
        )
        .spawn();

    fx.handle.submit(PromptType::NlToSql, "numbers").unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    fx.handle.cancel().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(fx.editor.get_all_content(), "one");
    assert_eq!(fx.state().await, ChatState::Idle);
    assert_eq!(fx.transport.live_channels(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_too_many_tables_warns_but_keeps_selection() {
    let mut fx = SessionFixture::builder().logged_in("sk-test").spawn();
    let tables: Vec<String> = (0..10).map(|i| format!("t{i}")).collect();

    fx.handle.set_known_tables(tables.clone()).unwrap();
    settle().await;

    let updates = fx.drain_updates();
    assert!(updates.contains(&SessionUpdate::Notice(Notice::TooManyTables {
        selected: 10,
        limit: 8
    })));
    assert_eq!(fx.handle.snapshot().await.unwrap().selected_tables, tables);
}
