//! Integration tests for login and invite recovery
//!
//! Flow: auth / quota marker or missing credential -> QR display -> login
//! polling -> credential stored -> prompt retried.

use std::time::Duration;

use aiconsole::chat::mock::{MockBackend, MockFrame, MockTransport};
use aiconsole::chat::{
    ChatSettings, ChatState, CredentialContext, Notice, PollStatus, PromptType, QrPurpose,
    SessionUpdate, HOSTED_PROVIDER,
};
use aiconsole::EditorSurface;

use super::common::fixture::{settle, states, SessionFixture};

const POLL: Duration = Duration::from_millis(3000);

#[tokio::test(start_paused = true)]
async fn test_login_resolves_and_retries_prompt() {
    let mut fx = SessionFixture::builder()
        .backend(MockBackend::new().resolving_after(2, "sk-new"))
        .transport(MockTransport::new().with_script(vec![
            MockFrame::content("SELECT name FROM users"),
            MockFrame::done(),
        ]))
        .spawn();

    fx.handle.submit(PromptType::NlToSql, "user names").unwrap();
    tokio::time::sleep(POLL * 2 + Duration::from_millis(100)).await;

    assert_eq!(fx.backend.login_status_calls(), 2);
    let credential = fx.credentials.get_credential().unwrap();
    assert_eq!(credential.key, "sk-new");
    assert_eq!(credential.provider, HOSTED_PROVIDER);

    // The original prompt went out once, with the new credential
    let requests = fx.transport.captured_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].credential, "sk-new");
    assert_eq!(requests[0].prompt.message, "user names");
    assert_eq!(fx.editor.get_all_content(), "SELECT name FROM users\n\n\n");

    let updates = fx.drain_updates();
    assert!(updates.contains(&SessionUpdate::QrDismissed));
    assert!(updates.contains(&SessionUpdate::Notice(Notice::LoggedIn)));
    assert_eq!(
        states(&updates),
        vec![
            ChatState::AuthRecovery,
            ChatState::Idle,
            ChatState::Requesting,
            ChatState::Streaming,
            ChatState::Completed,
            ChatState::Idle,
        ]
    );

    let snapshot = fx.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.qr, None);
    assert_eq!(snapshot.poll.map(|p| p.status), Some(PollStatus::Resolved));
}

#[tokio::test(start_paused = true)]
async fn test_auth_marker_mid_stream_retries_same_request() {
    let fx = SessionFixture::builder()
        .logged_in("sk-expired")
        .backend(MockBackend::new().resolving_after(1, "sk-fresh"))
        .transport(MockTransport::new().with_script(vec![
            MockFrame::content("EXPLAIN"),
            MockFrame::done(),
        ]))
        .spawn();
    fx.transport.queue_script(vec![
        MockFrame::content("partial"),
        MockFrame::raw("60002 token expired"),
        MockFrame::Hold,
    ]);

    fx.handle.submit(PromptType::Explain, "select 1").unwrap();
    settle().await;
    assert_eq!(fx.state().await, ChatState::AuthRecovery);
    assert_eq!(fx.transport.live_channels(), 0);

    tokio::time::sleep(POLL + Duration::from_millis(100)).await;

    let requests = fx.transport.captured_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].prompt, requests[1].prompt);
    assert_eq!(requests[0].credential, "sk-expired");
    assert_eq!(requests[1].credential, "sk-fresh");

    let snapshot = fx.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.panel, "EXPLAIN\n\n\n");
    assert_eq!(snapshot.state, ChatState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_quota_marker_shows_invite_without_retry() {
    let mut fx = SessionFixture::builder()
        .logged_in("sk-test")
        .transport(MockTransport::new().with_script(vec![
            MockFrame::content("SELECT"),
            MockFrame::raw(r#"{"content":"","code":"60004"}"#),
            MockFrame::Hold,
        ]))
        .spawn();

    fx.handle.submit(PromptType::Chat, "hello").unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(fx.transport.open_count(), 1);
    assert_eq!(fx.transport.live_channels(), 0);
    assert_eq!(fx.backend.invite_qr_calls(), 1);
    assert_eq!(fx.backend.login_status_calls(), 0);

    let updates = fx.drain_updates();
    assert!(updates.iter().any(|u| matches!(
        u,
        SessionUpdate::QrShown(qr) if qr.purpose == QrPurpose::Invite && qr.token.is_none()
    )));
    assert_eq!(
        states(&updates),
        vec![
            ChatState::Requesting,
            ChatState::Streaming,
            ChatState::QuotaRecovery,
            ChatState::Idle
        ]
    );
    // Buffered text from the failed response is not flushed
    assert_eq!(fx.handle.snapshot().await.unwrap().panel, "");
}

#[tokio::test(start_paused = true)]
async fn test_poll_budget_exhausts_after_sixty_checks() {
    let mut fx = SessionFixture::builder().spawn();

    fx.handle.submit(PromptType::NlToSql, "anything").unwrap();
    tokio::time::sleep(POLL * 61).await;

    assert_eq!(fx.backend.login_status_calls(), 60);
    let snapshot = fx.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ChatState::Failed);
    let poll = snapshot.poll.unwrap();
    assert_eq!(poll.status, PollStatus::Expired);
    assert_eq!(poll.attempts_remaining, 0);
    // QR stays up so the user can dismiss it
    assert_eq!(snapshot.qr.map(|qr| qr.purpose), Some(QrPurpose::Login));

    let updates = fx.drain_updates();
    assert!(updates.contains(&SessionUpdate::Notice(Notice::PollBudgetExhausted)));

    tokio::time::sleep(POLL * 10).await;
    assert_eq!(fx.backend.login_status_calls(), 60);

    fx.handle.dismiss_qr().unwrap();
    let snapshot = fx.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ChatState::Idle);
    assert_eq!(snapshot.qr, None);
}

#[tokio::test(start_paused = true)]
async fn test_dismiss_stops_polling() {
    let fx = SessionFixture::builder().spawn();

    fx.handle.submit(PromptType::NlToSql, "anything").unwrap();
    tokio::time::sleep(POLL * 3 + Duration::from_millis(100)).await;
    assert_eq!(fx.backend.login_status_calls(), 3);

    fx.handle.dismiss_qr().unwrap();
    tokio::time::sleep(POLL * 20).await;

    assert_eq!(fx.backend.login_status_calls(), 3);
    let snapshot = fx.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ChatState::Idle);
    assert_eq!(snapshot.poll.map(|p| p.status), Some(PollStatus::Cancelled));
    assert_eq!(fx.transport.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_login_stops_polling() {
    let mut fx = SessionFixture::builder()
        .backend(MockBackend::new().resolving_after(5, "sk-late"))
        .spawn();

    fx.handle.submit(PromptType::Chat, "hi").unwrap();
    tokio::time::sleep(POLL + Duration::from_millis(100)).await;
    fx.handle.cancel().unwrap();
    tokio::time::sleep(POLL * 10).await;

    assert_eq!(fx.backend.login_status_calls(), 1);
    assert!(fx.credentials.get_credential().is_none());
    assert_eq!(fx.transport.open_count(), 0);
    assert!(fx.drain_updates().contains(&SessionUpdate::QrDismissed));
}

#[tokio::test(start_paused = true)]
async fn test_new_prompt_replaces_login_flow() {
    let fx = SessionFixture::builder()
        .backend(MockBackend::new().resolving_after(100, "never"))
        .spawn();

    fx.handle.submit(PromptType::Chat, "first").unwrap();
    tokio::time::sleep(POLL * 2 + Duration::from_millis(100)).await;
    fx.handle.submit(PromptType::Chat, "second").unwrap();
    settle().await;

    // One poll loop at a time: the second flow starts counting from scratch
    assert_eq!(fx.backend.login_qr_calls(), 2);
    tokio::time::sleep(POLL + Duration::from_millis(100)).await;
    assert_eq!(fx.backend.login_status_calls(), 3);
    let poll = fx.handle.snapshot().await.unwrap().poll.unwrap();
    assert_eq!(poll.attempts_remaining, 59);
}

#[tokio::test(start_paused = true)]
async fn test_invite_without_credential_redirects_to_login() {
    let fx = SessionFixture::builder()
        .backend(MockBackend::new().resolving_after(1, "sk-invited"))
        .spawn();

    fx.handle.show_invite().unwrap();
    settle().await;
    assert_eq!(fx.backend.invite_qr_calls(), 0);
    assert_eq!(fx.backend.login_qr_calls(), 1);
    assert_eq!(fx.state().await, ChatState::AuthRecovery);

    tokio::time::sleep(POLL + Duration::from_millis(100)).await;

    assert!(fx.credentials.get_credential().is_some());
    // Nothing to retry
    assert_eq!(fx.transport.open_count(), 0);
    assert_eq!(fx.state().await, ChatState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_show_invite_with_credential() {
    let fx = SessionFixture::builder().logged_in("sk-test").spawn();

    fx.handle.show_invite().unwrap();
    settle().await;

    let snapshot = fx.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ChatState::Idle);
    let qr = snapshot.qr.unwrap();
    assert_eq!(qr.purpose, QrPurpose::Invite);
    assert_eq!(qr.image_url, "https://qr.test/invite.png");

    fx.handle.dismiss_qr().unwrap();
    assert_eq!(fx.handle.snapshot().await.unwrap().qr, None);
}

#[tokio::test(start_paused = true)]
async fn test_login_qr_failure_is_reported() {
    let mut fx = SessionFixture::builder()
        .backend(MockBackend::new().failing_login_qr())
        .spawn();

    fx.handle.submit(PromptType::NlToSql, "anything").unwrap();
    settle().await;

    let updates = fx.drain_updates();
    assert!(updates
        .iter()
        .any(|u| matches!(u, SessionUpdate::Notice(Notice::RecoveryFailed(_)))));
    assert_eq!(
        states(&updates),
        vec![ChatState::AuthRecovery, ChatState::Failed]
    );
    assert_eq!(fx.backend.login_status_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_custom_poll_settings() {
    let fx = SessionFixture::builder()
        .settings(ChatSettings {
            poll_interval: Duration::from_millis(500),
            poll_attempts: 4,
        })
        .spawn();

    fx.handle.submit(PromptType::Chat, "hi").unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(fx.backend.login_status_calls(), 4);
    assert_eq!(fx.state().await, ChatState::Failed);
}
