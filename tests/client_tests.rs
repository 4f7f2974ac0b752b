// End-to-end client tests: REST backend mocked with wiremock, live channel
// served by a local websocket server

mod common;
use common::{
    client_with, config_for, drain_for, memory_client, message_json, mount_contacts, mount_login, push_frame,
    setup_logging, user_json, wait_for_update, wait_until, LiveConnection, LiveServer,
};

use anyhow::Result;
use log::info;
use serde_json::json;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::mpsc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chatz::conversation::{HistoryOutcome, PushOutcome};
use chatz::{AppEvent, ChannelState, ChatClient, ChatError, Credential, FileStorage, Identity, SessionStore, Update};

/// Backend with alice (u1) able to log in and two contacts, bob (u2) and carol (u3)
async fn backend() -> MockServer {
    let server = MockServer::start().await;
    mount_login(&server, "a@x.com", "pw", "tok1", "u1", "alice").await;
    mount_contacts(&server, "tok1", json!([user_json("u2", "bob"), user_json("u3", "carol")])).await;
    server
}

async fn mount_history(server: &MockServer, contact_id: &str, messages: serde_json::Value, delay: Duration) {
    Mock::given(method("GET"))
        .and(path(format!("/api/messages/{}", contact_id)))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(messages).set_delay(delay))
        .mount(server)
        .await;
}

/// Log alice in and wait until the channel is up and the contacts are loaded
async fn logged_in(
    server: &MockServer,
    live: &mut LiveServer,
) -> Result<(ChatClient, mpsc::UnboundedReceiver<AppEvent>, LiveConnection)> {
    let (mut client, mut events) = memory_client(config_for(server, Some(&*live)));
    client.login("a@x.com", "pw").await?;
    let conn = live.accept().await?;
    wait_until(&mut client, &mut events, |c| {
        c.channel_state() == ChannelState::Connected && c.directory().is_loaded()
    })
    .await?;
    Ok((client, events, conn))
}

fn timeline_ids(client: &ChatClient) -> Vec<String> {
    client.conversation().timeline().iter().map(|m| m.id.clone()).collect()
}

#[tokio::test]
async fn test_login_starts_session_and_channel() -> Result<()> {
    setup_logging();
    let server = backend().await;
    let mut live = LiveServer::start().await?;
    let (mut client, mut events) = memory_client(config_for(&server, Some(&live)));

    let identity = client.login("a@x.com", "pw").await?;
    assert_eq!(identity.id, "u1");
    assert_eq!(client.identity().map(|i| i.id), Some("u1".to_string()));
    assert_eq!(client.sessions().persisted_credential()?, Some(Credential::new("tok1")));
    assert!(client.api().has_credential());

    let conn = live.accept().await?;
    assert_eq!(conn.path, "/ws/u1");
    assert_eq!(client.channel_url().map(|u| u.path().to_string()), Some("/ws/u1".to_string()));

    wait_until(&mut client, &mut events, |c| c.channel_state() == ChannelState::Connected).await?;
    wait_until(&mut client, &mut events, |c| c.directory().is_loaded()).await?;
    let names: Vec<&str> = client.directory().contacts().iter().map(|c| c.username.as_str()).collect();
    assert_eq!(names, vec!["bob", "carol"]);
    Ok(())
}

#[tokio::test]
async fn test_failed_login_keeps_client_logged_out() -> Result<()> {
    setup_logging();
    let server = backend().await;
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "detail": "Incorrect email or password" })))
        .mount(&server)
        .await;
    let (mut client, _events) = memory_client(config_for(&server, None));

    let err = client.login("a@x.com", "wrong").await.unwrap_err();
    assert!(matches!(err, ChatError::Auth(ref detail) if detail == "Incorrect email or password"));
    assert!(client.session().is_none());
    assert_eq!(client.channel_state(), ChannelState::Disconnected);
    assert!(client.channel_url().is_none());
    Ok(())
}

#[tokio::test]
async fn test_selecting_contact_loads_history() -> Result<()> {
    setup_logging();
    let server = backend().await;
    mount_history(
        &server,
        "u2",
        json!([message_json("m1", "u1", "u2", "hi"), message_json("m2", "u2", "u1", "hey")]),
        Duration::ZERO,
    )
    .await;
    let mut live = LiveServer::start().await?;
    let (mut client, mut events, _conn) = logged_in(&server, &mut live).await?;

    let ticket = client.select_contact("u2").expect("ticket");
    assert_eq!(ticket.contact_id, "u2");
    assert!(client.conversation().is_loading());
    assert_eq!(client.selected_contact().map(|c| c.username.as_str()), Some("bob"));

    let update = wait_for_update(&mut client, &mut events, |u| matches!(u, Update::History(_))).await?;
    assert_eq!(update, Update::History(HistoryOutcome::Applied(2)));
    assert_eq!(timeline_ids(&client), vec!["m1", "m2"]);
    assert!(!client.conversation().is_loading());
    Ok(())
}

#[tokio::test]
async fn test_history_failure_leaves_empty_timeline() -> Result<()> {
    setup_logging();
    let server = backend().await;
    Mock::given(method("GET"))
        .and(path("/api/messages/u2"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let mut live = LiveServer::start().await?;
    let (mut client, mut events, _conn) = logged_in(&server, &mut live).await?;

    client.select_contact("u2");
    let update = wait_for_update(&mut client, &mut events, |u| matches!(u, Update::History(_))).await?;
    assert_eq!(update, Update::History(HistoryOutcome::Failed));
    assert!(client.conversation().timeline().is_empty());
    assert_eq!(client.conversation().selected(), Some("u2"));
    Ok(())
}

#[tokio::test]
async fn test_slow_history_for_previous_contact_is_discarded() -> Result<()> {
    setup_logging();
    let server = backend().await;
    mount_history(&server, "u2", json!([message_json("m1", "u1", "u2", "old")]), Duration::from_millis(500)).await;
    mount_history(&server, "u3", json!([message_json("m5", "u3", "u1", "current")]), Duration::ZERO).await;
    let mut live = LiveServer::start().await?;
    let (mut client, mut events, _conn) = logged_in(&server, &mut live).await?;

    client.select_contact("u2");
    client.select_contact("u3");

    let mut outcomes = Vec::new();
    while outcomes.len() < 2 {
        if let Update::History(outcome) =
            wait_for_update(&mut client, &mut events, |u| matches!(u, Update::History(_))).await?
        {
            outcomes.push(outcome);
        }
    }
    assert_eq!(outcomes, vec![HistoryOutcome::Applied(1), HistoryOutcome::Stale]);
    assert_eq!(client.conversation().selected(), Some("u3"));
    assert_eq!(timeline_ids(&client), vec!["m5"]);
    Ok(())
}

#[tokio::test]
async fn test_push_for_other_contact_only_counts_unread() -> Result<()> {
    setup_logging();
    let server = backend().await;
    mount_history(&server, "u3", json!([]), Duration::ZERO).await;
    let mut live = LiveServer::start().await?;
    let (mut client, mut events, mut conn) = logged_in(&server, &mut live).await?;

    client.select_contact("u3");
    wait_for_update(&mut client, &mut events, |u| matches!(u, Update::History(_))).await?;

    conn.send_text(push_frame("u2", "u1", "psst")).await?;
    let update = wait_for_update(&mut client, &mut events, |u| matches!(u, Update::Push(_))).await?;
    assert_eq!(
        update,
        Update::Push(PushOutcome::Elsewhere {
            contact_id: "u2".to_string()
        })
    );
    assert!(client.conversation().timeline().is_empty());
    assert_eq!(client.directory().unread("u2"), 1);

    conn.send_text(push_frame("u3", "u1", "hello carol here")).await?;
    let update = wait_for_update(&mut client, &mut events, |u| matches!(u, Update::Push(_))).await?;
    assert_eq!(update, Update::Push(PushOutcome::Appended));
    assert_eq!(client.conversation().timeline().len(), 1);
    assert_eq!(client.conversation().timeline()[0].content, "hello carol here");

    // Opening bob's conversation clears his counter
    mount_history(&server, "u2", json!([message_json("m7", "u2", "u1", "psst")]), Duration::ZERO).await;
    client.select_contact("u2");
    assert_eq!(client.directory().unread("u2"), 0);
    Ok(())
}

#[tokio::test]
async fn test_send_appends_echo_once() -> Result<()> {
    setup_logging();
    let server = backend().await;
    mount_history(&server, "u2", json!([]), Duration::ZERO).await;
    Mock::given(method("POST"))
        .and(path("/api/messages"))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(message_json("m9", "u1", "u2", "hello")))
        .expect(1)
        .mount(&server)
        .await;
    let mut live = LiveServer::start().await?;
    let (mut client, mut events, mut conn) = logged_in(&server, &mut live).await?;

    client.select_contact("u2");
    wait_for_update(&mut client, &mut events, |u| matches!(u, Update::History(_))).await?;

    assert!(client.send("  hello  "));
    // Nothing is shown before the echo arrives
    assert!(client.conversation().timeline().is_empty());
    let update = wait_for_update(&mut client, &mut events, |u| matches!(u, Update::Sent { .. })).await?;
    assert_eq!(update, Update::Sent { appended: true });
    assert_eq!(timeline_ids(&client), vec!["m9"]);

    // The same message relayed over the channel is not appended again
    let relayed = json!({
        "type": "message",
        "id": "m9",
        "sender_id": "u1",
        "receiver_id": "u2",
        "content": "hello",
        "timestamp": "2025-01-01T12:00:00.000000",
    });
    conn.send_text(relayed.to_string()).await?;
    let update = wait_for_update(&mut client, &mut events, |u| matches!(u, Update::Push(_))).await?;
    assert_eq!(update, Update::Push(PushOutcome::Duplicate));
    assert_eq!(client.conversation().timeline().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_send_failure_appends_nothing() -> Result<()> {
    setup_logging();
    let server = backend().await;
    mount_history(&server, "u2", json!([]), Duration::ZERO).await;
    Mock::given(method("POST"))
        .and(path("/api/messages"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "detail": "database unavailable" })))
        .mount(&server)
        .await;
    let mut live = LiveServer::start().await?;
    let (mut client, mut events, _conn) = logged_in(&server, &mut live).await?;

    client.select_contact("u2");
    wait_for_update(&mut client, &mut events, |u| matches!(u, Update::History(_))).await?;

    assert!(client.send("hello"));
    let update = wait_for_update(&mut client, &mut events, |u| {
        matches!(u, Update::Sent { .. } | Update::SendFailed(_))
    })
    .await?;
    assert!(matches!(update, Update::SendFailed(ref reason) if reason.contains("database unavailable")));
    assert!(client.conversation().timeline().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_send_needs_selection_and_content() -> Result<()> {
    setup_logging();
    let server = backend().await;
    let mut live = LiveServer::start().await?;
    let (client, _events, _conn) = logged_in(&server, &mut live).await?;

    assert!(!client.send("hello"));
    assert!(!client.send("   "));
    Ok(())
}

#[tokio::test]
async fn test_echo_for_deselected_contact_is_dropped() -> Result<()> {
    setup_logging();
    let server = backend().await;
    mount_history(&server, "u2", json!([]), Duration::ZERO).await;
    mount_history(&server, "u3", json!([]), Duration::ZERO).await;
    Mock::given(method("POST"))
        .and(path("/api/messages"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(message_json("m9", "u1", "u2", "hello"))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    let mut live = LiveServer::start().await?;
    let (mut client, mut events, _conn) = logged_in(&server, &mut live).await?;

    client.select_contact("u2");
    assert!(client.send("hello"));
    client.select_contact("u3");

    let update = wait_for_update(&mut client, &mut events, |u| matches!(u, Update::Sent { .. })).await?;
    assert_eq!(update, Update::Sent { appended: false });
    assert!(client.conversation().timeline().iter().all(|m| m.id != "m9"));
    Ok(())
}

#[tokio::test]
async fn test_contacts_refresh_failure_keeps_stale_list() -> Result<()> {
    setup_logging();
    let server = MockServer::start().await;
    mount_login(&server, "a@x.com", "pw", "tok1", "u1", "alice").await;
    Mock::given(method("GET"))
        .and(path("/api/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([user_json("u2", "bob")])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/users"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let mut live = LiveServer::start().await?;
    let (mut client, mut events, _conn) = logged_in(&server, &mut live).await?;
    assert_eq!(client.directory().contacts().len(), 1);

    client.refresh_contacts();
    let updates = drain_for(&mut client, &mut events, Duration::from_millis(500)).await;
    assert!(updates.iter().all(|u| !matches!(u, Update::ContactsRefreshed(_))));
    assert_eq!(client.directory().contacts().len(), 1);
    assert!(client.directory().get("u2").is_some());
    Ok(())
}

#[tokio::test]
async fn test_logout_clears_session_and_closes_channel() -> Result<()> {
    setup_logging();
    let server = backend().await;
    mount_history(&server, "u2", json!([message_json("m1", "u1", "u2", "hi")]), Duration::ZERO).await;
    let mut live = LiveServer::start().await?;
    let dir = tempdir()?;

    let (mut client, mut events) = client_with(config_for(&server, Some(&live)), Box::new(FileStorage::new(dir.path())));
    client.login("a@x.com", "pw").await?;
    let mut conn = live.accept().await?;
    wait_until(&mut client, &mut events, |c| c.channel_state() == ChannelState::Connected).await?;
    client.select_contact("u2");
    wait_for_update(&mut client, &mut events, |u| matches!(u, Update::History(_))).await?;
    assert!(dir.path().join("token").exists());

    info!("Logging out");
    client.logout()?;
    assert!(client.session().is_none());
    assert_eq!(client.channel_state(), ChannelState::Disconnected);
    assert!(client.channel_url().is_none());
    assert!(!client.api().has_credential());
    assert!(client.conversation().selected().is_none());
    assert!(client.conversation().timeline().is_empty());
    assert!(client.directory().contacts().is_empty());
    assert!(!dir.path().join("token").exists());
    assert!(!dir.path().join("user").exists());

    // Anything the old session still delivers is ignored
    let _ = conn.send_text(push_frame("u2", "u1", "are you there?")).await;
    let updates = drain_for(&mut client, &mut events, Duration::from_millis(300)).await;
    assert!(updates.iter().all(|u| *u == Update::Ignored));
    assert!(client.conversation().timeline().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_restore_resumes_persisted_session() -> Result<()> {
    setup_logging();
    let server = backend().await;
    let mut live = LiveServer::start().await?;
    let dir = tempdir()?;

    let previous = SessionStore::new(Box::new(FileStorage::new(dir.path())));
    let alice = Identity {
        id: "u1".to_string(),
        username: "alice".to_string(),
        email: Some("a@x.com".to_string()),
        avatar_color: "#3366cc".to_string(),
        is_online: true,
    };
    previous.login(alice.clone(), Credential::new("tok1"))?;

    let (mut client, mut events) = client_with(config_for(&server, Some(&live)), Box::new(FileStorage::new(dir.path())));
    assert!(client.restore()?);
    assert_eq!(client.identity(), Some(alice));

    let conn = live.accept().await?;
    assert_eq!(conn.path, "/ws/u1");
    // Contacts are only served for the restored bearer token
    wait_until(&mut client, &mut events, |c| c.directory().is_loaded()).await?;
    assert_eq!(client.directory().contacts().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_restore_without_session() -> Result<()> {
    setup_logging();
    let server = backend().await;
    let dir = tempdir()?;
    let (mut client, _events) = client_with(config_for(&server, None), Box::new(FileStorage::new(dir.path())));

    assert!(!client.restore()?);
    assert!(client.session().is_none());
    assert!(client.channel_url().is_none());
    Ok(())
}

#[tokio::test]
async fn test_rejected_session_is_ended_on_verify() -> Result<()> {
    setup_logging();
    let server = backend().await;
    Mock::given(method("GET"))
        .and(path("/api/me"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "detail": "Could not validate credentials" })))
        .mount(&server)
        .await;
    let mut live = LiveServer::start().await?;
    let dir = tempdir()?;

    let previous = SessionStore::new(Box::new(FileStorage::new(dir.path())));
    previous.login(
        Identity {
            id: "u1".to_string(),
            username: "alice".to_string(),
            email: None,
            avatar_color: String::new(),
            is_online: false,
        },
        Credential::new("expired"),
    )?;

    let (mut client, _events) = client_with(config_for(&server, Some(&live)), Box::new(FileStorage::new(dir.path())));
    assert!(client.restore()?);
    let _conn = live.accept().await?;

    assert!(matches!(client.verify_session().await, Err(ChatError::Unauthorized)));
    assert!(client.session().is_none());
    assert_eq!(client.channel_state(), ChannelState::Disconnected);
    assert!(!dir.path().join("token").exists());
    Ok(())
}
