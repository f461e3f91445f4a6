use std::time::Duration;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use roost_types::events::{GatewayCommand, GatewayEvent};

use crate::Gateway;
use crate::conversations;
use crate::error::GatewayError;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a single WebSocket connection. The first frame must be an
/// Identify command carrying a JWT; every later event handler sees the
/// verified identity bound here, never one taken from a payload.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let (user_id, username) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(identity) => identity,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", username, user_id);

    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    // Install the session (last connect wins), then replay current presence
    // so a fresh client can render who is already here before its own
    // online transition is announced network-wide.
    let (conn_id, mut user_rx) = gateway.dispatcher.register(user_id).await;

    for (uid, status) in gateway.dispatcher.presence_snapshot().await {
        if uid == user_id {
            continue;
        }
        gateway
            .dispatcher
            .send_to_user(user_id, GatewayEvent::PresenceUpdate { user_id: uid, status })
            .await;
    }

    gateway.presence.online(user_id).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward targeted events and broadcasts to the client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from the client
    let gateway_recv = gateway.clone();
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        if let Err(e) =
                            handle_command(&gateway_recv, user_id, &username_recv, conn_id, cmd)
                                .await
                        {
                            if e.is_client() {
                                debug!("{} ({}) client error: {}", username_recv, user_id, e);
                            } else {
                                tracing::error!(
                                    "{} ({}) command failed: {:#}",
                                    username_recv,
                                    user_id,
                                    e
                                );
                            }
                            // Errors go only to the originating connection
                            gateway_recv
                                .dispatcher
                                .send_to_user(
                                    user_id,
                                    GatewayEvent::Error {
                                        message: e.client_message(),
                                    },
                                )
                                .await;
                        }
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            truncate_frame(&text)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    teardown(&gateway, user_id, conn_id).await;

    info!("{} ({}) disconnected from gateway", username, user_id);
}

/// Disconnect teardown, entirely behind the conn_id guard: a stale
/// disconnect racing a newer connect for the same user must not remove the
/// session, wipe the replacement's typing entries, or announce offline.
/// Typing entries armed by the superseded connection expire via their own
/// timers.
async fn teardown(gateway: &Gateway, user_id: i64, conn_id: Uuid) {
    if gateway.dispatcher.unregister(user_id, conn_id).await {
        gateway.typing.disconnect_cleanup(user_id).await;
        gateway.presence.offline(user_id).await;
    }
}

/// Cap logged frame previews without splitting a multibyte character.
fn truncate_frame(text: &str) -> &str {
    const MAX_PREVIEW: usize = 200;
    if text.len() <= MAX_PREVIEW {
        return text;
    }
    let mut end = MAX_PREVIEW;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(i64, String)> {
    use jsonwebtoken::{DecodingKey, Validation, decode};
    use roost_types::api::Claims;

    let timeout = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some((token_data.claims.sub, token_data.claims.username));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

/// Dispatch one client command. The acting identity and conn_id come from
/// the connection, never from the payload. A failure here never tears the
/// connection down; the caller reports it back over the `error` event.
async fn handle_command(
    gateway: &Gateway,
    user_id: i64,
    username: &str,
    conn_id: Uuid,
    cmd: GatewayCommand,
) -> Result<(), GatewayError> {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::SendMessage {
            content,
            channel_id,
            dm_id,
            attachments,
        } => {
            let target = conversations::conversation_target(channel_id, dm_id)?;
            gateway
                .fanout
                .send(user_id, target, content, attachments)
                .await?;
        }

        GatewayCommand::EditMessage {
            message_id,
            content,
        } => {
            gateway.fanout.edit(user_id, message_id, content).await?;
        }

        GatewayCommand::DeleteMessage { message_id } => {
            gateway.fanout.delete(user_id, message_id).await?;
        }

        GatewayCommand::TypingStart { channel_id, dm_id } => {
            let target = conversations::conversation_target(channel_id, dm_id)?;
            let conversation = conversations::resolve(&gateway.db, target).await?;
            gateway.typing.start(user_id, username, conversation).await;
        }

        GatewayCommand::TypingStop { channel_id, dm_id } => {
            let target = conversations::conversation_target(channel_id, dm_id)?;
            let conversation = conversations::resolve(&gateway.db, target).await?;
            gateway.typing.stop(user_id, conversation).await;
        }

        // Channel-level access control happens at the REST layer before a
        // client is ever shown a channel id; the id is trusted here.
        GatewayCommand::JoinChannel { channel_id } => {
            debug!("{} ({}) joining channel {}", username, user_id, channel_id);
            gateway
                .dispatcher
                .join_room(user_id, conn_id, channel_id)
                .await;
        }

        GatewayCommand::LeaveChannel { channel_id } => {
            debug!("{} ({}) leaving channel {}", username, user_id, channel_id);
            gateway
                .dispatcher
                .leave_room(user_id, conn_id, channel_id)
                .await;
        }

        GatewayCommand::SetStatus { status } => {
            gateway.presence.set_status(user_id, &status).await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use roost_db::Database;
    use roost_types::models::Conversation;
    use tokio::time::advance;

    fn gateway() -> Gateway {
        Gateway::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn truncate_frame_passes_short_frames_through() {
        assert_eq!(truncate_frame("hello"), "hello");
        let exactly_200 = "x".repeat(200);
        assert_eq!(truncate_frame(&exactly_200), exactly_200);
    }

    #[test]
    fn truncate_frame_never_splits_a_multibyte_character() {
        // Bytes 199..201 are one two-byte character straddling the cap
        let frame = format!("{}é{}", "a".repeat(199), "b".repeat(100));
        let preview = truncate_frame(&frame);
        assert_eq!(preview, "a".repeat(199));
        assert!(preview.len() <= 200);

        // Cap landing mid-way through a four-byte character
        let frame = format!("{}𝄞{}", "a".repeat(198), "b".repeat(100));
        let preview = truncate_frame(&frame);
        assert!(preview.is_char_boundary(preview.len()));
        assert!(preview.len() <= 200);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_teardown_leaves_the_new_connections_typing_alone() {
        let gateway = gateway();
        let dm = Conversation::Direct {
            id: 7,
            participants: (1, 2),
        };

        let (old_conn, _old_rx) = gateway.dispatcher.register(1).await;
        let (_new_conn, _new_rx) = gateway.dispatcher.register(1).await;
        let (_peer_conn, mut rx_peer) = gateway.dispatcher.register(2).await;

        // Typing state belongs to the new connection now
        gateway.typing.start(1, "alice", dm).await;
        settle().await;
        assert!(matches!(
            rx_peer.try_recv().unwrap(),
            GatewayEvent::TypingStart { .. }
        ));

        // The superseded connection's teardown arrives late
        teardown(&gateway, 1, old_conn).await;
        settle().await;

        // No premature stop, no offline presence, session still live
        assert!(rx_peer.try_recv().is_err());
        assert!(gateway.dispatcher.is_connected(1).await);

        // The live entry's own timer still expires exactly once
        advance(Duration::from_millis(3100)).await;
        settle().await;
        assert!(matches!(
            rx_peer.try_recv().unwrap(),
            GatewayEvent::TypingStop { .. }
        ));
        assert!(rx_peer.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn current_teardown_stops_typing_and_announces_offline() {
        let gateway = gateway();
        let dm = Conversation::Direct {
            id: 7,
            participants: (1, 2),
        };

        let (conn, _rx) = gateway.dispatcher.register(1).await;
        let (_peer_conn, mut rx_peer) = gateway.dispatcher.register(2).await;

        gateway.typing.start(1, "alice", dm).await;
        settle().await;
        let _ = rx_peer.try_recv();

        teardown(&gateway, 1, conn).await;
        settle().await;

        assert!(!gateway.dispatcher.is_connected(1).await);
        assert!(matches!(
            rx_peer.try_recv().unwrap(),
            GatewayEvent::TypingStop { .. }
        ));
        match rx_peer.try_recv().unwrap() {
            GatewayEvent::PresenceUpdate { user_id, status } => {
                assert_eq!(user_id, 1);
                assert_eq!(status, "offline");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // The cancelled timer must not fire a second stop
        advance(Duration::from_millis(4000)).await;
        settle().await;
        assert!(rx_peer.try_recv().is_err());
    }
}
