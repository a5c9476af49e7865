//! 1:1 message routing, receipts, backfill, and transient events.
//!
//! Routing algorithm: blocked check → live delivery (local socket, then
//! cross-instance publish) → offline queue → push wake. Receipts are
//! best-effort and may overtake the message that triggered them; typing
//! and reactions are never queued.

use whisper_common::envelope::Envelope;
use whisper_common::error::{RelayError, RelayResult};
use whisper_common::ids::WhisperId;
use whisper_store::{CHANNEL_CALLS, CHANNEL_MESSAGES};

use crate::handler::SocketCtx;
use crate::protocol::{DeliveredMessage, OutgoingMessage, RoutedFrame, ServerFrame};
use crate::session::OutboundHandle;
use crate::{now_ms, RelayState};

/// Which pub/sub channel carries a cross-instance frame.
#[derive(Clone, Copy)]
pub(crate) enum RouteChannel {
    Messages,
    Calls,
}

impl RouteChannel {
    fn name(self) -> &'static str {
        match self {
            Self::Messages => CHANNEL_MESSAGES,
            Self::Calls => CHANNEL_CALLS,
        }
    }
}

/// Deliver a frame to a user wherever their socket lives: directly when
/// bound on this instance, via pub/sub when another instance holds them.
/// Returns false when no live socket is known anywhere.
pub(crate) async fn send_to_user(
    state: &RelayState,
    to: &WhisperId,
    frame: ServerFrame,
    channel: RouteChannel,
) -> bool {
    if state.connections.send(to, frame.clone()).await {
        return true;
    }
    match state.store.is_active(to).await {
        Ok(true) => {
            let routed = RoutedFrame {
                to: to.clone(),
                frame,
            };
            match serde_json::to_string(&routed) {
                Ok(json) => match state.store.publish(channel.name(), &json).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(user = %to, "Cross-instance publish failed: {e}");
                        false
                    }
                },
                Err(e) => {
                    tracing::error!("Routed frame encode failed: {e}");
                    false
                }
            }
        }
        Ok(false) => false,
        Err(e) => {
            tracing::warn!(user = %to, "Presence lookup failed: {e}");
            false
        }
    }
}

/// `send_message`: route an opaque envelope.
pub(crate) async fn handle_send_message(
    ctx: &mut SocketCtx,
    msg: OutgoingMessage,
) -> RelayResult<()> {
    let from = ctx.authed()?;
    let to = WhisperId::parse(&msg.to_whisper_id).map_err(|_| RelayError::InvalidId)?;

    if ctx.state.blocks.is_blocked(&to, &from).await? {
        return Err(RelayError::Blocked);
    }

    let now = now_ms();
    let envelope = Envelope {
        message_id: msg.message_id.clone(),
        from_whisper_id: from.clone(),
        to_whisper_id: to.clone(),
        encrypted_content: msg.encrypted_content,
        nonce: msg.nonce,
        timestamp: now,
        attachments: msg.attachments,
    };

    // Attach the sender's cached key so an unknown sender is decryptable
    // without a directory round-trip.
    let sender_public_key = match ctx.state.store.encryption_key(&from).await {
        Ok(key) => key,
        Err(e) => {
            tracing::warn!(user = %from, "Sender key lookup failed: {e}");
            None
        }
    };

    let delivered = send_to_user(
        &ctx.state,
        &to,
        ServerFrame::MessageReceived(DeliveredMessage {
            envelope: envelope.clone(),
            sender_public_key: sender_public_key.clone(),
        }),
        RouteChannel::Messages,
    )
    .await;

    let status = if delivered {
        "delivered"
    } else {
        let queued = envelope.into_queued(now, sender_public_key);
        if let Err(e) = ctx.state.store.enqueue(&to, &queued).await {
            // Best-effort durable: a lost write is a lost pending message,
            // never a dead socket.
            tracing::warn!(user = %to, "Enqueue failed: {e}");
        }
        "pending"
    };

    ctx.send(ServerFrame::MessageDelivered {
        message_id: msg.message_id,
        status: status.to_owned(),
        to_whisper_id: to.clone(),
    });

    // Push in both cases: a live socket may belong to a backgrounded app.
    notify_message(&ctx.state, &to, &from).await;
    Ok(())
}

/// Fire a content-free message push if the recipient has a token.
async fn notify_message(state: &RelayState, to: &WhisperId, from: &WhisperId) {
    match state.store.push_token(to).await {
        Ok(Some(entry)) => {
            state.push.send_message_push(&entry.token, from);
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(user = %to, "Push token lookup failed: {e}"),
    }
}

/// `delivery_receipt`: forward a delivery/read receipt to the original
/// sender. Read receipts honor the reporter's privacy prefs.
pub(crate) async fn handle_delivery_receipt(
    ctx: &mut SocketCtx,
    message_id: String,
    to_whisper_id: &str,
    status: String,
) -> RelayResult<()> {
    let from = ctx.authed()?;
    let to = WhisperId::parse(to_whisper_id).map_err(|_| RelayError::InvalidId)?;

    // Read receipts are suppressed at the source for users who disabled
    // them or hide their online status.
    if status == "read" {
        let suppress = match ctx.state.connections.get(&from).await {
            Some(session) => {
                !session.prefs.send_read_receipts || session.prefs.hide_online_status
            }
            None => false,
        };
        if suppress {
            return Ok(());
        }
    }

    send_to_user(
        &ctx.state,
        &to,
        ServerFrame::DeliveryStatus {
            message_id,
            status,
            from_whisper_id: from,
        },
        RouteChannel::Messages,
    )
    .await;
    Ok(())
}

/// Emit one page of the offline queue as `pending_messages`. The queue is
/// cleared only after a fully-delivered final page; a partial read keeps
/// its place for the next `fetch_pending{cursor}`.
pub(crate) async fn send_backfill_page(
    state: &RelayState,
    out: &OutboundHandle,
    wid: &WhisperId,
    cursor: usize,
) -> RelayResult<()> {
    let page = state
        .store
        .queue_page(wid, cursor, whisper_store::queue::PAGE_SIZE)
        .await?;

    let delivered_some = !page.messages.is_empty();
    let exhausted = !page.has_more;

    out.send(ServerFrame::PendingMessages {
        messages: page.messages,
        cursor: page.cursor,
        next_cursor: page.next_cursor,
        has_more: page.has_more,
    });

    if exhausted && delivered_some {
        if let Err(e) = state.store.clear_queue(wid).await {
            tracing::warn!(user = %wid, "Queue clear failed: {e}");
        }
    }
    Ok(())
}

/// `ping`: refresh liveness and answer `pong`.
pub(crate) async fn handle_ping(ctx: &mut SocketCtx) -> RelayResult<()> {
    let wid = ctx.authed()?;
    let now = now_ms();
    if let Some(session) = ctx.state.connections.get(&wid).await {
        session.touch_ping(now);
    }
    if let Err(e) = ctx.state.store.refresh_active(&wid, &ctx.socket_id).await {
        tracing::warn!(user = %wid, "Presence refresh failed: {e}");
    }
    ctx.send(ServerFrame::Pong { timestamp: now });
    Ok(())
}

/// `reaction`: live-only transient; silently dropped when blocked or when
/// the recipient is offline.
pub(crate) async fn handle_reaction(
    ctx: &mut SocketCtx,
    message_id: String,
    to_whisper_id: &str,
    emoji: Option<String>,
) -> RelayResult<()> {
    let from = ctx.authed()?;
    let to = WhisperId::parse(to_whisper_id).map_err(|_| RelayError::InvalidId)?;

    if ctx.state.blocks.is_blocked(&to, &from).await? {
        return Ok(());
    }

    send_to_user(
        &ctx.state,
        &to,
        ServerFrame::ReactionReceived {
            message_id,
            from_whisper_id: from,
            emoji,
        },
        RouteChannel::Messages,
    )
    .await;
    Ok(())
}

/// `typing`: throttled live-only transient.
pub(crate) async fn handle_typing(
    ctx: &mut SocketCtx,
    to_whisper_id: &str,
    is_typing: bool,
) -> RelayResult<()> {
    let from = ctx.authed()?;
    let to = WhisperId::parse(to_whisper_id).map_err(|_| RelayError::InvalidId)?;

    // The sender's own prefs gate the indicator entirely.
    if let Some(session) = ctx.state.connections.get(&from).await {
        if !session.prefs.send_typing_indicator || session.prefs.hide_online_status {
            return Ok(());
        }
    }
    if ctx.state.blocks.is_blocked(&to, &from).await? {
        return Ok(());
    }
    if !ctx.state.typing.allow(&from, &to, now_ms()).await {
        return Err(RelayError::RateLimited);
    }

    send_to_user(
        &ctx.state,
        &to,
        ServerFrame::TypingStatus {
            from_whisper_id: from,
            is_typing,
        },
        RouteChannel::Messages,
    )
    .await;
    Ok(())
}
