//! The single WebSocket endpoint.
//!
//! One reader task per socket (this function) and one writer task consuming
//! a bounded channel, so concurrent emissions from the router, the
//! signaling relay, and the backfill path serialize onto the wire without
//! interleaving frames.
//!
//! Contract: unknown, malformed, or unauthorized frames produce an
//! `error` frame on the same socket and the connection stays open. Fatal
//! conditions (ban, account deletion, supersession) close with 1000/1008
//! and a short reason.

use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::future::FutureExt;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use whisper_common::error::{RelayError, RelayResult};
use whisper_common::ids::WhisperId;
use whisper_common::keys;
use whisper_store::CHANNEL_PRESENCE;

use crate::protocol::{ClientFrame, PresenceEvent, ServerFrame, CLIENT_FRAME_TAGS};
use crate::session::{new_session, Outbound, OutboundHandle, OUTBOUND_BUFFER};
use crate::{account, groups, now_ms, router, signaling, RelayState};

/// A single wire write may not stall longer than this before the socket is
/// considered stale.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the writer gets to flush queued frames after the reader ends.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// Per-socket context threaded through every frame handler.
pub(crate) struct SocketCtx {
    pub state: Arc<RelayState>,
    pub socket_id: String,
    /// Bound after a successful `register_proof`.
    pub whisper_id: Option<WhisperId>,
    pub out: OutboundHandle,
}

impl SocketCtx {
    /// The authenticated identity, or `NOT_REGISTERED`.
    pub fn authed(&self) -> RelayResult<WhisperId> {
        self.whisper_id.clone().ok_or(RelayError::NotRegistered)
    }

    pub fn send(&self, frame: ServerFrame) -> bool {
        self.out.send(frame)
    }
}

/// Handle a single WebSocket connection.
async fn handle_connection(socket: WebSocket, state: Arc<RelayState>) {
    let (sink, mut stream) = socket.split();
    let socket_id = uuid::Uuid::new_v4().to_string();

    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let mut writer = tokio::spawn(write_loop(sink, rx));

    let mut ctx = SocketCtx {
        state: state.clone(),
        socket_id: socket_id.clone(),
        whisper_id: None,
        out: OutboundHandle::new(tx),
    };

    tracing::debug!(socket = %socket_id, "WebSocket connected");

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => {
                if dispatch_text(&mut ctx, &text).await.is_break() {
                    break;
                }
            }
            Message::Close(_) => break,
            // Axum answers protocol-level pings itself.
            _ => {}
        }
    }

    disconnect(&ctx).await;
    tracing::debug!(socket = %socket_id, user = ?ctx.whisper_id, "WebSocket disconnected");

    // Give the writer a bounded window to flush any final Close frame.
    drop(ctx);
    if tokio::time::timeout(DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
}

/// Writer task: serializes frames onto the wire, stops on a Close or when
/// a single write stalls past the timeout (stale socket).
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(frame) => {
                let Ok(json) = serde_json::to_string(&frame) else {
                    tracing::error!("Failed to encode server frame");
                    continue;
                };
                let write = sink.send(Message::Text(json.into()));
                match tokio::time::timeout(WRITE_TIMEOUT, write).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => break,
                    Err(_) => {
                        tracing::warn!("Socket write stalled; closing as stale");
                        break;
                    }
                }
            }
            Outbound::Close { code, reason } => {
                let frame = CloseFrame {
                    code,
                    reason: reason.into(),
                };
                let _ = tokio::time::timeout(WRITE_TIMEOUT, sink.send(Message::Close(Some(frame))))
                    .await;
                break;
            }
        }
    }
}

/// Decode and dispatch one text frame. Never panics across the socket
/// task: handler panics are caught and surfaced as `INTERNAL_ERROR`.
async fn dispatch_text(ctx: &mut SocketCtx, text: &str) -> ControlFlow<()> {
    let frame = match parse_frame(text) {
        Ok(frame) => frame,
        Err(err) => {
            ctx.send(ServerFrame::error(&err));
            return ControlFlow::Continue(());
        }
    };

    let outcome = AssertUnwindSafe(route_frame(ctx, frame)).catch_unwind().await;
    let result = match outcome {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(socket = %ctx.socket_id, "Frame handler panicked");
            Err(RelayError::Internal(anyhow::anyhow!("handler panicked")))
        }
    };

    match result {
        Ok(flow) => flow,
        Err(err) => {
            let fatal = err.is_fatal();
            ctx.send(ServerFrame::error(&err));
            if fatal {
                ctx.out.close(1008, "policy violation");
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }
    }
}

/// Parse a raw text frame, distinguishing an unknown tag from malformed
/// JSON or a bad payload.
fn parse_frame(text: &str) -> RelayResult<ClientFrame> {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => Ok(frame),
        Err(_) => {
            let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
                return Err(RelayError::ParseError);
            };
            match value.get("type").and_then(|t| t.as_str()) {
                Some(tag) if !CLIENT_FRAME_TAGS.contains(&tag) => Err(RelayError::UnknownType),
                _ => Err(RelayError::ParseError),
            }
        }
    }
}

/// Authorization gate plus exhaustive dispatch.
async fn route_frame(ctx: &mut SocketCtx, frame: ClientFrame) -> RelayResult<ControlFlow<()>> {
    // Everything except the auth handshake requires a bound identity.
    if !matches!(frame, ClientFrame::Register(_) | ClientFrame::RegisterProof { .. }) {
        ctx.authed()?;
    }

    match frame {
        ClientFrame::Register(payload) => handle_register(ctx, payload).await?,
        ClientFrame::RegisterProof { signature } => {
            handle_register_proof(ctx, &signature).await?
        }
        ClientFrame::SendMessage(msg) => router::handle_send_message(ctx, msg).await?,
        ClientFrame::DeliveryReceipt {
            message_id,
            to_whisper_id,
            status,
        } => router::handle_delivery_receipt(ctx, message_id, &to_whisper_id, status).await?,
        ClientFrame::FetchPending { cursor } => {
            let wid = ctx.authed()?;
            router::send_backfill_page(&ctx.state, &ctx.out, &wid, cursor).await?;
        }
        ClientFrame::Ping { .. } => router::handle_ping(ctx).await?,
        ClientFrame::Reaction {
            message_id,
            to_whisper_id,
            emoji,
        } => router::handle_reaction(ctx, message_id, &to_whisper_id, emoji).await?,
        ClientFrame::Typing {
            to_whisper_id,
            is_typing,
        } => router::handle_typing(ctx, &to_whisper_id, is_typing).await?,
        ClientFrame::BlockUser { whisper_id } => {
            account::handle_block_user(ctx, &whisper_id).await?
        }
        ClientFrame::UnblockUser { whisper_id } => {
            account::handle_unblock_user(ctx, &whisper_id).await?
        }
        ClientFrame::DeleteAccount {
            confirmation,
            timestamp,
            signature,
        } => {
            return account::handle_delete_account(ctx, &confirmation, timestamp, &signature)
                .await;
        }
        ClientFrame::CallInitiate {
            to_whisper_id,
            call_id,
            offer,
            is_video,
            caller_name,
        } => {
            signaling::handle_call_initiate(ctx, &to_whisper_id, call_id, offer, is_video, caller_name)
                .await?
        }
        ClientFrame::CallAnswer {
            to_whisper_id,
            call_id,
            answer,
        } => signaling::handle_call_answer(ctx, &to_whisper_id, call_id, answer).await?,
        ClientFrame::CallIceCandidate {
            to_whisper_id,
            call_id,
            candidate,
        } => signaling::handle_call_ice_candidate(ctx, &to_whisper_id, call_id, candidate).await?,
        ClientFrame::CallEnd {
            to_whisper_id,
            call_id,
        } => signaling::handle_call_end(ctx, &to_whisper_id, call_id).await?,
        ClientFrame::GetTurnCredentials {} => signaling::handle_turn_credentials(ctx).await?,
        ClientFrame::CreateGroup {
            group_id,
            name,
            members,
        } => groups::handle_create_group(ctx, &group_id, name, members).await?,
        ClientFrame::SendGroupMessage {
            group_id,
            message_id,
            encrypted_content,
            nonce,
            sender_name,
        } => {
            groups::handle_send_group_message(
                ctx,
                &group_id,
                message_id,
                encrypted_content,
                nonce,
                sender_name,
            )
            .await?
        }
        ClientFrame::UpdateGroup {
            group_id,
            name,
            add_members,
            remove_members,
        } => groups::handle_update_group(ctx, &group_id, name, add_members, remove_members).await?,
        ClientFrame::LeaveGroup { group_id } => groups::handle_leave_group(ctx, &group_id).await?,
        ClientFrame::LookupPublicKey { whisper_id } => {
            account::handle_lookup_public_key(ctx, whisper_id).await?
        }
        ClientFrame::ReportUser { whisper_id, reason } => {
            account::handle_report_user(ctx, &whisper_id, reason).await?
        }
    }

    Ok(ControlFlow::Continue(()))
}

/// `register`: validate the claimed identity and issue a challenge.
async fn handle_register(
    ctx: &mut SocketCtx,
    payload: crate::protocol::RegisterPayload,
) -> RelayResult<()> {
    let wid = WhisperId::parse(&payload.whisper_id).map_err(|_| RelayError::InvalidId)?;

    if ctx.state.store.is_banned(&wid).await.unwrap_or(false) {
        return Err(RelayError::Banned);
    }

    keys::validate_encryption_key(&payload.public_key).map_err(|e| RelayError::Validation {
        message: e.to_string(),
    })?;
    keys::parse_signing_key(&payload.signing_public_key).map_err(|e| RelayError::Validation {
        message: e.to_string(),
    })?;

    let challenge = ctx
        .state
        .challenges
        .issue(
            &ctx.socket_id,
            wid,
            payload.public_key,
            payload.signing_public_key,
            now_ms(),
            payload.push_token,
            payload.voip_token,
            payload.platform,
            payload.prefs,
        )
        .await;

    ctx.send(ServerFrame::RegisterChallenge { challenge });
    Ok(())
}

/// `register_proof`: verify the signature, bind the session, update the
/// directories, then run the post-auth sequence: backfill, queued group
/// invites, pending call offer.
async fn handle_register_proof(ctx: &mut SocketCtx, signature: &str) -> RelayResult<()> {
    // The pending challenge is removed in every terminal case.
    let pending = ctx
        .state
        .challenges
        .take(&ctx.socket_id)
        .await
        .ok_or(RelayError::NoChallenge)?;

    let now = now_ms();
    if pending.is_expired(now) {
        return Err(RelayError::ChallengeExpired);
    }
    if !pending.verify(signature) {
        return Err(RelayError::AuthFailed);
    }

    let wid = pending.whisper_id.clone();
    let state = &ctx.state;

    // Bind the session, evicting any prior socket for this user.
    let session = new_session(
        ctx.socket_id.clone(),
        wid.clone(),
        now,
        pending.prefs,
        pending.platform.clone(),
        pending.push_token.clone(),
        pending.voip_token.clone(),
        ctx.out.clone(),
    );
    if let Some(old) = state.connections.register(session).await {
        // Re-auth on the same socket replaces the binding without closing.
        if old.socket_id != ctx.socket_id {
            tracing::info!(user = %wid, old_socket = %old.socket_id, "Session superseded");
            old.out.close(1000, "New connection established");
        }
    }
    // Other instances evict their binding through the presence channel.
    publish_presence(
        state,
        PresenceEvent::Online {
            whisper_id: wid.clone(),
            socket_id: ctx.socket_id.clone(),
        },
    )
    .await;

    // Directory and presence writes degrade to warnings: a lost KV write
    // must never tear down a freshly authenticated socket.
    if let Err(e) = state
        .store
        .put_identity(&wid, &pending.encryption_key, &pending.signing_key)
        .await
    {
        tracing::warn!(user = %wid, "Directory update failed: {e}");
    }
    let push_entry = pending.push_token.as_ref().map(|token| {
        whisper_store::directory::PushTokenEntry {
            token: token.clone(),
            platform: pending.platform.clone(),
        }
    });
    if let Err(e) = state
        .store
        .put_push_tokens(&wid, push_entry.as_ref(), pending.voip_token.as_deref())
        .await
    {
        tracing::warn!(user = %wid, "Push token update failed: {e}");
    }
    if let Err(e) = state.store.mark_active(&wid, &ctx.socket_id).await {
        tracing::warn!(user = %wid, "Presence write failed: {e}");
    }
    if let Err(e) = state.store.mark_registered(&wid).await {
        tracing::warn!(user = %wid, "Registered marker write failed: {e}");
    }
    if let Err(e) = state.store.touch_last_seen(&wid, now).await {
        tracing::warn!(user = %wid, "Last-seen write failed: {e}");
    }

    ctx.whisper_id = Some(wid.clone());
    ctx.send(ServerFrame::RegisterAck { success: true });

    tracing::info!(
        user = %wid,
        socket = %ctx.socket_id,
        key = %keys::fingerprint(&pending.signing_key),
        "Client authenticated"
    );

    // Post-auth sequence, in this order: queued messages, group invites,
    // pending call offer.
    router::send_backfill_page(state, &ctx.out, &wid, 0).await?;
    groups::deliver_pending_invites(state, &ctx.out, &wid).await;
    groups::deliver_queued_group_frames(state, &ctx.out, &wid).await;
    signaling::deliver_pending_offer(state, &ctx.out, &wid).await;

    Ok(())
}

/// Disconnect path. Idempotent: the stale-connection sweep runs the same
/// cleanup, and a superseded socket's late disconnect is a no-op.
async fn disconnect(ctx: &SocketCtx) {
    ctx.state.challenges.discard(&ctx.socket_id).await;
    let Some(wid) = &ctx.whisper_id else { return };
    cleanup_session(&ctx.state, wid, &ctx.socket_id).await;
}

/// Shared between the disconnect path and the stale sweep.
pub(crate) async fn cleanup_session(state: &RelayState, wid: &WhisperId, socket_id: &str) {
    if state
        .connections
        .remove_if_current(wid, socket_id)
        .await
        .is_none()
    {
        return; // superseded or already cleaned up
    }

    if let Err(e) = state.store.clear_active(wid, socket_id).await {
        tracing::warn!(user = %wid, "Presence cleanup failed: {e}");
    }
    if let Err(e) = state.store.touch_last_seen(wid, now_ms()).await {
        tracing::warn!(user = %wid, "Last-seen write failed: {e}");
    }
    state.blocks.forget(wid).await;
    state.typing.prune_user(wid).await;

    // A socket close during an in-flight call ends the call for the peer.
    signaling::end_calls_for(state, wid).await;

    publish_presence(
        state,
        PresenceEvent::Offline {
            whisper_id: wid.clone(),
            socket_id: socket_id.to_owned(),
        },
    )
    .await;
}

async fn publish_presence(state: &RelayState, event: PresenceEvent) {
    let Ok(json) = serde_json::to_string(&event) else {
        return;
    };
    if let Err(e) = state.store.publish(CHANNEL_PRESENCE, &json).await {
        tracing::warn!("Presence publish failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_frame_distinguishes_unknown_from_malformed() {
        assert!(matches!(parse_frame("{not json"), Err(RelayError::ParseError)));
        assert!(matches!(
            parse_frame(r#"{"type":"warp_drive","payload":{}}"#),
            Err(RelayError::UnknownType)
        ));
        // Known tag, bad payload: a parse error, not an unknown type.
        assert!(matches!(
            parse_frame(r#"{"type":"typing","payload":{}}"#),
            Err(RelayError::ParseError)
        ));
        assert!(parse_frame(r#"{"type":"ping","payload":{}}"#).is_ok());
    }
}
