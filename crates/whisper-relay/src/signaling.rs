//! WebRTC call signaling relay.
//!
//! The server forwards SDP offers/answers and ICE candidates as opaque
//! blobs and tracks only the in-flight state machine
//! `initiated → ringing → answered → ended`. Nothing is persisted: a call
//! session exists only while signaling frames are moving, and a pending
//! offer for an offline callee lives at most 60 seconds.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use whisper_common::error::{RelayError, RelayResult};
use whisper_common::ids::WhisperId;
use whisper_common::turn;
use whisper_store::calls::{CallOffer, OFFER_TTL_MS};

use crate::handler::SocketCtx;
use crate::protocol::ServerFrame;
use crate::router::{send_to_user, RouteChannel};
use crate::session::OutboundHandle;
use crate::{now_ms, RelayState};

/// In-flight call state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Initiated,
    Ringing,
    Answered,
}

/// One in-flight call, keyed by its client-chosen id.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub call_id: String,
    pub caller: WhisperId,
    pub callee: WhisperId,
    pub is_video: bool,
    pub state: CallState,
}

impl CallSession {
    /// The other party, from `wid`'s point of view.
    fn peer_of(&self, wid: &WhisperId) -> Option<WhisperId> {
        if self.caller == *wid {
            Some(self.callee.clone())
        } else if self.callee == *wid {
            Some(self.caller.clone())
        } else {
            None
        }
    }
}

/// In-flight call table, instance-local.
#[derive(Clone, Default)]
pub struct ActiveCalls {
    inner: Arc<RwLock<HashMap<String, CallSession>>>,
}

impl ActiveCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn begin(&self, session: CallSession) {
        self.inner
            .write()
            .await
            .insert(session.call_id.clone(), session);
    }

    pub async fn set_state(&self, call_id: &str, state: CallState) {
        if let Some(session) = self.inner.write().await.get_mut(call_id) {
            session.state = state;
        }
    }

    pub async fn end(&self, call_id: &str) -> Option<CallSession> {
        self.inner.write().await.remove(call_id)
    }

    /// Remove and return every call this user is a party to.
    pub async fn take_involving(&self, wid: &WhisperId) -> Vec<CallSession> {
        let mut inner = self.inner.write().await;
        let ids: Vec<String> = inner
            .values()
            .filter(|c| c.caller == *wid || c.callee == *wid)
            .map(|c| c.call_id.clone())
            .collect();
        ids.into_iter().filter_map(|id| inner.remove(&id)).collect()
    }
}

/// `call_initiate`: ring a live callee, or wake an offline one through
/// VoIP/regular push and park the offer for 60 seconds.
pub(crate) async fn handle_call_initiate(
    ctx: &mut SocketCtx,
    to_whisper_id: &str,
    call_id: String,
    offer: serde_json::Value,
    is_video: bool,
    caller_name: Option<String>,
) -> RelayResult<()> {
    let from = ctx.authed()?;
    let to = WhisperId::parse(to_whisper_id).map_err(|_| RelayError::InvalidId)?;

    if ctx.state.blocks.is_blocked(&to, &from).await? {
        return Err(RelayError::Blocked);
    }

    let now = now_ms();
    let incoming = ServerFrame::IncomingCall {
        from_whisper_id: from.clone(),
        call_id: call_id.clone(),
        offer: offer.clone(),
        is_video,
        caller_name: caller_name.clone(),
    };

    if send_to_user(&ctx.state, &to, incoming, RouteChannel::Calls).await {
        ctx.state
            .calls
            .begin(CallSession {
                call_id: call_id.clone(),
                caller: from.clone(),
                callee: to.clone(),
                is_video,
                state: CallState::Ringing,
            })
            .await;
        ctx.send(ServerFrame::CallRinging {
            call_id: call_id.clone(),
            to_whisper_id: to.clone(),
        });
        // The live socket may belong to a backgrounded app; wake it too.
        notify_call(&ctx.state, &to, &from, &call_id, is_video).await;
        return Ok(());
    }

    // Offline: VoIP push first when the platform supports it, always a
    // regular high-priority push as well (Android path, iOS backstop).
    let voip_token = ctx.state.store.voip_token(&to).await.unwrap_or_else(|e| {
        tracing::warn!(user = %to, "VoIP token lookup failed: {e}");
        None
    });
    let push_entry = ctx.state.store.push_token(&to).await.unwrap_or_else(|e| {
        tracing::warn!(user = %to, "Push token lookup failed: {e}");
        None
    });
    if voip_token.is_none() && push_entry.is_none() {
        return Err(RelayError::RecipientOffline);
    }

    if let Some(token) = &voip_token {
        ctx.state
            .push
            .send_voip_push(token, &from, &call_id, is_video, caller_name.as_deref());
    }
    if let Some(entry) = &push_entry {
        ctx.state
            .push
            .send_call_push(&entry.token, &from, &call_id, is_video);
    }

    ctx.state
        .offers
        .put(
            to.clone(),
            CallOffer {
                call_id: call_id.clone(),
                from: from.clone(),
                offer,
                is_video,
                caller_name,
                timestamp: now,
                expires_at: now + OFFER_TTL_MS,
            },
        )
        .await;
    ctx.state
        .calls
        .begin(CallSession {
            call_id,
            caller: from,
            callee: to,
            is_video,
            state: CallState::Initiated,
        })
        .await;
    Ok(())
}

/// Fire a content-free incoming-call push on the regular channel.
async fn notify_call(
    state: &RelayState,
    to: &WhisperId,
    from: &WhisperId,
    call_id: &str,
    is_video: bool,
) {
    match state.store.push_token(to).await {
        Ok(Some(entry)) => state.push.send_call_push(&entry.token, from, call_id, is_video),
        Ok(None) => {}
        Err(e) => tracing::warn!(user = %to, "Push token lookup failed: {e}"),
    }
}

/// `call_answer`: relay the SDP answer back to the caller.
pub(crate) async fn handle_call_answer(
    ctx: &mut SocketCtx,
    to_whisper_id: &str,
    call_id: String,
    answer: serde_json::Value,
) -> RelayResult<()> {
    let from = ctx.authed()?;
    let to = WhisperId::parse(to_whisper_id).map_err(|_| RelayError::InvalidId)?;

    ctx.state.calls.set_state(&call_id, CallState::Answered).await;
    send_to_user(
        &ctx.state,
        &to,
        ServerFrame::CallAnswered {
            from_whisper_id: from,
            call_id,
            answer,
        },
        RouteChannel::Calls,
    )
    .await;
    Ok(())
}

/// `call_ice_candidate`: best-effort relay, no retry.
pub(crate) async fn handle_call_ice_candidate(
    ctx: &mut SocketCtx,
    to_whisper_id: &str,
    call_id: String,
    candidate: serde_json::Value,
) -> RelayResult<()> {
    let from = ctx.authed()?;
    let to = WhisperId::parse(to_whisper_id).map_err(|_| RelayError::InvalidId)?;

    send_to_user(
        &ctx.state,
        &to,
        ServerFrame::CallIceCandidate {
            from_whisper_id: from,
            call_id,
            candidate,
        },
        RouteChannel::Calls,
    )
    .await;
    Ok(())
}

/// `call_end`: relay and drop the in-flight state.
pub(crate) async fn handle_call_end(
    ctx: &mut SocketCtx,
    to_whisper_id: &str,
    call_id: String,
) -> RelayResult<()> {
    let from = ctx.authed()?;
    let to = WhisperId::parse(to_whisper_id).map_err(|_| RelayError::InvalidId)?;

    ctx.state.calls.end(&call_id).await;
    send_to_user(
        &ctx.state,
        &to,
        ServerFrame::CallEnded {
            from_whisper_id: from,
            call_id,
        },
        RouteChannel::Calls,
    )
    .await;
    Ok(())
}

/// `get_turn_credentials`: mint rotating HMAC credentials.
pub(crate) async fn handle_turn_credentials(ctx: &mut SocketCtx) -> RelayResult<()> {
    let wid = ctx.authed()?;
    let settings = &ctx.state.settings;
    if settings.turn_secret.is_empty() {
        return Err(RelayError::Validation {
            message: "TURN credentials are not configured".into(),
        });
    }

    let creds = turn::mint(
        &settings.turn_secret,
        &wid,
        chrono::Utc::now().timestamp(),
        settings.turn_ttl_secs,
        settings.turn_urls.clone(),
    );
    ctx.send(ServerFrame::TurnCredentials(creds));
    Ok(())
}

/// Post-auth: hand over a parked call offer, exactly once.
pub(crate) async fn deliver_pending_offer(
    state: &RelayState,
    out: &OutboundHandle,
    wid: &WhisperId,
) {
    let Some(offer) = state.offers.take(wid, now_ms()).await else {
        return;
    };
    state.calls.set_state(&offer.call_id, CallState::Ringing).await;
    out.send(ServerFrame::IncomingCall {
        from_whisper_id: offer.from,
        call_id: offer.call_id,
        offer: offer.offer,
        is_video: offer.is_video,
        caller_name: offer.caller_name,
    });
}

/// A socket close during an in-flight call is an end signal to the peer.
pub(crate) async fn end_calls_for(state: &RelayState, wid: &WhisperId) {
    for call in state.calls.take_involving(wid).await {
        if let Some(peer) = call.peer_of(wid) {
            send_to_user(
                state,
                &peer,
                ServerFrame::CallEnded {
                    from_whisper_id: wid.clone(),
                    call_id: call.call_id,
                },
                RouteChannel::Calls,
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wid(s: &str) -> WhisperId {
        WhisperId::parse(s).unwrap()
    }

    fn call(id: &str, caller: &str, callee: &str) -> CallSession {
        CallSession {
            call_id: id.into(),
            caller: wid(caller),
            callee: wid(callee),
            is_video: false,
            state: CallState::Ringing,
        }
    }

    #[tokio::test]
    async fn state_transitions_and_teardown() {
        let calls = ActiveCalls::new();
        calls.begin(call("c1", "WSP-AAAA-AAAA-AAAA", "WSP-BBBB-BBBB-BBBB")).await;
        calls.set_state("c1", CallState::Answered).await;

        let ended = calls.end("c1").await.unwrap();
        assert_eq!(ended.state, CallState::Answered);
        assert!(calls.end("c1").await.is_none());
    }

    #[tokio::test]
    async fn take_involving_matches_either_side() {
        let calls = ActiveCalls::new();
        calls.begin(call("c1", "WSP-AAAA-AAAA-AAAA", "WSP-BBBB-BBBB-BBBB")).await;
        calls.begin(call("c2", "WSP-CCCC-CCCC-CCCC", "WSP-AAAA-AAAA-AAAA")).await;
        calls.begin(call("c3", "WSP-DDDD-DDDD-DDDD", "WSP-EEEE-EEEE-EEEE")).await;

        let a = wid("WSP-AAAA-AAAA-AAAA");
        let taken = calls.take_involving(&a).await;
        assert_eq!(taken.len(), 2);
        for session in &taken {
            let peer = session.peer_of(&a).unwrap();
            assert_ne!(peer, a);
        }
        assert_eq!(calls.take_involving(&a).await.len(), 0);
        assert!(calls.end("c3").await.is_some(), "unrelated call untouched");
    }
}
