//! Blocks, directory lookups, reports, and account deletion.
//!
//! Deletion is the one operation that must leave no trace: queued
//! messages, blocks in both directions, group memberships (destroying
//! groups the user created), presence, directory, and push tokens all go.
//! The admin surface reuses [`purge_account`] so moderation deletions
//! honor the same invariants.

use std::ops::ControlFlow;

use whisper_common::error::{RelayError, RelayResult};
use whisper_common::ids::WhisperId;
use whisper_common::keys;
use whisper_store::moderation::Report;

use crate::auth::{deletion_message, DELETE_CONFIRMATION, DELETE_TIMESTAMP_WINDOW_MS};
use crate::handler::SocketCtx;
use crate::protocol::ServerFrame;
use crate::router::{send_to_user, RouteChannel};
use crate::{now_ms, signaling, RelayState};

/// `block_user`: persisted immediately; affects all subsequent traffic.
pub(crate) async fn handle_block_user(ctx: &mut SocketCtx, whisper_id: &str) -> RelayResult<()> {
    let from = ctx.authed()?;
    let target = WhisperId::parse(whisper_id).map_err(|_| RelayError::InvalidId)?;

    ctx.state.blocks.block(&from, &target).await?;
    tracing::debug!(user = %from, blocked = %target, "User blocked");
    ctx.send(ServerFrame::BlockAck {
        whisper_id: target,
        success: true,
    });
    Ok(())
}

/// `unblock_user`.
pub(crate) async fn handle_unblock_user(ctx: &mut SocketCtx, whisper_id: &str) -> RelayResult<()> {
    let from = ctx.authed()?;
    let target = WhisperId::parse(whisper_id).map_err(|_| RelayError::InvalidId)?;

    ctx.state.blocks.unblock(&from, &target).await?;
    ctx.send(ServerFrame::UnblockAck {
        whisper_id: target,
        success: true,
    });
    Ok(())
}

/// `lookup_public_key`: directory read. Unknown and deleted users look
/// identical: `{publicKey: null, exists: false}`.
pub(crate) async fn handle_lookup_public_key(
    ctx: &mut SocketCtx,
    whisper_id: String,
) -> RelayResult<()> {
    ctx.authed()?;
    let target = WhisperId::parse(&whisper_id).map_err(|_| RelayError::InvalidId)?;

    let public_key = ctx.state.store.encryption_key(&target).await?;
    let signing_public_key = ctx.state.store.signing_key(&target).await?;
    let exists = public_key.is_some();
    ctx.send(ServerFrame::PublicKeyResponse {
        whisper_id,
        public_key,
        signing_public_key,
        exists,
    });
    Ok(())
}

/// `report_user`: append to the moderation inbox.
pub(crate) async fn handle_report_user(
    ctx: &mut SocketCtx,
    whisper_id: &str,
    reason: Option<String>,
) -> RelayResult<()> {
    let from = ctx.authed()?;
    let target = WhisperId::parse(whisper_id).map_err(|_| RelayError::InvalidId)?;

    ctx.state
        .store
        .add_report(&Report {
            reporter: from.clone(),
            reported: target.clone(),
            reason,
            timestamp: now_ms(),
        })
        .await?;
    tracing::info!(reporter = %from, reported = %target, "User report filed");
    ctx.send(ServerFrame::ReportAck { success: true });
    Ok(())
}

/// `delete_account`: requires the literal confirmation string, a
/// timestamp within ±5 minutes of server time, and an Ed25519 signature
/// over `"DELETE_MY_ACCOUNT:" + timestamp` by the account's signing key.
pub(crate) async fn handle_delete_account(
    ctx: &mut SocketCtx,
    confirmation: &str,
    timestamp: i64,
    signature: &str,
) -> RelayResult<ControlFlow<()>> {
    let wid = ctx.authed()?;

    if confirmation != DELETE_CONFIRMATION {
        return Err(RelayError::Validation {
            message: "Deletion confirmation mismatch".into(),
        });
    }
    let now = now_ms();
    if (now - timestamp).abs() > DELETE_TIMESTAMP_WINDOW_MS {
        return Err(RelayError::Validation {
            message: "Deletion timestamp outside the allowed window".into(),
        });
    }

    let signing_key = ctx
        .state
        .store
        .signing_key(&wid)
        .await?
        .ok_or(RelayError::AuthFailed)?;
    keys::verify_signature(&signing_key, signature, deletion_message(timestamp).as_bytes())
        .map_err(|_| RelayError::AuthFailed)?;

    purge_account(&ctx.state, &wid).await;
    ctx.state
        .connections
        .remove_if_current(&wid, &ctx.socket_id)
        .await;

    tracing::info!(user = %wid, "Account deleted");
    ctx.send(ServerFrame::AccountDeleted { success: true });
    ctx.out.close(1000, "account deleted");
    Ok(ControlFlow::Break(()))
}

/// Tear down every trace of an account. Shared by self-service deletion
/// and the admin surface so both honor the same invariants.
pub async fn purge_account(state: &RelayState, wid: &WhisperId) {
    if let Err(e) = state.store.clear_queue(wid).await {
        tracing::warn!(user = %wid, "Queue purge failed: {e}");
    }
    if let Err(e) = state.blocks.purge_user(wid).await {
        tracing::warn!(user = %wid, "Block purge failed: {e}");
    }

    // Group teardown: destroy groups this user created, leave the rest.
    match state.store.groups_of(wid).await {
        Ok(groups) => {
            for gid in groups {
                let meta = match state.store.group(&gid).await {
                    Ok(Some(meta)) => meta,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(group = %gid, "Group read failed during purge: {e}");
                        continue;
                    }
                };
                let destroyed = meta.creator == *wid;
                let audience = if destroyed {
                    match state.store.destroy_group(&gid).await {
                        Ok(members) => members,
                        Err(e) => {
                            tracing::warn!(group = %gid, "Group destroy failed: {e}");
                            continue;
                        }
                    }
                } else {
                    let members = state.store.group_members(&gid).await.unwrap_or_default();
                    if let Err(e) = state.store.remove_group_member(&gid, wid).await {
                        tracing::warn!(group = %gid, "Group leave failed during purge: {e}");
                    }
                    members
                };
                let frame = ServerFrame::MemberLeftGroup {
                    group_id: gid.clone(),
                    whisper_id: wid.clone(),
                    group_destroyed: destroyed,
                };
                for member in audience.iter().filter(|m| *m != wid) {
                    send_to_user(state, member, frame.clone(), RouteChannel::Messages).await;
                }
            }
        }
        Err(e) => tracing::warn!(user = %wid, "Group index read failed during purge: {e}"),
    }

    signaling::end_calls_for(state, wid).await;
    state.offers.take(wid, now_ms()).await;
    state.typing.prune_user(wid).await;

    if let Err(e) = state.store.purge_presence(wid).await {
        tracing::warn!(user = %wid, "Presence purge failed: {e}");
    }
    if let Err(e) = state.store.purge_directory(wid).await {
        tracing::warn!(user = %wid, "Directory purge failed: {e}");
    }
}
