//! Group membership operations and fan-out.
//!
//! Invariants: the creator is always a member; a group never reaches zero
//! members (it is destroyed instead); membership changes are observable to
//! everyone affected, including removed and leaving members. Group
//! messages are best-effort real-time unless offline queueing is enabled
//! in configuration.

use whisper_common::error::{RelayError, RelayResult};
use whisper_common::ids::{GroupId, WhisperId};
use whisper_store::groups::GroupMeta;

use crate::handler::SocketCtx;
use crate::protocol::{GroupCreatedPayload, ServerFrame};
use crate::router::{send_to_user, RouteChannel};
use crate::session::OutboundHandle;
use crate::{now_ms, RelayState};

/// Group names are 1–50 characters.
const MAX_GROUP_NAME_LEN: usize = 50;

fn validate_name(name: &str) -> RelayResult<()> {
    let len = name.chars().count();
    if len == 0 || len > MAX_GROUP_NAME_LEN {
        return Err(RelayError::Validation {
            message: "Group name must be 1-50 characters".into(),
        });
    }
    Ok(())
}

fn parse_gid(raw: &str) -> RelayResult<GroupId> {
    GroupId::parse(raw).map_err(|_| RelayError::InvalidGroupId)
}

fn parse_members(raw: &[String]) -> RelayResult<Vec<WhisperId>> {
    raw.iter()
        .map(|s| WhisperId::parse(s).map_err(|_| RelayError::InvalidId))
        .collect()
}

/// `create_group`: store the group and fan out `group_created`, queueing
/// an invite plus a push for every member that is offline.
pub(crate) async fn handle_create_group(
    ctx: &mut SocketCtx,
    group_id: &str,
    name: String,
    members: Vec<String>,
) -> RelayResult<()> {
    let creator = ctx.authed()?;
    let gid = parse_gid(group_id)?;
    validate_name(&name)?;

    let mut others = parse_members(&members)?;
    let mut seen = std::collections::HashSet::new();
    others.retain(|m| *m != creator && seen.insert(m.clone()));
    if others.is_empty() {
        return Err(RelayError::Validation {
            message: "A group needs at least one other member".into(),
        });
    }

    if ctx.state.store.group(&gid).await?.is_some() {
        return Err(RelayError::Validation {
            message: "Group already exists".into(),
        });
    }

    let now = now_ms();
    let meta = GroupMeta {
        group_id: gid.clone(),
        name: name.clone(),
        creator: creator.clone(),
        created_at: now,
    };
    let mut all_members = vec![creator.clone()];
    all_members.extend(others.iter().cloned());
    ctx.state.store.create_group(&meta, &all_members).await?;

    let payload = GroupCreatedPayload {
        group_id: gid.clone(),
        name: name.clone(),
        creator: creator.clone(),
        members: all_members.clone(),
        created_at: now,
    };

    ctx.send(ServerFrame::GroupCreated(payload.clone()));
    for member in &others {
        let delivered = send_to_user(
            &ctx.state,
            member,
            ServerFrame::GroupCreated(payload.clone()),
            RouteChannel::Messages,
        )
        .await;
        if !delivered {
            queue_invite(&ctx.state, member, &gid, &payload, &name).await;
        }
    }

    tracing::info!(group = %gid, creator = %creator, members = all_members.len(), "Group created");
    Ok(())
}

/// Queue the invite for the member's next auth and wake their device.
async fn queue_invite(
    state: &RelayState,
    member: &WhisperId,
    gid: &GroupId,
    payload: &GroupCreatedPayload,
    group_name: &str,
) {
    match serde_json::to_string(payload) {
        Ok(json) => {
            if let Err(e) = state.store.queue_group_invite(member, gid, &json).await {
                tracing::warn!(user = %member, group = %gid, "Invite queue failed: {e}");
            }
        }
        Err(e) => tracing::error!("Invite payload encode failed: {e}"),
    }
    match state.store.push_token(member).await {
        Ok(Some(entry)) => state.push.send_group_invite_push(&entry.token, group_name),
        Ok(None) => {}
        Err(e) => tracing::warn!(user = %member, "Push token lookup failed: {e}"),
    }
}

/// `send_group_message`: fan the ciphertext out to every other current
/// member. At-most-once real-time by default; with offline queueing
/// enabled, misses are stored against the member's next auth.
pub(crate) async fn handle_send_group_message(
    ctx: &mut SocketCtx,
    group_id: &str,
    message_id: Option<String>,
    encrypted_content: String,
    nonce: String,
    sender_name: Option<String>,
) -> RelayResult<()> {
    let from = ctx.authed()?;
    let gid = parse_gid(group_id)?;

    if !ctx.state.store.is_group_member(&gid, &from).await? {
        return Err(RelayError::Unauthorized);
    }

    let frame = ServerFrame::GroupMessageReceived {
        group_id: gid.clone(),
        from_whisper_id: from.clone(),
        message_id,
        encrypted_content,
        nonce,
        timestamp: now_ms(),
        sender_name,
    };

    let members = ctx.state.store.group_members(&gid).await?;
    for member in members.iter().filter(|m| **m != from) {
        let delivered = send_to_user(&ctx.state, member, frame.clone(), RouteChannel::Messages).await;
        if !delivered && ctx.state.settings.queue_group_messages {
            match serde_json::to_string(&frame) {
                Ok(json) => {
                    if let Err(e) = ctx.state.store.queue_group_frame(member, &json).await {
                        tracing::warn!(user = %member, group = %gid, "Group frame queue failed: {e}");
                    }
                }
                Err(e) => tracing::error!("Group frame encode failed: {e}"),
            }
        }
    }
    Ok(())
}

/// `update_group`: creator-only; applied in the order name → adds →
/// removes. `group_updated` reaches all current members and the removed
/// ones, so removal is observable.
pub(crate) async fn handle_update_group(
    ctx: &mut SocketCtx,
    group_id: &str,
    name: Option<String>,
    add_members: Option<Vec<String>>,
    remove_members: Option<Vec<String>>,
) -> RelayResult<()> {
    let from = ctx.authed()?;
    let gid = parse_gid(group_id)?;

    let mut meta = ctx.state.store.group(&gid).await?.ok_or_else(|| {
        RelayError::Validation {
            message: "Group not found".into(),
        }
    })?;
    if meta.creator != from {
        return Err(RelayError::Unauthorized);
    }

    if let Some(new_name) = name {
        validate_name(&new_name)?;
        meta.name = new_name;
        ctx.state.store.put_group_meta(&meta).await?;
    }

    if let Some(adds) = add_members {
        for member in parse_members(&adds)? {
            ctx.state.store.add_group_member(&gid, &member).await?;
        }
    }

    let mut removed = Vec::new();
    if let Some(removes) = remove_members {
        for member in parse_members(&removes)? {
            if member == meta.creator {
                return Err(RelayError::Validation {
                    message: "The creator cannot be removed".into(),
                });
            }
            ctx.state.store.remove_group_member(&gid, &member).await?;
            removed.push(member);
        }
    }

    let members = ctx.state.store.group_members(&gid).await?;
    let frame = ServerFrame::GroupUpdated {
        group_id: gid.clone(),
        name: meta.name.clone(),
        creator: meta.creator.clone(),
        members: members.clone(),
    };
    for member in members.iter().chain(removed.iter()) {
        send_to_user(&ctx.state, member, frame.clone(), RouteChannel::Messages).await;
    }
    Ok(())
}

/// `leave_group`: a leaving creator destroys the group; anyone else is
/// removed. `member_left_group` goes to the pre-leave membership set, so
/// the leaver hears it too.
pub(crate) async fn handle_leave_group(ctx: &mut SocketCtx, group_id: &str) -> RelayResult<()> {
    let from = ctx.authed()?;
    let gid = parse_gid(group_id)?;

    let meta = ctx.state.store.group(&gid).await?.ok_or_else(|| {
        RelayError::Validation {
            message: "Group not found".into(),
        }
    })?;
    if !ctx.state.store.is_group_member(&gid, &from).await? {
        return Err(RelayError::Unauthorized);
    }

    let destroyed = meta.creator == from;
    let audience = if destroyed {
        ctx.state.store.destroy_group(&gid).await?
    } else {
        let members = ctx.state.store.group_members(&gid).await?;
        ctx.state.store.remove_group_member(&gid, &from).await?;
        members
    };

    let frame = ServerFrame::MemberLeftGroup {
        group_id: gid.clone(),
        whisper_id: from.clone(),
        group_destroyed: destroyed,
    };
    for member in &audience {
        send_to_user(&ctx.state, member, frame.clone(), RouteChannel::Messages).await;
    }

    tracing::info!(group = %gid, user = %from, destroyed, "Member left group");
    Ok(())
}

/// Post-auth: deliver group invites that were queued while offline.
pub(crate) async fn deliver_pending_invites(
    state: &RelayState,
    out: &OutboundHandle,
    wid: &WhisperId,
) {
    let payloads = match state.store.take_group_invites(wid).await {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(user = %wid, "Invite drain failed: {e}");
            return;
        }
    };
    for payload in payloads {
        match serde_json::from_str::<GroupCreatedPayload>(&payload) {
            Ok(invite) => {
                out.send(ServerFrame::GroupCreated(invite));
            }
            Err(e) => tracing::warn!(user = %wid, "Dropping undecodable invite: {e}"),
        }
    }
}

/// Post-auth: deliver group messages queued while offline (only populated
/// when offline group delivery is enabled).
pub(crate) async fn deliver_queued_group_frames(
    state: &RelayState,
    out: &OutboundHandle,
    wid: &WhisperId,
) {
    let payloads = match state.store.take_group_frames(wid).await {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(user = %wid, "Group frame drain failed: {e}");
            return;
        }
    };
    for payload in payloads {
        match serde_json::from_str::<ServerFrame>(&payload) {
            Ok(frame) => {
                out.send(frame);
            }
            Err(e) => tracing::warn!(user = %wid, "Dropping undecodable group frame: {e}"),
        }
    }
}
