use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::database::regional;
use crate::error::Error;
use crate::models::{
    Audience, DomainEvent, Message, MessageId, Paginated, PlayerId, Priority, SectorIndex,
    MESSAGE_BODY_MAX, MESSAGE_SUBJECT_MAX,
};
use crate::security::sanitize;
use crate::security::AbuseSignal;

use super::{authed, fail, request_id, respond, ApiError, ApiResult, AppState};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/inbox", get(inbox))
        .route("/send", post(send))
        .route("/{message}/read", post(mark_read))
        .route("/{message}/reply", post(reply))
        .route("/{message}/thread", get(thread))
        .route("/{message}", axum::routing::delete(delete_message))
        .route("/sector-broadcast", post(sector_broadcast))
        .route("/team/{team}", post(team_message))
        .route("/region-broadcast", post(region_broadcast))
}

fn parse_message(raw: &str, rid: &str) -> Result<MessageId, ApiError> {
    raw.parse()
        .map(MessageId)
        .map_err(|_| ApiError::new(Error::validation("message", "not a message id"), rid))
}

async fn inbox(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(page): Query<super::PageQuery>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "messages")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let region = ctx.player.data.current_region.clone();
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let (p, per) = page.clamped();
    let (rows, total) = regional::inbox_page(&mut conn, ctx.player.data.id, p as i64, per as i64)
        .await
        .map_err(fail(&ctx.request_id))?;
    let data: Vec<_> = rows
        .into_iter()
        .map(|(message, receipt)| json!({ "message": message, "receipt": receipt }))
        .collect();
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        Paginated {
            data,
            pagination: page.pagination(total as u64),
        },
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SendBody {
    recipients: Vec<PlayerId>,
    subject: String,
    body: String,
    #[serde(default)]
    priority: Option<Priority>,
    #[serde(default)]
    parent: Option<MessageId>,
    #[serde(default)]
    requires_confirmation: bool,
    #[serde(default)]
    expires_minutes: Option<i64>,
}

async fn send(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SendBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "messages")
        .await
        .map_err(fail(&request_id(&headers)))?;
    if body.recipients.is_empty() || body.recipients.len() > 50 {
        return Err(ApiError::new(
            Error::validation("recipients", "between 1 and 50 recipients"),
            &ctx.request_id,
        ));
    }
    state.security.abuse.record(ctx.account.id, AbuseSignal::Message);

    let subject = sanitize::sanitize_subject(&body.subject, MESSAGE_SUBJECT_MAX)
        .map_err(fail(&ctx.request_id))?;
    let sanitized = sanitize::sanitize_body(&body.body, MESSAGE_BODY_MAX)
        .map_err(fail(&ctx.request_id))?;
    let now = Utc::now();
    let message = Message {
        id: MessageId::new(),
        author: ctx.account.id,
        audience: Audience::Players(body.recipients.clone()),
        subject,
        body: sanitized,
        priority: body.priority.unwrap_or(Priority::Normal),
        attachments: vec![],
        coordinates: None,
        expires_at: body
            .expires_minutes
            .map(|m| now + chrono::Duration::minutes(m.clamp(1, 60 * 24 * 30))),
        requires_confirmation: body.requires_confirmation,
        parent: body.parent,
        created_at: now,
    };
    let region = ctx.player.data.current_region.clone();
    {
        let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
        regional::insert_message(&mut conn, &message, &body.recipients)
            .await
            .map_err(fail(&ctx.request_id))?;
    }
    for recipient in &body.recipients {
        state
            .fabric
            .publish(&DomainEvent::MessageDelivered {
                message: message.id,
                recipient: *recipient,
            })
            .await
            .map_err(fail(&ctx.request_id))?;
    }
    Ok(respond(
        StatusCode::CREATED,
        &ctx.request_id,
        &ctx.rate,
        json!({ "messageId": message.id }),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ReplyBody {
    body: String,
}

/// Reply to a received message; threads by parent reference and goes back
/// to the original author's persona.
async fn reply(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(message): Path<String>,
    Json(body): Json<ReplyBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "messages")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let parent_id = parse_message(&message, &ctx.request_id)?;
    state.security.abuse.record(ctx.account.id, AbuseSignal::Message);
    let sanitized = sanitize::sanitize_body(&body.body, MESSAGE_BODY_MAX)
        .map_err(fail(&ctx.request_id))?;
    let region = ctx.player.data.current_region.clone();

    let parent = {
        let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
        regional::get_message(&mut conn, parent_id)
            .await
            .map_err(fail(&ctx.request_id))?
    };
    let recipient = {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        crate::database::global::get_player_by_account(&mut conn, parent.author)
            .await
            .map_err(fail(&ctx.request_id))?
            .ok_or_else(|| ApiError::new(Error::NotFound("author"), &ctx.request_id))?
            .data
            .id
    };
    let now = Utc::now();
    let message = Message {
        id: MessageId::new(),
        author: ctx.account.id,
        audience: Audience::Players(vec![recipient]),
        subject: format!("Re: {}", parent.subject.chars().take(190).collect::<String>()),
        body: sanitized,
        priority: parent.priority,
        attachments: vec![],
        coordinates: None,
        expires_at: None,
        requires_confirmation: false,
        parent: Some(parent_id),
        created_at: now,
    };
    {
        let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
        regional::insert_message(&mut conn, &message, &[recipient])
            .await
            .map_err(fail(&ctx.request_id))?;
    }
    state
        .fabric
        .publish(&DomainEvent::MessageDelivered {
            message: message.id,
            recipient,
        })
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(
        StatusCode::CREATED,
        &ctx.request_id,
        &ctx.rate,
        json!({ "messageId": message.id, "inReplyTo": parent_id }),
    ))
}

/// Conversation view: the message plus its parent chain, newest first.
async fn thread(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(message): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "messages")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let message_id = parse_message(&message, &ctx.request_id)?;
    let region = ctx.player.data.current_region.clone();
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let mut chain = vec![];
    let mut cursor = Some(message_id);
    while let Some(id) = cursor {
        if chain.len() >= 20 {
            break;
        }
        let msg = regional::get_message(&mut conn, id)
            .await
            .map_err(fail(&ctx.request_id))?;
        cursor = msg.parent;
        chain.push(msg);
    }
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, chain))
}

async fn mark_read(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(message): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "messages")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let message_id = parse_message(&message, &ctx.request_id)?;
    let region = ctx.player.data.current_region.clone();
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    regional::mark_message_read(&mut conn, message_id, ctx.player.data.id, Utc::now())
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "read": true }),
    ))
}

async fn delete_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(message): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "messages")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let message_id = parse_message(&message, &ctx.request_id)?;
    let region = ctx.player.data.current_region.clone();
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    regional::delete_message_for(&mut conn, message_id, ctx.player.data.id)
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "deleted": true }),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct BroadcastBody {
    subject: String,
    body: String,
}

/// Message every member of a team the sender belongs to.
async fn team_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(team): Path<String>,
    Json(body): Json<BroadcastBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "messages")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let team_id = team
        .parse()
        .map(crate::models::TeamId)
        .map_err(|_| ApiError::new(Error::validation("team", "not a team id"), &ctx.request_id))?;
    state.security.abuse.record(ctx.account.id, AbuseSignal::Message);
    let subject = sanitize::sanitize_subject(&body.subject, MESSAGE_SUBJECT_MAX)
        .map_err(fail(&ctx.request_id))?;
    let sanitized = sanitize::sanitize_body(&body.body, MESSAGE_BODY_MAX)
        .map_err(fail(&ctx.request_id))?;
    let player = &ctx.player.data;
    let region = player.current_region.clone();
    let now = Utc::now();

    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let team = regional::get_team(&mut conn, team_id)
        .await
        .map_err(fail(&ctx.request_id))?
        .data;
    if team.member(player.id).is_none() {
        return Err(ApiError::new(Error::TeamPermissionDenied, &ctx.request_id));
    }
    let recipients: Vec<PlayerId> = team
        .members
        .iter()
        .map(|m| m.player)
        .filter(|p| *p != player.id)
        .collect();
    let message = Message {
        id: MessageId::new(),
        author: ctx.account.id,
        audience: Audience::Team(team_id),
        subject,
        body: sanitized,
        priority: Priority::Normal,
        attachments: vec![],
        coordinates: None,
        expires_at: None,
        requires_confirmation: false,
        parent: None,
        created_at: now,
    };
    regional::insert_message(&mut conn, &message, &recipients)
        .await
        .map_err(fail(&ctx.request_id))?;
    drop(conn);
    state
        .fabric
        .publish(&DomainEvent::TeamMessage {
            message: message.id,
            team: team_id,
        })
        .await
        .ok();
    Ok(respond(
        StatusCode::CREATED,
        &ctx.request_id,
        &ctx.rate,
        json!({ "messageId": message.id, "recipients": recipients.len() }),
    ))
}

/// Region-wide notice; reserved for the region's governor or an
/// administrator.
async fn region_broadcast(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<BroadcastBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "messages")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let player = &ctx.player.data;
    let region = player.current_region.clone();
    let is_governor = {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        crate::database::global::get_region(&mut conn, &region)
            .await
            .map_err(fail(&ctx.request_id))?
            .data
            .owner
            == Some(ctx.account.id)
    };
    if !is_governor && ctx.account.role != crate::models::Role::Administrator {
        return Err(ApiError::new(Error::InsufficientPermissions, &ctx.request_id));
    }
    let subject = sanitize::sanitize_subject(&body.subject, MESSAGE_SUBJECT_MAX)
        .map_err(fail(&ctx.request_id))?;
    let sanitized = sanitize::sanitize_body(&body.body, MESSAGE_BODY_MAX)
        .map_err(fail(&ctx.request_id))?;
    let now = Utc::now();

    // resident-and-up members receive the notice in their inbox
    let recipients: Vec<PlayerId> = {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        crate::database::global::list_members_of_region(&mut conn, &region)
            .await
            .map_err(fail(&ctx.request_id))?
            .into_iter()
            .filter(|m| m.may_receive_region_broadcasts())
            .map(|m| m.player_id)
            .collect()
    };
    let message = Message {
        id: MessageId::new(),
        author: ctx.account.id,
        audience: Audience::Region(region.clone()),
        subject,
        body: sanitized,
        priority: Priority::High,
        attachments: vec![],
        coordinates: None,
        expires_at: None,
        requires_confirmation: false,
        parent: None,
        created_at: now,
    };
    {
        let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
        regional::insert_message(&mut conn, &message, &recipients)
            .await
            .map_err(fail(&ctx.request_id))?;
    }
    state
        .fabric
        .publish(&DomainEvent::RegionBroadcast {
            message: message.id,
            region,
        })
        .await
        .ok();
    Ok(respond(
        StatusCode::CREATED,
        &ctx.request_id,
        &ctx.rate,
        json!({ "messageId": message.id, "recipients": recipients.len() }),
    ))
}

/// Broadcast to everyone currently in the sender's sector.
async fn sector_broadcast(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<BroadcastBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "messages")
        .await
        .map_err(fail(&request_id(&headers)))?;
    state.security.abuse.record(ctx.account.id, AbuseSignal::Message);
    let subject = sanitize::sanitize_subject(&body.subject, MESSAGE_SUBJECT_MAX)
        .map_err(fail(&ctx.request_id))?;
    let sanitized = sanitize::sanitize_body(&body.body, MESSAGE_BODY_MAX)
        .map_err(fail(&ctx.request_id))?;
    let player = &ctx.player.data;
    let region = player.current_region.clone();
    let sector: SectorIndex = player.current_sector;
    let now = Utc::now();

    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let recipients: Vec<PlayerId> = regional::list_ships_in_sector(&mut conn, sector)
        .await
        .map_err(fail(&ctx.request_id))?
        .into_iter()
        .map(|s| s.pilot)
        .filter(|p| *p != player.id)
        .collect();
    let message = Message {
        id: MessageId::new(),
        author: ctx.account.id,
        audience: Audience::Sector(sector),
        subject,
        body: sanitized,
        priority: Priority::Normal,
        attachments: vec![],
        coordinates: Some(crate::models::Coordinates {
            region: region.clone(),
            sector,
        }),
        expires_at: Some(now + chrono::Duration::hours(1)),
        requires_confirmation: false,
        parent: None,
        created_at: now,
    };
    regional::insert_message(&mut conn, &message, &recipients)
        .await
        .map_err(fail(&ctx.request_id))?;
    drop(conn);
    state
        .fabric
        .publish(&DomainEvent::SectorBroadcast {
            message: message.id,
            region,
            sector,
        })
        .await
        .ok();
    Ok(respond(
        StatusCode::CREATED,
        &ctx.request_id,
        &ctx.rate,
        json!({ "messageId": message.id, "recipients": recipients.len() }),
    ))
}
