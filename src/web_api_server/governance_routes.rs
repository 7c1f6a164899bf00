use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::database::{global, regional, retry_conflict};
use crate::error::Error;
use crate::models::{
    Ballot, Election, ElectionId, GovernanceType, PlayerId, Policy, PolicyId, PolicyStatus,
    Position,
};

use super::{authed, fail, request_id, respond, ApiError, ApiResult, AppState, Ctx};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/policies", post(propose_policy))
        .route("/policies/{policy}", get(policy_detail))
        .route("/policies/{policy}/vote", post(cast_policy_vote))
        .route("/policies/{policy}/vote/retract", post(retract_policy_vote))
        .route("/elections", get(election_schedule).post(start_election))
        .route("/elections/{election}", get(election_detail))
        .route("/elections/{election}/ballot", post(cast_ballot))
        .route("/elections/{election}/ballot/retract", post(retract_ballot))
}

/// Voting requires citizenship in the current region; returns the
/// membership's voting weight.
async fn voting_weight(state: &AppState, ctx: &Ctx) -> Result<f64, Error> {
    let mut conn = state.db.conn().await?;
    let membership = global::get_membership(
        &mut conn,
        ctx.player.data.id,
        &ctx.player.data.current_region,
    )
    .await?
    .ok_or(Error::InsufficientPermissions)?;
    if !membership.data.may_vote() {
        return Err(Error::InsufficientPermissions);
    }
    Ok(membership.data.voting_weight)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ProposeBody {
    title: String,
    proposal: String,
    #[serde(default = "default_window_hours")]
    voting_window_hours: i64,
}

fn default_window_hours() -> i64 {
    72
}

async fn propose_policy(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ProposeBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "governance")
        .await
        .map_err(fail(&request_id(&headers)))?;
    voting_weight(&state, &ctx).await.map_err(fail(&ctx.request_id))?;
    if body.title.trim().is_empty() || body.title.len() > 200 {
        return Err(ApiError::new(
            Error::validation("title", "1-200 characters"),
            &ctx.request_id,
        ));
    }
    if !(1..=24 * 14).contains(&body.voting_window_hours) {
        return Err(ApiError::new(
            Error::validation("votingWindowHours", "within [1, 336]"),
            &ctx.request_id,
        ));
    }
    let now = Utc::now();
    let policy = Policy {
        id: PolicyId::new(),
        proposer: ctx.player.data.id,
        title: body.title.trim().to_string(),
        proposal: body.proposal.chars().take(4000).collect(),
        voting_opens_at: now,
        voting_closes_at: now + chrono::Duration::hours(body.voting_window_hours),
        votes_for: 0.0,
        votes_against: 0.0,
        status: PolicyStatus::Voting,
        created_at: now,
        updated_at: now,
    };
    let region = ctx.player.data.current_region.clone();
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    regional::insert_policy(&mut conn, &policy)
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(StatusCode::CREATED, &ctx.request_id, &ctx.rate, policy))
}

fn parse_policy(raw: &str, rid: &str) -> Result<PolicyId, ApiError> {
    raw.parse()
        .map(PolicyId)
        .map_err(|_| ApiError::new(Error::validation("policy", "not a policy id"), rid))
}

async fn policy_detail(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(policy): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "governance")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let policy_id = parse_policy(&policy, &ctx.request_id)?;
    let region = ctx.player.data.current_region.clone();
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let policy = regional::get_policy(&mut conn, policy_id)
        .await
        .map_err(fail(&ctx.request_id))?
        .data;
    let (votes_for, votes_against) = regional::policy_vote_totals(&mut conn, policy_id)
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "policy": policy, "votesFor": votes_for, "votesAgainst": votes_against }),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PolicyVoteBody {
    in_favor: bool,
}

async fn cast_policy_vote(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(policy): Path<String>,
    Json(body): Json<PolicyVoteBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "governance")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let policy_id = parse_policy(&policy, &ctx.request_id)?;
    let weight = voting_weight(&state, &ctx).await.map_err(fail(&ctx.request_id))?;
    let region = ctx.player.data.current_region.clone();
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let stored = regional::get_policy(&mut conn, policy_id)
        .await
        .map_err(fail(&ctx.request_id))?;
    if !stored.data.is_open(Utc::now()) {
        return Err(ApiError::new(
            Error::validation("policy", "voting window closed"),
            &ctx.request_id,
        ));
    }
    regional::insert_policy_vote(&mut conn, policy_id, ctx.player.data.id, body.in_favor, weight)
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "voted": true }),
    ))
}

async fn retract_policy_vote(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(policy): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "governance")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let policy_id = parse_policy(&policy, &ctx.request_id)?;
    let region = ctx.player.data.current_region.clone();
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let stored = regional::get_policy(&mut conn, policy_id)
        .await
        .map_err(fail(&ctx.request_id))?;
    if !stored.data.is_open(Utc::now()) {
        return Err(ApiError::new(
            Error::validation("policy", "voting window closed"),
            &ctx.request_id,
        ));
    }
    regional::retract_policy_vote(&mut conn, policy_id, ctx.player.data.id)
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "retracted": true }),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StartElectionBody {
    position: Position,
    candidates: Vec<PlayerId>,
    #[serde(default = "default_window_hours")]
    voting_window_hours: i64,
}

/// Elections only make sense where votes decide offices.
async fn start_election(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<StartElectionBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "governance")
        .await
        .map_err(fail(&request_id(&headers)))?;
    voting_weight(&state, &ctx).await.map_err(fail(&ctx.request_id))?;
    let region = ctx.player.data.current_region.clone();
    let governance = {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        global::get_region(&mut conn, &region)
            .await
            .map_err(fail(&ctx.request_id))?
            .data
            .config
            .governance_type
    };
    if governance == GovernanceType::Autocracy {
        return Err(ApiError::new(
            Error::validation("governance", "autocracies do not hold elections"),
            &ctx.request_id,
        ));
    }
    if body.candidates.len() < 2 || body.candidates.len() > 12 {
        return Err(ApiError::new(
            Error::validation("candidates", "between 2 and 12 candidates"),
            &ctx.request_id,
        ));
    }
    let now = Utc::now();
    let election = Election {
        id: ElectionId::new(),
        position: body.position,
        candidates: body.candidates,
        voting_opens_at: now,
        voting_closes_at: now + chrono::Duration::hours(body.voting_window_hours.clamp(1, 336)),
        status: crate::models::ElectionStatus::Open,
        winner: None,
        created_at: now,
        updated_at: now,
    };
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    regional::insert_election(&mut conn, &election)
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(StatusCode::CREATED, &ctx.request_id, &ctx.rate, election))
}

/// The region's election calendar: recent and open elections plus the
/// configured cadence.
async fn election_schedule(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "governance")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let region = ctx.player.data.current_region.clone();
    let cadence_days = {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        global::get_region(&mut conn, &region)
            .await
            .map_err(fail(&ctx.request_id))?
            .data
            .config
            .election_cadence_days
    };
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let elections = regional::list_elections(&mut conn)
        .await
        .map_err(fail(&ctx.request_id))?;
    let next_due = elections
        .iter()
        .map(|e| e.voting_closes_at)
        .max()
        .map(|last| last + chrono::Duration::days(cadence_days as i64));
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({
            "cadenceDays": cadence_days,
            "nextDue": next_due,
            "elections": elections,
        }),
    ))
}

fn parse_election(raw: &str, rid: &str) -> Result<ElectionId, ApiError> {
    raw.parse()
        .map(ElectionId)
        .map_err(|_| ApiError::new(Error::validation("election", "not an election id"), rid))
}

async fn election_detail(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(election): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "governance")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let election_id = parse_election(&election, &ctx.request_id)?;
    let region = ctx.player.data.current_region.clone();
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let election = regional::get_election(&mut conn, election_id)
        .await
        .map_err(fail(&ctx.request_id))?
        .data;
    let ballots = regional::list_ballots(&mut conn, election_id)
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "election": election, "ballotsCast": ballots.len() }),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct BallotBody {
    candidate: PlayerId,
}

async fn cast_ballot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(election): Path<String>,
    Json(body): Json<BallotBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "governance")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let election_id = parse_election(&election, &ctx.request_id)?;
    let weight = voting_weight(&state, &ctx).await.map_err(fail(&ctx.request_id))?;
    let region = ctx.player.data.current_region.clone();
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let stored = regional::get_election(&mut conn, election_id)
        .await
        .map_err(fail(&ctx.request_id))?;
    if !stored.data.is_open(Utc::now()) {
        return Err(ApiError::new(
            Error::validation("election", "voting window closed"),
            &ctx.request_id,
        ));
    }
    stored
        .data
        .validate_candidate(body.candidate)
        .map_err(fail(&ctx.request_id))?;
    let ballot = Ballot {
        election: election_id,
        voter: ctx.player.data.id,
        candidate: body.candidate,
        weight,
        cast_at: Utc::now(),
    };
    regional::insert_ballot(&mut conn, &ballot)
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "voted": true, "weight": weight }),
    ))
}

/// Retracting is a distinct mutation from voting; a retracted voter may
/// vote again while the window is open.
async fn retract_ballot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(election): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "governance")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let election_id = parse_election(&election, &ctx.request_id)?;
    let region = ctx.player.data.current_region.clone();
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let stored = regional::get_election(&mut conn, election_id)
        .await
        .map_err(fail(&ctx.request_id))?;
    if !stored.data.is_open(Utc::now()) {
        return Err(ApiError::new(
            Error::validation("election", "voting window closed"),
            &ctx.request_id,
        ));
    }
    regional::retract_ballot(&mut conn, election_id, ctx.player.data.id)
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "retracted": true }),
    ))
}
