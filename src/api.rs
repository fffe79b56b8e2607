// HTTP handlers for the engagement API

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::activities::ActivityRegistry;
use crate::badges::BadgeEngine;
use crate::caller::{Admin, Caller};
use crate::challenges::ChallengeEngine;
use crate::database::Database;
use crate::error::Result;
use crate::leaderboard::Leaderboard;
use crate::ledger::Ledger;
use crate::models::{
    ActivityInput, ChallengeInput, ChallengesResponse, EcoPointsResponse, GrantPointsRequest,
    ListActivitiesQuery, PageRequest, Paginated, RegistrationsQuery,
};
use crate::AppState;

type SharedState = State<Arc<AppState>>;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        // Activities
        .route("/api/activities", get(list_activities))
        .route("/api/activities/:id", get(get_activity))
        .route("/api/activities/:id/register", post(register))
        .route("/api/activities/:id/unregister", delete(unregister))
        .route("/api/me/registrations", get(my_registrations))
        // Eco dashboard
        .route("/api/eco/points", get(eco_points))
        .route("/api/eco/challenges", get(challenges))
        .route("/api/eco/challenges/:id/join", post(join_challenge))
        .route("/api/eco/challenges/:id/complete", post(complete_challenge))
        .route("/api/eco/badges", get(badges))
        .route("/api/eco/summary", get(summary))
        .route("/api/badges", get(badge_catalog))
        // Administration
        .route("/api/admin/activities", post(admin_create_activity))
        .route(
            "/api/admin/activities/:id",
            put(admin_update_activity).delete(admin_delete_activity),
        )
        .route("/api/admin/challenges", post(admin_create_challenge))
        .route(
            "/api/admin/challenges/:id",
            put(admin_update_challenge).delete(admin_delete_challenge),
        )
        .route("/api/admin/members/:id/points", post(admin_grant_points))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn message(text: &str) -> Json<serde_json::Value> {
    Json(json!({ "message": text }))
}

/// Health check endpoint
pub async fn health_check(State(state): SharedState) -> impl IntoResponse {
    let db_health = Database::ping(&state.db).await;

    Json(json!({
        "status": if db_health { "healthy" } else { "unhealthy" },
        "database": if db_health { "up" } else { "down" },
    }))
}

pub async fn list_activities(
    State(state): SharedState,
    caller: Caller,
    Query(query): Query<ListActivitiesQuery>,
) -> Result<impl IntoResponse> {
    let limits = state.pages;
    let page = PageRequest::clamped(
        parse_positive(query.page.as_deref()).unwrap_or(1),
        parse_positive(query.page_size.as_deref()).unwrap_or(limits.default_page_size),
        limits.max_page_size,
    );
    let upcoming_only = !is_true(query.all.as_deref());

    let (items, total) =
        ActivityRegistry::list(&state.db, page, upcoming_only, caller.member).await?;

    Ok(Json(Paginated {
        items,
        total,
        page: page.page,
        page_size: page.page_size,
    }))
}

pub async fn get_activity(
    State(state): SharedState,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let activity = ActivityRegistry::get(&state.db, id, caller.member).await?;
    Ok(Json(activity))
}

pub async fn register(
    State(state): SharedState,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    ActivityRegistry::register(&state.db, caller.member()?, id).await?;
    Ok(message("registered for activity"))
}

pub async fn unregister(
    State(state): SharedState,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    ActivityRegistry::unregister(&state.db, caller.member()?, id).await?;
    Ok(message("unregistered from activity"))
}

pub async fn my_registrations(
    State(state): SharedState,
    caller: Caller,
    Query(query): Query<RegistrationsQuery>,
) -> Result<impl IntoResponse> {
    let activities = ActivityRegistry::registrations_of(
        &state.db,
        caller.member()?,
        is_true(query.history.as_deref()),
    )
    .await?;
    Ok(Json(activities))
}

pub async fn eco_points(State(state): SharedState, caller: Caller) -> Result<impl IntoResponse> {
    let member = caller.member()?;
    let points = Ledger::history(&state.db, member).await?;
    let total_points = Ledger::total_for(&state.db, member).await?;
    Ok(Json(EcoPointsResponse {
        points,
        total_points,
    }))
}

/// Anonymous callers see the active catalog only
pub async fn challenges(State(state): SharedState, caller: Caller) -> Result<impl IntoResponse> {
    let active_challenges = ChallengeEngine::list(&state.db, caller.member, true).await?;
    let joined = match caller.member {
        Some(member) => ChallengeEngine::joined_by(&state.db, member).await?,
        None => Vec::new(),
    };
    let (completed_challenges, user_challenges): (Vec<_>, Vec<_>) = joined
        .into_iter()
        .partition(|c| c.user_status == "completed");

    Ok(Json(ChallengesResponse {
        active_challenges,
        user_challenges,
        completed_challenges,
    }))
}

pub async fn join_challenge(
    State(state): SharedState,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    ChallengeEngine::join(&state.db, caller.member()?, id).await?;
    Ok(message("joined challenge"))
}

pub async fn complete_challenge(
    State(state): SharedState,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let entry = ChallengeEngine::complete(&state.db, &state.badges, caller.member()?, id).await?;
    Ok(Json(json!({
        "message": "challenge completed",
        "entry_id": entry,
    })))
}

pub async fn badges(State(state): SharedState, caller: Caller) -> Result<impl IntoResponse> {
    let awards = BadgeEngine::awards(&state.db, caller.member()?).await?;
    Ok(Json(awards))
}

pub async fn badge_catalog(State(state): SharedState) -> Result<impl IntoResponse> {
    let catalog = BadgeEngine::catalog(&state.db).await?;
    Ok(Json(catalog))
}

pub async fn summary(State(state): SharedState, caller: Caller) -> Result<impl IntoResponse> {
    let summary = Leaderboard::summary_for(&state.db, caller.member()?).await?;
    Ok(Json(summary))
}

pub async fn admin_create_activity(
    State(state): SharedState,
    _admin: Admin,
    Json(input): Json<ActivityInput>,
) -> Result<impl IntoResponse> {
    let id = ActivityRegistry::create(&state.db, &input).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "activity created", "id": id })),
    ))
}

pub async fn admin_update_activity(
    State(state): SharedState,
    _admin: Admin,
    Path(id): Path<i64>,
    Json(input): Json<ActivityInput>,
) -> Result<impl IntoResponse> {
    ActivityRegistry::update(&state.db, id, &input).await?;
    Ok(message("activity updated"))
}

pub async fn admin_delete_activity(
    State(state): SharedState,
    _admin: Admin,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    ActivityRegistry::delete(&state.db, id).await?;
    Ok(message("activity deleted"))
}

pub async fn admin_create_challenge(
    State(state): SharedState,
    _admin: Admin,
    Json(input): Json<ChallengeInput>,
) -> Result<impl IntoResponse> {
    let id = ChallengeEngine::create(&state.db, &input).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "challenge created", "id": id })),
    ))
}

pub async fn admin_update_challenge(
    State(state): SharedState,
    _admin: Admin,
    Path(id): Path<i64>,
    Json(input): Json<ChallengeInput>,
) -> Result<impl IntoResponse> {
    ChallengeEngine::update(&state.db, id, &input).await?;
    Ok(message("challenge updated"))
}

pub async fn admin_delete_challenge(
    State(state): SharedState,
    _admin: Admin,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    ChallengeEngine::delete(&state.db, id).await?;
    Ok(message("challenge deleted"))
}

pub async fn admin_grant_points(
    State(state): SharedState,
    admin: Admin,
    Path(member): Path<i64>,
    Json(req): Json<GrantPointsRequest>,
) -> Result<impl IntoResponse> {
    let id = Ledger::grant(&state.db, &state.badges, member, req.points, req.description).await?;
    tracing::info!("Admin {} granted {} points to member {}", admin.member, req.points, member);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "points granted", "id": id })),
    ))
}

/// Positive integer, or None for missing/garbage values
fn parse_positive(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|v| v.trim().parse::<i64>().ok()).filter(|v| *v > 0)
}

fn is_true(raw: Option<&str>) -> bool {
    raw.is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1")
}
