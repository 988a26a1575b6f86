use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::api::proxy;
use crate::api::server::{AppState, JsonResult, RouteError};
use crate::constants::{MSG_FEEDBACK_SAVED, MSG_FEEDBACK_SAVED_FALLBACK};
use crate::db::prelude::*;

#[derive(Debug, Deserialize)]
pub struct DayQuery {
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FeedbackSaved {
    pub success: bool,
    pub message: &'static str,
    pub data: FeedbackRecord,
}

#[derive(Debug, Serialize)]
pub struct Listing<T> {
    pub success: bool,
    pub data: Vec<T>,
    pub count: usize,
}

impl<T> Listing<T> {
    fn new(data: Vec<T>) -> Self {
        Self {
            success: true,
            count: data.len(),
            data,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UsageForDay {
    pub success: bool,
    #[serde(flatten)]
    pub usage: DailyCount,
}

#[derive(Debug, Serialize)]
pub struct UsageBreakdown {
    pub success: bool,
    pub data: Vec<DailyCount>,
}

#[instrument(skip(state, payload))]
pub async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<FeedbackInput>, JsonRejection>,
) -> JsonResult<FeedbackSaved> {
    let Json(input) = payload?;

    let submission = FeedbackRepository::new(&state.gateway, &state.feedback_fallback)
        .submit(input)
        .await?;

    let message = match submission.backing {
        Backing::Store => MSG_FEEDBACK_SAVED,
        Backing::Fallback => MSG_FEEDBACK_SAVED_FALLBACK,
    };

    Ok(Json(FeedbackSaved {
        success: true,
        message,
        data: submission.record,
    }))
}

#[instrument(skip(state))]
pub async fn list_feedback(State(state): State<Arc<AppState>>) -> JsonResult<Listing<FeedbackRecord>> {
    let records = FeedbackRepository::new(&state.gateway, &state.feedback_fallback)
        .list()
        .await?;

    Ok(Json(Listing::new(records)))
}

#[instrument(skip(state))]
pub async fn list_persisted_feedback(
    State(state): State<Arc<AppState>>,
) -> JsonResult<Listing<Value>> {
    let documents = FeedbackRepository::new(&state.gateway, &state.feedback_fallback)
        .list_persisted()
        .await?;

    Ok(Json(Listing::new(documents)))
}

#[instrument(skip(state))]
pub async fn usage_for_day(
    state: Arc<AppState>,
    collection: CollectionName,
    query: DayQuery,
) -> JsonResult<UsageForDay> {
    let usage = UsageRepository::new(&state.gateway)
        .count_usage(collection, query.date.as_deref())
        .await?;

    Ok(Json(UsageForDay {
        success: true,
        usage,
    }))
}

#[instrument(skip(state))]
pub async fn gamematch_breakdown(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> JsonResult<UsageBreakdown> {
    let data = UsageRepository::new(&state.gateway)
        .daily_breakdown(
            CollectionName::UsageGameMatch,
            query.from.as_deref(),
            query.to.as_deref(),
        )
        .await?;

    Ok(Json(UsageBreakdown {
        success: true,
        data,
    }))
}

/// Relays an upstream status endpoint, opening it to any origin
#[instrument(skip(state))]
pub async fn proxy_status(
    state: Arc<AppState>,
    route: &'static str,
    query: Option<&str>,
) -> Result<Response, RouteError> {
    let body = proxy::forward(
        &state.http_client,
        &state.config.status_upstream_url,
        route,
        query,
    )
    .await
    .map_err(|source| RouteError::UpstreamProxy {
        route: route.to_string(),
        source,
    })?;

    Ok((
        [(http::header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(body),
    )
        .into_response())
}
