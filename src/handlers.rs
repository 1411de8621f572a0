use crate::attempt::{Attempt, AttemptStatus, QuestionReview};
use crate::error::{AppError, EngineError, ErrorDetail};
use crate::evaluator::RawSelection;
use crate::models::{AttemptConfig, PublicQuestion, QuestionSet, QuizMode};
use crate::session::{AttemptSession, CurrentView, NextView, Progress, SubmitView};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Identity is established upstream and forwarded in `x-user-id`.
fn user_id_from_headers(headers: &HeaderMap, req_id: &str) -> Result<String, AppError> {
    headers
        .get("x-user-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "missing user identity", req_id))
}

fn validation_error(errors: &ValidationErrors, req_id: &str) -> AppError {
    let details = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| ErrorDetail {
                field: field.to_string(),
                issue: e.code.to_string(),
            })
        })
        .collect();
    AppError::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", errors.to_string(), req_id).with_details(details)
}

async fn persist(state: &AppState, op: &str, req_id: &str) -> Result<(), AppError> {
    state
        .persist_core_data()
        .await
        .map_err(|err| AppError::internal(format!("failed to persist local state after {op}: {err}"), req_id))
}

/// Looks up the set behind an attempt the caller owns. Someone else's attempt
/// is reported as missing.
async fn owned_attempt_set(state: &AppState, id: Uuid, user_id: &str, req_id: &str) -> Result<QuestionSet, AppError> {
    let set_id = state
        .db
        .attempts
        .get(&id)
        .filter(|entry| entry.attempt.user_id == user_id)
        .map(|entry| entry.attempt.question_set_id)
        .ok_or_else(|| AppError::not_found("attempt", req_id))?;
    state
        .question_set(set_id)
        .await
        .ok_or_else(|| AppError::not_found("question set", req_id))
}

/// Runs `op` with the attempt's entry locked for its whole duration.
fn with_session<T>(
    state: &AppState,
    id: Uuid,
    user_id: &str,
    req_id: &str,
    op: impl FnOnce(&mut AttemptSession) -> Result<T, EngineError>,
) -> Result<T, AppError> {
    let mut entry = state
        .db
        .attempts
        .get_mut(&id)
        .filter(|entry| entry.attempt.user_id == user_id)
        .ok_or_else(|| AppError::not_found("attempt", req_id))?;
    op(entry.value_mut()).map_err(|err| {
        warn!("attempt {} rejected operation: {}", id, err);
        AppError::from_engine(err, req_id)
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSetOut {
    pub id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub mode: QuizMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<u64>,
    pub question_count: usize,
    pub questions: Vec<PublicQuestion>,
}

pub async fn get_question_set(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<QuestionSetOut>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let set = state
        .question_set(id)
        .await
        .ok_or_else(|| AppError::not_found("question set", req_id.clone()))?;
    Ok(Json(QuestionSetOut {
        id: set.id,
        question_count: set.questions.len(),
        questions: set.ordered_questions().into_iter().map(PublicQuestion::from).collect(),
        title: set.title,
        description: set.description,
        mode: set.mode,
        time_limit: set.time_limit,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAttemptPayload {
    pub question_set_id: i64,
    #[serde(default)]
    pub config: AttemptConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptOut {
    #[serde(flatten)]
    pub attempt: Attempt,
    pub status: AttemptStatus,
    pub progress: Progress,
}

impl AttemptOut {
    fn from_session(session: &AttemptSession) -> Self {
        Self {
            attempt: session.attempt.clone(),
            status: session.attempt.status(),
            progress: session.progress(Utc::now()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedAttemptOut {
    pub attempt: AttemptOut,
    pub current: Option<CurrentView>,
}

pub async fn create_attempt(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateAttemptPayload>,
) -> Result<(StatusCode, Json<CreatedAttemptOut>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let user_id = user_id_from_headers(&headers, &req_id)?;
    let mut config = payload.config;
    if let Err(errors) = config.validate() {
        warn!("attempt config rejected for {}: {}", user_id, errors);
        return Err(validation_error(&errors, &req_id));
    }

    let set = state
        .question_set(payload.question_set_id)
        .await
        .ok_or_else(|| AppError::not_found("question set", req_id.clone()))?;
    if config.timed_mode && config.custom_time_limit.is_none() {
        config.custom_time_limit = set.time_limit;
    }
    if config.timed_mode && config.custom_time_limit.is_none() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "timed mode needs a time limit",
            req_id,
        )
        .with_details(vec![ErrorDetail {
            field: "customTimeLimit".to_string(),
            issue: "required".to_string(),
        }]));
    }

    let prior = if config.practice_mode {
        state.latest_completed_attempt(&user_id, set.id)
    } else {
        None
    };
    let session = AttemptSession::start(&set, &user_id, config, prior.as_ref(), &mut rand::thread_rng())
        .map_err(|err| AppError::from_engine(err, req_id.clone()))?;
    let out = CreatedAttemptOut {
        attempt: AttemptOut::from_session(&session),
        current: session
            .current_view(&set)
            .map_err(|err| AppError::from_engine(err, req_id.clone()))?,
    };
    state.db.attempts.insert(session.attempt.id, session);
    persist(&state, "create_attempt", &req_id).await?;
    Ok((StatusCode::CREATED, Json(out)))
}

pub async fn get_attempt(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<AttemptOut>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user_id = user_id_from_headers(&headers, &req_id)?;
    let entry = state
        .db
        .attempts
        .get(&id)
        .filter(|entry| entry.attempt.user_id == user_id)
        .ok_or_else(|| AppError::not_found("attempt", req_id.clone()))?;
    Ok(Json(AttemptOut::from_session(entry.value())))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentOut {
    pub status: AttemptStatus,
    pub current: Option<CurrentView>,
    pub progress: Progress,
}

pub async fn current(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<CurrentOut>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user_id = user_id_from_headers(&headers, &req_id)?;
    let set = owned_attempt_set(&state, id, &user_id, &req_id).await?;
    let out = with_session(&state, id, &user_id, &req_id, |session| {
        let current = if session.attempt.is_completed {
            None
        } else {
            session.current_view(&set)?
        };
        Ok(CurrentOut {
            status: session.attempt.status(),
            current,
            progress: session.progress(Utc::now()),
        })
    })?;
    Ok(Json(out))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    pub question_id: String,
    pub selected_option: RawSelection,
    /// `selectedOption` indexes the shuffled `displayOptions` instead of the authored options.
    #[serde(default)]
    pub display_order: bool,
}

pub async fn submit_answer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<AnswerPayload>,
) -> Result<Json<SubmitView>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user_id = user_id_from_headers(&headers, &req_id)?;
    let set = owned_attempt_set(&state, id, &user_id, &req_id).await?;
    let view = with_session(&state, id, &user_id, &req_id, |session| {
        if payload.display_order {
            session.submit_displayed(&set, &payload.question_id, &payload.selected_option)
        } else {
            session.submit(&set, &payload.question_id, &payload.selected_option)
        }
    })?;
    persist(&state, "submit_answer", &req_id).await?;
    Ok(Json(view))
}

pub async fn next_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<NextView>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user_id = user_id_from_headers(&headers, &req_id)?;
    let set = owned_attempt_set(&state, id, &user_id, &req_id).await?;
    let view = with_session(&state, id, &user_id, &req_id, |session| {
        session.next(&set, &mut rand::thread_rng())
    })?;
    persist(&state, "next_question", &req_id).await?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePayload {
    pub time_taken: u64,
    #[serde(default)]
    pub force: bool,
}

pub async fn complete_attempt(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<CompletePayload>,
) -> Result<Json<AttemptOut>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user_id = user_id_from_headers(&headers, &req_id)?;
    let out = with_session(&state, id, &user_id, &req_id, |session| {
        session.complete(payload.time_taken, payload.force, Utc::now())?;
        Ok(AttemptOut::from_session(session))
    })?;
    persist(&state, "complete_attempt", &req_id).await?;
    info!(
        "attempt {} completed by {} with score {:?}",
        id, user_id, out.attempt.score
    );
    Ok(Json(out))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOut {
    pub attempt: AttemptOut,
    pub questions: Vec<QuestionReview>,
}

pub async fn review_attempt(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ReviewOut>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user_id = user_id_from_headers(&headers, &req_id)?;
    let set = owned_attempt_set(&state, id, &user_id, &req_id).await?;
    let out = with_session(&state, id, &user_id, &req_id, |session| {
        Ok(ReviewOut {
            questions: session.attempt.review(&set)?,
            attempt: AttemptOut::from_session(session),
        })
    })?;
    Ok(Json(out))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSummary {
    pub id: Uuid,
    pub question_set_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_set_title: Option<String>,
    pub status: AttemptStatus,
    pub practice_mode: bool,
    pub total_questions: usize,
    pub correct_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_taken: Option<u64>,
    pub started_at: chrono::DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<Utc>>,
}

pub async fn list_user_attempts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(owner): Path<String>,
) -> Result<Json<Vec<AttemptSummary>>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user_id = user_id_from_headers(&headers, &req_id)?;
    if owner != user_id {
        warn!("{} tried to list attempts of {}", user_id, owner);
        return Err(AppError::new(StatusCode::FORBIDDEN, "FORBIDDEN", "forbidden", req_id));
    }

    let attempts = state.attempts_for_user(&user_id);
    let sets = state.db.question_sets.read().await;
    let items = attempts
        .into_iter()
        .map(|a| AttemptSummary {
            question_set_title: sets.get(&a.question_set_id).map(|s| s.title.clone()),
            status: a.status(),
            practice_mode: a.config.practice_mode,
            id: a.id,
            question_set_id: a.question_set_id,
            total_questions: a.total_questions,
            correct_count: a.correct_count,
            score: a.score,
            time_taken: a.time_taken,
            started_at: a.started_at,
            completed_at: a.completed_at,
        })
        .collect();
    Ok(Json(items))
}
