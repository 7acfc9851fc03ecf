use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

use commandrelay_auth::{authorize, Permission};
use commandrelay_core::{Command, CommandKind, TargetId};
use commandrelay_events::LiveChannel;

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

const DEFAULT_PENDING_LIMIT: usize = 100;
const MAX_PENDING_LIMIT: usize = 500;

pub fn router() -> Router {
    Router::new()
        .route("/", post(submit_command))
        .route("/pending", get(list_pending))
        .route("/ack", post(acknowledge))
        .route("/stream", get(stream))
}

/// POST /commands
///
/// Dispatch live-first with durable fallback. Callers only learn whether the
/// command was accepted, never which transport took it.
pub async fn submit_command(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::SubmitCommandRequest>,
) -> axum::response::Response {
    if let Err(e) = authorize(principal.principal(), &Permission::COMMANDS_ISSUE) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let target = match TargetId::parse(&body.employee_email) {
        Ok(t) => t,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_target", e.to_string()),
    };
    let kind = match body.command.parse::<CommandKind>() {
        Ok(k) => k,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_command", e.to_string()),
    };

    let reason = body.reason.filter(|r| !r.trim().is_empty());
    let command = Command::new(kind, target, Utc::now())
        .with_reason(reason)
        .with_initiator(Some(principal.identity().as_str()));

    let result = services.dispatcher.send(&command).await;
    if result.success() {
        tracing::info!(kind = %kind, target = %command.target(), "command accepted");
        (StatusCode::ACCEPTED, Json(dto::SubmitCommandResponse::ACCEPTED)).into_response()
    } else {
        tracing::warn!(
            kind = %kind,
            target = %command.target(),
            error = result.error_detail().unwrap_or_default(),
            "command rejected"
        );
        (StatusCode::SERVICE_UNAVAILABLE, Json(dto::SubmitCommandResponse::REJECTED)).into_response()
    }
}

/// GET /commands/pending?target=&limit=
pub async fn list_pending(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::PendingQuery>,
) -> axum::response::Response {
    let target = match query.target.as_deref().map(TargetId::parse).transpose() {
        Ok(t) => t,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_target", e.to_string()),
    };
    let limit = query.limit.unwrap_or(DEFAULT_PENDING_LIMIT).clamp(1, MAX_PENDING_LIMIT);

    match services
        .acknowledgments
        .pending_for(principal.principal(), target.as_ref(), limit)
        .await
    {
        Ok(rows) => {
            let items: Vec<dto::PendingCommandView> = rows.iter().map(dto::PendingCommandView::from).collect();
            Json(items).into_response()
        }
        Err(e) => errors::acknowledge_error_to_response(e),
    }
}

/// POST /commands/ack
pub async fn acknowledge(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::AcknowledgeRequest>,
) -> axum::response::Response {
    match services
        .acknowledgments
        .acknowledge(body.ids.as_slice(), principal.principal())
        .await
    {
        Ok(result) => Json(result).into_response(),
        Err(e) => errors::acknowledge_error_to_response(e),
    }
}

/// GET /commands/stream
///
/// Subscribes the caller to their own live channel. While the stream is open
/// the caller counts as online, and commands addressed to them arrive as
/// `command` events carrying the wire payload.
pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    let key = services.channel_key(principal.identity());

    let subscription = match services.live.subscribe(&key).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(channel = %key, error = %e, "live subscribe failed");
            return errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "live_unavailable", e.to_string());
        }
    };
    tracing::debug!(channel = %key, "target connected to live stream");

    let events = ReceiverStream::new(subscription.into_receiver())
        .map(|payload| Ok::<_, Infallible>(SseEvent::default().event("command").data(payload)));

    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}
