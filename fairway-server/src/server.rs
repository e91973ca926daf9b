//! Axum server setup and router configuration.

use crate::shutdown::shutdown_signal;
use crate::state::AppState;
use axum::extract::State;
use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get, routing::post};
use fairway_core::processors::{SwapError, SwapOutcome, SwapRequest};
use fairway_sdk::events::RawEnvelope;
use fairway_sdk::objects::{GuildId, TagNumber, UserId};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Build the main application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check endpoint
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        // Event ingress for external producers
        .route("/events", post(publish_event))
        .route("/tag-swaps", post(request_tag_swap))
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    events_published: u64,
    dead_lettered: u64,
}

/// Simple health check - returns OK if the server is running.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        events_published: state.bus.events_published(),
        dead_lettered: state.bus.dead_lettered(),
    })
}

/// Ready check response.
#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    database: &'static str,
}

/// Ready once the database (if any) answers.
async fn ready_check(State(state): State<AppState>) -> impl IntoResponse {
    let Some(db) = &state.db else {
        return (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                database: "memory",
            }),
        );
    };
    match sqlx::query("SELECT 1").execute(db).await {
        Ok(_) => (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                database: "connected",
            }),
        ),
        Err(e) => {
            tracing::warn!("Readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadyResponse {
                    status: "not_ready",
                    database: "unreachable",
                }),
            )
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

/// Accept a wire envelope. Decoding is left to the dispatcher, so a bad
/// payload goes through the same redelivery path as any other delivery.
async fn publish_event(
    State(state): State<AppState>,
    Json(raw): Json<RawEnvelope>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    let body = serde_json::to_vec(&raw)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))?;
    state
        .bus
        .publish_raw(body)
        .map_err(|e| error_response(StatusCode::SERVICE_UNAVAILABLE, e))?;
    tracing::debug!(
        event = %raw.event,
        correlation_id = %raw.correlation_id,
        "Event accepted"
    );
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
struct TagSwapBody {
    guild_id: GuildId,
    user_id: UserId,
    current_tag: TagNumber,
    desired_tag: TagNumber,
}

#[derive(Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum TagSwapResponse {
    Assigned,
    Swapped { counterpart: UserId },
    TimedOut,
}

impl From<SwapOutcome> for TagSwapResponse {
    fn from(outcome: SwapOutcome) -> Self {
        match outcome {
            SwapOutcome::Assigned => TagSwapResponse::Assigned,
            SwapOutcome::Swapped { counterpart } => TagSwapResponse::Swapped { counterpart },
            SwapOutcome::TimedOut => TagSwapResponse::TimedOut,
        }
    }
}

/// Blocks until the swap matches, is assigned, or times out.
async fn request_tag_swap(
    State(state): State<AppState>,
    Json(body): Json<TagSwapBody>,
) -> Result<Json<TagSwapResponse>, (StatusCode, Json<ErrorResponse>)> {
    let request = SwapRequest {
        guild_id: body.guild_id,
        requester: body.user_id,
        current_tag: body.current_tag,
        desired_tag: body.desired_tag,
    };
    match state.matcher.request_swap(request).await {
        Ok(outcome) => Ok(Json(outcome.into())),
        Err(e @ (SwapError::Ledger(_) | SwapError::Exchange(_))) => {
            tracing::error!("Tag swap failed: {}", e);
            Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e))
        }
        Err(e) => Err(error_response(StatusCode::CONFLICT, e)),
    }
}

/// Run the server with graceful shutdown support.
pub async fn run_server(router: Router, addr: SocketAddr) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairway_sdk::events::Envelope;

    #[test]
    fn test_swap_response_shape() {
        let json = serde_json::to_value(TagSwapResponse::from(SwapOutcome::Swapped {
            counterpart: UserId(4),
        }))
        .unwrap();
        assert_eq!(json, serde_json::json!({"outcome": "swapped", "counterpart": 4}));

        let json = serde_json::to_value(TagSwapResponse::from(SwapOutcome::TimedOut)).unwrap();
        assert_eq!(json, serde_json::json!({"outcome": "timed_out"}));
    }

    #[test]
    fn test_ingress_body_is_a_wire_envelope() {
        let envelope = Envelope::originate(
            GuildId(1),
            fairway_sdk::events::RoundStartRequested {
                round_id: fairway_sdk::objects::RoundId::new(),
            },
        );
        let raw = envelope.to_raw().unwrap();
        let body = serde_json::to_vec(&raw).unwrap();
        assert_eq!(Envelope::decode(&body).unwrap(), envelope);
    }
}
