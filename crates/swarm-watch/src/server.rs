//! HTTP control plane.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/stage` | Latest stage, `404` before the first push |
//! | PUT | `/stage` | Replace the stage, `202` |
//! | GET | `/healthz` | Liveness |

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use swarm_core::Stage;

use crate::board::StageBoard;

/// Error body for rejected requests.
#[derive(serde::Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ErrorBody {
            success: false,
            error: msg.to_string(),
        }),
    )
        .into_response()
}

pub fn build_router(board: StageBoard) -> Router {
    Router::new()
        .route("/stage", get(get_stage).put(put_stage))
        .route("/healthz", get(healthz))
        .with_state(board)
}

/// GET /stage
async fn get_stage(State(board): State<StageBoard>) -> Response {
    match board.current() {
        Some(stage) => Json(stage).into_response(),
        None => error_response("no stage has been pushed yet", StatusCode::NOT_FOUND),
    }
}

/// PUT /stage
async fn put_stage(State(board): State<StageBoard>, Json(stage): Json<Stage>) -> Response {
    if let Err(e) = stage.validate() {
        warn!(checkpoint = %stage.checkpoint, error = %e, "rejected stage");
        return error_response(&e.to_string(), StatusCode::BAD_REQUEST);
    }
    board.push(stage.clone());
    (StatusCode::ACCEPTED, Json(stage)).into_response()
}

/// GET /healthz
async fn healthz() -> &'static str {
    "ok"
}

/// Serve the control plane on `listener` until `shutdown` flips to `true`.
pub async fn serve(
    listener: TcpListener,
    board: StageBoard,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "control plane listening");

    axum::serve(listener, build_router(board))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow_and_update() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;

    info!(%addr, "control plane stopped");
    Ok(())
}
