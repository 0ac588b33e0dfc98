//! WebSocket handler for per-subscriber real-time fan-out

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::PortalState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub user_id: Option<i64>,
}

/// WebSocket upgrade handler
///
/// GET /api/stream?user_id=
pub async fn stream_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<StreamQuery>,
    State(state): State<PortalState>,
) -> ApiResult<Response> {
    let Some(user_id) = query.user_id else {
        warn!("stream connection without user_id");
        return Err(ApiError::InvalidRequest("user_id is required".to_string()));
    };

    Ok(ws.on_upgrade(move |socket| handle_subscriber(socket, state, user_id)))
}

async fn handle_subscriber(socket: WebSocket, state: PortalState, user_id: i64) {
    info!("subscriber {user_id} connected");

    let mut frames = state.fanout.connect(user_id);
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        loop {
            match frames.recv().await {
                Ok(frame) => {
                    if let Ok(text) = serde_json::to_string(&frame)
                        && sender.send(Message::Text(text)).await.is_err()
                    {
                        debug!("WebSocket send failed, client disconnected");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("subscriber lagging, skipped {skipped} frames");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    state.fanout.disconnect(user_id);
    info!("subscriber {user_id} disconnected");
}
