// ABOUTME: WebSocket log streaming: live build logs from the hub, runtime logs via tailer.

use super::{error_body, AppContext};
use crate::logstream::Tailer;
use crate::state::{AppState, Status};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const RUNTIME_BACKLOG: usize = 100;

#[derive(Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    r#type: Option<String>,
    #[serde(default)]
    process: Option<String>,
}

pub async fn log_stream(
    State(ctx): State<Arc<AppContext>>,
    Path(app_id): Path<String>,
    Query(query): Query<StreamQuery>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let state = match ctx.store.get(&app_id) {
        Ok(state) => state,
        Err(err) => return error_body(StatusCode::NOT_FOUND, err.to_string()),
    };

    let log_type = query.r#type.unwrap_or_else(|| "build".to_string());
    match log_type.as_str() {
        "build" => upgrade.on_upgrade(move |socket| stream_build(ctx, socket, state)),
        "runtime" => {
            let process = query.process.unwrap_or_else(|| "web".to_string());
            upgrade.on_upgrade(move |socket| stream_runtime(ctx, socket, app_id, process))
        }
        _ => error_body(
            StatusCode::BAD_REQUEST,
            "invalid type: use 'build' or 'runtime'",
        ),
    }
}

/// Build logs: subscribe first, then replay the stored backlog, so no line
/// published in between is lost. Live lines follow until the hub closes the
/// topic at terminal status.
async fn stream_build(ctx: Arc<AppContext>, mut socket: WebSocket, state: AppState) {
    let mut sub = ctx.hub.subscribe(&state.app_id);

    // Re-read the state now that we're subscribed; the snapshot taken
    // before the upgrade could miss lines published in between.
    let state = ctx.store.get(&state.app_id).unwrap_or(state);

    for line in &state.build_log {
        if socket.send(Message::Text(line.clone().into())).await.is_err() {
            return;
        }
    }

    // Deploy already settled: the backlog is the whole story.
    if matches!(state.status, Status::Running | Status::Failed | Status::Stopped) {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    loop {
        tokio::select! {
            line = sub.rx.recv() => match line {
                Some(line) => {
                    if socket.send(Message::Text(line.into())).await.is_err() {
                        return;
                    }
                }
                // Hub closed the topic: deploy finished.
                None => {
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                }
            },
            message = socket.recv() => match message {
                Some(Ok(_)) => {}
                // Client went away.
                _ => return,
            },
        }
    }
}

/// Runtime logs: tail the process log file, backlog first.
async fn stream_runtime(ctx: Arc<AppContext>, mut socket: WebSocket, app_id: String, process: String) {
    let log_path = ctx.config.process_log_path(&app_id, &process);
    let cancel = CancellationToken::new();
    let mut rx = Tailer::new(log_path, RUNTIME_BACKLOG).start(cancel.clone());

    loop {
        tokio::select! {
            line = rx.recv() => match line {
                Some(line) => {
                    if socket.send(Message::Text(line.into())).await.is_err() {
                        cancel.cancel();
                        return;
                    }
                }
                None => {
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                }
            },
            message = socket.recv() => match message {
                Some(Ok(_)) => {}
                _ => {
                    cancel.cancel();
                    return;
                }
            },
        }
    }
}
