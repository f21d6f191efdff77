use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use log::{debug, trace, warn};
use serde::Deserialize;
use serde_json::Value;
use stagehand_core::clip::ClipUpdate;
use stagehand_core::recording::TimestampEdit;
use stagehand_core::{
    ClipView, ClockDomain, Recording, RecordingGroup, Replay, Scoreboard, Screenshot, Timestamp,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::{net::TcpListener, sync::broadcast};
use tokio_graceful_shutdown::SubsystemHandle;
use tower_http::services::ServeDir;

use crate::error::EngineError;
use crate::media::MEDIA_URL_PREFIX;
use crate::push::{ClipsMessage, ScoreboardMessage};
use crate::Engine;

const SCREENSHOT_URI: &str = "/api/v1/media/screenshot";
const REPLAY_URI: &str = "/api/v1/media/replay";
// Clips
const CLIPS_URI: &str = "/api/v1/clips";
const CLIP_SCREENSHOT_URI: &str = "/api/v1/clips/screenshot";
const CLIP_VIDEO_URI: &str = "/api/v1/clips/video";
const CLIP_URI: &str = "/api/v1/clips/{id}";
const CLIP_DESCRIPTION_URI: &str = "/api/v1/clips/{id}/description";
const CLIP_CUT_URI: &str = "/api/v1/clips/{id}/cut";
const CLIP_OUTPUT_URI: &str = "/api/v1/clips/{id}/output";
// Recordings
const RECORDINGS_URI: &str = "/api/v1/recordings";
const RECORDING_START_URI: &str = "/api/v1/recordings/start";
const RECORDING_STOP_URI: &str = "/api/v1/recordings/stop";
const RECORDING_URI: &str = "/api/v1/recordings/{id}";
const RECORDING_CUT_URI: &str = "/api/v1/recordings/{id}/cut";
// Groups
const GROUP_START_URI: &str = "/api/v1/groups/start";
const GROUP_STOP_URI: &str = "/api/v1/groups/stop";
const GROUP_URI: &str = "/api/v1/groups/{id}";

const SCOREBOARD_URI: &str = "/api/v1/scoreboard";
const PUSH_URI: &str = "/api/v1/ws";

#[derive(Clone)]
pub struct Web {
    engine: Engine,
    shutdown_tx: broadcast::Sender<()>,
}

impl Web {
    pub fn new(engine: Engine) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Web {
            engine,
            shutdown_tx,
        }
    }

    fn router(self) -> Router {
        let media = ServeDir::new(self.engine.media.media_dir().dir());

        Router::new()
            .route(SCREENSHOT_URI, get(get_screenshot))
            .route(REPLAY_URI, post(post_replay))
            .route(CLIPS_URI, get(list_clips))
            .route(CLIP_SCREENSHOT_URI, post(clip_screenshot))
            .route(CLIP_VIDEO_URI, post(clip_video))
            .route(CLIP_URI, put(update_clip).delete(delete_clip))
            .route(CLIP_DESCRIPTION_URI, put(describe_clip))
            .route(CLIP_CUT_URI, post(cut_clip))
            .route(CLIP_OUTPUT_URI, post(send_clip_to_output))
            .route(RECORDINGS_URI, get(get_recordings))
            .route(RECORDING_START_URI, post(start_recording))
            .route(RECORDING_STOP_URI, post(stop_recording))
            .route(RECORDING_URI, put(update_recording).delete(delete_recording))
            .route(RECORDING_CUT_URI, post(cut_recording))
            .route(GROUP_START_URI, post(start_group))
            .route(GROUP_STOP_URI, post(stop_group))
            .route(GROUP_URI, put(update_group).delete(delete_group))
            .route(
                SCOREBOARD_URI,
                get(get_scoreboard).put(put_scoreboard).patch(patch_scoreboard),
            )
            .route(PUSH_URI, get(push_handler))
            .nest_service(MEDIA_URL_PREFIX, media)
            .with_state(self)
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), EngineError> {
        let port = self.engine.settings.port;
        let listener =
            TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port)).await?;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let shutdown_tx = self.shutdown_tx.clone();
        let app = self.router();

        log::info!("Starting HTTP web server on port {}", port);

        tokio::select! { biased;
            _ = subsys.on_shutdown_requested() => {
                let _ = shutdown_tx.send(());
            },
            r = axum::serve(listener, app)
                    .with_graceful_shutdown(
                        async move {
                            _ = shutdown_rx.recv().await;
                        }
                    ) => {
                return r.map_err(EngineError::Io);
            }
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Media
// -----------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ScreenshotQuery {
    #[serde(default)]
    full: bool,
    domain: Option<ClockDomain>,
    timestamp: Option<Timestamp>,
}

/// Without a timestamp this captures the program output now; with one it
/// returns the frame at that instant on the given clock (recording by
/// default).
async fn get_screenshot(
    State(state): State<Web>,
    Query(query): Query<ScreenshotQuery>,
) -> Result<Json<Screenshot>, EngineError> {
    let media = &state.engine.media;
    let screenshot = match (query.timestamp, query.full) {
        (None, true) => media.current_full_screenshot().await?,
        (None, false) => media.current_thumbnail().await?,
        (Some(t), full) => {
            let domain = query.domain.unwrap_or(ClockDomain::Recording);
            if full {
                media.full_screenshot(domain, t).await?
            } else {
                media.thumbnail(domain, t).await?
            }
        }
    };
    Ok(Json(screenshot))
}

async fn post_replay(State(state): State<Web>) -> Result<Json<Replay>, EngineError> {
    Ok(Json(state.engine.media.replay().await?))
}

// -----------------------------------------------------------------------------
// Clips
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct VideoClipRequest {
    /// Seconds, counted back from the end of the replay buffer
    duration: u64,
}

#[derive(Debug, Deserialize)]
struct DescriptionRequest {
    description: String,
}

async fn list_clips(State(state): State<Web>) -> Json<Vec<ClipView>> {
    Json(state.engine.clips.list())
}

async fn clip_screenshot(State(state): State<Web>) -> Result<Json<ClipView>, EngineError> {
    Ok(Json(state.engine.clips.screenshot().await?))
}

async fn clip_video(
    State(state): State<Web>,
    Json(request): Json<VideoClipRequest>,
) -> Result<Json<ClipView>, EngineError> {
    if request.duration == 0 {
        return Err(EngineError::InvalidRequest("duration must be positive".to_string()));
    }
    Ok(Json(state.engine.clips.clip(request.duration).await?))
}

async fn update_clip(
    State(state): State<Web>,
    Path(id): Path<u64>,
    Json(update): Json<ClipUpdate>,
) -> Result<Json<ClipView>, EngineError> {
    Ok(Json(state.engine.clips.update(id, &update)?))
}

async fn describe_clip(
    State(state): State<Web>,
    Path(id): Path<u64>,
    Json(request): Json<DescriptionRequest>,
) -> Result<Json<ClipView>, EngineError> {
    Ok(Json(state.engine.clips.describe(id, &request.description)?))
}

async fn cut_clip(State(state): State<Web>, Path(id): Path<u64>) -> Result<Json<ClipView>, EngineError> {
    Ok(Json(state.engine.clips.cut(id).await?))
}

async fn delete_clip(State(state): State<Web>, Path(id): Path<u64>) -> Result<Json<ClipView>, EngineError> {
    Ok(Json(state.engine.clips.delete(id)?))
}

async fn send_clip_to_output(
    State(state): State<Web>,
    Path(id): Path<u64>,
) -> Result<StatusCode, EngineError> {
    state.engine.clips.send_to_output(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// -----------------------------------------------------------------------------
// Recordings and groups
// -----------------------------------------------------------------------------

async fn get_recordings(State(state): State<Web>) -> Result<Json<Value>, EngineError> {
    Ok(Json(state.engine.recordings.snapshot()?))
}

async fn start_recording(State(state): State<Web>) -> Result<Json<Recording>, EngineError> {
    Ok(Json(state.engine.recordings.start_recording().await?))
}

async fn stop_recording(State(state): State<Web>) -> Result<Json<Recording>, EngineError> {
    Ok(Json(state.engine.recordings.stop_recording().await?))
}

async fn update_recording(
    State(state): State<Web>,
    Path(id): Path<u64>,
    Json(edit): Json<TimestampEdit>,
) -> Result<Json<Recording>, EngineError> {
    Ok(Json(state.engine.recordings.update_recording(id, &edit)?))
}

async fn delete_recording(
    State(state): State<Web>,
    Path(id): Path<u64>,
) -> Result<Json<Recording>, EngineError> {
    Ok(Json(state.engine.recordings.delete_recording(id)?))
}

async fn cut_recording(
    State(state): State<Web>,
    Path(id): Path<u64>,
) -> Result<Json<Recording>, EngineError> {
    Ok(Json(state.engine.recordings.cut_recording(id).await?))
}

async fn start_group(State(state): State<Web>) -> Result<Json<RecordingGroup>, EngineError> {
    Ok(Json(state.engine.recordings.start_group().await?))
}

async fn stop_group(State(state): State<Web>) -> Result<Json<RecordingGroup>, EngineError> {
    Ok(Json(state.engine.recordings.stop_group().await?))
}

async fn update_group(
    State(state): State<Web>,
    Path(id): Path<u64>,
    Json(edit): Json<TimestampEdit>,
) -> Result<Json<RecordingGroup>, EngineError> {
    Ok(Json(state.engine.recordings.update_group(id, &edit)?))
}

async fn delete_group(
    State(state): State<Web>,
    Path(id): Path<u64>,
) -> Result<Json<RecordingGroup>, EngineError> {
    Ok(Json(state.engine.recordings.delete_group(id)?))
}

// -----------------------------------------------------------------------------
// Scoreboard
// -----------------------------------------------------------------------------

async fn get_scoreboard(State(state): State<Web>) -> Json<Scoreboard> {
    Json(state.engine.scoreboard.get())
}

async fn put_scoreboard(
    State(state): State<Web>,
    Json(scoreboard): Json<Scoreboard>,
) -> Json<Scoreboard> {
    Json(state.engine.scoreboard.set(scoreboard))
}

async fn patch_scoreboard(
    State(state): State<Web>,
    Json(patch): Json<Value>,
) -> Result<Json<Scoreboard>, EngineError> {
    Ok(Json(state.engine.scoreboard.patch(&patch)?))
}

// -----------------------------------------------------------------------------
// Push channel
// -----------------------------------------------------------------------------

async fn push_handler(State(state): State<Web>, ws: WebSocketUpgrade) -> Response {
    debug!("Push channel request");
    // Subscribe before taking the snapshots so no update falls in between
    let push_rx = state.engine.push.subscribe();
    let shutdown_rx = state.shutdown_tx.subscribe();
    let initial = initial_messages(&state.engine);
    ws.on_upgrade(move |socket| push_stream(socket, initial, push_rx, shutdown_rx))
}

/// Current state of every collection, sent to a new observer before any
/// update.
fn initial_messages(engine: &Engine) -> Vec<String> {
    let clips = engine.clips.list();
    let scoreboard = engine.scoreboard.get();

    let serialized: [Result<String, EngineError>; 3] = [
        serde_json::to_string(&ClipsMessage { clips: &clips }).map_err(EngineError::from),
        engine
            .recordings
            .snapshot()
            .and_then(|v| Ok(serde_json::to_string(&v)?)),
        serde_json::to_string(&ScoreboardMessage {
            scoreboard: &scoreboard,
        })
        .map_err(EngineError::from),
    ];
    serialized
        .into_iter()
        .filter_map(|message| match message {
            Ok(text) => Some(text),
            Err(e) => {
                log::error!("Cannot serialize initial state: {}", e);
                None
            }
        })
        .collect()
}

async fn push_stream(
    mut socket: WebSocket,
    initial: Vec<String>,
    mut push_rx: broadcast::Receiver<String>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    for message in initial {
        if let Err(e) = socket.send(Message::Text(message.into())).await {
            warn!("Error on send to websocket: {}", e);
            return;
        }
    }

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Shutdown of push websocket");
                break;
            },
            r = push_rx.recv() => {
                match r {
                    Ok(message) => {
                        let len = message.len();
                        if let Err(e) = socket.send(Message::Text(message.into())).await {
                            warn!("Error on send to websocket: {}", e);
                            break;
                        }
                        trace!("Pushed {} bytes", len);
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Every message is a full snapshot, the next one catches up
                        warn!("Push observer lagged, skipped {} messages", n);
                    },
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Push channel closed");
                        break;
                    }
                }
            },
            r = socket.recv() => {
                match r {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Push observer went away");
                        break;
                    },
                    Some(Ok(message)) => {
                        trace!("Ignoring message {:?}", message);
                    },
                    Some(Err(e)) => {
                        debug!("Push websocket error: {}", e);
                        break;
                    }
                }
            }
        }
    }
}
