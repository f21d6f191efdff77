use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use serde_json::{json, Value};
use stagehand_core::{ConnectionManager, ConnectionState, DualTimestamp, Timestamp};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tokio_graceful_shutdown::SubsystemHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::protocol::{self, op, Envelope, Event, Hello, RequestResponse};
use super::{CaptureDevice, DeviceEvent};
use crate::config::Settings;
use crate::error::EngineError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Container formats OBS can record to.
const RECORDING_EXTENSIONS: &[&str] = &["mkv", "mp4", "mov", "flv", "ts"];

/// Active recording file as last seen in an event.
#[derive(Debug, Clone, Default, PartialEq)]
struct TrackedFile {
    path: Option<PathBuf>,
    /// False once the connection drops: events may have been missed since
    confirmed: bool,
}

struct Inner {
    url: String,
    password: Option<String>,
    media_input: String,
    request_timeout: Duration,
    epoch: Instant,

    connection: Mutex<ConnectionManager>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<RequestResponse>>>,
    next_request_id: AtomicU64,
    events: broadcast::Sender<DeviceEvent>,
    // OBS has no request for the active file; it is tracked from events
    recording_file: Mutex<TrackedFile>,
}

/// OBS WebSocket v5 client.
///
/// Cheap to clone. [`ObsClient::run`] owns the socket and reconnects at a
/// fixed interval until shutdown; requests made while disconnected fail with
/// [`EngineError::DeviceUnavailable`].
#[derive(Clone)]
pub struct ObsClient {
    inner: Arc<Inner>,
}

impl ObsClient {
    pub fn new(settings: &Settings) -> ObsClient {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let retry_ms = settings.reconnect_interval.as_millis() as u64;
        ObsClient {
            inner: Arc::new(Inner {
                url: settings.obs_url.clone(),
                password: settings.obs_password.clone(),
                media_input: settings.media_input.clone(),
                request_timeout: settings.request_timeout,
                epoch: Instant::now(),
                connection: Mutex::new(ConnectionManager::new(retry_ms)),
                outgoing: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                next_request_id: AtomicU64::new(1),
                events,
                recording_file: Mutex::new(TrackedFile::default()),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.lock().unwrap().state()
    }

    fn now_ms(&self) -> u64 {
        self.inner.epoch.elapsed().as_millis() as u64
    }

    fn emit(&self, event: DeviceEvent) {
        debug!("Device event {:?}", event);
        let _ = self.inner.events.send(event);
    }

    // -------------------------------------------------------------------------
    // Connection loop
    // -------------------------------------------------------------------------

    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), EngineError> {
        loop {
            self.inner.connection.lock().unwrap().start_connecting(self.now_ms());
            info!("Connecting to OBS at {}", self.inner.url);

            let result = self.connect_and_serve(&subsys).await;
            let was_connected = self.disconnect();
            match result {
                Err(EngineError::Shutdown) => {
                    self.inner.connection.lock().unwrap().shutdown(self.now_ms());
                    info!("OBS connection shut down");
                    return Ok(());
                }
                Err(e) => {
                    let failures = {
                        let mut connection = self.inner.connection.lock().unwrap();
                        connection.error(self.now_ms());
                        connection.failure_count()
                    };
                    warn!("OBS connection failed ({} in a row): {}", failures, e);
                }
                Ok(()) => {
                    self.inner.connection.lock().unwrap().error(self.now_ms());
                    info!("OBS closed the connection");
                }
            }
            if was_connected {
                self.emit(DeviceEvent::ConnectionClosed);
            }

            let delay = self.inner.connection.lock().unwrap().retry_delay_ms();
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    self.inner.connection.lock().unwrap().shutdown(self.now_ms());
                    return Ok(());
                }
                _ = sleep(Duration::from_millis(delay)) => {}
            }
        }
    }

    /// Drop the outgoing channel and fail every pending request. Returns
    /// whether the connection had been identified.
    ///
    /// The tracked recording file is kept but no longer trusted.
    fn disconnect(&self) -> bool {
        *self.inner.outgoing.lock().unwrap() = None;
        self.inner.pending.lock().unwrap().clear();
        self.inner.recording_file.lock().unwrap().confirmed = false;
        self.inner.connection.lock().unwrap().state() == ConnectionState::Connected
    }

    async fn connect_and_serve(&self, subsys: &SubsystemHandle) -> Result<(), EngineError> {
        let socket = tokio::select! {
            _ = subsys.on_shutdown_requested() => return Err(EngineError::Shutdown),
            r = connect_async(self.inner.url.as_str()) => {
                r.map_err(|e| EngineError::Device(e.to_string()))?.0
            }
        };
        self.inner.connection.lock().unwrap().start_identifying(self.now_ms());

        let (mut sink, mut stream) = socket.split();
        self.identify(&mut sink, &mut stream).await?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.inner.outgoing.lock().unwrap() = Some(tx);
        self.inner.connection.lock().unwrap().connected(self.now_ms());
        info!("Connected to OBS at {}", self.inner.url);
        self.emit(DeviceEvent::Connected);

        loop {
            tokio::select! {
                biased;
                _ = subsys.on_shutdown_requested() => {
                    let _ = sink.close().await;
                    return Err(EngineError::Shutdown);
                }
                outgoing = rx.recv() => {
                    if let Some(message) = outgoing {
                        sink.send(message).await.map_err(|e| EngineError::Device(e.to_string()))?;
                    }
                }
                incoming = stream.next() => {
                    match incoming {
                        None => return Ok(()),
                        Some(Err(e)) => return Err(EngineError::Device(e.to_string())),
                        Some(Ok(Message::Text(text))) => self.handle_text(&text),
                        Some(Ok(Message::Close(_))) => return Ok(()),
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    async fn identify(
        &self,
        sink: &mut futures::stream::SplitSink<Socket, Message>,
        stream: &mut futures::stream::SplitStream<Socket>,
    ) -> Result<(), EngineError> {
        let hello = next_envelope(stream).await?;
        if hello.op != op::HELLO {
            return Err(EngineError::Device(format!("expected Hello, got op {}", hello.op)));
        }
        let hello: Hello = serde_json::from_value(hello.d)?;
        debug!(
            "OBS WebSocket {} (rpc version {})",
            hello.obs_web_socket_version, hello.rpc_version
        );

        let authentication = match (hello.authentication, &self.inner.password) {
            (Some(challenge), Some(password)) => Some(protocol::auth_string(
                password,
                &challenge.salt,
                &challenge.challenge,
            )),
            (Some(_), None) => {
                return Err(EngineError::Device("OBS requires a password".to_string()));
            }
            (None, _) => None,
        };
        let identify = serde_json::to_string(&protocol::identify(authentication))?;
        sink.send(Message::Text(identify))
            .await
            .map_err(|e| EngineError::Device(e.to_string()))?;

        let identified = next_envelope(stream).await?;
        if identified.op != op::IDENTIFIED {
            return Err(EngineError::Device(format!(
                "identification rejected (op {})",
                identified.op
            )));
        }
        Ok(())
    }

    fn handle_text(&self, text: &str) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Ignoring malformed OBS message: {}", e);
                return;
            }
        };
        match envelope.op {
            op::REQUEST_RESPONSE => match serde_json::from_value::<RequestResponse>(envelope.d) {
                Ok(response) => {
                    let waiter = self.inner.pending.lock().unwrap().remove(&response.request_id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(response);
                        }
                        None => trace!("Late response to request {}", response.request_id),
                    }
                }
                Err(e) => warn!("Ignoring malformed OBS response: {}", e),
            },
            op::EVENT => match serde_json::from_value::<Event>(envelope.d) {
                Ok(event) => self.handle_event(event),
                Err(e) => warn!("Ignoring malformed OBS event: {}", e),
            },
            other => trace!("Ignoring OBS op {}", other),
        }
    }

    fn handle_event(&self, event: Event) {
        let data = event.event_data.unwrap_or(Value::Null);
        match event.event_type.as_str() {
            "RecordStateChanged" => match data["outputState"].as_str() {
                Some(protocol::OUTPUT_STARTED) => {
                    if let Some(path) = data["outputPath"].as_str() {
                        self.recording_file_opened(PathBuf::from(path));
                    }
                }
                Some(protocol::OUTPUT_STOPPED) => {
                    *self.inner.recording_file.lock().unwrap() = TrackedFile {
                        path: None,
                        confirmed: true,
                    };
                    self.emit(DeviceEvent::RecordingStopped);
                }
                _ => {}
            },
            "RecordFileChanged" => {
                if let Some(path) = data["newOutputPath"].as_str() {
                    self.recording_file_opened(PathBuf::from(path));
                }
            }
            other => trace!("Ignoring OBS event {}", other),
        }
    }

    fn recording_file_opened(&self, file: PathBuf) {
        *self.inner.recording_file.lock().unwrap() = TrackedFile {
            path: Some(file.clone()),
            confirmed: true,
        };
        self.emit(DeviceEvent::RecordingStarted { file });
    }

    // -------------------------------------------------------------------------
    // Requests
    // -------------------------------------------------------------------------

    /// Send a request and wait for its response data.
    pub async fn request(&self, request_type: &str, data: Option<Value>) -> Result<Value, EngineError> {
        let sender = self
            .inner
            .outgoing
            .lock()
            .unwrap()
            .clone()
            .ok_or(EngineError::DeviceUnavailable)?;

        let id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed).to_string();
        let text = serde_json::to_string(&protocol::request(request_type, &id, data))?;
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().unwrap().insert(id.clone(), tx);

        if sender.send(Message::Text(text)).is_err() {
            self.inner.pending.lock().unwrap().remove(&id);
            return Err(EngineError::DeviceUnavailable);
        }

        let response = match timeout(self.inner.request_timeout, rx).await {
            Err(_) => {
                self.inner.pending.lock().unwrap().remove(&id);
                return Err(EngineError::Device(format!("{} timed out", request_type)));
            }
            Ok(Err(_)) => return Err(EngineError::DeviceUnavailable),
            Ok(Ok(response)) => response,
        };

        if !response.request_status.result {
            return Err(EngineError::Device(format!(
                "{} failed with code {}: {}",
                request_type,
                response.request_status.code,
                response.request_status.comment.unwrap_or_default()
            )));
        }
        Ok(response.response_data.unwrap_or(Value::Null))
    }

    /// Timecode of an output, or `None` when the output is not active.
    async fn output_timecode(&self, request_type: &str) -> Result<Option<Timestamp>, EngineError> {
        let status = self.request(request_type, None).await?;
        if status["outputActive"].as_bool() != Some(true) {
            return Ok(None);
        }
        Ok(protocol::parse_timecode(status.get("outputTimecode")))
    }

    /// Look for the file being recorded in the record directory. Used when
    /// the recording started before this connection was identified.
    async fn recover_recording_file(&self) -> Option<PathBuf> {
        let folder = match self.active_recording_folder().await {
            Ok(folder) => folder,
            Err(e) => {
                warn!("Cannot query the record directory: {}", e);
                return None;
            }
        };
        match newest_recording_in(&folder).await {
            Ok(file) => file,
            Err(e) => {
                warn!("Cannot scan record directory {}: {}", folder.display(), e);
                None
            }
        }
    }

    async fn current_program_scene(&self) -> Result<String, EngineError> {
        let scene = self.request("GetCurrentProgramScene", None).await?;
        scene
            .get("sceneName")
            .or_else(|| scene.get("currentProgramSceneName"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| EngineError::Device("no current program scene".to_string()))
    }
}

/// Most recently modified recording in `dir`. The file OBS is writing to
/// is touched continuously, so it wins over finished recordings.
async fn newest_recording_in(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_recording = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| RECORDING_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if !is_recording {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified()?;
        if newest.as_ref().map_or(true, |(time, _)| modified > *time) {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

async fn next_envelope(stream: &mut futures::stream::SplitStream<Socket>) -> Result<Envelope, EngineError> {
    while let Some(message) = stream.next().await {
        match message.map_err(|e| EngineError::Device(e.to_string()))? {
            Message::Text(text) => return Ok(serde_json::from_str(&text)?),
            Message::Close(_) => break,
            _ => continue,
        }
    }
    Err(EngineError::Device("connection closed during handshake".to_string()))
}

#[async_trait]
impl CaptureDevice for ObsClient {
    async fn current_dual_timestamps(&self) -> Result<DualTimestamp, EngineError> {
        let (recording, stream) = tokio::join!(
            self.output_timecode("GetRecordStatus"),
            self.output_timecode("GetStreamStatus")
        );
        match (recording, stream) {
            (Err(e), Err(_)) => Err(e),
            (recording, stream) => Ok(DualTimestamp::new(
                recording.ok().flatten(),
                stream.ok().flatten(),
            )),
        }
    }

    async fn current_thumbnail(&self, height: Option<u32>) -> Result<Vec<u8>, EngineError> {
        let scene = self.current_program_scene().await?;
        let mut data = json!({ "sourceName": scene, "imageFormat": "png" });
        if let Some(height) = height {
            data["imageHeight"] = json!(height);
        }
        let screenshot = self.request("GetSourceScreenshot", Some(data)).await?;
        screenshot["imageData"]
            .as_str()
            .and_then(protocol::decode_image_data)
            .ok_or(EngineError::CaptureUnavailable)
    }

    async fn output_dimensions(&self) -> Result<(u32, u32), EngineError> {
        let video = self.request("GetVideoSettings", None).await?;
        match (video["outputWidth"].as_u64(), video["outputHeight"].as_u64()) {
            (Some(w), Some(h)) => Ok((w as u32, h as u32)),
            _ => Err(EngineError::Device("video settings without output size".to_string())),
        }
    }

    async fn active_recording_file(&self) -> Result<Option<PathBuf>, EngineError> {
        if self.output_timecode("GetRecordStatus").await?.is_none() {
            return Ok(None);
        }
        let tracked = self.inner.recording_file.lock().unwrap().clone();
        if tracked.confirmed && tracked.path.is_some() {
            return Ok(tracked.path);
        }

        let Some(found) = self.recover_recording_file().await else {
            return Ok(tracked.path);
        };
        let mut tracked = self.inner.recording_file.lock().unwrap();
        // An event that arrived meanwhile is authoritative
        if !(tracked.confirmed && tracked.path.is_some()) {
            info!("Recording in progress to {}", found.display());
            *tracked = TrackedFile {
                path: Some(found),
                confirmed: true,
            };
        }
        Ok(tracked.path.clone())
    }

    async fn active_recording_folder(&self) -> Result<PathBuf, EngineError> {
        let directory = self.request("GetRecordDirectory", None).await?;
        directory["recordDirectory"]
            .as_str()
            .map(PathBuf::from)
            .ok_or_else(|| EngineError::Device("no record directory".to_string()))
    }

    async fn save_replay_buffer(&self) -> Result<PathBuf, EngineError> {
        self.request("SaveReplayBuffer", None).await?;
        let replay = self.request("GetLastReplayBufferReplay", None).await?;
        replay["savedReplayPath"]
            .as_str()
            .map(PathBuf::from)
            .ok_or_else(|| EngineError::Device("replay buffer saved no file".to_string()))
    }

    async fn play_media(&self, path: &Path) -> Result<(), EngineError> {
        let data = json!({
            "inputName": self.inner.media_input,
            "inputSettings": {
                "local_file": path.to_string_lossy(),
                "is_local_file": true,
            },
            "overlay": true,
        });
        self.request("SetInputSettings", Some(data)).await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.events.subscribe()
    }
}
