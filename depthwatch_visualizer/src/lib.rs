// THEORY:
// The visualizer is the remote viewer of a running capture. The capture loop
// hands it scenes through the `SceneRenderer` seam; it turns them into JPEG
// previews plus a small JSON summary and fans both out over a broadcast bus. Any
// number of web clients can subscribe to that bus without slowing the loop.
//
// Key architectural principles:
// 1.  **Lossy Fan-Out**: The bus is a bounded `tokio::sync::broadcast` channel. A
//     slow subscriber lags and skips packets; the publisher never blocks.
// 2.  **Render on the Loop Thread**: Encoding happens inside `BusRenderer`, on the
//     capture thread, so the server only forwards finished bytes.
// 3.  **Controls as Flags**: The HTTP control endpoints only write to the shared
//     `ControlState`. The capture loop picks the change up on its next iteration.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use depthwatch::capture::SceneRenderer;
use depthwatch::core_modules::frame::RawFrame;
use depthwatch::core_modules::utils::depth_image;
use depthwatch::core_modules::virtual_cube::CubeWorld;
use depthwatch::error::Result;
use depthwatch::pipeline::FrameScene;
use tokio::sync::broadcast;
use tracing::warn;

pub const DEFAULT_BUS_CAPACITY: usize = 4;
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Cube step used when consecutive scenes carry no usable timestamps, in seconds.
const CUBE_STEP_SECONDS: f32 = 1.0 / 30.0;

#[derive(Debug, Clone)]
pub struct FramePacket {
    pub ts_millis: u64,
    pub width: u32,
    pub height: u32,
    /// JPEG bytes.
    pub data: Arc<[u8]>,
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "web", derive(serde::Serialize, serde::Deserialize))]
pub struct MetaRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub cells: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "web", derive(serde::Serialize, serde::Deserialize))]
pub struct Meta {
    pub frame_index: u64,
    pub phase: String,
    pub foreground_cells: usize,
    pub region: Option<MetaRegion>,
    pub cubes: Vec<[f32; 3]>,
}

#[derive(Clone)]
pub struct FrameBus {
    pub frames_tx: broadcast::Sender<FramePacket>,
    pub meta_tx: broadcast::Sender<Meta>,
}

impl FrameBus {
    pub fn new(capacity: usize) -> Self {
        let (frames_tx, _) = broadcast::channel::<FramePacket>(capacity.max(1));
        let (meta_tx, _) = broadcast::channel::<Meta>(capacity.max(1));
        Self { frames_tx, meta_tx }
    }

    pub fn subscribe(&self) -> (broadcast::Receiver<FramePacket>, broadcast::Receiver<Meta>) {
        (self.frames_tx.subscribe(), self.meta_tx.subscribe())
    }
}

/// Publishes each rendered frame onto a `FrameBus`.
pub struct BusRenderer {
    bus: FrameBus,
    quality: u8,
    scene: Option<FrameScene>,
    packet: Option<FramePacket>,
    cubes: CubeWorld,
    last_timestamp: Option<Duration>,
}

impl BusRenderer {
    pub fn new(bus: FrameBus) -> Self {
        Self::with_quality(bus, DEFAULT_JPEG_QUALITY)
    }

    pub fn with_quality(bus: FrameBus, quality: u8) -> Self {
        Self {
            bus,
            quality: quality.clamp(1, 100),
            scene: None,
            packet: None,
            cubes: CubeWorld::new(0),
            last_timestamp: None,
        }
    }

    /// Seconds between this scene and the previous one, from the device clock.
    fn step_seconds(&mut self, timestamp: Duration) -> f32 {
        let previous = self.last_timestamp.replace(timestamp);
        match previous.and_then(|p| timestamp.checked_sub(p)) {
            Some(dt) if !dt.is_zero() => dt.as_secs_f32(),
            _ => CUBE_STEP_SECONDS,
        }
    }

    fn meta(&self, scene: &FrameScene, frame_size: Option<(usize, usize)>) -> Meta {
        let region = scene.region.as_ref().map(|region| {
            let (w, h) = frame_size.unwrap_or((scene.grid_width * scene.stride, scene.grid_height * scene.stride));
            let px = depth_image::grid_rect_to_pixels(&region.rect, scene.stride, w, h);
            MetaRegion {
                x: px.x,
                y: px.y,
                width: px.width,
                height: px.height,
                cells: region.foreground_cells,
            }
        });
        Meta {
            frame_index: scene.frame_index,
            phase: format!("{:?}", scene.phase),
            foreground_cells: scene.foreground_cells,
            region,
            cubes: self.cubes.cubes.iter().map(|c| c.position.to_array()).collect(),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl SceneRenderer for BusRenderer {
    fn submit_scene(&mut self, scene: &FrameScene) {
        self.scene = Some(scene.clone());
    }

    fn add_frame(&mut self, frame: RawFrame<'_>) {
        let RawFrame::Depth(depth) = frame else {
            return;
        };
        let preview = depth_image::render_scene_preview(depth, self.scene.as_ref());
        match depth_image::encode_jpeg(&preview, self.quality) {
            Ok(bytes) => {
                self.packet = Some(FramePacket {
                    ts_millis: now_millis(),
                    width: preview.width(),
                    height: preview.height(),
                    data: bytes.into(),
                })
            }
            Err(e) => warn!(error = %e, "preview encoding failed"),
        }
    }

    fn render(&mut self) -> Result<bool> {
        let packet = self.packet.take();
        if let Some(scene) = self.scene.take() {
            let dt = self.step_seconds(scene.timestamp);
            self.cubes.step(dt, &scene.layers());
            let size = packet.as_ref().map(|p| (p.width as usize, p.height as usize));
            // A send only fails when nobody is subscribed.
            let _ = self.bus.meta_tx.send(self.meta(&scene, size));
        }
        if let Some(packet) = packet {
            let _ = self.bus.frames_tx.send(packet);
        }
        Ok(false)
    }
}

#[cfg(feature = "web")]
pub mod server {
    use super::{FrameBus, Meta};
    use axum::extract::State;
    use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
    use axum::http::{StatusCode, header};
    use axum::response::{Html, IntoResponse};
    use axum::routing::{get, post};
    use axum::Router;
    use depthwatch::ControlState;
    use futures_util::{SinkExt, StreamExt};
    use std::net::SocketAddr;
    use tokio::sync::broadcast::error::RecvError;
    use tracing::{debug, info};

    const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Depthwatch</title></head>
<body style="font-family:sans-serif; background:#111; color:#ddd">
<h2>Depthwatch</h2>
<div style="margin: 8px 0; display:flex; gap:12px; align-items:center;">
  <button id="btn-play" style="padding:6px 12px;">Play</button>
  <button id="btn-pause" style="padding:6px 12px;">Pause</button>
  <button id="btn-stop" style="padding:6px 12px;">Stop</button>
  <span id="status" style="font-family:monospace; font-size:12px; color:#777">idle</span>
</div>
<img id="preview" width="512" height="424" style="border:1px solid #444">
<pre id="meta" style="font-size:12px"></pre>
<script src="/client.js"></script>
</body>
</html>"#;

    const CLIENT_JS: &str = r#"(function(){
    const status = (t)=>{ const el=document.getElementById('status'); if(el) el.textContent=t; };
    const post = (path, label)=> fetch(path, { method:'POST' }).then(()=>status(label));
    document.getElementById('btn-play').onclick = ()=> post('/control/play', 'playing');
    document.getElementById('btn-pause').onclick = ()=> post('/control/pause', 'paused');
    document.getElementById('btn-stop').onclick = ()=> post('/control/stop', 'stopped');
    const img = document.getElementById('preview');
    const meta = document.getElementById('meta');
    const ws = new WebSocket((location.protocol==='https:'?'wss://':'ws://')+location.host+'/ws');
    ws.binaryType = 'arraybuffer';
    ws.onopen = ()=> status('connected');
    ws.onclose = ()=> status('disconnected');
    ws.onmessage = (ev)=>{
        if(ev.data instanceof ArrayBuffer){
            const url = URL.createObjectURL(new Blob([ev.data], {type:'image/jpeg'}));
            img.onload = ()=> URL.revokeObjectURL(url);
            img.src = url;
        } else {
            meta.textContent = JSON.stringify(JSON.parse(ev.data), null, 2);
        }
    };
})();"#;

    #[derive(Clone)]
    struct AppState {
        bus: FrameBus,
        control: &'static ControlState,
    }

    pub fn router(bus: FrameBus, control: &'static ControlState) -> Router {
        Router::new()
            .route("/", get(|| async { Html(INDEX_HTML) }))
            .route("/healthz", get(|| async { "ok" }))
            .route(
                "/client.js",
                get(|| async { ([(header::CONTENT_TYPE, "application/javascript")], CLIENT_JS) }),
            )
            .route("/ws", get(ws_handler))
            .route("/control/play", post(play))
            .route("/control/pause", post(pause))
            .route("/control/stop", post(stop))
            .with_state(AppState { bus, control })
    }

    /// Serves the viewer until the listener fails.
    pub async fn start_server(addr: SocketAddr, bus: FrameBus, control: &'static ControlState) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "visualizer listening");
        axum::serve(listener, router(bus, control)).await?;
        Ok(())
    }

    async fn play(State(state): State<AppState>) -> StatusCode {
        state.control.request_resume();
        StatusCode::NO_CONTENT
    }

    async fn pause(State(state): State<AppState>) -> StatusCode {
        state.control.request_pause();
        StatusCode::NO_CONTENT
    }

    async fn stop(State(state): State<AppState>) -> StatusCode {
        state.control.request_shutdown();
        StatusCode::NO_CONTENT
    }

    async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
        ws.on_upgrade(move |socket| ws_conn(socket, state.bus))
    }

    async fn ws_conn(socket: WebSocket, bus: FrameBus) {
        let (mut frames_rx, mut meta_rx) = bus.subscribe();
        let (mut ws_tx, mut ws_rx) = socket.split();
        debug!("viewer connected");

        loop {
            let outgoing = tokio::select! {
                frame = frames_rx.recv() => match frame {
                    Ok(pkt) => Message::Binary(pkt.data.to_vec()),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
                meta = meta_rx.recv() => match meta {
                    Ok(meta) => match meta_json(&meta) {
                        Some(text) => Message::Text(text),
                        None => continue,
                    },
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
                incoming = ws_rx.next() => match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                },
            };
            if ws_tx.send(outgoing).await.is_err() {
                break;
            }
        }
        debug!("viewer disconnected");
    }

    fn meta_json(meta: &Meta) -> Option<String> {
        serde_json::to_string(meta).ok()
    }

}
