use depthwatch::capture::CaptureLoop;
use depthwatch::config::CaptureConfig;
use depthwatch::sim::{SimScene, SimulatedBackend};
use depthwatch::ControlState;
use depthwatch_visualizer::{BusRenderer, DEFAULT_BUS_CAPACITY, FrameBus, server};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

static CONTROL: ControlState = ControlState::new();

/// Serves the viewer over an endless simulated capture.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Bind address from env or default
    let bind: SocketAddr = std::env::var("DEPTHWATCH_BIND")
        .unwrap_or_else(|_| "127.0.0.1:3001".to_string())
        .parse()?;

    let bus = FrameBus::new(DEFAULT_BUS_CAPACITY);
    let mut renderer = BusRenderer::new(bus.clone());
    let capture = tokio::task::spawn_blocking(move || {
        let mut backend = SimulatedBackend::new(SimScene::default());
        CaptureLoop::new(CaptureConfig::default(), &CONTROL)?.run(&mut backend, &mut renderer)
    });

    tokio::select! {
        served = server::start_server(bind, bus, &CONTROL) => served?,
        finished = capture => {
            let summary = finished??;
            tracing::info!(frames = summary.frames_processed, "capture finished");
        }
    }
    Ok(())
}
