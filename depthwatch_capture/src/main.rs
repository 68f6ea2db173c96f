// THEORY:
// `depthwatch_capture` is the command-line front end of the engine. It turns the
// command line into a `CaptureConfig`, installs logging and signal handling, picks
// the renderers, and runs one `CaptureLoop` to completion.
//
// Key architectural principles:
// 1.  **Flags Only in Handlers**: SIGINT and SIGUSR1 handlers write to a static
//     `ControlState` and nothing else. The loop thread does the device work.
// 2.  **Blocking Loop, Async Edge**: The capture loop is synchronous and runs on a
//     blocking task; the optional web server shares the tokio runtime with it.
// 3.  **One Exit Path**: Every `CaptureError` is logged and mapped to exit code -1.

mod cli;
mod renderers;

use clap::Parser;
use cli::{Cli, normalize_legacy_args};
use depthwatch::capture::NullRenderer;
use depthwatch::error::{CaptureError, Result};
use depthwatch::sim::SimulatedBackend;
use depthwatch::{CaptureLoop, ControlState};
use renderers::{RendererSet, SnapshotRenderer};
use std::ffi::OsString;
use std::fs::File;
use std::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

static CONTROL: ControlState = ControlState::new();

/// Opens the `LOGFILE` target. A failure is reported once logging is up.
fn open_logfile(path: Option<OsString>) -> std::result::Result<Option<File>, String> {
    let Some(path) = path else {
        return Ok(None);
    };
    File::create(&path)
        .map(Some)
        .map_err(|e| format!("cannot create LOGFILE {}: {e}", path.to_string_lossy()))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // LOGFILE duplicates everything into a file.
    let (logfile, logfile_error) = match open_logfile(std::env::var_os("LOGFILE")) {
        Ok(file) => (file, None),
        Err(message) => (None, Some(message)),
    };
    let file_layer = logfile.map(|file| fmt::layer().with_ansi(false).with_writer(Mutex::new(file)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_level(true).with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    if let Some(message) = logfile_error {
        warn!("{message}, logging to stderr only");
    }
}

fn install_signal_handlers() -> Result<()> {
    ctrlc::set_handler(|| CONTROL.request_shutdown())
        .map_err(|e| CaptureError::Io(std::io::Error::other(e.to_string())))?;

    #[cfg(unix)]
    {
        extern "C" fn on_sigusr1(_signal: libc::c_int) {
            CONTROL.request_pause_toggle();
        }
        // SAFETY: the handler only touches atomics.
        unsafe {
            libc::signal(libc::SIGUSR1, on_sigusr1 as extern "C" fn(libc::c_int) as libc::sighandler_t);
        }
    }
    Ok(())
}

async fn run() -> Result<()> {
    let args = normalize_legacy_args(std::env::args_os())?;
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => Ok(()),
                _ => Err(CaptureError::InvalidArgument(
                    e.kind().as_str().unwrap_or("unrecognized arguments").to_string(),
                )),
            };
        }
    };

    let mut config = cli.capture_config()?;
    install_signal_handlers()?;

    // --- Renderers ---
    let mut renderer = RendererSet::default();
    if let Some(dir) = &cli.snapshot_dir {
        renderer.push(Box::new(SnapshotRenderer::new(dir, cli.snapshot_every)?));
    }
    #[cfg(feature = "highgui")]
    if cli.highgui {
        renderer.push(Box::new(renderers::HighguiRenderer::new()?));
    }
    #[cfg(feature = "web")]
    if let Some(addr) = cli.serve {
        let bus = depthwatch_visualizer::FrameBus::new(depthwatch_visualizer::DEFAULT_BUS_CAPACITY);
        renderer.push(Box::new(depthwatch_visualizer::BusRenderer::new(bus.clone())));
        tokio::spawn(async move {
            if let Err(e) = depthwatch_visualizer::server::start_server(addr, bus, &CONTROL).await {
                error!(error = %e, "visualizer server stopped");
            }
        });
    }
    if renderer.is_empty() {
        if config.viewer_enabled {
            info!("no viewer selected, running headless");
        }
        config.viewer_enabled = false;
        renderer.push(Box::new(NullRenderer::default()));
    }

    // --- Capture ---
    let mut backend = SimulatedBackend::new(cli.sim_scene());
    info!(
        pipeline = ?config.pipeline,
        serial = ?config.serial,
        frames = ?config.frame_limit,
        "starting capture on simulated device"
    );
    let summary = tokio::task::spawn_blocking(move || {
        let capture = CaptureLoop::new(config, &CONTROL)?;
        capture.run(&mut backend, &mut renderer)
    })
    .await
    .map_err(|e| CaptureError::Io(std::io::Error::other(e.to_string())))??;

    info!(
        frames = summary.frames_processed,
        regions = summary.regions_emitted,
        phase = ?summary.phase,
        "done"
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    let code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "capture failed");
            e.exit_code()
        }
    };
    std::process::exit(code);
}
