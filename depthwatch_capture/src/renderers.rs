use depthwatch::capture::SceneRenderer;
use depthwatch::core_modules::frame::{DepthFrame, RawFrame};
use depthwatch::core_modules::utils::depth_image;
use depthwatch::error::Result;
use depthwatch::pipeline::FrameScene;
use std::path::PathBuf;
use tracing::{debug, info};

/// Feeds every frame to several renderers. Any one of them may request shutdown.
#[derive(Default)]
pub struct RendererSet {
    renderers: Vec<Box<dyn SceneRenderer + Send>>,
}

impl RendererSet {
    pub fn push(&mut self, renderer: Box<dyn SceneRenderer + Send>) {
        self.renderers.push(renderer);
    }

    pub fn is_empty(&self) -> bool {
        self.renderers.is_empty()
    }
}

impl SceneRenderer for RendererSet {
    fn submit_scene(&mut self, scene: &FrameScene) {
        for r in &mut self.renderers {
            r.submit_scene(scene);
        }
    }

    fn add_frame(&mut self, frame: RawFrame<'_>) {
        for r in &mut self.renderers {
            r.add_frame(frame);
        }
    }

    fn render(&mut self) -> Result<bool> {
        let mut quit = false;
        for r in &mut self.renderers {
            quit |= r.render()?;
        }
        Ok(quit)
    }
}

/// Writes a colorized depth PNG, with the region outlined, every `every` frames.
pub struct SnapshotRenderer {
    dir: PathBuf,
    every: u64,
    rendered: u64,
    scene: Option<FrameScene>,
    depth: Option<DepthFrame>,
}

impl SnapshotRenderer {
    pub fn new(dir: impl Into<PathBuf>, every: u64) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), every, "writing depth snapshots");
        Ok(Self {
            dir,
            every: every.max(1),
            rendered: 0,
            scene: None,
            depth: None,
        })
    }

    fn due(&self) -> bool {
        self.rendered % self.every == 0
    }
}

impl SceneRenderer for SnapshotRenderer {
    fn submit_scene(&mut self, scene: &FrameScene) {
        if self.due() {
            self.scene = Some(scene.clone());
        }
    }

    fn add_frame(&mut self, frame: RawFrame<'_>) {
        if let RawFrame::Depth(depth) = frame {
            if self.due() {
                self.depth = Some(depth.clone());
            }
        }
    }

    fn render(&mut self) -> Result<bool> {
        if let Some(depth) = self.depth.take() {
            let scene = self.scene.take();
            let image = depth_image::render_scene_preview(&depth, scene.as_ref());
            let path = self.dir.join(format!("depth_{:06}.png", self.rendered));
            depth_image::save_png(&path, &image)?;
            debug!(path = %path.display(), region = scene.is_some_and(|s| s.region.is_some()), "snapshot written");
        }
        self.rendered += 1;
        Ok(false)
    }
}

#[cfg(feature = "highgui")]
pub use window::HighguiRenderer;

#[cfg(feature = "highgui")]
mod window {
    use super::*;
    use opencv::{core, highgui, imgproc, prelude::*};

    const DEPTH_WINDOW: &str = "depth";
    const KEY_ESC: i32 = 27;

    fn cv_err(e: opencv::Error) -> depthwatch::error::CaptureError {
        std::io::Error::other(e.to_string()).into()
    }

    /// Shows the depth preview in an OpenCV window. ESC or `q` quits.
    #[derive(Default)]
    pub struct HighguiRenderer {
        scene: Option<FrameScene>,
        preview: Option<image::RgbImage>,
    }

    impl HighguiRenderer {
        pub fn new() -> Result<Self> {
            highgui::named_window(DEPTH_WINDOW, highgui::WINDOW_AUTOSIZE).map_err(cv_err)?;
            Ok(Self::default())
        }

        fn show(&self, preview: &image::RgbImage) -> opencv::Result<()> {
            let (w, h) = preview.dimensions();
            let mut rgb = Mat::new_rows_cols_with_default(h as i32, w as i32, core::CV_8UC3, core::Scalar::all(0.0))?;
            rgb.data_bytes_mut()?.copy_from_slice(preview.as_raw());
            let mut bgr = Mat::default();
            imgproc::cvt_color(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR, 0)?;
            highgui::imshow(DEPTH_WINDOW, &bgr)
        }
    }

    impl SceneRenderer for HighguiRenderer {
        fn submit_scene(&mut self, scene: &FrameScene) {
            self.scene = Some(scene.clone());
        }

        fn add_frame(&mut self, frame: RawFrame<'_>) {
            if let RawFrame::Depth(depth) = frame {
                self.preview = Some(depth_image::render_scene_preview(depth, self.scene.as_ref()));
            }
        }

        fn render(&mut self) -> Result<bool> {
            if let Some(preview) = self.preview.take() {
                self.show(&preview).map_err(cv_err)?;
            }
            let key = highgui::wait_key(1).map_err(cv_err)?;
            Ok(key == KEY_ESC || key == i32::from(b'q'))
        }
    }
}
