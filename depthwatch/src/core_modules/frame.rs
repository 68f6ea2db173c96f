// THEORY:
// The `frame` module describes the raw data a depth sensor hands us for one capture
// instant. These are "dumb" containers: they know their dimensions and how to index
// themselves, nothing more. A `FrameSet` groups the color, IR and depth images that
// the listener delivers together, and is handed back to the listener once the
// capture loop is done with it.

use std::sync::Arc;
use std::time::Duration;

/// Depth frame dimensions produced by time-of-flight sensors of the Kinect v2 class.
pub const DEPTH_WIDTH: usize = 512;
pub const DEPTH_HEIGHT: usize = 424;
/// Color frame dimensions of the same sensor class.
pub const COLOR_WIDTH: usize = 1920;
pub const COLOR_HEIGHT: usize = 1080;

/// A 2D grid of depth samples in millimetres. Zero or NaN means no reading.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthFrame {
    pub width: usize,
    pub height: usize,
    /// Monotonic frame number assigned by the device.
    pub sequence: u64,
    /// Device timestamp of the exposure.
    pub timestamp: Duration,
    /// Row-major samples, `width * height` long.
    pub data: Vec<f32>,
}

impl DepthFrame {
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Self {
            width,
            height,
            sequence: 0,
            timestamp: Duration::ZERO,
            data,
        }
    }

    /// A frame where every sample holds the same depth.
    pub fn filled(width: usize, height: usize, depth_mm: f32) -> Self {
        Self::new(width, height, vec![depth_mm; width * height])
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    #[inline]
    pub fn at(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.width + col]
    }
}

/// A 4-byte-per-pixel (BGRX) color image.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorFrame {
    pub width: usize,
    pub height: usize,
    pub sequence: u64,
    /// Shared so that handing the frame to several renderers stays cheap.
    pub data: Arc<[u8]>,
}

/// An infrared amplitude image, one `f32` per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct IrFrame {
    pub width: usize,
    pub height: usize,
    pub sequence: u64,
    pub data: Vec<f32>,
}

bitflags::bitflags! {
    /// The set of frame kinds a listener is asked to deliver.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FrameTypes: u8 {
        const COLOR = 0b001;
        const IR = 0b010;
        const DEPTH = 0b100;
    }
}

impl FrameTypes {
    /// IR and depth always travel together on the sensor, so enabling depth
    /// requests both.
    pub fn for_streams(enable_rgb: bool, enable_depth: bool) -> Self {
        let mut types = FrameTypes::empty();
        types.set(FrameTypes::COLOR, enable_rgb);
        types.set(FrameTypes::IR | FrameTypes::DEPTH, enable_depth);
        types
    }
}

/// The frames delivered together by one `wait_for_new_frame` call.
#[derive(Debug, Clone, Default)]
pub struct FrameSet {
    pub color: Option<ColorFrame>,
    pub ir: Option<IrFrame>,
    pub depth: Option<DepthFrame>,
}

impl FrameSet {
    /// The kinds actually present in this set.
    pub fn types(&self) -> FrameTypes {
        let mut types = FrameTypes::empty();
        types.set(FrameTypes::COLOR, self.color.is_some());
        types.set(FrameTypes::IR, self.ir.is_some());
        types.set(FrameTypes::DEPTH, self.depth.is_some());
        types
    }
}

/// A borrowed view of one raw frame, as handed to renderers.
#[derive(Debug, Clone, Copy)]
pub enum RawFrame<'a> {
    Color(&'a ColorFrame),
    Ir(&'a IrFrame),
    Depth(&'a DepthFrame),
}

impl RawFrame<'_> {
    /// The window/channel name a viewer shows this kind under.
    pub fn label(&self) -> &'static str {
        match self {
            RawFrame::Color(_) => "RGB",
            RawFrame::Ir(_) => "ir",
            RawFrame::Depth(_) => "depth",
        }
    }
}
