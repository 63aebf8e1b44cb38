//! Per-pixel rendering
//!
//! Everything a single node needs to turn a [`Region`](crate::balance::Region)
//! into RGB bytes:
//!
//! - `oracle`: the per-pixel color function (opaque to the rest of the crate)
//! - `evaluator`: splits a region into column fragments computed in parallel
//! - `buffer`: the coordinator's composited frame and the display hooks
//! - `scene`: headless navigation producing successive `RenderParams`

pub mod buffer;
pub mod evaluator;
pub mod oracle;
pub mod scene;

pub use buffer::{FrameSource, PixelBuffer, Strip};
pub use evaluator::{FragmentEvaluator, RegionPixels};
pub use oracle::{ColorOracle, MandelbrotOracle};
pub use scene::{PanDirection, Scene, SceneCommand};

use serde::{Deserialize, Serialize};

/// Bytes per pixel in every buffer and on the wire
pub const BYTES_PER_PIXEL: usize = 3;

/// Parameters shared by every node computing one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderParams {
    /// Pixels per unit of the complex plane
    #[serde(default = "default_magnification")]
    pub magnification: f64,
    /// Escape-time iteration cap
    #[serde(default = "default_max_iterations")]
    pub max_iterations: f64,
    /// Horizontal offset subtracted from the scaled pixel coordinate
    #[serde(default = "default_pan_x")]
    pub pan_x: f64,
    /// Vertical offset subtracted from the scaled pixel coordinate
    #[serde(default = "default_pan_y")]
    pub pan_y: f64,
}

fn default_magnification() -> f64 {
    400.0
}

fn default_max_iterations() -> f64 {
    80.0
}

fn default_pan_x() -> f64 {
    1.624203
}

fn default_pan_y() -> f64 {
    0.620820
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            magnification: default_magnification(),
            max_iterations: default_max_iterations(),
            pan_x: default_pan_x(),
            pan_y: default_pan_y(),
        }
    }
}

/// An 8-bit RGB triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    #[inline]
    pub fn write_to(self, slot: &mut [u8]) {
        slot[0] = self.r;
        slot[1] = self.g;
        slot[2] = self.b;
    }
}
