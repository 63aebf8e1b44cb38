//! Scene navigation
//!
//! Tracks zoom level and translates pan/zoom commands into new
//! [`RenderParams`]. The pan step shrinks as the zoom level grows so motion
//! stays proportionate on screen.
//!
//! [`Scene::apply`] is the entry point for a display loop: it runs one
//! command and marks the [`FrameSource`] dirty when the parameters moved.

use super::{FrameSource, RenderParams};

/// Pan step per integral zoom level
const MOVEMENT_OFFSETS: [f64; 16] = [
    0.018666,
    0.017666,
    0.016666,
    0.015000,
    0.002950,
    0.000400,
    0.000025,
    0.0000025,
    0.00000025,
    0.000000025,
    0.0000000025,
    0.0000000025,
    0.00000000025,
    0.000000000025,
    0.0000000000025,
    0.00000000000025,
];

const INITIAL_ZOOM_LEVEL: f64 = 0.1;
const ZOOM_STEP: f64 = 0.01;
const BASE_MAGNIFICATION: f64 = 400.0;
const BASE_ITERATIONS: f64 = 80.0;

/// Pan direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanDirection {
    Left,
    Right,
    Up,
    Down,
}

/// One navigation input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneCommand {
    Pan(PanDirection),
    ZoomIn,
    ZoomOut,
}

/// Camera state over the complex plane
#[derive(Debug, Clone)]
pub struct Scene {
    params: RenderParams,
    zoom_level: f64,
}

impl Scene {
    pub fn new(params: RenderParams) -> Self {
        Self {
            params,
            zoom_level: INITIAL_ZOOM_LEVEL,
        }
    }

    pub fn params(&self) -> RenderParams {
        self.params
    }

    pub fn zoom_level(&self) -> f64 {
        self.zoom_level
    }

    fn movement_offset(&self) -> f64 {
        let index = (self.zoom_level.max(0.0) as usize).min(MOVEMENT_OFFSETS.len() - 1);
        MOVEMENT_OFFSETS[index]
    }

    pub fn pan(&mut self, direction: PanDirection) -> RenderParams {
        let offset = self.movement_offset();
        match direction {
            PanDirection::Left => self.params.pan_x -= offset,
            PanDirection::Right => self.params.pan_x += offset,
            PanDirection::Up => self.params.pan_y -= offset,
            PanDirection::Down => self.params.pan_y += offset,
        }
        self.params
    }

    pub fn zoom_in(&mut self) -> RenderParams {
        self.zoom_level += ZOOM_STEP;
        self.apply_zoom()
    }

    /// Zoom out; the level never drops below zero
    pub fn zoom_out(&mut self) -> RenderParams {
        self.zoom_level = (self.zoom_level - ZOOM_STEP).max(0.0);
        self.apply_zoom()
    }

    /// Run `command` and mark `frames` dirty if the parameters changed
    ///
    /// # Arguments
    ///
    /// * `command` - Pan or zoom step to take
    /// * `frames` - Render core that owns the next frame
    ///
    /// # Returns
    ///
    /// The parameters after the step. A step that changes nothing (zooming
    /// out at level zero) leaves `frames` untouched.
    pub fn apply<F: FrameSource + ?Sized>(&mut self, command: SceneCommand, frames: &mut F) -> RenderParams {
        let before = self.params;
        let after = match command {
            SceneCommand::Pan(direction) => self.pan(direction),
            SceneCommand::ZoomIn => self.zoom_in(),
            SceneCommand::ZoomOut => self.zoom_out(),
        };
        if after != before {
            frames.mark_dirty();
        }
        after
    }

    fn apply_zoom(&mut self) -> RenderParams {
        self.params.magnification = BASE_MAGNIFICATION + (self.zoom_level * 3.0).exp2();
        self.params.max_iterations = BASE_ITERATIONS + 50.0 * self.zoom_level;
        self.params
    }
}
