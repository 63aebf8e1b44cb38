//! Color oracle
//!
//! The oracle maps one pixel to one color. It must be a pure function of
//! `(x, y, params)`: the evaluator calls it concurrently from several threads
//! and relies on identical inputs producing identical bytes.

use super::{RenderParams, Rgb};
use crate::error::OracleError;

/// Pure per-pixel color function
pub trait ColorOracle: Send + Sync {
    /// Color of screen pixel `(x, y)` under `params`
    fn color_at(&self, x: i32, y: i32, params: &RenderParams) -> Result<Rgb, OracleError>;
}

/// Escape-time Mandelbrot coloring on a hue bar
///
/// The pixel maps to `c = x / magnification - pan_x + i (y / magnification - pan_y)`.
/// Points escaping at iteration `n` get hue `n * 360 / max_iterations`; points
/// that never escape are black.
#[derive(Debug, Clone, Copy, Default)]
pub struct MandelbrotOracle;

const SATURATION: f64 = 0.98;
const VALUE: f64 = 0.922;
const BAILOUT: f64 = 4.0;

impl ColorOracle for MandelbrotOracle {
    fn color_at(&self, x: i32, y: i32, params: &RenderParams) -> Result<Rgb, OracleError> {
        let cx = x as f64 / params.magnification - params.pan_x;
        let cy = y as f64 / params.magnification - params.pan_y;

        let (mut re, mut im) = (cx, cy);
        let mut iteration = 0.0;
        while iteration < params.max_iterations {
            let next_re = re * re - im * im + cx;
            im = 2.0 * re * im + cy;
            re = next_re;

            if re * re + im * im > BAILOUT {
                let hue = iteration * 360.0 / params.max_iterations;
                return Ok(hsv_to_rgb(hue, SATURATION, VALUE));
            }
            iteration += 1.0;
        }

        Ok(Rgb::BLACK)
    }
}

/// Convert HSV (hue in degrees, saturation and value in [0, 1]) to RGB
pub fn hsv_to_rgb(hue: f64, saturation: f64, value: f64) -> Rgb {
    let hue = hue.rem_euclid(360.0);
    let chroma = value * saturation;
    let sector = hue / 60.0;
    let x = chroma * (1.0 - ((sector % 2.0) - 1.0).abs());
    let m = value - chroma;

    let (r, g, b) = match sector as u32 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };

    Rgb::new(
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    )
}
