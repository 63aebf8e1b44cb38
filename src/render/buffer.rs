//! Composited frame buffer
//!
//! The coordinator owns one `PixelBuffer` for the whole session, sized to the
//! screen once and never resized. Strips returned by nodes are column-major
//! (see [`evaluator`](super::evaluator)); the buffer itself is row-major so a
//! display can upload it directly.
//!
//! Compositing runs in parallel over rows. Each row is touched by exactly one
//! task and strips cover disjoint columns, so no locking is involved.

use super::{Rgb, BYTES_PER_PIXEL};
use crate::balance::Region;
use rayon::prelude::*;

/// Hooks the external display loop needs from the render core
pub trait FrameSource {
    /// Read-only view of the last fully composited frame
    fn pixel_buffer(&self) -> &PixelBuffer;

    /// Whether parameters changed since the last frame
    fn is_dirty(&self) -> bool;

    /// Force the next frame to be computed
    fn mark_dirty(&mut self);
}

/// One node's finished region, ready to be copied into the frame
#[derive(Debug, Clone, Copy)]
pub struct Strip<'a> {
    region: Region,
    pixels: &'a [u8],
}

impl<'a> Strip<'a> {
    /// Pair a region with its column-major pixels; `None` if the sizes disagree
    pub fn new(region: Region, pixels: &'a [u8]) -> Option<Self> {
        (pixels.len() == region.pixel_bytes()).then_some(Self { region, pixels })
    }

    pub fn region(&self) -> &Region {
        &self.region
    }
}

/// Row-major RGB frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Allocate a black frame
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width * height * BYTES_PER_PIXEL],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Raw row-major RGB bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Color at `(x, y)`, or `None` outside the frame
    pub fn pixel(&self, x: usize, y: usize) -> Option<Rgb> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y * self.width + x) * BYTES_PER_PIXEL;
        Some(Rgb::new(self.data[i], self.data[i + 1], self.data[i + 2]))
    }

    /// Copy every strip into its column range
    ///
    /// Callers must have verified that the strips' regions do not overlap.
    /// Columns or rows falling outside the frame are ignored.
    pub fn composite(&mut self, strips: &[Strip<'_>]) {
        if strips.is_empty() || self.width == 0 {
            return;
        }
        let width = self.width;
        let row_bytes = width * BYTES_PER_PIXEL;

        self.data
            .par_chunks_mut(row_bytes)
            .enumerate()
            .for_each(|(y, row)| {
                let y = y as i32;
                for strip in strips {
                    copy_strip_row(strip, y, width, row);
                }
            });
    }
}

fn copy_strip_row(strip: &Strip<'_>, y: i32, width: usize, row: &mut [u8]) {
    let region = &strip.region;
    if y < region.y_start || y > region.y_end {
        return;
    }
    let height = region.height as usize;
    let row_in_strip = (y - region.y_start) as usize;

    let first = region.x_start.max(0);
    let last = region.x_end.min(width as i32 - 1);
    for x in first..=last {
        let column = (x - region.x_start) as usize;
        let src = (column * height + row_in_strip) * BYTES_PER_PIXEL;
        let dst = x as usize * BYTES_PER_PIXEL;
        row[dst..dst + BYTES_PER_PIXEL].copy_from_slice(&strip.pixels[src..src + BYTES_PER_PIXEL]);
    }
}
