//! Region partitioner
//!
//! Converts a [`WorkloadShare`] into one vertical strip per node. Widths are
//! `floor(screen_width * share / 100)`; whatever the rounding leaves over is
//! absorbed by the last strip, which always ends on the final column. Every
//! column is therefore owned by exactly one node.

use super::WorkloadShare;
use crate::render::BYTES_PER_PIXEL;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rectangular block of screen pixels (bounds inclusive)
///
/// A zero-width region has `x_end == x_start - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Region {
    pub x_start: i32,
    pub x_end: i32,
    pub y_start: i32,
    pub y_end: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub fn new(x_start: i32, x_end: i32, y_start: i32, y_end: i32) -> Self {
        Self {
            x_start,
            x_end,
            y_start,
            y_end,
            width: x_end - x_start + 1,
            height: y_end - y_start + 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Whether the stored width/height agree with the bounds
    ///
    /// Bounds whose span does not fit in an `i32` are never consistent.
    pub fn is_consistent(&self) -> bool {
        fn span(start: i32, end: i32) -> Option<i32> {
            end.checked_sub(start)?.checked_add(1)
        }
        span(self.x_start, self.x_end) == Some(self.width) && span(self.y_start, self.y_end) == Some(self.height)
    }

    pub fn pixel_count(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.width as usize).saturating_mul(self.height as usize)
        }
    }

    /// Size of this region's RGB buffer
    pub fn pixel_bytes(&self) -> usize {
        self.pixel_count().saturating_mul(BYTES_PER_PIXEL)
    }
}

/// Why a set of regions does not tile the screen
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TilingError {
    #[error("no regions to tile")]
    Empty,

    #[error("region {index} has width/height fields that disagree with its bounds")]
    Inconsistent { index: usize },

    #[error("region {index} has negative width")]
    NegativeWidth { index: usize },

    #[error("region {index} starts at column {found}, expected {expected}")]
    Misaligned { index: usize, expected: i32, found: i32 },

    #[error("region {index} does not span rows 0..={last_row}")]
    Rows { index: usize, last_row: i32 },

    #[error("regions end at column {found}, screen ends at column {expected}")]
    Coverage { expected: i32, found: i32 },
}

/// Split the screen into one strip per share entry, in share order
pub fn partition(shares: &WorkloadShare, screen_width: i32, screen_height: i32) -> Vec<Region> {
    let count = shares.len();
    let mut regions = Vec::with_capacity(count);
    let mut x = 0;

    for (index, share) in shares.as_slice().iter().enumerate() {
        let x_end = if index + 1 == count {
            screen_width - 1
        } else {
            let width = (screen_width as i64 * *share as i64 / 100) as i32;
            x + width - 1
        };
        regions.push(Region::new(x, x_end, 0, screen_height - 1));
        x = x_end + 1;
    }

    regions
}

/// Check that `regions` cover `[0, screen_width - 1]` exactly once
///
/// Compositing relies on this to write strips concurrently without locks.
pub fn verify_tiling(regions: &[Region], screen_width: i32, screen_height: i32) -> Result<(), TilingError> {
    if regions.is_empty() {
        return Err(TilingError::Empty);
    }

    let mut expected_start = 0;
    for (index, region) in regions.iter().enumerate() {
        if !region.is_consistent() {
            return Err(TilingError::Inconsistent { index });
        }
        if region.width < 0 {
            return Err(TilingError::NegativeWidth { index });
        }
        if region.x_start != expected_start {
            return Err(TilingError::Misaligned {
                index,
                expected: expected_start,
                found: region.x_start,
            });
        }
        if region.y_start != 0 || region.y_end != screen_height - 1 {
            return Err(TilingError::Rows {
                index,
                last_row: screen_height - 1,
            });
        }
        expected_start = region.x_end + 1;
    }

    let last = expected_start - 1;
    if last != screen_width - 1 {
        return Err(TilingError::Coverage {
            expected: screen_width - 1,
            found: last,
        });
    }

    Ok(())
}
