//! Fragment evaluator
//!
//! Computes the colors of one rectangular region using a fixed number of
//! threads. The region is cut into vertical fragments of
//! `ceil(width / concurrency)` columns; the last fragment is clipped to the
//! region's right edge. Each fragment writes only into its own contiguous
//! slice of the output, so threads never share mutable pixel state.
//!
//! # Pixel order
//!
//! Output is column-major within the region: column `x` (relative to
//! `x_start`) occupies bytes `[x * height * 3, (x + 1) * height * 3)`, rows
//! top to bottom inside it. The compute RPC ships buffers in exactly this order.
//!
//! # Failure
//!
//! The first pixel the oracle fails on aborts the whole region: siblings stop
//! at their next column and the error is returned instead of partial data.

use super::{ColorOracle, RenderParams, BYTES_PER_PIXEL};
use crate::balance::Region;
use crate::error::{EvaluationError, OracleError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Pixels of one region plus the wall time of each fragment thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionPixels {
    pub pixels: Vec<u8>,
    pub thread_times: Vec<Duration>,
}

/// Multi-threaded evaluator for one node
#[derive(Clone)]
pub struct FragmentEvaluator {
    oracle: Arc<dyn ColorOracle>,
    concurrency: usize,
}

impl std::fmt::Debug for FragmentEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentEvaluator")
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl FragmentEvaluator {
    /// Create an evaluator running `concurrency` fragments in parallel (minimum 1)
    pub fn new(oracle: Arc<dyn ColorOracle>, concurrency: usize) -> Self {
        Self {
            oracle,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Evaluate `region` into a freshly allocated buffer
    pub fn evaluate(&self, region: &Region, params: &RenderParams) -> Result<RegionPixels, EvaluationError> {
        let mut pixels = vec![0u8; region.pixel_bytes()];
        let thread_times = self.evaluate_into(region, params, &mut pixels)?;
        Ok(RegionPixels { pixels, thread_times })
    }

    /// Evaluate `region` into `out`, which must hold exactly `region.pixel_bytes()`
    ///
    /// Blocks until every fragment has finished. Returns one duration per
    /// configured thread; threads left without columns report zero.
    pub fn evaluate_into(
        &self,
        region: &Region,
        params: &RenderParams,
        out: &mut [u8],
    ) -> Result<Vec<Duration>, EvaluationError> {
        let expected = region.pixel_bytes();
        if out.len() != expected {
            return Err(EvaluationError::BufferSize {
                expected,
                actual: out.len(),
            });
        }

        let mut thread_times = vec![Duration::ZERO; self.concurrency];
        if expected == 0 {
            return Ok(thread_times);
        }

        let width = region.width as usize;
        let height = region.height as usize;
        let fragment_width = (width + self.concurrency - 1) / self.concurrency;
        let fragment_bytes = fragment_width * height * BYTES_PER_PIXEL;
        let abort = AtomicBool::new(false);
        let oracle: &dyn ColorOracle = &*self.oracle;

        let outcomes = crossbeam::scope(|scope| {
            let handles: Vec<_> = out
                .chunks_mut(fragment_bytes)
                .enumerate()
                .map(|(index, slot)| {
                    let first_column = region.x_start + (index * fragment_width) as i32;
                    let abort = &abort;
                    scope.spawn(move |_| {
                        evaluate_fragment(oracle, params, first_column, region.y_start, height, slot, abort)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| handle.join())
                .collect::<Vec<_>>()
        })
        .map_err(|_| EvaluationError::Panicked)?;

        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(Ok(elapsed)) => thread_times[index] = elapsed,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(EvaluationError::Panicked),
            }
        }

        debug!(
            x_start = region.x_start,
            x_end = region.x_end,
            fragments = (width + fragment_width - 1) / fragment_width,
            "region evaluated"
        );

        Ok(thread_times)
    }
}

/// Compute one fragment: `slot.len() / (height * 3)` columns starting at `first_column`
fn evaluate_fragment(
    oracle: &dyn ColorOracle,
    params: &RenderParams,
    first_column: i32,
    y_start: i32,
    height: usize,
    slot: &mut [u8],
    abort: &AtomicBool,
) -> Result<Duration, OracleError> {
    let start = Instant::now();
    let column_bytes = height * BYTES_PER_PIXEL;

    for (column, column_slot) in slot.chunks_mut(column_bytes).enumerate() {
        if abort.load(Ordering::Relaxed) {
            break;
        }
        let x = first_column + column as i32;
        for (row, pixel) in column_slot.chunks_mut(BYTES_PER_PIXEL).enumerate() {
            let y = y_start + row as i32;
            match oracle.color_at(x, y, params) {
                Ok(color) => color.write_to(pixel),
                Err(e) => {
                    abort.store(true, Ordering::Relaxed);
                    return Err(e);
                }
            }
        }
    }

    Ok(start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{MandelbrotOracle, Rgb};

    /// Encodes the pixel coordinate into the color so placement can be checked
    struct CoordinateOracle;

    impl ColorOracle for CoordinateOracle {
        fn color_at(&self, x: i32, y: i32, _params: &RenderParams) -> Result<Rgb, OracleError> {
            Ok(Rgb::new(x as u8, y as u8, 7))
        }
    }

    /// Fails on one specific column
    struct FailingOracle {
        bad_column: i32,
    }

    impl ColorOracle for FailingOracle {
        fn color_at(&self, x: i32, y: i32, _params: &RenderParams) -> Result<Rgb, OracleError> {
            if x == self.bad_column {
                Err(OracleError {
                    x,
                    y,
                    reason: "diverged".to_string(),
                })
            } else {
                Ok(Rgb::new(1, 2, 3))
            }
        }
    }

    fn region(x_start: i32, x_end: i32, height: i32) -> Region {
        Region::new(x_start, x_end, 0, height - 1)
    }

    #[test]
    fn test_column_major_layout() {
        let evaluator = FragmentEvaluator::new(Arc::new(CoordinateOracle), 3);
        let region = region(10, 16, 4);
        let out = evaluator.evaluate(&region, &RenderParams::default()).unwrap();

        assert_eq!(out.pixels.len(), 7 * 4 * 3);
        for x in 0..7usize {
            for y in 0..4usize {
                let i = (x * 4 + y) * 3;
                assert_eq!(out.pixels[i], (10 + x) as u8);
                assert_eq!(out.pixels[i + 1], y as u8);
                assert_eq!(out.pixels[i + 2], 7);
            }
        }
    }

    #[test]
    fn test_thread_times_match_concurrency() {
        let evaluator = FragmentEvaluator::new(Arc::new(CoordinateOracle), 8);

        // 3 columns across 8 threads: only 3 fragments carry work
        let out = evaluator.evaluate(&region(0, 2, 5), &RenderParams::default()).unwrap();
        assert_eq!(out.thread_times.len(), 8);
        assert!(out.thread_times[3..].iter().all(|t| *t == Duration::ZERO));
    }

    #[test]
    fn test_empty_region() {
        let evaluator = FragmentEvaluator::new(Arc::new(CoordinateOracle), 4);
        let empty = Region::new(50, 49, 0, 9);
        let out = evaluator.evaluate(&empty, &RenderParams::default()).unwrap();
        assert!(out.pixels.is_empty());
        assert_eq!(out.thread_times, vec![Duration::ZERO; 4]);
    }

    #[test]
    fn test_fragments_stay_inside_region() {
        // 10 columns over 4 threads: fragments of 3, 3, 3, 1
        let evaluator = FragmentEvaluator::new(Arc::new(CoordinateOracle), 4);
        let out = evaluator.evaluate(&region(0, 9, 2), &RenderParams::default()).unwrap();
        assert_eq!(out.pixels.len(), 10 * 2 * 3);
        let last_column = &out.pixels[9 * 2 * 3..];
        assert_eq!(last_column[0], 9);
    }

    #[test]
    fn test_buffer_size_mismatch() {
        let evaluator = FragmentEvaluator::new(Arc::new(CoordinateOracle), 2);
        let mut out = vec![0u8; 5];
        let err = evaluator
            .evaluate_into(&region(0, 3, 3), &RenderParams::default(), &mut out)
            .unwrap_err();
        assert_eq!(err, EvaluationError::BufferSize { expected: 36, actual: 5 });
    }

    #[test]
    fn test_failing_pixel_aborts_region() {
        let evaluator = FragmentEvaluator::new(Arc::new(FailingOracle { bad_column: 5 }), 4);
        let err = evaluator
            .evaluate(&region(0, 11, 3), &RenderParams::default())
            .unwrap_err();
        match err {
            EvaluationError::Oracle(e) => assert_eq!(e.x, 5),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let evaluator = FragmentEvaluator::new(Arc::new(MandelbrotOracle), 4);
        let params = RenderParams::default();
        let region = Region::new(100, 163, 0, 47);

        let first = evaluator.evaluate(&region, &params).unwrap();
        let second = evaluator.evaluate(&region, &params).unwrap();
        assert_eq!(first.pixels, second.pixels);
    }

    #[test]
    fn test_concurrency_does_not_change_pixels() {
        let params = RenderParams::default();
        let region = Region::new(0, 39, 0, 29);
        let single = FragmentEvaluator::new(Arc::new(MandelbrotOracle), 1)
            .evaluate(&region, &params)
            .unwrap();
        let many = FragmentEvaluator::new(Arc::new(MandelbrotOracle), 7)
            .evaluate(&region, &params)
            .unwrap();
        assert_eq!(single.pixels, many.pixels);
    }
}
