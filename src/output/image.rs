//! PNG export of the composited frame

use crate::render::PixelBuffer;
use crate::Result;
use anyhow::Context;
use image::{ImageFormat, RgbImage};
use std::path::Path;

/// Save `buffer` as a PNG at `path`
pub fn save_png(buffer: &PixelBuffer, path: &Path) -> Result<()> {
    let width = u32::try_from(buffer.width()).context("frame too wide for PNG")?;
    let height = u32::try_from(buffer.height()).context("frame too tall for PNG")?;

    let img = RgbImage::from_raw(width, height, buffer.as_bytes().to_vec())
        .context("pixel buffer does not match its dimensions")?;

    img.save_with_format(path, ImageFormat::Png)
        .with_context(|| format!("Failed to write image: {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::Region;
    use crate::render::Strip;
    use tempfile::TempDir;

    #[test]
    fn test_save_png_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("frame.png");

        let mut buffer = PixelBuffer::new(4, 2);
        let region = Region::new(0, 0, 0, 1);
        // Column-major: (0,0) then (0,1)
        let pixels = [255, 0, 0, 0, 0, 255];
        buffer.composite(&[Strip::new(region, &pixels).unwrap()]);

        save_png(&buffer, &path).unwrap();

        let loaded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(loaded.dimensions(), (4, 2));
        assert_eq!(loaded.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(loaded.get_pixel(0, 1).0, [0, 0, 255]);
        assert_eq!(loaded.get_pixel(3, 1).0, [0, 0, 0]);
    }

    #[test]
    fn test_unwritable_path() {
        let buffer = PixelBuffer::new(1, 1);
        assert!(save_png(&buffer, Path::new("/nonexistent/dir/frame.png")).is_err());
    }
}
