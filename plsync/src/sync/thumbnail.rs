use std::io::Cursor;

use image::{DynamicImage, GenericImageView, ImageFormat, Rgba, RgbaImage, imageops};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtworkError {
    #[error("cannot decode thumbnail: {0}")]
    Decode(#[source] image::ImageError),
    #[error("cannot encode artwork: {0}")]
    Encode(#[source] image::ImageError),
}

/// Pads a thumbnail with black bars to a square whose side is the larger
/// of its two dimensions, keeping the source centered. Output is PNG.
pub fn square_thumbnail(bytes: &[u8]) -> Result<Vec<u8>, ArtworkError> {
    let source = image::load_from_memory(bytes).map_err(ArtworkError::Decode)?;
    let (width, height) = source.dimensions();
    let side = width.max(height);

    let squared = if width == height {
        source
    } else {
        let mut canvas = RgbaImage::from_pixel(side, side, Rgba([0, 0, 0, 255]));
        let x = i64::from((side - width) / 2);
        let y = i64::from((side - height) / 2);
        imageops::overlay(&mut canvas, &source.to_rgba8(), x, y);
        if source.color().has_alpha() {
            DynamicImage::ImageRgba8(canvas)
        } else {
            DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8())
        }
    };

    let mut out = Cursor::new(Vec::new());
    squared
        .write_to(&mut out, ImageFormat::Png)
        .map_err(ArtworkError::Encode)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    fn white(width: u32, height: u32) -> Vec<u8> {
        encode(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([255, 255, 255]))),
            ImageFormat::Png,
        )
    }

    #[test]
    fn landscape_gets_bars_above_and_below() {
        let squared = image::load_from_memory(&square_thumbnail(&white(4, 2)).unwrap())
            .unwrap()
            .to_rgb8();
        assert_eq!(squared.dimensions(), (4, 4));
        for x in 0..4 {
            assert_eq!(squared.get_pixel(x, 0), &Rgb([0, 0, 0]));
            assert_eq!(squared.get_pixel(x, 1), &Rgb([255, 255, 255]));
            assert_eq!(squared.get_pixel(x, 2), &Rgb([255, 255, 255]));
            assert_eq!(squared.get_pixel(x, 3), &Rgb([0, 0, 0]));
        }
    }

    #[test]
    fn portrait_gets_bars_left_and_right() {
        let squared = image::load_from_memory(&square_thumbnail(&white(2, 6)).unwrap())
            .unwrap()
            .to_rgb8();
        assert_eq!(squared.dimensions(), (6, 6));
        for y in 0..6 {
            assert_eq!(squared.get_pixel(1, y), &Rgb([0, 0, 0]));
            assert_eq!(squared.get_pixel(2, y), &Rgb([255, 255, 255]));
            assert_eq!(squared.get_pixel(3, y), &Rgb([255, 255, 255]));
            assert_eq!(squared.get_pixel(4, y), &Rgb([0, 0, 0]));
        }
    }

    #[test]
    fn square_input_keeps_its_pixels() {
        let squared = image::load_from_memory(&square_thumbnail(&white(3, 3)).unwrap()).unwrap();
        assert_eq!(squared.dimensions(), (3, 3));
        assert!(squared.to_rgb8().pixels().all(|p| *p == Rgb([255, 255, 255])));
    }

    #[test]
    fn jpeg_input_is_reencoded_as_png() {
        let jpeg = encode(DynamicImage::ImageRgb8(RgbImage::new(8, 4)), ImageFormat::Jpeg);
        let png = square_thumbnail(&jpeg).unwrap();
        assert_eq!(image::guess_format(&png).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            square_thumbnail(b"<html>not an image</html>"),
            Err(ArtworkError::Decode(_))
        ));
    }
}
