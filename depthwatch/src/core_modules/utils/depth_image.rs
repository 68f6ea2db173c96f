use crate::core_modules::frame::DepthFrame;
use crate::core_modules::segmenter::GridRect;
use crate::error::Result;
use crate::pipeline::FrameScene;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ImageEncoder, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::path::Path;

/// Outline color of the foreground region.
pub const REGION_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// A pixel rectangle, `x`/`y` inclusive top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[inline]
fn spectrum_curve(input: f32) -> f32 {
    (2.0 - input.abs()).clamp(0.0, 1.0) * 255.0
}

/// Maps a distance in metres onto a hue cycle that repeats every metre.
/// Unknown or negative distances are black.
pub fn spectrum_rgb(distance_m: f32) -> [u8; 3] {
    if !distance_m.is_finite() || distance_m <= 0.0 {
        return [0, 0, 0];
    }
    let decimal = distance_m.fract();
    let spectrum = 6.0 * (3.0 * decimal.powi(2) - 2.0 * decimal.powi(3));

    let red = spectrum_curve(((spectrum + 2.0) % 6.0) - 2.0);
    let green = spectrum_curve(spectrum - 2.0);
    let blue = spectrum_curve(((spectrum + 4.0) % 6.0) - 2.0);
    [red as u8, green as u8, blue as u8]
}

/// Colorizes a millimetre depth frame.
pub fn colorize_depth(depth: &DepthFrame) -> RgbImage {
    RgbImage::from_fn(depth.width as u32, depth.height as u32, |x, y| {
        let mm = depth.at(y as usize, x as usize);
        Rgb(spectrum_rgb(mm / 1000.0))
    })
}

/// The pixels covered by the grid cells of `rect`, clipped to the frame.
pub fn grid_rect_to_pixels(rect: &GridRect, stride: usize, frame_width: usize, frame_height: usize) -> PixelRect {
    let x0 = (rect.min_col * stride).min(frame_width.saturating_sub(1));
    let y0 = (rect.min_row * stride).min(frame_height.saturating_sub(1));
    let x1 = (rect.max_col * stride + stride - 1).min(frame_width.saturating_sub(1));
    let y1 = (rect.max_row * stride + stride - 1).min(frame_height.saturating_sub(1));
    PixelRect {
        x: x0 as u32,
        y: y0 as u32,
        width: (x1 - x0 + 1) as u32,
        height: (y1 - y0 + 1) as u32,
    }
}

/// Draws a one-pixel outline. Parts outside the image are clipped.
pub fn draw_rect_outline(image: &mut RgbImage, rect: PixelRect, color: Rgb<u8>) {
    if rect.width == 0 || rect.height == 0 {
        return;
    }
    let outline = Rect::at(rect.x as i32, rect.y as i32).of_size(rect.width, rect.height);
    draw_hollow_rect_mut(image, outline, color);
}

/// The depth frame colorized, with the scene's region outlined if there is one.
pub fn render_scene_preview(depth: &DepthFrame, scene: Option<&FrameScene>) -> RgbImage {
    let mut image = colorize_depth(depth);
    if let Some((region, stride)) = scene.and_then(|s| s.region.as_ref().map(|r| (r, s.stride))) {
        let rect = grid_rect_to_pixels(&region.rect, stride, depth.width, depth.height);
        draw_rect_outline(&mut image, rect, REGION_COLOR);
    }
    image
}

pub fn save_png(path: impl AsRef<Path>, image: &RgbImage) -> Result<()> {
    let output = std::io::BufWriter::new(std::fs::File::create(path)?);
    let encoder = PngEncoder::new(output);
    encoder.write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(())
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder.encode_image(image)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_depth_is_black() {
        assert_eq!(spectrum_rgb(f32::NAN), [0, 0, 0]);
        assert_eq!(spectrum_rgb(0.0), [0, 0, 0]);
        assert_eq!(spectrum_rgb(-1.0), [0, 0, 0]);
        assert_ne!(spectrum_rgb(1.5), [0, 0, 0]);
    }

    #[test]
    fn rect_maps_to_stride_blocks() {
        let rect = GridRect {
            min_row: 1,
            min_col: 2,
            max_row: 3,
            max_col: 4,
        };
        let px = grid_rect_to_pixels(&rect, 8, 512, 424);
        assert_eq!(
            px,
            PixelRect {
                x: 16,
                y: 8,
                width: 24,
                height: 24
            }
        );
    }

    #[test]
    fn rect_is_clipped_to_frame() {
        let rect = GridRect {
            min_row: 52,
            min_col: 63,
            max_row: 52,
            max_col: 63,
        };
        let px = grid_rect_to_pixels(&rect, 8, 510, 420);
        assert_eq!((px.x, px.y, px.width, px.height), (504, 416, 6, 4));
    }

    #[test]
    fn outline_touches_only_the_border() {
        let mut image = RgbImage::new(10, 10);
        draw_rect_outline(
            &mut image,
            PixelRect {
                x: 2,
                y: 2,
                width: 5,
                height: 4,
            },
            REGION_COLOR,
        );
        assert_eq!(*image.get_pixel(2, 2), REGION_COLOR);
        assert_eq!(*image.get_pixel(6, 5), REGION_COLOR);
        assert_eq!(*image.get_pixel(4, 3), Rgb([0, 0, 0]));
    }

    #[test]
    fn outline_past_the_edge_is_clipped() {
        let mut image = RgbImage::new(10, 10);
        draw_rect_outline(
            &mut image,
            PixelRect {
                x: 6,
                y: 6,
                width: 8,
                height: 8,
            },
            REGION_COLOR,
        );
        assert_eq!(*image.get_pixel(6, 9), REGION_COLOR);
        assert_eq!(*image.get_pixel(9, 6), REGION_COLOR);
        assert_eq!(*image.get_pixel(9, 9), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(2, 2), Rgb([0, 0, 0]));
    }

    #[test]
    fn save_colorized_depth() {
        let mut data = vec![1500.0; 64 * 48];
        data[0] = 0.0;
        let image = colorize_depth(&DepthFrame::new(64, 48, data));
        assert_eq!(*image.get_pixel(0, 0), Rgb([0, 0, 0]));

        let file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        save_png(file.path(), &image).expect("Error Saving File.");
        let reloaded = image::open(file.path()).expect("readable png").to_rgb8();
        assert_eq!(reloaded.dimensions(), (64, 48));
        assert_eq!(reloaded.get_pixel(5, 5), image.get_pixel(5, 5));
    }

    #[test]
    fn jpeg_has_magic_bytes() {
        let bytes = encode_jpeg(&RgbImage::new(16, 16), 80).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
