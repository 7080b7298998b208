use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};

use crate::core::errors::{CameraError, CameraResult};

const GRID_COLOR: Rgb<u8> = Rgb([200, 200, 200]);
const GRID_STROKE: u32 = 2;
const CHANNEL_COLORS: [Rgb<u8>; 3] = [Rgb([255, 0, 0]), Rgb([0, 255, 0]), Rgb([0, 0, 255])];
const BUCKETS: usize = 256;

/// Decode a captured JPEG, draw the thirds grid and per-channel histogram
/// polylines over it, and re-encode. Pure transformation, no hardware.
pub fn annotate_jpeg(input: &[u8]) -> CameraResult<Vec<u8>> {
    let decoded = image::load_from_memory(input)
        .map_err(|err| CameraError::Decode(err.to_string()))?
        .to_rgb8();

    let annotated = render_overlay(&decoded);

    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(annotated)
        .write_to(&mut out, ImageFormat::Jpeg)
        .map_err(|err| {
            CameraError::Io(std::io::Error::other(format!("overlay encode failed: {err}")))
        })?;
    Ok(out.into_inner())
}

/// Same-size copy of `src` with a rule-of-thirds grid and red/green/blue
/// intensity histograms superimposed. All geometry is plotted pixel by
/// pixel with integer math, so identical input yields identical output.
pub fn render_overlay(src: &RgbImage) -> RgbImage {
    let (w, h) = src.dimensions();
    let mut img = src.clone();
    if w == 0 || h == 0 {
        return img;
    }

    let counts = channel_histograms(src);
    draw_thirds_grid(&mut img);

    let thickness = line_thickness(w, h);
    for (channel, color) in CHANNEL_COLORS.iter().enumerate() {
        let points = polyline_points(&counts, channel, w, h);
        for pair in points.windows(2) {
            draw_segment(&mut img, pair[0], pair[1], *color, thickness);
        }
    }
    img
}

/// 256-bucket intensity counts per channel, indexed [channel][bucket].
pub fn channel_histograms(src: &RgbImage) -> [[u32; BUCKETS]; 3] {
    let mut counts = [[0u32; BUCKETS]; 3];
    for pixel in src.pixels() {
        for channel in 0..3 {
            counts[channel][pixel.0[channel] as usize] += 1;
        }
    }
    counts
}

/// Connecting-line width: 1% of the larger dimension, never below 1.
pub fn line_thickness(w: u32, h: u32) -> u32 {
    (w.max(h) / 100).max(1)
}

/// Bucket-to-pixel mapping for one channel. Bucket 0 lands on column 0,
/// bucket 255 on the last column; the tallest bucket of any channel lands
/// on row 0 and an empty bucket on the bottom row.
pub fn polyline_points(
    counts: &[[u32; BUCKETS]; 3],
    channel: usize,
    w: u32,
    h: u32,
) -> Vec<(u32, u32)> {
    let peak = counts
        .iter()
        .flat_map(|c| c.iter())
        .copied()
        .max()
        .unwrap_or(0)
        .max(1) as u64;

    (0..BUCKETS)
        .map(|bucket| {
            let x = (bucket as u64 * (w as u64 - 1) / (BUCKETS as u64 - 1)) as u32;
            let scaled = counts[channel][bucket] as u64 * (h as u64 - 1) / peak;
            let y = (h - 1) - scaled as u32;
            (x, y)
        })
        .collect()
}

fn draw_thirds_grid(img: &mut RgbImage) {
    let (w, h) = img.dimensions();
    for x_anchor in [w / 3, 2 * w / 3] {
        for dx in 0..GRID_STROKE {
            let x = (x_anchor + dx).min(w - 1);
            for y in 0..h {
                img.put_pixel(x, y, GRID_COLOR);
            }
        }
    }
    for y_anchor in [h / 3, 2 * h / 3] {
        for dy in 0..GRID_STROKE {
            let y = (y_anchor + dy).min(h - 1);
            for x in 0..w {
                img.put_pixel(x, y, GRID_COLOR);
            }
        }
    }
}

/// Integer Bresenham segment with a square brush; no anti-aliasing.
fn draw_segment(img: &mut RgbImage, from: (u32, u32), to: (u32, u32), color: Rgb<u8>, thickness: u32) {
    let (mut x0, mut y0) = (from.0 as i64, from.1 as i64);
    let (x1, y1) = (to.0 as i64, to.1 as i64);

    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        stamp(img, x0, y0, color, thickness);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let doubled = 2 * err;
        if doubled >= dy {
            err += dy;
            x0 += sx;
        }
        if doubled <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn stamp(img: &mut RgbImage, cx: i64, cy: i64, color: Rgb<u8>, thickness: u32) {
    let (w, h) = img.dimensions();
    let half = thickness as i64 / 2;
    for y in (cy - half)..(cy - half + thickness as i64) {
        for x in (cx - half)..(cx - half + thickness as i64) {
            if x >= 0 && y >= 0 && (x as u32) < w && (y as u32) < h {
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use image::RgbImage;

    use super::{channel_histograms, line_thickness, polyline_points, render_overlay};

    use crate::core::errors::CameraError;

    fn solid(w: u32, h: u32, rgb: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(w, h, image::Rgb(rgb))
    }

    #[test]
    fn annotate_rejects_undecodable_input_as_decode_error() {
        let err = super::annotate_jpeg(b"not an image at all").expect_err("garbage must fail");
        assert!(matches!(err, CameraError::Decode(_)));
    }

    #[test]
    fn annotate_round_trips_a_valid_jpeg() {
        let img = solid(32, 24, [120, 80, 40]);
        let mut raw = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut raw, image::ImageFormat::Jpeg)
            .expect("in-memory encode");

        let annotated = super::annotate_jpeg(&raw.into_inner()).expect("annotate should succeed");
        let decoded = image::load_from_memory(&annotated).expect("output must decode");
        assert_eq!(decoded.width(), 32);
        assert_eq!(decoded.height(), 24);
    }

    #[test]
    fn solid_black_histogram_peaks_in_bucket_zero() {
        let img = solid(100, 100, [0, 0, 0]);
        let counts = channel_histograms(&img);

        for channel in 0..3 {
            assert_eq!(counts[channel][0], 100 * 100);
            assert!(counts[channel][1..].iter().all(|&c| c == 0));
        }
    }

    #[test]
    fn solid_black_polyline_hugs_the_bottom_row_except_bucket_zero() {
        let img = solid(100, 100, [0, 0, 0]);
        let counts = channel_histograms(&img);

        for channel in 0..3 {
            let points = polyline_points(&counts, channel, 100, 100);
            assert_eq!(points[0], (0, 0), "peak bucket must reach the top row");
            for (i, point) in points.iter().enumerate().skip(1) {
                assert_eq!(point.1, 99, "bucket {i} should sit on the bottom row");
            }
        }
    }

    #[test]
    fn overlay_is_deterministic() {
        let mut img = RgbImage::new(64, 48);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            pixel.0 = [(x * 3) as u8, (y * 5) as u8, ((x + y) * 7) as u8];
        }

        let first = render_overlay(&img);
        let second = render_overlay(&img);
        assert_eq!(first.as_raw(), second.as_raw());
    }

    #[test]
    fn overlay_preserves_dimensions() {
        let img = solid(33, 97, [10, 20, 30]);
        let out = render_overlay(&img);
        assert_eq!(out.dimensions(), (33, 97));
    }

    #[test]
    fn thickness_is_one_percent_of_larger_dimension_with_floor() {
        assert_eq!(line_thickness(100, 50), 1);
        assert_eq!(line_thickness(50, 100), 1);
        assert_eq!(line_thickness(1920, 1080), 19);
        assert_eq!(line_thickness(10, 10), 1);
    }

    #[test]
    fn histogram_scaling_uses_the_global_peak() {
        // Red is uniform 0, green is uniform 128: both peak at the same
        // count, so both channels' peak buckets reach the top row.
        let img = solid(10, 10, [0, 128, 128]);
        let counts = channel_histograms(&img);

        let red = polyline_points(&counts, 0, 10, 10);
        let green = polyline_points(&counts, 1, 10, 10);
        assert_eq!(red[0].1, 0);
        assert_eq!(green[128].1, 0);
    }
}
