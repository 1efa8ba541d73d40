//! Annotated frame export.
//!
//! Encodes a frame as JPEG with the current detection boxes outlined in native
//! pixel space. Failures come back as `PipelineError::FrameCaptureFailure` and
//! never touch the render loop.

use std::path::Path;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, Rgb, RgbImage};

use crate::detect::{BoundingBox, DetectionSet};
use crate::error::PipelineError;
use crate::frame::VideoFrame;

pub const DEFAULT_QUALITY: u8 = 85;

const OUTLINE: Rgb<u8> = Rgb([0, 255, 0]);
const OUTLINE_PX: u32 = 2;

/// Encode `frame` with `detections` outlined.
pub fn encode_jpeg(
    frame: &VideoFrame,
    detections: &DetectionSet,
    quality: u8,
) -> Result<Vec<u8>, PipelineError> {
    render(frame, detections, quality).map_err(|err| {
        PipelineError::FrameCaptureFailure(format!("frame {}: {:#}", frame.index(), err))
    })
}

/// Encode and write to `path`.
pub fn save(frame: &VideoFrame, detections: &DetectionSet, path: &Path) -> Result<(), PipelineError> {
    let jpeg = encode_jpeg(frame, detections, DEFAULT_QUALITY)?;
    std::fs::write(path, &jpeg).map_err(|err| {
        PipelineError::FrameCaptureFailure(format!("write {}: {}", path.display(), err))
    })?;
    log::info!(
        "snapshot: frame {} with {} box(es) -> {} ({} bytes)",
        frame.index(),
        detections.len(),
        path.display(),
        jpeg.len()
    );
    Ok(())
}

fn render(frame: &VideoFrame, detections: &DetectionSet, quality: u8) -> Result<Vec<u8>> {
    let view = frame.view();
    let mut image = RgbImage::from_raw(view.width(), view.height(), view.pixels().to_vec())
        .context("frame buffer does not match its dimensions")?;
    for detection in &detections.detections {
        outline(&mut image, detection.bbox);
    }

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode(image.as_raw(), image.width(), image.height(), ExtendedColorType::Rgb8)
        .context("encode jpeg")?;
    Ok(out)
}

/// Draw a rectangle border, clipped to the image.
fn outline(image: &mut RgbImage, bbox: BoundingBox) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 || !bbox.is_finite() {
        return;
    }
    let clip_x = |v: f32| (v.round().max(0.0) as u32).min(w - 1);
    let clip_y = |v: f32| (v.round().max(0.0) as u32).min(h - 1);
    let (x0, x1) = (clip_x(bbox.x), clip_x(bbox.x + bbox.width));
    let (y0, y1) = (clip_y(bbox.y), clip_y(bbox.y + bbox.height));

    for y in y0..=y1 {
        for x in x0..=x1 {
            let edge = x < x0 + OUTLINE_PX
                || x + OUTLINE_PX > x1
                || y < y0 + OUTLINE_PX
                || y + OUTLINE_PX > y1;
            if edge {
                image.put_pixel(x, y, OUTLINE);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Detection;

    fn gray_frame() -> VideoFrame {
        VideoFrame::new(vec![128u8; 32 * 16 * 3], 32, 16, 4).unwrap()
    }

    #[test]
    fn encodes_a_jpeg_with_boxes() {
        let set = DetectionSet::new(
            4,
            vec![Detection::new(BoundingBox::new(4.0, 2.0, 10.0, 8.0), "object", 0.9)],
        );
        let jpeg = encode_jpeg(&gray_frame(), &set, DEFAULT_QUALITY).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 16));
    }

    #[test]
    fn outline_is_clipped_to_image() {
        let mut image = RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]));
        outline(&mut image, BoundingBox::new(-5.0, -5.0, 100.0, 100.0));
        assert_eq!(*image.get_pixel(0, 0), OUTLINE);
        assert_eq!(*image.get_pixel(7, 7), OUTLINE);
        assert_eq!(*image.get_pixel(4, 4), Rgb([0, 0, 0]));
    }

    #[test]
    fn unwritable_path_is_a_capture_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("shot.jpg");
        let err = save(&gray_frame(), &DetectionSet::default(), &path).unwrap_err();
        assert!(matches!(err, PipelineError::FrameCaptureFailure(_)));
        assert!(!err.is_fatal());
    }
}
