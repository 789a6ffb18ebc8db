use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use image::imageops;

use crate::encoding::FrameSink;
use crate::error_codes::CodedError;
use crate::geometry::Rect;
use crate::session::FrameSource;

/// Progress cadence, in seconds of source video.
const PROGRESS_INTERVAL_SECONDS: f64 = 4.0;

/// `<input_stem>_crop_<width>x<height>.m4v` in the working directory.
pub fn output_filename(input: &Path, rect: Rect) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_owned());
    PathBuf::from(format!("{stem}_crop_{}x{}.m4v", rect.width, rect.height))
}

/// Streams every frame of `source`, cropped to `rect`, into `sink`.
/// `rect` is in source space and must lie inside the native frame bounds.
/// Returns the number of frames written.
pub fn crop<S: FrameSource, K: FrameSink>(source: &mut S, mut sink: K, rect: Rect) -> Result<u64> {
    let native = source.native_size();
    let frame_bounds = Rect::new(0, 0, native.width as i32, native.height as i32);
    if rect.is_empty() || !frame_bounds.contains_rect(rect) {
        return Err(anyhow!(CodedError::out_of_bounds_crop(format!(
            "crop rect ({rect}) does not fit inside the {native} frame"
        ))));
    }

    let total = source.frame_count();
    let progress_interval = (PROGRESS_INTERVAL_SECONDS * source.frame_rate())
        .round()
        .max(1.0) as u64;

    let mut written: u64 = 0;
    while let Some(frame) = source.read_frame()? {
        let cropped = imageops::crop_imm(
            &frame,
            rect.x as u32,
            rect.y as u32,
            rect.width as u32,
            rect.height as u32,
        )
        .to_image();
        sink.write_frame(cropped)?;
        written += 1;

        if written % progress_interval == 0 && total > 0 {
            eprintln!(
                "cropping... {:.1}%",
                100.0 * written as f64 / total as f64
            );
        }
    }

    sink.finish()?;
    Ok(written)
}
