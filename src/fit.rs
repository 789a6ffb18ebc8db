use anyhow::{anyhow, Result};

use crate::error_codes::CodedError;
use crate::geometry::{Point, Rect, Size};

/// Placement of a scaled source frame inside the interactive canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitPlan {
    pub scale_factor: f64,
    pub scaled_size: Size,
    pub canvas_size: Size,
    /// Where the scaled frame sits on the canvas; also the legal region for
    /// the selection rectangle.
    pub placement: Rect,
}

const SCALE_STEP: f64 = 0.02;
const FILL_LIMIT: f64 = 0.98;

/// Finds the largest scale factor <= 1.0, stepping down by 0.02, at which the
/// scaled frame plus border fits inside 98% of the bounding box on both axes.
///
/// The trial dimensions are rounded to whole pixels on every iteration, so
/// the loop terminates on the same boundary the rendered canvas will have.
/// A closed-form ratio would not reproduce that rounding behavior.
pub fn compute(source: Size, bounding_box: Size, border: u32) -> Result<FitPlan> {
    if bounding_box.width == 0 || bounding_box.height == 0 {
        return Err(anyhow!(CodedError::invalid_bounds(format!(
            "bounding box {bounding_box} has a zero dimension"
        ))));
    }

    let width_limit = FILL_LIMIT * f64::from(bounding_box.width);
    let height_limit = FILL_LIMIT * f64::from(bounding_box.height);

    let mut scale_factor = 1.0;
    loop {
        if scale_factor <= 0.0 {
            // even a zero-size frame plus border does not fit
            return Err(anyhow!(CodedError::invalid_bounds(format!(
                "bounding box {bounding_box} cannot hold a {border}px border"
            ))));
        }

        let scaled_width = (scale_factor * f64::from(source.width)).round() as u32;
        let scaled_height = (scale_factor * f64::from(source.height)).round() as u32;
        let canvas_width = 2 * border + scaled_width;
        let canvas_height = 2 * border + scaled_height;

        if f64::from(canvas_width) >= width_limit || f64::from(canvas_height) >= height_limit {
            scale_factor -= SCALE_STEP;
            continue;
        }

        let scaled_size = Size::new(scaled_width, scaled_height);
        return Ok(FitPlan {
            scale_factor,
            scaled_size,
            canvas_size: Size::new(canvas_width, canvas_height),
            placement: Rect::from_size(Point::new(border as i32, border as i32), scaled_size),
        });
    }
}
