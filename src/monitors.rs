use std::process::Command;

use anyhow::{anyhow, Result};
use regex::Regex;

use crate::error_codes::CodedError;
use crate::geometry::Size;

/// Queries the connected displays and returns the smallest one by area.
/// The interactive canvas must fit inside the smallest display so the
/// window is fully visible wherever it opens.
pub fn smallest_output_size() -> Result<Size> {
    let output = Command::new("xrandr")
        .arg("--listactivemonitors")
        .output()
        .map_err(|error| {
            anyhow!(CodedError::environment(format!(
                "failed to run xrandr: {error}"
            )))
        })?;

    if !output.status.success() {
        return Err(CodedError::environment(format!(
            "xrandr --listactivemonitors exited with {}",
            output.status
        ))
        .into());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let sizes = parse_monitor_lines(stdout.lines());
    for size in &sizes {
        println!("display: {size}");
    }

    let smallest = smallest_of(&sizes).ok_or_else(|| {
        CodedError::environment("no display dimensions reported by xrandr")
    })?;
    println!("smallest display: {smallest}");

    Ok(smallest)
}

/// Each monitor line carries a `<width>/<mm>x<height>/<mm>` geometry token,
/// e.g. ` 0: +*HDMI-0 1280/380x1024/310+0+0  HDMI-0`. Lines without the
/// token (headers, disconnected outputs) are skipped.
fn parse_monitor_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<Size> {
    let pattern = Regex::new(r" (\d+)/\d+x(\d+)/\d").expect("monitor geometry regex should compile");

    lines
        .filter_map(|line| {
            let captures = pattern.captures(line)?;
            let width = captures[1].parse().ok()?;
            let height = captures[2].parse().ok()?;
            Some(Size::new(width, height))
        })
        .collect()
}

fn smallest_of(sizes: &[Size]) -> Option<Size> {
    let mut smallest = *sizes.first()?;
    for &size in &sizes[1..] {
        // strict comparison keeps the first-seen display on area ties
        if size.area() < smallest.area() {
            smallest = size;
        }
    }
    Some(smallest)
}
