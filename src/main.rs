mod canvas;
mod cropper;
mod decoding;
mod editor;
mod encoding;
mod error_codes;
mod fit;
mod geometry;
mod monitors;
mod session;
mod surface;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::{CommandFactory, Parser};

use crate::decoding::VideoSource;
use crate::encoding::VideoWriter;
use crate::error_codes::{find_coded_error, CodedError};
use crate::geometry::Size;
use crate::session::{FrameSource, SessionOutcome};
use crate::surface::MinifbSurface;

/// Margin between the scaled frame and the window edge, in pixels.
const BORDER_SIZE: u32 = 25;
const OUTPUT_CODEC: &str = "mpeg4";

#[derive(Debug, Parser)]
#[command(name = "vidcrop")]
#[command(about = "Interactively pick a region of a video and crop every frame to it")]
struct Cli {
    /// Video files to crop, processed one after another
    videos: Vec<PathBuf>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(classify(&error))
        }
    }
}

/// Classified failures exit 1, anything unexpected exits 2.
fn classify(error: &anyhow::Error) -> u8 {
    if find_coded_error(error).is_some() {
        1
    } else {
        2
    }
}

fn run() -> Result<u8> {
    let cli = Cli::parse();

    if cli.videos.is_empty() {
        Cli::command().print_help().ok();
        println!();
        return Err(anyhow!(CodedError::usage(
            "must specify at least one video filename"
        )));
    }

    // every path is checked before any file is processed
    for path in &cli.videos {
        if !path.is_file() {
            return Err(anyhow!(CodedError::usage(format!(
                "video file \"{}\" does not exist",
                path.display()
            ))));
        }
    }

    let bounding_box = monitors::smallest_output_size()?;

    let mut exit_code = 0u8;
    for path in &cli.videos {
        if let Err(error) = process_file(path, bounding_box) {
            eprintln!("{}: {error:#}", path.display());
            // a failed file does not stop the run; keep the worst class seen
            exit_code = exit_code.max(if find_coded_error(&error).is_some() {
                1
            } else {
                2
            });
        }
    }
    Ok(exit_code)
}

fn process_file(path: &Path, bounding_box: Size) -> Result<()> {
    let meta = decoding::probe_video(path)?;
    let plan = fit::compute(meta.size, bounding_box, BORDER_SIZE)?;

    let outcome = {
        let mut source = VideoSource::with_meta(path, meta, Some(plan.scaled_size))?;
        let mut surface = MinifbSurface::open("vidcrop", plan.canvas_size, meta.frame_rate)?;
        session::run(path, &mut source, &mut surface, &plan)?
    };

    let rect = match outcome {
        SessionOutcome::Cancelled => {
            println!("{}: cancelled, nothing written", path.display());
            return Ok(());
        }
        SessionOutcome::Confirmed(rect) => rect,
    };
    if rect.is_empty() {
        return Ok(());
    }

    let output_path = cropper::output_filename(path, rect);
    let mut source = VideoSource::with_meta(path, meta, None)?;
    let sink = VideoWriter::create(
        &output_path,
        OUTPUT_CODEC,
        source.frame_rate(),
        Size::new(rect.width as u32, rect.height as u32),
    )?;
    let written = cropper::crop(&mut source, sink, rect)?;
    println!("wrote {} ({written} frames)", output_path.display());
    Ok(())
}
