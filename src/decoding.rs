use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use serde::Deserialize;

use crate::error_codes::CodedError;
use crate::geometry::Size;
use crate::session::FrameSource;

#[derive(Debug, Clone, Copy)]
pub struct VideoMeta {
    pub size: Size,
    pub frame_rate: f64,
    pub frame_count: u64,
}

/// Reads the source geometry, frame rate and frame count via ffprobe.
/// Any failure here means the file cannot be decoded at all.
pub fn probe_video(path: &Path) -> Result<VideoMeta> {
    run_ffprobe(path).map_err(|error| {
        anyhow!(CodedError::source_read(format!(
            "{}: {error:#}",
            path.display()
        )))
    })
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    r_frame_rate: Option<String>,
    #[serde(default)]
    avg_frame_rate: Option<String>,
    #[serde(default)]
    nb_frames: Option<String>,
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

fn run_ffprobe(path: &Path) -> Result<VideoMeta> {
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-show_streams")
        .arg("-show_format")
        .arg("-print_format")
        .arg("json")
        .arg(path)
        .output()
        .context("failed to spawn ffprobe")?;

    if !output.status.success() {
        anyhow::bail!("ffprobe exited with {}", output.status);
    }

    let parsed: FfprobeOutput =
        serde_json::from_slice(&output.stdout).context("failed to parse ffprobe JSON")?;
    meta_from_probe(&parsed)
}

fn meta_from_probe(parsed: &FfprobeOutput) -> Result<VideoMeta> {
    let stream = parsed
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| anyhow!("no video stream reported"))?;

    let width = stream.width.ok_or_else(|| anyhow!("missing frame width"))?;
    let height = stream
        .height
        .ok_or_else(|| anyhow!("missing frame height"))?;

    let frame_rate = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.avg_frame_rate.as_deref().and_then(parse_rate))
        .ok_or_else(|| anyhow!("no valid frame rate reported"))?;

    let duration = stream
        .duration
        .as_deref()
        .and_then(|value| value.parse::<f64>().ok())
        .or_else(|| {
            parsed
                .format
                .as_ref()
                .and_then(|format| format.duration.as_deref())
                .and_then(|value| value.parse::<f64>().ok())
        });

    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|value| value.parse::<u64>().ok())
        .or_else(|| duration.map(|seconds| (seconds * frame_rate).round().max(1.0) as u64))
        .unwrap_or(0);

    Ok(VideoMeta {
        size: Size::new(width, height),
        frame_rate,
        frame_count,
    })
}

/// ffprobe reports rates as fractions ("30000/1001" or "25/1").
fn parse_rate(value: &str) -> Option<f64> {
    let mut parts = value.splitn(2, '/');
    let numerator: f64 = parts.next()?.trim().parse().ok()?;
    let denominator: f64 = match parts.next() {
        Some(part) => part.trim().parse().ok()?,
        None => 1.0,
    };
    if denominator == 0.0 || numerator <= 0.0 {
        return None;
    }
    Some(numerator / denominator)
}

struct Pipeline {
    child: Child,
    receiver: mpsc::Receiver<Vec<u8>>,
    worker: Option<JoinHandle<Result<()>>>,
}

impl Pipeline {
    fn spawn(path: &Path, output: Size) -> Result<Self> {
        let mut child = Command::new("ffmpeg")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(path)
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgba")
            .arg("-s")
            .arg(output.to_string())
            .arg("-sws_flags")
            .arg("area")
            .arg("-")
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .context("failed to spawn ffmpeg decoder")?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg stdout"))?;
        let frame_size = (output.width * output.height * 4) as usize;
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(4);

        let worker = thread::Builder::new()
            .name("vidcrop-decoder".to_owned())
            .spawn(move || loop {
                let mut buffer = vec![0u8; frame_size];
                match stdout.read_exact(&mut buffer) {
                    Ok(()) => {
                        if sender.send(buffer).is_err() {
                            return Ok(());
                        }
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => {
                        return Ok(())
                    }
                    Err(error) => return Err(anyhow!("failed to read from ffmpeg: {error}")),
                }
            })
            .context("failed to spawn ffmpeg reader thread")?;

        Ok(Self {
            child,
            receiver,
            worker: Some(worker),
        })
    }

    fn shutdown(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Frame source backed by an ffmpeg rawvideo pipe. Frames are delivered at
/// `output` size (ffmpeg scales during decode); rewinding tears the pipe
/// down and respawns it at the first frame.
pub struct VideoSource {
    path: PathBuf,
    meta: VideoMeta,
    output: Size,
    pipeline: Option<Pipeline>,
}

impl VideoSource {
    pub fn open(path: &Path, output_size: Option<Size>) -> Result<Self> {
        let meta = probe_video(path)?;
        Self::with_meta(path, meta, output_size)
    }

    /// Skips the ffprobe pass when the caller already probed the file.
    pub fn with_meta(path: &Path, meta: VideoMeta, output_size: Option<Size>) -> Result<Self> {
        let output = output_size.unwrap_or(meta.size);
        let pipeline = Pipeline::spawn(path, output).map_err(|error| {
            anyhow!(CodedError::source_read(format!(
                "{}: {error:#}",
                path.display()
            )))
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            meta,
            output,
            pipeline: Some(pipeline),
        })
    }
}

impl FrameSource for VideoSource {
    fn frame_rate(&self) -> f64 {
        self.meta.frame_rate
    }

    fn native_size(&self) -> Size {
        self.meta.size
    }

    fn frame_count(&self) -> u64 {
        self.meta.frame_count
    }

    fn read_frame(&mut self) -> Result<Option<RgbaImage>> {
        let Some(pipeline) = self.pipeline.as_ref() else {
            return Ok(None);
        };
        match pipeline.receiver.recv() {
            Ok(buffer) => {
                let frame = RgbaImage::from_raw(self.output.width, self.output.height, buffer)
                    .ok_or_else(|| anyhow!("decoded frame has the wrong byte length"))?;
                Ok(Some(frame))
            }
            // channel closed: the decoder reached end of stream
            Err(_) => Ok(None),
        }
    }

    fn rewind(&mut self) -> Result<()> {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.shutdown();
        }
        self.pipeline = Some(Pipeline::spawn(&self.path, self.output)?);
        Ok(())
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.shutdown();
        }
    }
}
