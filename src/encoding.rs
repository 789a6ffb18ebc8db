use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdin, Command, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use image::RgbaImage;

use crate::error_codes::CodedError;
use crate::geometry::Size;

/// Sequential consumer of cropped frames. `finish` flushes and surfaces any
/// failure from the underlying writer.
pub trait FrameSink {
    fn write_frame(&mut self, frame: RgbaImage) -> Result<()>;
    fn finish(self) -> Result<()>;
}

/// Encodes RGBA frames into a video file through an ffmpeg child process.
/// Frames are handed to a worker thread over a bounded channel so a slow
/// encoder applies backpressure instead of buffering the whole video.
pub struct VideoWriter {
    sender: Option<mpsc::SyncSender<Vec<u8>>>,
    worker: Option<JoinHandle<Result<()>>>,
}

impl VideoWriter {
    pub fn create(output_path: &Path, codec: &str, frame_rate: f64, size: Size) -> Result<Self> {
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(4);
        let fps = frame_rate.to_string();
        let output_path = output_path.to_path_buf();

        // fail on an unwritable destination here, not inside the worker
        let mut child = spawn_ffmpeg_encoder(&output_path, codec, &fps, size)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg stdin"))?;
        let stderr = child.stderr.take();

        let worker = thread::Builder::new()
            .name("vidcrop-encoder".to_owned())
            .spawn(move || drain_frames(child, stdin, stderr, receiver, &output_path))
            .context("failed to spawn ffmpeg writer thread")?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }
}

impl FrameSink for VideoWriter {
    fn write_frame(&mut self, frame: RgbaImage) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("encoder has already been finalized"))?;
        sender
            .send(frame.into_raw())
            .map_err(|_| anyhow!("failed to enqueue frame for ffmpeg"))
    }

    fn finish(mut self) -> Result<()> {
        drop(self.sender.take());

        let handle = self
            .worker
            .take()
            .ok_or_else(|| anyhow!("ffmpeg worker thread missing"))?;
        match handle.join() {
            Ok(result) => result,
            Err(_) => Err(anyhow!("ffmpeg worker thread panicked")),
        }
    }
}

fn spawn_ffmpeg_encoder(output_path: &Path, codec: &str, fps: &str, size: Size) -> Result<Child> {
    Command::new("ffmpeg")
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-y")
        .arg("-f")
        .arg("rawvideo")
        .arg("-pix_fmt")
        .arg("rgba")
        .arg("-s:v")
        .arg(size.to_string())
        .arg("-r")
        .arg(fps)
        .arg("-i")
        .arg("-")
        .arg("-an")
        .arg("-c:v")
        .arg(codec)
        .arg(output_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| {
            let message = if error.kind() == ErrorKind::NotFound {
                format!(
                    "cannot create {}: ffmpeg executable not found",
                    output_path.display()
                )
            } else {
                format!("cannot create {}: {error}", output_path.display())
            };
            anyhow!(CodedError::output_open(message))
        })
}

fn drain_frames(
    mut child: Child,
    mut stdin: ChildStdin,
    mut stderr: Option<ChildStderr>,
    receiver: mpsc::Receiver<Vec<u8>>,
    output_path: &Path,
) -> Result<()> {
    while let Ok(frame) = receiver.recv() {
        stdin
            .write_all(&frame)
            .context("failed to write frame to ffmpeg stdin")?;
    }

    stdin.flush().context("failed to flush ffmpeg stdin")?;
    drop(stdin);

    let status = child.wait().context("failed waiting for ffmpeg process")?;
    if !status.success() {
        let tail = read_stderr_tail(&mut stderr)?;
        return Err(anyhow!(
            "ffmpeg failed with {status} while writing {} (stderr: '{tail}')",
            output_path.display()
        ));
    }
    Ok(())
}

fn read_stderr_tail(stderr: &mut Option<ChildStderr>) -> Result<String> {
    let Some(mut pipe) = stderr.take() else {
        return Ok(String::new());
    };
    let mut buffer = Vec::new();
    pipe.read_to_end(&mut buffer)
        .context("failed reading ffmpeg stderr")?;
    let text = String::from_utf8_lossy(&buffer).to_string();
    Ok(last_n_chars(&text, 500))
}

fn last_n_chars(s: &str, max_chars: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    let start = chars.len().saturating_sub(max_chars);
    chars[start..].iter().collect::<String>().trim().to_owned()
}
