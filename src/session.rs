use std::path::Path;

use anyhow::{anyhow, Result};
use image::{imageops, RgbaImage};

use crate::canvas::{self, OVERLAY_COLOR};
use crate::editor::RegionEditor;
use crate::error_codes::CodedError;
use crate::fit::FitPlan;
use crate::geometry::{Point, Rect, Size};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInput {
    Escape,
    Space,
    Enter,
    Other(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    PointerDown { x: i32, y: i32 },
    Key(KeyInput),
}

/// Sequential frame supplier with known geometry and rate. Frames may be
/// scaled at decode time; `native_size` is always the unscaled source.
pub trait FrameSource {
    fn frame_rate(&self) -> f64;
    fn native_size(&self) -> Size;
    fn frame_count(&self) -> u64;
    /// None signals end of stream.
    fn read_frame(&mut self) -> Result<Option<RgbaImage>>;
    /// Seeks back to the first frame.
    fn rewind(&mut self) -> Result<()>;
}

/// Pixel-buffer window with non-blocking input polling. `present` owns the
/// bounded per-iteration wait, so the loop stays responsive single-threaded.
pub trait DisplaySurface {
    fn set_title(&mut self, title: &str);
    fn present(&mut self, canvas: &RgbaImage) -> Result<()>;
    fn poll_event(&mut self) -> Result<Option<InputEvent>>;
    fn is_open(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Cancelled,
    /// Source-space crop rectangle.
    Confirmed(Rect),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlayState {
    Playing,
    Paused,
}

/// Drives the frame-display loop until the operator confirms a selection or
/// cancels. Returns the confirmed rectangle converted to source space.
pub fn run<S: FrameSource, D: DisplaySurface>(
    input: &Path,
    source: &mut S,
    surface: &mut D,
    plan: &FitPlan,
) -> Result<SessionOutcome> {
    print_session_info(input, source, plan);
    surface.set_title(&window_title(input, source.native_size(), plan));

    let mut editor = RegionEditor::new(plan.placement);
    let mut state = PlayState::Playing;
    let mut last_frame: Option<RgbaImage> = None;
    let mut frames_read: u64 = 0;

    loop {
        if !surface.is_open() {
            return Ok(SessionOutcome::Cancelled);
        }

        if state == PlayState::Playing {
            match source.read_frame()? {
                Some(frame) => {
                    frames_read += 1;
                    last_frame = Some(frame);
                }
                None => {
                    if frames_read == 0 {
                        return Err(anyhow!(CodedError::source_read(format!(
                            "failed to read the first frame of {}",
                            input.display()
                        ))));
                    }
                    source.rewind()?;
                    continue;
                }
            }
        }

        let frame = last_frame
            .as_ref()
            .ok_or_else(|| anyhow!("no frame available while paused"))?;
        let composed = compose(frame, plan, editor.selection());
        surface.present(&composed)?;

        match surface.poll_event()? {
            Some(InputEvent::PointerDown { x, y }) => {
                editor.on_pointer_down(Point::new(x, y));
            }
            Some(InputEvent::Key(KeyInput::Escape)) => {
                return Ok(SessionOutcome::Cancelled);
            }
            Some(InputEvent::Key(KeyInput::Space)) => {
                state = match state {
                    PlayState::Playing => PlayState::Paused,
                    PlayState::Paused => PlayState::Playing,
                };
            }
            Some(InputEvent::Key(KeyInput::Enter)) => {
                if !editor.selection().is_empty() {
                    let rect = to_source_space(editor.selection(), plan);
                    println!("crop rect: {rect}");
                    return Ok(SessionOutcome::Confirmed(rect));
                }
            }
            Some(InputEvent::Key(KeyInput::Other(code))) => {
                eprintln!("key {code} ignored");
            }
            None => {}
        }
    }
}

/// White canvas, frame blitted at the plan's placement, selection outline
/// and source-space dimension label on top.
fn compose(frame: &RgbaImage, plan: &FitPlan, selection: Rect) -> RgbaImage {
    let mut composed = canvas::blank_canvas(plan.canvas_size);
    imageops::replace(
        &mut composed,
        frame,
        i64::from(plan.placement.x),
        i64::from(plan.placement.y),
    );

    if !selection.is_empty() {
        canvas::draw_rect_outline(&mut composed, selection, OVERLAY_COLOR);

        let source_width = scale_back(selection.width, plan.scale_factor);
        let source_height = scale_back(selection.height, plan.scale_factor);
        let border = plan.placement.x;
        canvas::draw_label(
            &mut composed,
            selection.x + border,
            selection.y + 2 * border,
            &format!("{source_width} x {source_height}"),
            OVERLAY_COLOR,
        );
    }

    composed
}

fn scale_back(value: i32, scale_factor: f64) -> i32 {
    (f64::from(value) / scale_factor).round() as i32
}

/// Display-space selection to source-space crop rectangle: shift off the
/// border offset, then undo the display scaling with per-field rounding.
fn to_source_space(selection: Rect, plan: &FitPlan) -> Rect {
    Rect::new(
        scale_back(selection.x - plan.placement.x, plan.scale_factor),
        scale_back(selection.y - plan.placement.y, plan.scale_factor),
        scale_back(selection.width, plan.scale_factor),
        scale_back(selection.height, plan.scale_factor),
    )
}

fn window_title(input: &Path, native: Size, plan: &FitPlan) -> String {
    let name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.display().to_string());
    if plan.scale_factor == 1.0 {
        format!("{name} {native}")
    } else {
        format!(
            "{name} {native} @ {}% = {}",
            (100.0 * plan.scale_factor).round(),
            plan.scaled_size
        )
    }
}

fn print_session_info<S: FrameSource>(input: &Path, source: &S, plan: &FitPlan) {
    let fps = source.frame_rate();
    let total_seconds = if fps > 0.0 {
        (source.frame_count() as f64 / fps) as u64
    } else {
        0
    };
    println!(
        "{}: {} @ {fps} fps, {} frames ({}m {}s), scale {} -> {}",
        input.display(),
        source.native_size(),
        source.frame_count(),
        total_seconds / 60,
        total_seconds % 60,
        plan.scale_factor,
        plan.scaled_size,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_codes::{find_coded_error, CodedErrorKind};
    use std::collections::VecDeque;

    struct FakeSource {
        size: Size,
        total: u64,
        position: u64,
        reads: u64,
        rewinds: u64,
    }

    impl FakeSource {
        fn new(size: Size, total: u64) -> Self {
            Self {
                size,
                total,
                position: 0,
                reads: 0,
                rewinds: 0,
            }
        }
    }

    impl FrameSource for FakeSource {
        fn frame_rate(&self) -> f64 {
            25.0
        }

        fn native_size(&self) -> Size {
            Size::new(self.size.width * 2, self.size.height * 2)
        }

        fn frame_count(&self) -> u64 {
            self.total
        }

        fn read_frame(&mut self) -> Result<Option<RgbaImage>> {
            if self.position >= self.total {
                return Ok(None);
            }
            self.position += 1;
            self.reads += 1;
            Ok(Some(RgbaImage::new(self.size.width, self.size.height)))
        }

        fn rewind(&mut self) -> Result<()> {
            self.position = 0;
            self.rewinds += 1;
            Ok(())
        }
    }

    /// Replays a scripted event sequence; an exhausted script cancels so a
    /// buggy loop cannot spin forever.
    struct FakeSurface {
        events: VecDeque<Option<InputEvent>>,
        presented: usize,
        open: bool,
        title: Option<String>,
    }

    impl FakeSurface {
        fn with_events(events: Vec<Option<InputEvent>>) -> Self {
            Self {
                events: events.into(),
                presented: 0,
                open: true,
                title: None,
            }
        }
    }

    impl DisplaySurface for FakeSurface {
        fn set_title(&mut self, title: &str) {
            self.title = Some(title.to_owned());
        }

        fn present(&mut self, _canvas: &RgbaImage) -> Result<()> {
            self.presented += 1;
            Ok(())
        }

        fn poll_event(&mut self) -> Result<Option<InputEvent>> {
            Ok(self
                .events
                .pop_front()
                .unwrap_or(Some(InputEvent::Key(KeyInput::Escape))))
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    fn half_scale_plan() -> FitPlan {
        FitPlan {
            scale_factor: 0.5,
            scaled_size: Size::new(480, 270),
            canvas_size: Size::new(530, 320),
            placement: Rect::new(25, 25, 480, 270),
        }
    }

    fn key(input: KeyInput) -> Option<InputEvent> {
        Some(InputEvent::Key(input))
    }

    fn click(x: i32, y: i32) -> Option<InputEvent> {
        Some(InputEvent::PointerDown { x, y })
    }

    #[test]
    fn escape_cancels_the_session() {
        let plan = half_scale_plan();
        let mut source = FakeSource::new(plan.scaled_size, 10);
        let mut surface = FakeSurface::with_events(vec![key(KeyInput::Escape)]);

        let outcome = run(Path::new("clip.mp4"), &mut source, &mut surface, &plan).unwrap();
        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert_eq!(surface.presented, 1);
        assert_eq!(
            surface.title.as_deref(),
            Some("clip.mp4 960x540 @ 50% = 480x270")
        );
    }

    #[test]
    fn enter_without_selection_is_ignored() {
        let plan = half_scale_plan();
        let mut source = FakeSource::new(plan.scaled_size, 10);
        let mut surface =
            FakeSurface::with_events(vec![key(KeyInput::Enter), key(KeyInput::Escape)]);

        let outcome = run(Path::new("clip.mp4"), &mut source, &mut surface, &plan).unwrap();
        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert_eq!(surface.presented, 2);
    }

    #[test]
    fn click_then_enter_confirms_in_source_space() {
        let plan = half_scale_plan();
        let mut source = FakeSource::new(plan.scaled_size, 10);
        let mut surface =
            FakeSurface::with_events(vec![click(125, 125), key(KeyInput::Enter)]);

        let outcome = run(Path::new("clip.mp4"), &mut source, &mut surface, &plan).unwrap();
        // selection (125,125,200,200) is clamped to the frame bottom (295),
        // then shifted off the border and divided by the 0.5 scale
        assert_eq!(
            outcome,
            SessionOutcome::Confirmed(Rect::new(200, 200, 400, 340))
        );
    }

    #[test]
    fn confirmed_rect_round_trips_within_a_pixel() {
        let plan = FitPlan {
            scale_factor: 0.62,
            scaled_size: Size::new(1190, 670),
            canvas_size: Size::new(1240, 720),
            placement: Rect::new(25, 25, 1190, 670),
        };
        let mut source = FakeSource::new(plan.scaled_size, 5);
        let mut surface =
            FakeSurface::with_events(vec![click(100, 100), key(KeyInput::Enter)]);

        let outcome = run(Path::new("clip.mp4"), &mut source, &mut surface, &plan).unwrap();
        let SessionOutcome::Confirmed(rect) = outcome else {
            panic!("expected a confirmed rect");
        };

        let back_x = (f64::from(rect.x) * plan.scale_factor).round() as i32 + plan.placement.x;
        let back_y = (f64::from(rect.y) * plan.scale_factor).round() as i32 + plan.placement.y;
        let back_w = (f64::from(rect.width) * plan.scale_factor).round() as i32;
        let back_h = (f64::from(rect.height) * plan.scale_factor).round() as i32;
        assert!((back_x - 100).abs() <= 1);
        assert!((back_y - 100).abs() <= 1);
        assert!((back_w - 200).abs() <= 1);
        assert!((back_h - 200).abs() <= 1);
    }

    #[test]
    fn space_pauses_frame_advancement() {
        let plan = half_scale_plan();
        let mut source = FakeSource::new(plan.scaled_size, 10);
        let mut surface = FakeSurface::with_events(vec![
            key(KeyInput::Space),
            None,
            None,
            key(KeyInput::Escape),
        ]);

        let outcome = run(Path::new("clip.mp4"), &mut source, &mut surface, &plan).unwrap();
        assert_eq!(outcome, SessionOutcome::Cancelled);
        // only the pre-pause iteration read a frame; paused iterations
        // redisplayed it
        assert_eq!(source.reads, 1);
        assert_eq!(surface.presented, 4);
    }

    #[test]
    fn exhausted_source_loops_back_to_the_start() {
        let plan = half_scale_plan();
        let mut source = FakeSource::new(plan.scaled_size, 2);
        let mut surface =
            FakeSurface::with_events(vec![None, None, None, key(KeyInput::Escape)]);

        let outcome = run(Path::new("clip.mp4"), &mut source, &mut surface, &plan).unwrap();
        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert_eq!(source.rewinds, 1);
        assert!(source.reads > 2);
    }

    #[test]
    fn empty_source_is_a_read_error() {
        let plan = half_scale_plan();
        let mut source = FakeSource::new(plan.scaled_size, 0);
        let mut surface = FakeSurface::with_events(vec![]);

        let error = run(Path::new("clip.mp4"), &mut source, &mut surface, &plan).unwrap_err();
        let coded = find_coded_error(&error).expect("classified error");
        assert_eq!(coded.kind, CodedErrorKind::SourceRead);
        assert_eq!(surface.presented, 0);
    }

    #[test]
    fn closed_window_cancels() {
        let plan = half_scale_plan();
        let mut source = FakeSource::new(plan.scaled_size, 10);
        let mut surface = FakeSurface::with_events(vec![]);
        surface.open = false;

        let outcome = run(Path::new("clip.mp4"), &mut source, &mut surface, &plan).unwrap();
        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert_eq!(surface.presented, 0);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let plan = half_scale_plan();
        let mut source = FakeSource::new(plan.scaled_size, 10);
        let mut surface =
            FakeSurface::with_events(vec![key(KeyInput::Other(42)), key(KeyInput::Escape)]);

        let outcome = run(Path::new("clip.mp4"), &mut source, &mut surface, &plan).unwrap();
        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert_eq!(surface.presented, 2);
    }

    #[test]
    fn title_carries_scale_suffix_only_when_scaled() {
        let scaled = window_title(Path::new("video.mp4"), Size::new(960, 540), &half_scale_plan());
        assert_eq!(scaled, "video.mp4 960x540 @ 50% = 480x270");

        let unscaled_plan = FitPlan {
            scale_factor: 1.0,
            scaled_size: Size::new(960, 540),
            canvas_size: Size::new(1010, 590),
            placement: Rect::new(25, 25, 960, 540),
        };
        let unscaled = window_title(Path::new("video.mp4"), Size::new(960, 540), &unscaled_plan);
        assert_eq!(unscaled, "video.mp4 960x540");
    }
}
