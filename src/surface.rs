use anyhow::{anyhow, Result};
use image::RgbaImage;
use minifb::{Key, KeyRepeat, MouseButton, MouseMode, Window, WindowOptions};

use crate::geometry::Size;
use crate::session::{DisplaySurface, InputEvent, KeyInput};

/// Fixed-size pixel-buffer window. `present` paces the loop to the source
/// frame rate; input is read as state snapshots after each update, with
/// left-button presses edge-detected into pointer-down events.
pub struct MinifbSurface {
    window: Window,
    buffer: Vec<u32>,
    size: Size,
    left_button_was_down: bool,
}

impl MinifbSurface {
    pub fn open(title: &str, size: Size, frame_rate: f64) -> Result<Self> {
        let mut window = Window::new(
            title,
            size.width as usize,
            size.height as usize,
            WindowOptions::default(),
        )
        .map_err(|error| anyhow!("failed to create display window: {error}"))?;
        window.set_target_fps(frame_rate.round().max(1.0) as usize);

        Ok(Self {
            window,
            buffer: vec![0; (size.width * size.height) as usize],
            size,
            left_button_was_down: false,
        })
    }
}

impl DisplaySurface for MinifbSurface {
    fn set_title(&mut self, title: &str) {
        self.window.set_title(title);
    }

    fn present(&mut self, canvas: &RgbaImage) -> Result<()> {
        for (pixel, slot) in canvas.pixels().zip(self.buffer.iter_mut()) {
            let [r, g, b, _] = pixel.0;
            *slot = (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b);
        }
        self.window
            .update_with_buffer(
                &self.buffer,
                self.size.width as usize,
                self.size.height as usize,
            )
            .map_err(|error| anyhow!("failed to present canvas: {error}"))
    }

    fn poll_event(&mut self) -> Result<Option<InputEvent>> {
        let left_button_down = self.window.get_mouse_down(MouseButton::Left);
        let press_started = left_button_down && !self.left_button_was_down;
        self.left_button_was_down = left_button_down;

        if press_started {
            if let Some((x, y)) = self.window.get_mouse_pos(MouseMode::Discard) {
                return Ok(Some(InputEvent::PointerDown {
                    x: x.round() as i32,
                    y: y.round() as i32,
                }));
            }
        }

        let event = self
            .window
            .get_keys_pressed(KeyRepeat::No)
            .first()
            .map(|&key| {
                InputEvent::Key(match key {
                    Key::Escape => KeyInput::Escape,
                    Key::Space => KeyInput::Space,
                    Key::Enter => KeyInput::Enter,
                    other => KeyInput::Other(other as u32),
                })
            });
        Ok(event)
    }

    fn is_open(&self) -> bool {
        self.window.is_open()
    }
}
