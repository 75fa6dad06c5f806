//! Per-output overlay drawing state: the pixel buffer, the crosshair, and damage bookkeeping.
//!
//! This module is deliberately Wayland-unaware: it owns the ARGB8888 pixel buffer and computes
//! what to draw and what to damage, in local (per-output) pixel coordinates. The actual
//! `wl_buffer`/`wl_surface` plumbing lives in `protocol::layer_shell`, which calls into
//! [`Overlay::draw_frame`] and then ships the buffer and the returned damage rectangles to the
//! compositor.

use crate::geometry::Point;

/// Radius, in pixels, of the crosshair reticle on each side of its center.
pub const CURSOR_RADIUS: i32 = 15;

pub const BYTES_PER_PIXEL: i32 = 4;

const TRANSPARENT: u32 = 0x0000_0000;
const OPAQUE_RED: u32 = 0xFFFF_0000;

/// Sentinel meaning "the cursor was not drawn on this overlay last frame".
const NOT_ON_LAYER: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageRect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl DamageRect {
    /// Clamps negative coordinates to zero, shrinking width/height to compensate so the opposite
    /// edge stays put — the compositor rejects a damage region with a negative origin.
    fn clamped(x: i32, y: i32, w: i32, h: i32) -> Self {
        let (x0, w0) = clamp_axis(x, w);
        let (y0, h0) = clamp_axis(y, h);
        Self {
            x: x0,
            y: y0,
            w: w0,
            h: h0,
        }
    }
}

fn clamp_axis(origin: i32, len: i32) -> (i32, i32) {
    if origin >= 0 {
        (origin, len)
    } else {
        (0, (origin + len).max(0))
    }
}

/// Per-output pixel buffer and drawing bookkeeping.
pub struct Overlay {
    pub width: i32,
    pub height: i32,
    pub stride: i32,
    pub pixels: Vec<u8>,
    last_drawn_cursor: Point,
    pub frame_released: bool,
    pub frame_pending: bool,
    /// True once the layer surface has received its first `configure` event.
    pub configured: bool,
}

impl Overlay {
    pub fn new(width: i32, height: i32) -> Self {
        let stride = width * BYTES_PER_PIXEL;
        let size = (stride * height).max(0) as usize;
        Self {
            width,
            height,
            stride,
            pixels: vec![0u8; size],
            last_drawn_cursor: Point {
                x: NOT_ON_LAYER,
                y: NOT_ON_LAYER,
            },
            frame_released: true,
            frame_pending: false,
            configured: false,
        }
    }

    fn was_on_layer(&self) -> bool {
        self.last_drawn_cursor.x >= 0 && self.last_drawn_cursor.y >= 0
    }

    fn put_pixel(&mut self, x: i32, y: i32, argb: u32) {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return;
        }
        let offset = (y * self.stride + x * BYTES_PER_PIXEL) as usize;
        self.pixels[offset..offset + 4].copy_from_slice(&argb.to_be_bytes());
    }

    /// Draws one frame and returns the damage rectangles to submit.
    ///
    /// `cursor_local` is `Some(p)` when the virtual cursor is currently on this overlay's output,
    /// in this overlay's local pixel coordinates; `None` otherwise. Returns `None` if the frame
    /// should be skipped (buffer not yet released, or surface not yet configured).
    pub fn draw_frame(&mut self, cursor_local: Option<Point>) -> Option<Vec<DamageRect>> {
        if !self.frame_released || !self.configured {
            return None;
        }

        let mut damage = Vec::with_capacity(2);

        if self.was_on_layer() {
            let p = self.last_drawn_cursor;
            self.clear_block(p);
            damage.push(DamageRect::clamped(
                p.x - CURSOR_RADIUS,
                p.y - CURSOR_RADIUS,
                2 * CURSOR_RADIUS + 1,
                2 * CURSOR_RADIUS + 1,
            ));
        }

        if let Some(p) = cursor_local {
            self.draw_crosshair(p);
            damage.push(DamageRect::clamped(
                p.x - CURSOR_RADIUS,
                p.y - CURSOR_RADIUS,
                2 * CURSOR_RADIUS + 1,
                2 * CURSOR_RADIUS + 1,
            ));
            self.last_drawn_cursor = p;
        } else {
            self.last_drawn_cursor = Point {
                x: NOT_ON_LAYER,
                y: NOT_ON_LAYER,
            };
        }

        self.frame_pending = false;
        self.frame_released = false; // held until the compositor's release listener fires.

        Some(damage)
    }

    fn clear_block(&mut self, center: Point) {
        for dy in -CURSOR_RADIUS..=CURSOR_RADIUS {
            for dx in -CURSOR_RADIUS..=CURSOR_RADIUS {
                self.put_pixel(center.x + dx, center.y + dy, TRANSPARENT);
            }
        }
    }

    fn draw_crosshair(&mut self, center: Point) {
        for dy in -CURSOR_RADIUS..=CURSOR_RADIUS {
            for dx in -CURSOR_RADIUS..=CURSOR_RADIUS {
                let on_axis = dx == 0 || dy == 0;
                let color = if on_axis { OPAQUE_RED } else { TRANSPARENT };
                self.put_pixel(center.x + dx, center.y + dy, color);
            }
        }
    }
}
