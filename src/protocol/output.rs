//! Translating `wl_output`/`zxdg_output_v1` events into [`crate::geometry::Output`] updates.
//!
//! Each output reports its geometry over several uncoordinated events (`wl_output`'s
//! `geometry`/`mode`, `zxdg_output_v1`'s `logical_position`/`logical_size`) terminated by a
//! `done` event on each object. The pure accumulation logic lives here so the `Dispatch` impls
//! wired up in `state.rs` stay thin pattern matches; everything below is unit tested without a
//! live compositor connection.

use wayland_client::protocol::wl_output;
use wayland_protocols::xdg::xdg_output::zv1::client::zxdg_output_v1;

use crate::geometry::{Output, Point, Size};

/// Per-output accumulator for geometry fields arriving across several events.
///
/// The logical position/size reported by `zxdg_output_v1` take precedence over `wl_output`'s raw
/// geometry/mode when both are present, matching the usual compositor behavior of reporting
/// scaled, transformed logical coordinates through xdg-output.
#[derive(Debug, Default, Clone, Copy)]
pub struct PendingOutput {
    physical_origin: Option<Point>,
    mode_size: Option<Size>,
    logical_origin: Option<Point>,
    logical_size: Option<Size>,
}

impl PendingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_wl_output_event(&mut self, event: wl_output::Event) {
        match event {
            wl_output::Event::Geometry { x, y, .. } => {
                self.physical_origin = Some(Point { x, y });
            }
            wl_output::Event::Mode { width, height, .. } => {
                self.mode_size = Some(Size { w: width, h: height });
            }
            _ => {}
        }
    }

    pub fn handle_xdg_output_event(&mut self, event: zxdg_output_v1::Event) {
        match event {
            zxdg_output_v1::Event::LogicalPosition { x, y } => {
                self.logical_origin = Some(Point { x, y });
            }
            zxdg_output_v1::Event::LogicalSize { width, height } => {
                self.logical_size = Some(Size { w: width, h: height });
            }
            _ => {}
        }
    }

    /// Applies the accumulated fields to `output` and marks it done, called on the `wl_output`
    /// `done` event. Falls back to the raw `wl_output` geometry/mode when xdg-output
    /// hasn't reported logical values, which happens on compositors too old to bind it past the
    /// minimum version but that otherwise still advertise the global.
    pub fn finish(&self, output: &mut Output) {
        output.origin = self.logical_origin.or(self.physical_origin).unwrap_or(output.origin);
        output.size = self.logical_size.or(self.mode_size).unwrap_or(output.size);
        output.init_done = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_geometry_takes_precedence_over_physical() {
        let mut pending = PendingOutput::new();
        pending.handle_wl_output_event(wl_output::Event::Geometry {
            x: 10,
            y: 10,
            physical_width: 0,
            physical_height: 0,
            subpixel: wayland_client::WEnum::Value(wl_output::Subpixel::Unknown),
            make: String::new(),
            model: String::new(),
            transform: wayland_client::WEnum::Value(wl_output::Transform::Normal),
        });
        pending.handle_wl_output_event(wl_output::Event::Mode {
            flags: wayland_client::WEnum::Value(wl_output::Mode::Current),
            width: 640,
            height: 480,
            refresh: 60000,
        });
        pending.handle_xdg_output_event(zxdg_output_v1::Event::LogicalPosition { x: 1920, y: 0 });
        pending.handle_xdg_output_event(zxdg_output_v1::Event::LogicalSize {
            width: 1280,
            height: 1024,
        });

        let mut output = Output {
            id: crate::geometry::OutputId(1),
            origin: Point { x: 0, y: 0 },
            size: Size { w: 0, h: 0 },
            init_done: false,
        };
        pending.finish(&mut output);

        assert_eq!(output.origin, Point { x: 1920, y: 0 });
        assert_eq!(output.size, Size { w: 1280, h: 1024 });
        assert!(output.init_done);
    }

    #[test]
    fn falls_back_to_physical_geometry_without_xdg_output() {
        let mut pending = PendingOutput::new();
        pending.handle_wl_output_event(wl_output::Event::Geometry {
            x: 0,
            y: 600,
            physical_width: 0,
            physical_height: 0,
            subpixel: wayland_client::WEnum::Value(wl_output::Subpixel::Unknown),
            make: String::new(),
            model: String::new(),
            transform: wayland_client::WEnum::Value(wl_output::Transform::Normal),
        });
        pending.handle_wl_output_event(wl_output::Event::Mode {
            flags: wayland_client::WEnum::Value(wl_output::Mode::Current),
            width: 800,
            height: 600,
            refresh: 60000,
        });

        let mut output = Output {
            id: crate::geometry::OutputId(2),
            origin: Point { x: 0, y: 0 },
            size: Size { w: 0, h: 0 },
            init_done: false,
        };
        pending.finish(&mut output);

        assert_eq!(output.origin, Point { x: 0, y: 600 });
        assert_eq!(output.size, Size { w: 800, h: 600 });
    }
}
