//! `zwlr_virtual_pointer_v1` wrapper implementing [`VirtualPointerSink`].

use wayland_client::WEnum;
use wayland_protocols_wlr::virtual_pointer::v1::client::zwlr_virtual_pointer_v1::{
    self, ZwlrVirtualPointerV1,
};

use crate::scheduler::{Axis, AxisSource};
use crate::virtual_input::VirtualPointerSink;

pub struct ProtocolPointer {
    proxy: ZwlrVirtualPointerV1,
}

impl ProtocolPointer {
    pub fn new(proxy: ZwlrVirtualPointerV1) -> Self {
        Self { proxy }
    }
}

fn wire_axis(axis: Axis) -> zwlr_virtual_pointer_v1::Axis {
    match axis {
        Axis::Horizontal => zwlr_virtual_pointer_v1::Axis::HorizontalScroll,
        Axis::Vertical => zwlr_virtual_pointer_v1::Axis::VerticalScroll,
    }
}

fn wire_axis_source(source: AxisSource) -> zwlr_virtual_pointer_v1::AxisSource {
    match source {
        AxisSource::Wheel => zwlr_virtual_pointer_v1::AxisSource::Wheel,
        AxisSource::Finger => zwlr_virtual_pointer_v1::AxisSource::Finger,
        AxisSource::Continuous => zwlr_virtual_pointer_v1::AxisSource::Continuous,
    }
}

impl VirtualPointerSink for ProtocolPointer {
    fn motion(&mut self, time: u32, dx: f64, dy: f64) {
        self.proxy.motion(time, dx, dy);
    }

    fn motion_absolute(&mut self, time: u32, x: u32, y: u32, x_extent: u32, y_extent: u32) {
        self.proxy.motion_absolute(time, x, y, x_extent, y_extent);
    }

    fn button(&mut self, time: u32, button: u32, pressed: bool) {
        let state = if pressed {
            zwlr_virtual_pointer_v1::ButtonState::Pressed
        } else {
            zwlr_virtual_pointer_v1::ButtonState::Released
        };
        self.proxy.button(time, button, WEnum::Value(state));
    }

    fn axis(&mut self, time: u32, axis: Axis, value: f64) {
        self.proxy.axis(time, WEnum::Value(wire_axis(axis)), value);
    }

    fn axis_source(&mut self, source: AxisSource) {
        self.proxy
            .axis_source(WEnum::Value(wire_axis_source(source)));
    }

    fn axis_stop(&mut self, time: u32, axis: Axis) {
        self.proxy.axis_stop(time, WEnum::Value(wire_axis(axis)));
    }

    fn frame(&mut self) {
        self.proxy.frame();
    }
}
