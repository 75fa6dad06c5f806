//! Emission of synthesized events to the compositor's virtual pointer and virtual keyboard.
//!
//! The actual wire calls live behind the [`VirtualPointerSink`] and [`VirtualKeyboardSink`]
//! traits, implemented over the real `zwlr_virtual_pointer_v1`/`zwp_virtual_keyboard_v1` proxies
//! in `protocol::virtual_pointer`/`protocol::virtual_keyboard`. Keeping the emission logic
//! generic over the sink lets the ordering and atomicity invariants (modifier-before-key,
//! axis-stop-on-zero, frame-closes-every-batch) be unit tested without a live compositor
//! connection.

use anyhow::Result;

use crate::keymap::{KeyDirection, KeymapTracker, ModifierState};
use crate::scheduler::{Axis, AxisSource, KeyState};

pub trait VirtualPointerSink {
    fn motion(&mut self, time: u32, dx: f64, dy: f64);
    fn motion_absolute(&mut self, time: u32, x: u32, y: u32, x_extent: u32, y_extent: u32);
    fn button(&mut self, time: u32, button: u32, pressed: bool);
    fn axis(&mut self, time: u32, axis: Axis, value: f64);
    fn axis_source(&mut self, source: AxisSource);
    fn axis_stop(&mut self, time: u32, axis: Axis);
    fn frame(&mut self);
}

pub trait VirtualKeyboardSink {
    fn keymap(&mut self, bytes: &[u8]) -> Result<()>;
    fn modifiers(&mut self, modifiers: ModifierState);
    fn key(&mut self, time: u32, code: u32, pressed: bool);
}

/// One virtual pointer and one virtual keyboard, shared process-wide.
pub struct VirtualInput<P, K> {
    pointer: P,
    keyboard: K,
    keymap: KeymapTracker,
}

impl<P: VirtualPointerSink, K: VirtualKeyboardSink> VirtualInput<P, K> {
    pub fn new(pointer: P, keyboard: K) -> Self {
        Self {
            pointer,
            keyboard,
            keymap: KeymapTracker::new(),
        }
    }

    /// Forwards a keymap descriptor from the compositor's real keyboard to the virtual one,
    /// unless it is byte-for-byte identical to the last accepted one.
    pub fn handle_keymap_descriptor(&mut self, bytes: &[u8]) -> Result<()> {
        if let Some(bytes) = self.keymap.accept(bytes)? {
            self.keyboard.keymap(bytes)?;
        }
        Ok(())
    }

    /// Emits a key event, preceded atomically (same call, no intervening emission) by a
    /// modifier-state update, then advances the local keymap-state tracker.
    pub fn emit_key(&mut self, time: u32, raw_keycode: u32, state: KeyState) {
        let modifiers = self.keymap.modifiers();
        self.keyboard.modifiers(modifiers);
        self.keyboard.key(time, raw_keycode, state == KeyState::Pressed);

        let direction = match state {
            KeyState::Pressed => KeyDirection::Down,
            KeyState::Released => KeyDirection::Up,
        };
        self.keymap.advance(raw_keycode, direction);
    }

    /// Emits a pointer button event, raw code unchanged, closed with a frame marker.
    pub fn emit_button(&mut self, time: u32, button: u32, state: KeyState) {
        self.pointer.button(time, button, state == KeyState::Pressed);
        self.pointer.frame();
    }

    /// Emits a scroll event. A value of exactly zero is an axis-stop rather than an axis event;
    /// every axis event (or stop) is paired with a matching axis-source.
    pub fn emit_scroll(&mut self, time: u32, axis: Axis, value: f64, source: AxisSource) {
        self.pointer.axis_source(source);
        if value == 0.0 {
            self.pointer.axis_stop(time, axis);
        } else {
            self.pointer.axis(time, axis, value);
        }
        self.pointer.frame();
    }

    /// Emits relative motion immediately (never delayed), closed with a frame marker.
    pub fn emit_motion_rel(&mut self, time: u32, dx: f64, dy: f64) {
        self.pointer.motion(time, dx, dy);
        self.pointer.frame();
    }

    /// Emits absolute motion (used both for real absolute-motion devices and for the synthetic
    /// the synthetic idle keep-alive), closed with a frame marker.
    pub fn emit_motion_abs(&mut self, time: u32, x: u32, y: u32, x_extent: u32, y_extent: u32) {
        self.pointer
            .motion_absolute(time, x, y, x_extent, y_extent);
        self.pointer.frame();
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum PointerCall {
        Motion { dx: f64, dy: f64 },
        MotionAbsolute { x: u32, y: u32 },
        Button { button: u32, pressed: bool },
        Axis { axis: Axis, value: f64 },
        AxisSource(AxisSource),
        AxisStop(Axis),
        Frame,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum KeyboardCall {
        Keymap(Vec<u8>),
        Modifiers(ModifierState),
        Key { code: u32, pressed: bool },
    }

    #[derive(Debug, Default)]
    pub struct RecordingPointer(pub Vec<PointerCall>);

    impl VirtualPointerSink for RecordingPointer {
        fn motion(&mut self, _time: u32, dx: f64, dy: f64) {
            self.0.push(PointerCall::Motion { dx, dy });
        }
        fn motion_absolute(&mut self, _time: u32, x: u32, y: u32, _xe: u32, _ye: u32) {
            self.0.push(PointerCall::MotionAbsolute { x, y });
        }
        fn button(&mut self, _time: u32, button: u32, pressed: bool) {
            self.0.push(PointerCall::Button { button, pressed });
        }
        fn axis(&mut self, _time: u32, axis: Axis, value: f64) {
            self.0.push(PointerCall::Axis { axis, value });
        }
        fn axis_source(&mut self, source: AxisSource) {
            self.0.push(PointerCall::AxisSource(source));
        }
        fn axis_stop(&mut self, _time: u32, axis: Axis) {
            self.0.push(PointerCall::AxisStop(axis));
        }
        fn frame(&mut self) {
            self.0.push(PointerCall::Frame);
        }
    }

    #[derive(Debug, Default)]
    pub struct RecordingKeyboard(pub Vec<KeyboardCall>);

    impl VirtualKeyboardSink for RecordingKeyboard {
        fn keymap(&mut self, bytes: &[u8]) -> Result<()> {
            self.0.push(KeyboardCall::Keymap(bytes.to_vec()));
            Ok(())
        }
        fn modifiers(&mut self, modifiers: ModifierState) {
            self.0.push(KeyboardCall::Modifiers(modifiers));
        }
        fn key(&mut self, _time: u32, code: u32, pressed: bool) {
            self.0.push(KeyboardCall::Key { code, pressed });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn input() -> VirtualInput<RecordingPointer, RecordingKeyboard> {
        VirtualInput::new(RecordingPointer::default(), RecordingKeyboard::default())
    }

    #[test]
    fn modifier_update_precedes_key_emission() {
        let mut vi = input();
        vi.emit_key(0, 30, KeyState::Pressed);
        assert_eq!(
            vi.keyboard.0,
            vec![
                KeyboardCall::Modifiers(ModifierState::default()),
                KeyboardCall::Key {
                    code: 30,
                    pressed: true
                },
            ]
        );
    }

    #[test]
    fn scroll_zero_emits_axis_stop_not_axis() {
        let mut vi = input();
        vi.emit_scroll(0, Axis::Vertical, 0.0, AxisSource::Wheel);
        assert_eq!(
            vi.pointer.0,
            vec![
                PointerCall::AxisSource(AxisSource::Wheel),
                PointerCall::AxisStop(Axis::Vertical),
                PointerCall::Frame,
            ]
        );
    }

    #[test]
    fn nonzero_scroll_emits_axis_event() {
        let mut vi = input();
        vi.emit_scroll(0, Axis::Horizontal, 1.5, AxisSource::Finger);
        assert_eq!(
            vi.pointer.0,
            vec![
                PointerCall::AxisSource(AxisSource::Finger),
                PointerCall::Axis {
                    axis: Axis::Horizontal,
                    value: 1.5
                },
                PointerCall::Frame,
            ]
        );
    }

    #[test]
    fn button_emission_is_closed_with_a_frame() {
        let mut vi = input();
        vi.emit_button(0, 272, KeyState::Pressed);
        assert_eq!(vi.pointer.0.last(), Some(&PointerCall::Frame));
    }

    const MINIMAL_KEYMAP: &str = r#"xkb_keymap {
        xkb_keycodes { minimum = 8; maximum = 255; <AE01> = 10; };
        xkb_types { };
        xkb_compat { };
        xkb_symbols { key <AE01> { [ a ] }; };
    };"#;

    #[test]
    fn identical_keymap_descriptor_forwards_exactly_once() {
        let mut vi = input();
        vi.handle_keymap_descriptor(MINIMAL_KEYMAP.as_bytes()).unwrap();
        vi.handle_keymap_descriptor(MINIMAL_KEYMAP.as_bytes()).unwrap();

        let forwards = vi
            .keyboard
            .0
            .iter()
            .filter(|c| matches!(c, KeyboardCall::Keymap(_)))
            .count();
        assert_eq!(forwards, 1, "identical keymap must forward exactly once");
    }
}
