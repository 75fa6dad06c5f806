//! Keymap propagation and modifier-state tracking.
//!
//! Keymap compilation and modifier-state bookkeeping are delegated entirely to `xkbcommon`,
//! treated as an opaque library that accepts a text keymap and answers modifier-state queries.
//! This module's own job is just the bookkeeping around it: the byte-for-byte fingerprint
//! comparison that suppresses redundant keymap updates, and the constant `+8` keycode offset
//! between the raw evdev convention and the XKB convention.

use anyhow::{Context, Result};
use xkbcommon::xkb;

/// Evdev keycodes are offset by 8 from the XKB keycode space the keymap-state tracker expects.
/// This offset applies only to keymap-state updates (`update_key`), never to the keycode emitted
/// on the wire to the virtual keyboard, which stays in the raw evdev convention.
const EVDEV_XKB_KEYCODE_OFFSET: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDirection {
    Down,
    Up,
}

/// Snapshot of modifier and layout state to push to the virtual keyboard before emitting a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModifierState {
    pub depressed: u32,
    pub latched: u32,
    pub locked: u32,
    pub group: u32,
}

/// Tracks the currently accepted keymap and the live XKB state derived from it.
pub struct KeymapTracker {
    context: xkb::Context,
    accepted_bytes: Option<Vec<u8>>,
    state: Option<xkb::State>,
}

impl Default for KeymapTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl KeymapTracker {
    pub fn new() -> Self {
        Self {
            context: xkb::Context::new(xkb::CONTEXT_NO_FLAGS),
            accepted_bytes: None,
            state: None,
        }
    }

    /// True once a keymap has been accepted and a live state exists.
    pub fn is_ready(&self) -> bool {
        self.state.is_some()
    }

    /// Compares `bytes` against the previously accepted keymap. If identical, the descriptor is
    /// dropped silently and `Ok(None)` is returned.
    /// If different, recompiles the tracker and returns `Some(bytes)` for the caller to forward
    /// to the virtual keyboard verbatim.
    pub fn accept<'a>(&mut self, bytes: &'a [u8]) -> Result<Option<&'a [u8]>> {
        if self.accepted_bytes.as_deref() == Some(bytes) {
            return Ok(None);
        }

        let text = std::str::from_utf8(bytes).context("keymap descriptor is not valid UTF-8")?;
        let keymap = xkb::Keymap::new_from_string(
            &self.context,
            text.to_owned(),
            xkb::KEYMAP_FORMAT_TEXT_V1,
            xkb::KEYMAP_COMPILE_NO_FLAGS,
        )
        .context("failed to compile keymap")?;

        self.state = Some(xkb::State::new(&keymap));
        self.accepted_bytes = Some(bytes.to_vec());
        Ok(Some(bytes))
    }

    /// Current modifier/layout snapshot, to push before emitting a key event.
    pub fn modifiers(&self) -> ModifierState {
        let Some(state) = &self.state else {
            return ModifierState::default();
        };
        ModifierState {
            depressed: state.serialize_mods(xkb::STATE_MODS_DEPRESSED),
            latched: state.serialize_mods(xkb::STATE_MODS_LATCHED),
            locked: state.serialize_mods(xkb::STATE_MODS_LOCKED),
            group: state.serialize_layout(xkb::STATE_LAYOUT_EFFECTIVE),
        }
    }

    /// Advances the tracker after emitting a raw-convention `keycode` in `direction`.
    pub fn advance(&mut self, raw_keycode: u32, direction: KeyDirection) {
        let Some(state) = &mut self.state else {
            return;
        };
        let xkb_code = xkb::Keycode::new(raw_keycode + EVDEV_XKB_KEYCODE_OFFSET);
        let xkb_direction = match direction {
            KeyDirection::Down => xkb::KeyDirection::Down,
            KeyDirection::Up => xkb::KeyDirection::Up,
        };
        state.update_key(xkb_code, xkb_direction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_KEYMAP: &str = r#"xkb_keymap {
        xkb_keycodes { minimum = 8; maximum = 255; <AE01> = 10; };
        xkb_types { };
        xkb_compat { };
        xkb_symbols { key <AE01> { [ a ] }; };
    };"#;

    #[test]
    fn identical_keymap_bytes_are_accepted_only_once() {
        let mut tracker = KeymapTracker::new();
        let bytes = MINIMAL_KEYMAP.as_bytes();

        let first = tracker.accept(bytes).unwrap();
        assert!(first.is_some());

        let second = tracker.accept(bytes).unwrap();
        assert!(second.is_none(), "identical keymap must be dropped silently");
    }

    #[test]
    fn different_keymap_bytes_are_forwarded() {
        let mut tracker = KeymapTracker::new();
        tracker.accept(MINIMAL_KEYMAP.as_bytes()).unwrap();

        let other = MINIMAL_KEYMAP.replace("<AE01> = 10", "<AE01> = 11");
        let result = tracker.accept(other.as_bytes()).unwrap();
        assert!(result.is_some());
    }

    #[test]
    fn modifiers_are_default_before_any_keymap_is_accepted() {
        let tracker = KeymapTracker::new();
        assert_eq!(tracker.modifiers(), ModifierState::default());
        assert!(!tracker.is_ready());
    }

    #[test]
    fn advance_does_not_panic_without_a_keymap() {
        let mut tracker = KeymapTracker::new();
        tracker.advance(30, KeyDirection::Down);
    }
}
