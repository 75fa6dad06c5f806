//! `zwp_virtual_keyboard_v1` wrapper implementing [`VirtualKeyboardSink`].
//!
//! The keymap descriptor is handed to the compositor as a memory-mapped, unlinked shared-memory
//! object, same mechanism as the overlay buffers (see [`crate::protocol::shm`]).

use std::os::fd::AsFd;

use anyhow::{bail, Result};
use wayland_client::protocol::wl_keyboard;
use wayland_protocols_misc::zwp_virtual_keyboard_v1::v1::client::zwp_virtual_keyboard_v1::ZwpVirtualKeyboardV1;

use crate::keymap::ModifierState;
use crate::virtual_input::VirtualKeyboardSink;

pub struct ProtocolKeyboard {
    proxy: ZwpVirtualKeyboardV1,
}

impl ProtocolKeyboard {
    /// Wraps a freshly created virtual-keyboard proxy.
    ///
    /// A compositor that hands back an unauthorized/no-op virtual keyboard (one that
    /// silently drops every request) is a fatal configuration error rather than something to
    /// degrade gracefully from; callers are expected to have already checked the proxy is backed
    /// by a real protocol object before constructing this wrapper.
    pub fn new(proxy: ZwpVirtualKeyboardV1) -> Self {
        Self { proxy }
    }
}

impl VirtualKeyboardSink for ProtocolKeyboard {
    fn keymap(&mut self, bytes: &[u8]) -> Result<()> {
        let memfd = memfd_with_contents(bytes)?;
        self.proxy.keymap(
            wl_keyboard::KeymapFormat::XkbV1 as u32,
            memfd.as_fd(),
            bytes.len() as u32,
        );
        Ok(())
    }

    fn modifiers(&mut self, modifiers: ModifierState) {
        self.proxy.modifiers(
            modifiers.depressed,
            modifiers.latched,
            modifiers.locked,
            modifiers.group,
        );
    }

    fn key(&mut self, time: u32, code: u32, pressed: bool) {
        let state = if pressed {
            wl_keyboard::KeyState::Pressed
        } else {
            wl_keyboard::KeyState::Released
        };
        self.proxy.key(time, code, state as u32);
    }
}

/// Writes `bytes` into an anonymous, sealed memfd and rewinds it for the compositor to read.
fn memfd_with_contents(bytes: &[u8]) -> Result<std::os::fd::OwnedFd> {
    use std::ffi::CString;
    use std::os::fd::FromRawFd;

    let name = CString::new("kloak-keymap").expect("static name has no interior NUL");
    let raw = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
    if raw < 0 {
        bail!(
            "memfd_create for keymap descriptor failed: {}",
            std::io::Error::last_os_error()
        );
    }
    let fd = unsafe { std::os::fd::OwnedFd::from_raw_fd(raw) };

    let rv = unsafe { libc::ftruncate(std::os::fd::AsRawFd::as_raw_fd(&fd), bytes.len() as libc::off_t) };
    if rv != 0 {
        bail!("ftruncate of keymap memfd failed: {}", std::io::Error::last_os_error());
    }

    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            bytes.len(),
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            std::os::fd::AsRawFd::as_raw_fd(&fd),
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        bail!("mmap of keymap memfd failed: {}", std::io::Error::last_os_error());
    }
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
        libc::munmap(ptr, bytes.len());
    }

    Ok(fd)
}

/// A real `zwp_virtual_keyboard_v1` must accept at least one request before the daemon trusts
/// it to carry synthesized keys; some compositors hand back a disconnected stub to
/// unauthorized clients instead of failing the bind outright.
pub fn reject_if_unauthorized(proxy: &ZwpVirtualKeyboardV1) -> Result<()> {
    if !proxy.is_alive() {
        bail!("compositor returned an unauthorized virtual keyboard");
    }
    Ok(())
}
