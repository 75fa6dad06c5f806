//! Exclusive device capture via libinput, and translation of its event stream into either a
//! [`PacketKind`] for the delay scheduler or an immediate cursor-walk displacement.
//!
//! Device open/close is backed by `udev` for enumeration and a raw `EVIOCGRAB` ioctl for
//! exclusivity, following the same "open with rustix, own the fd" shape as a compositor's own
//! backend session handling, just applied to every input device rather than a GPU/TTY.

use std::cell::RefCell;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use input::event::keyboard::{KeyState as LibinputKeyState, KeyboardEventTrait};
use input::event::pointer::{Axis as LibinputAxis, PointerAxisEvent, PointerScrollEvent};
use input::event::{DeviceEvent, Event, KeyboardEvent, PointerEvent};
use input::{Device, Libinput, LibinputInterface};
use rustix::fs::{Mode, OFlags};

use crate::scheduler::{Axis, AxisSource, KeyState, PacketKind};

/// `EVIOCGRAB` from `linux/input.h`: `_IOW('E', 0x90, int)`. Nonzero to grab, zero to release.
const EVIOCGRAB: libc::c_ulong = 0x4004_4590;

/// `libinput`'s C core swallows any `Err` returned from `open_restricted` — it logs the device as
/// skipped and keeps going, without surfacing it through `Libinput::dispatch()`'s `Result` or any
/// event. A failed grab must still be fatal (partial capture is a side channel in itself), so
/// `open_restricted` records the failure here for `CaptureBackend::dispatch` to observe and raise.
type GrabFailure = Rc<RefCell<Option<(PathBuf, i32)>>>;

struct DeviceInterface {
    grab_failure: GrabFailure,
}

impl LibinputInterface for DeviceInterface {
    /// Opens the device and immediately grabs it exclusively: from
    /// this point no other process on the system, including the compositor's own evdev backend,
    /// sees raw events from this fd.
    fn open_restricted(&mut self, path: &Path, flags: i32) -> std::result::Result<OwnedFd, i32> {
        let oflags = OFlags::from_bits_truncate(flags as u32);
        let fd = rustix::fs::open(path, oflags, Mode::empty()).map_err(|e| e.raw_os_error())?;

        let rv = unsafe { libc::ioctl(fd.as_raw_fd(), EVIOCGRAB, 1i32) };
        if rv != 0 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO);
            *self.grab_failure.borrow_mut() = Some((path.to_path_buf(), errno));
            return Err(errno);
        }

        Ok(fd)
    }

    fn close_restricted(&mut self, fd: OwnedFd) {
        drop(fd);
    }
}

/// Enables tap-to-click on a newly added touchpad, a no-op (returns an `Err` result libinput
/// itself swallows as "unsupported") on devices without the capability.
fn enable_tap_to_click(device: &mut Device) {
    let _ = device.config_tap_set_enabled(true);
}

/// Either an immediate cursor displacement or a packet destined for the delay scheduler.
pub enum CapturedEvent {
    MotionRel { dx: f64, dy: f64 },
    MotionAbs { x: f64, y: f64 },
    Delayed(PacketKind),
}

/// Owns the libinput context and exposes it as a pollable fd plus a translated event stream.
pub struct CaptureBackend {
    libinput: Libinput,
    grab_failure: GrabFailure,
}

impl CaptureBackend {
    pub fn new(seat: &str) -> Result<Self> {
        let grab_failure: GrabFailure = Rc::new(RefCell::new(None));
        let mut libinput = Libinput::new_with_udev(DeviceInterface {
            grab_failure: grab_failure.clone(),
        });
        libinput
            .udev_assign_seat(seat)
            .map_err(|()| anyhow::anyhow!("failed to assign udev seat {seat:?} to libinput"))?;
        check_grab_failure(&grab_failure)?;
        Ok(Self { libinput, grab_failure })
    }

    /// Raw fd to register with the event loop.
    pub fn as_raw_fd(&self) -> i32 {
        self.libinput.as_raw_fd()
    }

    /// Drains pending udev/evdev activity and translates it into [`CapturedEvent`]s, grabbing
    /// newly added devices and enabling tap-to-click on them as they appear.
    pub fn dispatch(&mut self, mut handle: impl FnMut(CapturedEvent)) -> Result<()> {
        self.libinput
            .dispatch()
            .context("libinput dispatch failed")?;
        check_grab_failure(&self.grab_failure)?;

        for event in &mut self.libinput {
            match event {
                Event::Device(DeviceEvent::Added(added)) => {
                    let mut device = added.device();
                    enable_tap_to_click(&mut device);
                }
                Event::Keyboard(KeyboardEvent::Key(key_event)) => {
                    let state = match key_event.key_state() {
                        LibinputKeyState::Pressed => KeyState::Pressed,
                        LibinputKeyState::Released => KeyState::Released,
                    };
                    handle(CapturedEvent::Delayed(PacketKind::Key {
                        code: key_event.key(),
                        state,
                    }));
                }
                Event::Pointer(PointerEvent::Motion(motion)) => {
                    handle(CapturedEvent::MotionRel {
                        dx: motion.dx(),
                        dy: motion.dy(),
                    });
                }
                Event::Pointer(PointerEvent::MotionAbsolute(motion)) => {
                    handle(CapturedEvent::MotionAbs {
                        x: motion.absolute_x_transformed(u32::MAX),
                        y: motion.absolute_y_transformed(u32::MAX),
                    });
                }
                Event::Pointer(PointerEvent::Button(button)) => {
                    let state = match button.button_state() {
                        input::event::pointer::ButtonState::Pressed => KeyState::Pressed,
                        input::event::pointer::ButtonState::Released => KeyState::Released,
                    };
                    handle(CapturedEvent::Delayed(PacketKind::PointerButton {
                        button: button.button(),
                        state,
                    }));
                }
                Event::Pointer(PointerEvent::ScrollWheel(scroll)) => {
                    emit_scroll_axes(&scroll, AxisSource::Wheel, &mut handle);
                }
                Event::Pointer(PointerEvent::ScrollFinger(scroll)) => {
                    emit_scroll_axes(&scroll, AxisSource::Finger, &mut handle);
                }
                Event::Pointer(PointerEvent::ScrollContinuous(scroll)) => {
                    emit_scroll_axes(&scroll, AxisSource::Continuous, &mut handle);
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Turns a recorded grab failure into a hard error. Partial capture — some devices grabbed
/// exclusively, one left readable by every other process — is itself the side channel this daemon
/// exists to close, so it is never treated as a degraded-but-running condition.
fn check_grab_failure(grab_failure: &GrabFailure) -> Result<()> {
    if let Some((path, errno)) = grab_failure.borrow_mut().take() {
        bail!(
            "failed to exclusively grab input device {}: {}",
            path.display(),
            std::io::Error::from_raw_os_error(errno)
        );
    }
    Ok(())
}

fn emit_scroll_axes(
    scroll: &impl PointerScrollEvent,
    source: AxisSource,
    handle: &mut impl FnMut(CapturedEvent),
) {
    if scroll.has_axis(LibinputAxis::Horizontal) {
        handle(CapturedEvent::Delayed(PacketKind::PointerScroll {
            axis: Axis::Horizontal,
            value: scroll.scroll_value(LibinputAxis::Horizontal),
            source,
        }));
    }
    if scroll.has_axis(LibinputAxis::Vertical) {
        handle(CapturedEvent::Delayed(PacketKind::PointerScroll {
            axis: Axis::Vertical,
            value: scroll.scroll_value(LibinputAxis::Vertical),
            source,
        }));
    }
}

