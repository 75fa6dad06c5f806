//! The single owned daemon state and its Wayland `Dispatch` wiring.
//!
//! Everything the daemon touches lives in one `Context`: there is exactly one thread, so there is
//! no need for interior mutability or locking anywhere in this module (or the crate). The
//! `Dispatch` impls below are thin: each one immediately hands the event off to the matching pure
//! module (`geometry`, `overlay`, `keymap`) and does nothing else.

use std::collections::HashMap;

use anyhow::{bail, Context as _, Result};
use tracing::{debug, info, warn};
use wayland_client::globals::{registry_queue_init, GlobalList, GlobalListContents};
use wayland_client::protocol::{
    wl_buffer, wl_compositor, wl_keyboard, wl_output, wl_region, wl_seat, wl_shm, wl_shm_pool,
    wl_surface,
};
use wayland_client::{delegate_noop, Connection, Dispatch, EventQueue, Proxy, QueueHandle};
use wayland_protocols::xdg::xdg_output::zv1::client::{zxdg_output_manager_v1, zxdg_output_v1};
use wayland_protocols_misc::zwp_virtual_keyboard_v1::v1::client::{
    zwp_virtual_keyboard_manager_v1, zwp_virtual_keyboard_v1,
};
use wayland_protocols_wlr::layer_shell::v1::client::{zwlr_layer_shell_v1, zwlr_layer_surface_v1};
use wayland_protocols_wlr::virtual_pointer::v1::client::{
    zwlr_virtual_pointer_manager_v1, zwlr_virtual_pointer_v1,
};

use crate::cli::Cli;
use crate::cursor::CursorPosition;
use crate::geometry::{GlobalSpace, OutputGeometry, OutputId};
use crate::protocol::layer_shell::OverlaySurface;
use crate::protocol::output::PendingOutput;
use crate::protocol::virtual_keyboard::{self, ProtocolKeyboard};
use crate::protocol::virtual_pointer::ProtocolPointer;
use crate::protocol::versions;
use crate::random::RandomSource;
use crate::scheduler::DelayScheduler;
use crate::virtual_input::VirtualInput;

/// Global singleton proxies bound once at startup and held for the daemon's lifetime.
struct Globals {
    compositor: wl_compositor::WlCompositor,
    shm: wl_shm::WlShm,
    layer_shell: zwlr_layer_shell_v1::ZwlrLayerShellV1,
    xdg_output_manager: zxdg_output_manager_v1::ZxdgOutputManagerV1,
}

pub struct Context {
    conn: Connection,
    qh: QueueHandle<Context>,
    globals: Globals,

    outputs: OutputGeometry,
    pending_outputs: HashMap<OutputId, PendingOutput>,
    xdg_outputs: HashMap<OutputId, zxdg_output_v1::ZxdgOutputV1>,
    wl_outputs: HashMap<OutputId, wl_output::WlOutput>,
    overlays: HashMap<OutputId, OverlaySurface>,
    space: GlobalSpace,

    cursor: CursorPosition,
    scheduler: DelayScheduler,
    rng: RandomSource,

    virtual_input: VirtualInput<ProtocolPointer, ProtocolKeyboard>,

    requested_seat: Option<String>,
}

impl Context {
    pub fn connect(cli: &Cli) -> Result<(Self, EventQueue<Context>)> {
        let conn = Connection::connect_to_env().context("failed to connect to the Wayland display")?;
        let (globals_list, mut event_queue) =
            registry_queue_init::<Context>(&conn).context("failed to initialize registry")?;
        let qh = event_queue.handle();

        let compositor = globals_list
            .bind::<wl_compositor::WlCompositor, _, _>(&qh, versions::COMPOSITOR..=versions::COMPOSITOR, ())
            .context("compositor does not advertise wl_compositor at the required version")?;
        let shm = globals_list
            .bind::<wl_shm::WlShm, _, _>(&qh, versions::SHM..=versions::SHM, ())
            .context("compositor does not advertise wl_shm at the required version")?;
        let layer_shell = globals_list
            .bind::<zwlr_layer_shell_v1::ZwlrLayerShellV1, _, _>(
                &qh,
                versions::LAYER_SHELL..=versions::LAYER_SHELL,
                (),
            )
            .context("compositor does not support wlr-layer-shell at the required version")?;
        let xdg_output_manager = globals_list
            .bind::<zxdg_output_manager_v1::ZxdgOutputManagerV1, _, _>(
                &qh,
                versions::XDG_OUTPUT_MANAGER..=versions::XDG_OUTPUT_MANAGER,
                (),
            )
            .context("compositor does not support xdg-output at the required version")?;
        let virtual_pointer_manager = globals_list
            .bind::<zwlr_virtual_pointer_manager_v1::ZwlrVirtualPointerManagerV1, _, _>(
                &qh,
                versions::VIRTUAL_POINTER_MANAGER..=versions::VIRTUAL_POINTER_MANAGER,
                (),
            )
            .context("compositor does not support wlr-virtual-pointer at the required version")?;
        let virtual_keyboard_manager = globals_list
            .bind::<zwp_virtual_keyboard_manager_v1::ZwpVirtualKeyboardManagerV1, _, _>(
                &qh,
                versions::VIRTUAL_KEYBOARD_MANAGER..=versions::VIRTUAL_KEYBOARD_MANAGER,
                (),
            )
            .context("compositor does not support the virtual-keyboard protocol at the required version")?;
        let seat = globals_list
            .bind::<wl_seat::WlSeat, _, _>(&qh, versions::SEAT..=versions::SEAT, ())
            .context("compositor does not advertise wl_seat at the required version")?;

        let virtual_pointer = virtual_pointer_manager.create_virtual_pointer(Some(&seat), &qh, ());
        let virtual_keyboard = virtual_keyboard_manager.create_virtual_keyboard(&seat, &qh, ());
        // `is_alive()` only reflects destruction the client has already processed; a fresh proxy
        // is always alive until a roundtrip gives the compositor a chance to destroy it, so the
        // liveness check happens below, after the roundtrip rather than here.
        let virtual_keyboard_check = virtual_keyboard.clone();

        let mut ctx = Context {
            conn: conn.clone(),
            qh: qh.clone(),
            globals: Globals {
                compositor,
                shm,
                layer_shell,
                xdg_output_manager,
            },
            outputs: OutputGeometry::new(),
            pending_outputs: HashMap::new(),
            xdg_outputs: HashMap::new(),
            wl_outputs: HashMap::new(),
            overlays: HashMap::new(),
            space: GlobalSpace::default(),
            cursor: CursorPosition::at_origin(),
            scheduler: DelayScheduler::new(cli.max_delay_ms),
            rng: RandomSource::new(),
            virtual_input: VirtualInput::new(
                ProtocolPointer::new(virtual_pointer),
                ProtocolKeyboard::new(virtual_keyboard),
            ),
            requested_seat: cli.seat.clone(),
        };

        ctx.adopt_existing_outputs(&globals_list);

        // Lets every output finish its geometry handshake (wl_output + xdg_output `done`) before
        // the main loop starts, so the first overlay frame is drawn against real geometry.
        event_queue
            .roundtrip(&mut ctx)
            .context("initial roundtrip failed")?;
        virtual_keyboard::reject_if_unauthorized(&virtual_keyboard_check)?;

        Ok((ctx, event_queue))
    }

    /// Binds every `wl_output` already present in the registry at connect time. Outputs that
    /// appear afterward arrive through `Dispatch<WlRegistry, GlobalListContents>` instead.
    fn adopt_existing_outputs(&mut self, globals_list: &GlobalList) {
        let outputs: Vec<(u32, u32)> = globals_list
            .contents()
            .with_list(|list| {
                list.iter()
                    .filter(|g| g.interface == wl_output::WlOutput::interface().name)
                    .map(|g| (g.name, g.version))
                    .collect()
            });
        for (name, version) in outputs {
            self.register_output(name, version);
        }
    }

    fn register_output(&mut self, name: u32, version: u32) {
        let id = OutputId(name);
        if let Err(e) = self.outputs.insert(id) {
            warn!("dropping output {name}: {e:#}");
            return;
        }

        let wl_output = self.conn.display().bind::<wl_output::WlOutput, _, _>(
            name,
            version.min(versions::OUTPUT),
            &self.qh,
            id,
        );
        let xdg_output = self
            .globals
            .xdg_output_manager
            .get_xdg_output(&wl_output, &self.qh, id);

        self.pending_outputs.insert(id, PendingOutput::new());
        self.wl_outputs.insert(id, wl_output);
        self.xdg_outputs.insert(id, xdg_output);
        debug!(output = name, "output bound");
    }

    pub fn connection(&self) -> Connection {
        self.conn.clone()
    }

    pub fn cursor(&self) -> CursorPosition {
        self.cursor
    }

    /// Width and height of the aggregate output bounding box, used to build the `x_extent`/
    /// `y_extent` fields of a synthetic absolute-motion keep-alive event.
    pub fn global_space_size(&self) -> (u32, u32) {
        (self.space.width().max(1) as u32, self.space.height().max(1) as u32)
    }

    pub fn outputs(&self) -> &OutputGeometry {
        &self.outputs
    }

    pub fn scheduler_mut(&mut self) -> &mut DelayScheduler {
        &mut self.scheduler
    }

    pub fn rng_mut(&mut self) -> &mut RandomSource {
        &mut self.rng
    }

    pub fn virtual_input_mut(&mut self) -> &mut VirtualInput<ProtocolPointer, ProtocolKeyboard> {
        &mut self.virtual_input
    }

    /// Walks the cursor toward `desired_end`, marks any newly entered/left overlay dirty, and
    /// forwards the resulting position to the compositor's virtual pointer. Motion bypasses the
    /// delay scheduler entirely and is applied live, unlike keys and buttons.
    pub fn move_cursor(&mut self, time: u32, desired_end: crate::geometry::Point) {
        let touched = crate::cursor::walk(&mut self.cursor, desired_end, &self.outputs);
        for id in [touched.left, touched.entered].into_iter().flatten() {
            if let Some(overlay) = self.overlays.get_mut(&id) {
                overlay.overlay.frame_pending = true;
            }
        }
        self.emit_cursor_snapshot(time);
    }

    /// Emits the current virtual cursor position to the compositor as an absolute motion event,
    /// normalized against the aggregate output bounding box. Shared by real motion forwarding
    /// (`move_cursor`) and the synthetic idle keep-alive, so both report position the same way.
    pub fn emit_cursor_snapshot(&mut self, time: u32) {
        let (extent_x, extent_y) = self.global_space_size();
        let cursor = self.cursor.current;
        self.virtual_input.emit_motion_abs(
            time,
            cursor.x.max(0) as u32,
            cursor.y.max(0) as u32,
            extent_x,
            extent_y,
        );
    }

    /// Draws and submits a frame for every overlay whose buffer has been released by the
    /// compositor and has pending damage.
    pub fn redraw_pending_overlays(&mut self) -> Result<()> {
        let cursor_output = self.outputs.output_at(self.cursor.current).map(|o| o.id);
        for (id, overlay) in self.overlays.iter_mut() {
            if !overlay.overlay.frame_pending {
                continue;
            }
            let cursor_local = if cursor_output == Some(*id) {
                self.outputs.get(*id).map(|o| crate::geometry::Point {
                    x: self.cursor.current.x - o.origin.x,
                    y: self.cursor.current.y - o.origin.y,
                })
            } else {
                None
            };
            overlay.submit_frame(cursor_local)?;
        }
        Ok(())
    }

    fn recompute_space(&mut self, gap_tolerant: bool) -> Result<()> {
        self.space = GlobalSpace::recompute(&self.outputs, gap_tolerant)?;
        Ok(())
    }

    fn create_overlay_for(&mut self, id: OutputId) -> Result<()> {
        let output = self
            .outputs
            .get(id)
            .context("output vanished before overlay creation")?;
        let size = output.size;
        let wl_output = self
            .wl_outputs
            .get(&id)
            .context("no wl_output proxy for output")?
            .clone();
        let surface = OverlaySurface::create(
            &self.globals.compositor,
            &self.globals.layer_shell,
            &self.globals.shm,
            &wl_output,
            size,
            &mut self.rng,
            &self.qh,
        )?;
        self.overlays.insert(id, surface);
        Ok(())
    }
}

impl Dispatch<wayland_client::protocol::wl_registry::WlRegistry, GlobalListContents> for Context {
    fn event(
        state: &mut Self,
        _proxy: &wayland_client::protocol::wl_registry::WlRegistry,
        event: wayland_client::protocol::wl_registry::Event,
        _data: &GlobalListContents,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        use wayland_client::protocol::wl_registry::Event;
        match event {
            Event::Global {
                name,
                interface,
                version,
            } if interface == wl_output::WlOutput::interface().name => {
                state.register_output(name, version);
            }
            Event::GlobalRemove { name } => {
                let id = OutputId(name);
                if state.outputs.get(id).is_some() {
                    state.outputs.remove(id);
                    state.pending_outputs.remove(&id);
                    state.xdg_outputs.remove(&id);
                    state.wl_outputs.remove(&id);
                    state.overlays.remove(&id);
                    if let Err(e) = state.recompute_space(true) {
                        warn!("output layout became invalid after unplug: {e:#}");
                    }
                    info!(output = name, "output removed");
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_output::WlOutput, OutputId> for Context {
    fn event(
        state: &mut Self,
        _proxy: &wl_output::WlOutput,
        event: wl_output::Event,
        data: &OutputId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if matches!(event, wl_output::Event::Done) {
            finish_output(state, *data);
            return;
        }
        if let Some(pending) = state.pending_outputs.get_mut(data) {
            pending.handle_wl_output_event(event);
        }
    }
}

impl Dispatch<zxdg_output_v1::ZxdgOutputV1, OutputId> for Context {
    fn event(
        state: &mut Self,
        _proxy: &zxdg_output_v1::ZxdgOutputV1,
        event: zxdg_output_v1::Event,
        data: &OutputId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if matches!(event, zxdg_output_v1::Event::Done) {
            finish_output(state, *data);
            return;
        }
        if let Some(pending) = state.pending_outputs.get_mut(data) {
            pending.handle_xdg_output_event(event);
        }
    }
}

fn finish_output(state: &mut Context, id: OutputId) {
    let Some(pending) = state.pending_outputs.get(&id).copied() else {
        return;
    };
    let Some(output) = state.outputs.get_mut(id) else {
        return;
    };
    if output.init_done {
        return; // a second `done` (e.g. xdg-output's, after wl_output's) is a no-op refresh.
    }
    pending.finish(output);

    if let Err(e) = state.recompute_space(false) {
        warn!("fatal output layout error: {e:#}");
        return;
    }
    if let Err(e) = state.create_overlay_for(id) {
        warn!("failed to create overlay for output: {e:#}");
    }
}

impl Dispatch<zwlr_layer_surface_v1::ZwlrLayerSurfaceV1, OutputId> for Context {
    fn event(
        state: &mut Self,
        proxy: &zwlr_layer_surface_v1::ZwlrLayerSurfaceV1,
        event: zwlr_layer_surface_v1::Event,
        data: &OutputId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            zwlr_layer_surface_v1::Event::Configure { serial, .. } => {
                if let Some(overlay) = state.overlays.get_mut(data) {
                    crate::protocol::layer_shell::handle_configure(proxy, &mut overlay.overlay, serial);
                }
            }
            zwlr_layer_surface_v1::Event::Closed => {
                state.overlays.remove(data);
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_buffer::WlBuffer, ()> for Context {
    fn event(
        state: &mut Self,
        proxy: &wl_buffer::WlBuffer,
        event: wl_buffer::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if matches!(event, wl_buffer::Event::Release) {
            for overlay in state.overlays.values_mut() {
                if overlay.buffer.id() == proxy.id() {
                    overlay.overlay.frame_released = true;
                    break;
                }
            }
        }
    }
}

impl Dispatch<wl_seat::WlSeat, ()> for Context {
    fn event(
        state: &mut Self,
        proxy: &wl_seat::WlSeat,
        event: wl_seat::Event,
        _data: &(),
        _conn: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_seat::Event::Capabilities {
                capabilities: wayland_client::WEnum::Value(caps),
            } => {
                if caps.contains(wl_seat::Capability::Keyboard) {
                    proxy.get_keyboard(qh, ());
                }
            }
            wl_seat::Event::Name { name } => {
                if let Some(requested) = &state.requested_seat {
                    if requested != &name {
                        warn!(
                            requested,
                            bound = name.as_str(),
                            "bound seat name does not match --seat; continuing with the seat the compositor gave us"
                        );
                    }
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_keyboard::WlKeyboard, ()> for Context {
    fn event(
        state: &mut Self,
        _proxy: &wl_keyboard::WlKeyboard,
        event: wl_keyboard::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_keyboard::Event::Keymap { fd, size, .. } = event {
            match read_keymap_bytes(fd, size as usize) {
                Ok(bytes) => {
                    if let Err(e) = state.virtual_input.handle_keymap_descriptor(&bytes) {
                        warn!("failed to forward keymap to virtual keyboard: {e:#}");
                    }
                }
                Err(e) => warn!("failed to read keymap fd from compositor: {e:#}"),
            }
        }
    }
}

fn read_keymap_bytes(fd: std::os::fd::OwnedFd, size: usize) -> Result<Vec<u8>> {
    use std::os::fd::AsRawFd;
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ,
            libc::MAP_PRIVATE,
            fd.as_raw_fd(),
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        bail!(
            "mmap of compositor keymap fd failed: {}",
            std::io::Error::last_os_error()
        );
    }
    let bytes = unsafe { std::slice::from_raw_parts(ptr as *const u8, size).to_vec() };
    unsafe {
        libc::munmap(ptr, size);
    }
    Ok(bytes)
}

delegate_noop!(Context: ignore wl_compositor::WlCompositor);
delegate_noop!(Context: ignore wl_shm::WlShm);
delegate_noop!(Context: ignore wl_shm_pool::WlShmPool);
delegate_noop!(Context: ignore wl_region::WlRegion);
delegate_noop!(Context: ignore wl_surface::WlSurface);
delegate_noop!(Context: ignore zwlr_layer_shell_v1::ZwlrLayerShellV1);
delegate_noop!(Context: ignore zxdg_output_manager_v1::ZxdgOutputManagerV1);
delegate_noop!(Context: ignore zwlr_virtual_pointer_manager_v1::ZwlrVirtualPointerManagerV1);
delegate_noop!(Context: ignore zwlr_virtual_pointer_v1::ZwlrVirtualPointerV1);
delegate_noop!(Context: ignore zwp_virtual_keyboard_manager_v1::ZwpVirtualKeyboardManagerV1);
delegate_noop!(Context: ignore zwp_virtual_keyboard_v1::ZwpVirtualKeyboardV1);
