use std::os::fd::BorrowedFd;
use std::time::Duration;

use anyhow::{Context, Result};
use calloop::generic::Generic;
use calloop::timer::{TimeoutAction, Timer};
use calloop::{EventLoop, Interest, Mode, PostAction};
use calloop_wayland_source::WaylandSource;
use clap::Parser;
use tracing::{info, warn};

use kloak::capture::{CaptureBackend, CapturedEvent};
use kloak::cli::Cli;
use kloak::clock::now_ms;
use kloak::geometry::Point;
use kloak::scheduler::PacketKind;
use kloak::state::Context as DaemonContext;

/// Top-level daemon state handed to every calloop callback.
struct Loop {
    ctx: DaemonContext,
    capture: CaptureBackend,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(&cli) {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "kloak=info",
        1 => "kloak=debug",
        _ => "kloak=trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(cli: &Cli) -> Result<()> {
    let (ctx, event_queue) =
        DaemonContext::connect(cli).context("failed to initialize compositor connection")?;

    let seat_name = cli.seat.as_deref().unwrap_or("default seat");
    info!(seat_name, max_delay_ms = cli.max_delay_ms, "daemon starting");

    let capture = CaptureBackend::new(cli.seat.as_deref().unwrap_or("seat0"))
        .context("failed to open libinput backend")?;

    let mut event_loop: EventLoop<Loop> =
        EventLoop::try_new().context("failed to create the event loop")?;
    let handle = event_loop.handle();

    WaylandSource::new(ctx.connection(), event_queue)
        .insert(handle.clone())
        .context("failed to register the Wayland connection with the event loop")?;

    let capture_fd = capture.as_raw_fd();
    let capture_source = Generic::new(
        unsafe { BorrowedFd::borrow_raw(capture_fd) },
        Interest::READ,
        Mode::Level,
    );
    handle
        .insert_source(capture_source, |_, _fd, data: &mut Loop| {
            drain_capture(data);
            Ok(PostAction::Continue)
        })
        .map_err(|e| anyhow::anyhow!("failed to register libinput fd with the event loop: {e}"))?;

    // Re-armed after every drain to the new head-of-queue deadline; a daemon with an
    // empty queue simply lets this timer go idle rather than polling.
    let timer_handle = handle.clone();
    handle
        .insert_source(Timer::immediate(), move |_, _, data: &mut Loop| {
            drain_scheduler(data);
            reschedule_timer(&timer_handle, data)
        })
        .map_err(|e| anyhow::anyhow!("failed to register release timer: {e}"))?;

    let mut data = Loop { ctx, capture };
    event_loop
        .run(None, &mut data, |data| {
            if let Err(e) = data.ctx.redraw_pending_overlays() {
                warn!("failed to redraw an overlay: {e:#}");
            }
        })
        .context("event loop exited with an error")?;

    Ok(())
}

fn drain_capture(data: &mut Loop) {
    let now = now_ms();
    let ctx = &mut data.ctx;
    let mut pending_motion: Option<Point> = None;

    let result = data.capture.dispatch(|event| match event {
        CapturedEvent::MotionRel { dx, dy } => {
            let base = pending_motion.unwrap_or_else(|| ctx.cursor().current);
            pending_motion = Some(Point {
                x: base.x + dx.round() as i32,
                y: base.y + dy.round() as i32,
            });
        }
        CapturedEvent::MotionAbs { x, y } => {
            pending_motion = Some(Point {
                x: x.round() as i32,
                y: y.round() as i32,
            });
        }
        CapturedEvent::Delayed(kind) => {
            if let Err(e) = ctx.scheduler_mut().admit(kind, now, ctx.rng_mut()) {
                warn!("failed to admit input packet: {e:#}");
            }
        }
    });
    if let Err(e) = result {
        warn!("libinput dispatch error: {e:#}");
    }

    if let Some(end) = pending_motion {
        ctx.move_cursor(now as u32, end);
    }
}

fn drain_scheduler(data: &mut Loop) {
    let now = now_ms();
    let vi = data.ctx.virtual_input_mut();
    data.ctx
        .scheduler_mut()
        .drain_ready(now, |packet| emit_packet(vi, now, packet.kind));
}

fn emit_packet(
    vi: &mut kloak::virtual_input::VirtualInput<
        kloak::protocol::virtual_pointer::ProtocolPointer,
        kloak::protocol::virtual_keyboard::ProtocolKeyboard,
    >,
    now: u64,
    kind: PacketKind,
) {
    match kind {
        PacketKind::Key { code, state } => vi.emit_key(now as u32, code, state),
        PacketKind::PointerButton { button, state } => vi.emit_button(now as u32, button, state),
        PacketKind::PointerScroll { axis, value, source } => {
            vi.emit_scroll(now as u32, axis, value, source)
        }
        PacketKind::PointerMotionRel { .. } | PacketKind::PointerMotionAbs { .. } => {
            unreachable!("motion packets are never admitted to the scheduler")
        }
    }
}

/// With no real input in flight, a perfectly silent pointer is itself a fingerprintable signal, so
/// a synthetic zero-displacement absolute motion is emitted every so often while idle. The next
/// fire time is drawn from the same `[0, max_delay_ms]` bound as a delayed packet's release, so an
/// observer waiting for the keepalive can never infer anything beyond what a real delayed event
/// would already have leaked.
fn reschedule_timer(handle: &calloop::LoopHandle<'static, Loop>, data: &mut Loop) -> TimeoutAction {
    let _ = handle;
    if let Some(release_time) = data.ctx.scheduler_mut().next_release_time() {
        let now = now_ms();
        let delay = release_time.saturating_sub(now);
        return TimeoutAction::ToDuration(Duration::from_millis(delay));
    }

    emit_idle_keepalive(data);

    let max_delay_ms = data.ctx.scheduler_mut().max_delay_ms();
    let delay = data
        .ctx
        .rng_mut()
        .uniform_u64_inclusive(0, max_delay_ms)
        .unwrap_or(0);
    TimeoutAction::ToDuration(Duration::from_millis(delay))
}

fn emit_idle_keepalive(data: &mut Loop) {
    let now = now_ms() as u32;
    data.ctx.emit_cursor_snapshot(now);
}
