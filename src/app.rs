// =============================================================================
// APPLICATION - winit event handling around the frame loop
// =============================================================================
//
// EVENT FLOW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  resumed        create window + renderer                         │
// │  window_event   translate to WindowSignal -> FrameLoop::handle   │
// │  RedrawRequested  FrameLoop::tick(renderer)                      │
// │  about_to_wait  request redraw, or sleep while suspended         │
// └─────────────────────────────────────────────────────────────────┘
//
// A fatal error inside a callback is stored and the event loop exits;
// `main` returns it so the process ends with a non-zero status.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow},
    window::{Window, WindowAttributes, WindowId},
};

use crate::config::Config;
use crate::event::WindowSignal;
use crate::frame::{FrameLoop, FrameOutcome};
use crate::renderer::Renderer;

/// How long to sleep between event checks while minimized, or between
/// attempts to rebuild for a surface that has no area yet.
const SUSPENDED_POLL: Duration = Duration::from_millis(100);

/// What to do once the current batch of events is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pacing {
    /// Request the next frame right away
    Redraw,
    /// Sleep until the given instant without drawing
    Sleep(Instant),
}

fn pacing(minimized: bool, retry_at: Option<Instant>, now: Instant) -> Pacing {
    if minimized {
        return Pacing::Sleep(now + SUSPENDED_POLL);
    }
    match retry_at {
        Some(at) if now < at => Pacing::Sleep(at),
        _ => Pacing::Redraw,
    }
}

pub struct App {
    config: Config,

    // Renderer before window: it must drop first
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,

    frames: FrameLoop,
    /// Set while a swapchain rebuild is deferred for a zero-area surface
    retry_at: Option<Instant>,
    fatal: Option<anyhow::Error>,

    // ─────────────────────────────────────────────────────────────────────────
    // FPS TRACKING
    // ─────────────────────────────────────────────────────────────────────────
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    pub fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            config,
            renderer: None,
            window: None,
            frames: FrameLoop::default(),
            retry_at: None,
            fatal: None,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    /// The error that stopped the event loop, if any.
    pub fn take_error(&mut self) -> Option<anyhow::Error> {
        self.fatal.take()
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("Fatal: {:#}", error);
        self.fatal = Some(error);
        event_loop.exit();
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = Arc::new(
            event_loop
                .create_window(window_attributes)
                .context("Failed to create window")?,
        );

        let renderer =
            Renderer::new(window.clone(), &self.config).context("Failed to initialize Vulkan")?;

        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }

    fn render(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        match self.frames.tick(renderer) {
            Ok(FrameOutcome::Rendered { .. }) => {
                self.retry_at = None;
                self.update_fps();
            }
            Ok(FrameOutcome::Skipped { slot }) => {
                self.retry_at = None;
                log::debug!("Frame skipped on slot {}", slot);
            }
            Ok(FrameOutcome::Suspended) => {
                // Visible but still stale: the surface had no area to rebuild for
                if self.frames.is_stale() && !self.frames.is_minimized() {
                    self.retry_at = Some(Instant::now() + SUSPENDED_POLL);
                }
            }
            Err(e) => self.fail(event_loop, anyhow::Error::new(e).context("Frame failed")),
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        let stats = self.frames.stats();
        log::info!(
            "Close requested, shutting down ({} frames rendered, {} skipped, {} swapchain rebuilds)",
            stats.rendered,
            stats.skipped,
            stats.rebuilds
        );
        if let Some(renderer) = &self.renderer {
            if let Err(e) = renderer.wait_idle() {
                log::error!("Device wait idle failed: {}", e);
            }
        }
        event_loop.exit();
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;
            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                ));
            }
            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let WindowEvent::RedrawRequested = event {
            self.render(event_loop);
            return;
        }

        let Some(signal) = WindowSignal::from_window_event(&event) else {
            return;
        };
        log::debug!("Window signal: {:?}", signal);
        self.frames.handle(signal);
        if matches!(signal, WindowSignal::Resized { .. } | WindowSignal::Restored) {
            // A new size is worth a rebuild attempt right away
            self.retry_at = None;
        }

        if signal == WindowSignal::CloseRequested {
            self.shutdown(event_loop);
        }
    }

    /// Continuous redraws while visible; a slow poll while minimized or
    /// while waiting for the surface to have area again.
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.frames.close_requested() {
            return;
        }

        match pacing(self.frames.is_minimized(), self.retry_at, Instant::now()) {
            Pacing::Sleep(until) => {
                event_loop.set_control_flow(ControlFlow::WaitUntil(until));
            }
            Pacing::Redraw => {
                event_loop.set_control_flow(ControlFlow::Poll);
                if let Some(ref window) = self.window {
                    window.request_redraw();
                }
            }
        }
    }
}
