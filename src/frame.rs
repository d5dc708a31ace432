// =============================================================================
// FRAME ORCHESTRATOR - acquire / record / submit / present
// =============================================================================
//
// Drives FRAME_COUNT slots round-robin. Every GPU-facing step goes through
// the `FrameDriver` trait, so the protocol below is independent of Vulkan
// and can be exercised without a device.
//
// PER-TICK PROTOCOL:
// ┌──────────────────────────────────────────────────────────────────────┐
// │ minimized? ──yes──> Suspended (no driver calls)                      │
// │ stale?     ──yes──> recreate_swapchain                               │
// │ wait_for_slot(current)            block on the slot's fence          │
// │ acquire_image(current)            OutOfDate -> stale, skip, advance  │
// │ reset_slot(current)               fence + command buffer             │
// │ record(current, image)                                               │
// │ submit(current)                                                      │
// │ present(current, image)           Suboptimal/OutOfDate -> stale      │
// │ advance current modulo N                                             │
// └──────────────────────────────────────────────────────────────────────┘
//
// The fence reset happens only after a successful acquire. Resetting it
// and then skipping the frame would leave a fence nobody signals, and the
// next wait on that slot would never return.

use crate::error::EngineResult;
use crate::event::WindowSignal;

/// Number of frames that may be in flight at once.
pub const FRAME_COUNT: usize = 2;

/// Where a frame slot is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    #[default]
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presented,
}

/// Result of asking the presentation engine for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready. `suboptimal` means it is still usable but the
    /// swapchain no longer matches the surface exactly.
    Ready { image_index: u32, suboptimal: bool },
    /// The swapchain can no longer present to the surface.
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// What one call to `FrameLoop::tick` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Full acquire/record/submit/present cycle on `slot`
    Rendered { slot: usize, image_index: u32 },
    /// Acquire reported out of date; nothing was submitted from `slot`
    Skipped { slot: usize },
    /// Minimized, closing, or waiting for a drawable surface
    Suspended,
}

/// GPU-side operations the orchestrator sequences.
///
/// Implementations do the work; the orchestrator decides the order.
/// Every method is called from the single thread that owns the loop.
pub trait FrameDriver {
    /// Block until the last submission from `slot` has retired.
    fn wait_for_slot(&mut self, slot: usize) -> EngineResult<()>;

    /// Acquire the next presentable image, signaling `slot`'s
    /// image-available semaphore.
    fn acquire_image(&mut self, slot: usize) -> EngineResult<AcquireOutcome>;

    /// Unsignal `slot`'s fence and reset its command buffer.
    fn reset_slot(&mut self, slot: usize) -> EngineResult<()>;

    /// Record the frame's commands for `image_index` into `slot`'s buffer.
    fn record(&mut self, slot: usize, image_index: u32) -> EngineResult<()>;

    /// Submit `slot`'s buffer, signaling its render-finished semaphore and
    /// its fence.
    fn submit(&mut self, slot: usize) -> EngineResult<()>;

    /// Present `image_index` once `slot`'s rendering is finished.
    fn present(&mut self, slot: usize, image_index: u32) -> EngineResult<PresentOutcome>;

    /// Rebuild the swapchain. Returns `false` if the surface currently has
    /// zero area and nothing was rebuilt.
    fn recreate_swapchain(&mut self) -> EngineResult<bool>;
}

/// Running totals, mostly for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    pub rendered: u64,
    pub skipped: u64,
    pub rebuilds: u64,
}

pub struct FrameLoop {
    current: usize,
    frame_count: usize,
    states: Vec<SlotState>,
    /// Swapchain must be rebuilt before the next acquire
    stale: bool,
    minimized: bool,
    close_requested: bool,
    stats: FrameStats,
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::new(FRAME_COUNT)
    }
}

impl FrameLoop {
    /// # Panics
    /// If `frame_count` is zero.
    pub fn new(frame_count: usize) -> Self {
        assert!(frame_count > 0, "frame loop needs at least one slot");
        Self {
            current: 0,
            frame_count,
            states: vec![SlotState::Idle; frame_count],
            stale: false,
            minimized: false,
            close_requested: false,
            stats: FrameStats::default(),
        }
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    #[inline]
    pub fn slot_state(&self, slot: usize) -> SlotState {
        self.states[slot]
    }

    #[inline]
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    #[inline]
    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    #[inline]
    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    #[inline]
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Flag the swapchain for a rebuild before the next acquire.
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Apply a window signal. Takes effect on the next `tick`.
    pub fn handle(&mut self, signal: WindowSignal) {
        match signal {
            WindowSignal::CloseRequested => {
                self.close_requested = true;
            }
            WindowSignal::Minimized => {
                if !self.minimized {
                    log::debug!("Window minimized, suspending frames");
                }
                self.minimized = true;
            }
            WindowSignal::Restored => {
                if self.minimized {
                    log::debug!("Window restored, resuming frames");
                }
                self.minimized = false;
                self.stale = true;
            }
            WindowSignal::Resized { width, height } => {
                if width == 0 || height == 0 {
                    self.handle(WindowSignal::Minimized);
                } else {
                    // A real size while minimized is a restore
                    self.minimized = false;
                    self.stale = true;
                }
            }
        }
    }

    /// Run one iteration of the frame protocol against `driver`.
    ///
    /// Any error is fatal: the loop makes no attempt to continue after one.
    pub fn tick<D: FrameDriver + ?Sized>(&mut self, driver: &mut D) -> EngineResult<FrameOutcome> {
        if self.minimized || self.close_requested {
            return Ok(FrameOutcome::Suspended);
        }

        // ─────────────────────────────────────────────────────────────────────
        // Step 0: deferred swapchain rebuild
        // ─────────────────────────────────────────────────────────────────────
        if self.stale {
            if !driver.recreate_swapchain()? {
                return Ok(FrameOutcome::Suspended);
            }
            self.stale = false;
            self.stats.rebuilds += 1;
        }

        let slot = self.current;

        // ─────────────────────────────────────────────────────────────────────
        // Step 1: wait for this slot's previous submission to retire
        // ─────────────────────────────────────────────────────────────────────
        driver.wait_for_slot(slot)?;
        self.states[slot] = SlotState::Acquiring;

        // ─────────────────────────────────────────────────────────────────────
        // Step 2: acquire
        // ─────────────────────────────────────────────────────────────────────
        let image_index = match driver.acquire_image(slot)? {
            AcquireOutcome::Ready {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    self.stale = true;
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date on acquire, skipping frame");
                // Fence untouched: it is still signaled from the last wait
                self.states[slot] = SlotState::Idle;
                self.stale = true;
                self.stats.skipped += 1;
                self.advance();
                return Ok(FrameOutcome::Skipped { slot });
            }
        };

        // ─────────────────────────────────────────────────────────────────────
        // Step 3: reset and record
        // ─────────────────────────────────────────────────────────────────────
        driver.reset_slot(slot)?;
        self.states[slot] = SlotState::Recording;
        driver.record(slot, image_index)?;

        // ─────────────────────────────────────────────────────────────────────
        // Step 4: submit
        // ─────────────────────────────────────────────────────────────────────
        driver.submit(slot)?;
        self.states[slot] = SlotState::Submitted;

        // ─────────────────────────────────────────────────────────────────────
        // Step 5: present
        // ─────────────────────────────────────────────────────────────────────
        match driver.present(slot, image_index)? {
            PresentOutcome::Presented => {}
            PresentOutcome::Suboptimal | PresentOutcome::OutOfDate => {
                log::debug!("Swapchain stale after present");
                self.stale = true;
            }
        }
        self.states[slot] = SlotState::Presented;

        self.stats.rendered += 1;
        self.advance();

        Ok(FrameOutcome::Rendered { slot, image_index })
    }

    fn advance(&mut self) {
        self.current = (self.current + 1) % self.frame_count;
    }
}
