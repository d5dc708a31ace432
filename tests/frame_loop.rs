// Frame loop protocol tests against a scripted driver.
//
// The mock models each slot's fence and pending submission and panics on any
// call the real device would reject or hang on, so every test below also
// checks the fence discipline.

use std::collections::HashMap;

use ash::vk;
use kindle::backend::swapchain::{choose_extent, choose_image_count};
use kindle::event::WindowSignal;
use kindle::frame::{
    AcquireOutcome, FrameDriver, FrameLoop, FrameOutcome, PresentOutcome, SlotState,
};
use kindle::{EngineError, EngineResult, FRAME_COUNT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    Wait(usize),
    Acquire(usize),
    Reset(usize),
    Record(usize, u32),
    Submit(usize),
    Present(usize, u32),
    Recreate,
}

struct MockDriver {
    calls: Vec<Call>,
    image_count: u32,
    next_image: u32,
    acquires: usize,
    presents: usize,
    /// Overrides keyed by 1-based acquire number
    acquire_script: HashMap<usize, AcquireOutcome>,
    /// Overrides keyed by 1-based present number
    present_script: HashMap<usize, PresentOutcome>,
    fail_acquire_at: Option<usize>,
    fence_signaled: Vec<bool>,
    pending: Vec<bool>,
    recorded: Vec<bool>,
    /// What the surface reports to a rebuild
    caps: vk::SurfaceCapabilitiesKHR,
    drawable: vk::Extent2D,
    /// (image count, extent) of every rebuild
    builds: Vec<(u32, vk::Extent2D)>,
}

impl MockDriver {
    fn new(slots: usize) -> Self {
        Self {
            calls: Vec::new(),
            image_count: 3,
            next_image: 0,
            acquires: 0,
            presents: 0,
            acquire_script: HashMap::new(),
            present_script: HashMap::new(),
            fail_acquire_at: None,
            // Slots start with signaled fences
            fence_signaled: vec![true; slots],
            pending: vec![false; slots],
            recorded: vec![false; slots],
            caps: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                // Undefined current extent: the drawable size decides
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                ..Default::default()
            },
            drawable: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            builds: Vec::new(),
        }
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    fn submits(&self) -> usize {
        self.count(|c| matches!(c, Call::Submit(_)))
    }

    fn presents(&self) -> usize {
        self.count(|c| matches!(c, Call::Present(..)))
    }

    fn rebuilds(&self) -> usize {
        self.count(|c| matches!(c, Call::Recreate))
    }
}

impl FrameDriver for MockDriver {
    fn wait_for_slot(&mut self, slot: usize) -> EngineResult<()> {
        self.calls.push(Call::Wait(slot));
        // The GPU finishes whatever was pending on this slot
        if self.pending[slot] {
            self.pending[slot] = false;
            self.fence_signaled[slot] = true;
        }
        assert!(
            self.fence_signaled[slot],
            "waiting on slot {slot} whose fence nothing will signal"
        );
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> EngineResult<AcquireOutcome> {
        self.calls.push(Call::Acquire(slot));
        self.acquires += 1;

        if self.fail_acquire_at == Some(self.acquires) {
            return Err(EngineError::Surface(vk::Result::ERROR_SURFACE_LOST_KHR));
        }
        if let Some(outcome) = self.acquire_script.get(&self.acquires) {
            return Ok(*outcome);
        }

        let image_index = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;
        Ok(AcquireOutcome::Ready {
            image_index,
            suboptimal: false,
        })
    }

    fn reset_slot(&mut self, slot: usize) -> EngineResult<()> {
        self.calls.push(Call::Reset(slot));
        assert!(!self.pending[slot], "reset of slot {slot} while in flight");
        self.fence_signaled[slot] = false;
        self.recorded[slot] = false;
        Ok(())
    }

    fn record(&mut self, slot: usize, image_index: u32) -> EngineResult<()> {
        self.calls.push(Call::Record(slot, image_index));
        assert!(!self.pending[slot], "re-record of slot {slot} before its fence");
        assert!(!self.recorded[slot], "record of slot {slot} without a reset");
        self.recorded[slot] = true;
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> EngineResult<()> {
        self.calls.push(Call::Submit(slot));
        assert!(self.recorded[slot], "submit of unrecorded slot {slot}");
        assert!(
            !self.fence_signaled[slot],
            "submit of slot {slot} with a signaled fence"
        );
        self.pending[slot] = true;
        self.recorded[slot] = false;
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> EngineResult<PresentOutcome> {
        self.calls.push(Call::Present(slot, image_index));
        self.presents += 1;
        Ok(self
            .present_script
            .get(&self.presents)
            .copied()
            .unwrap_or(PresentOutcome::Presented))
    }

    fn recreate_swapchain(&mut self) -> EngineResult<bool> {
        self.calls.push(Call::Recreate);
        // A real rebuild waits for the device to go idle first
        for slot in 0..self.pending.len() {
            if self.pending[slot] {
                self.pending[slot] = false;
                self.fence_signaled[slot] = true;
            }
        }
        let image_count = choose_image_count(&self.caps);
        let extent = choose_extent(&self.caps, self.drawable);
        self.image_count = image_count;
        self.builds.push((image_count, extent));
        self.next_image = 0;
        Ok(true)
    }
}

fn slot_of(outcome: FrameOutcome) -> Option<usize> {
    match outcome {
        FrameOutcome::Rendered { slot, .. } | FrameOutcome::Skipped { slot } => Some(slot),
        FrameOutcome::Suspended => None,
    }
}

#[test]
fn hundred_frames_alternate_between_two_slots() {
    let mut frames = FrameLoop::new(FRAME_COUNT);
    let mut driver = MockDriver::new(FRAME_COUNT);

    let slots: Vec<usize> = (0..100)
        .map(|_| slot_of(frames.tick(&mut driver).unwrap()).unwrap())
        .collect();

    let expected: Vec<usize> = (0..100).map(|i| i % 2).collect();
    assert_eq!(slots, expected);

    assert_eq!(driver.count(|c| matches!(c, Call::Acquire(_))), 100);
    assert_eq!(driver.submits(), 100);
    assert_eq!(driver.presents(), 100);
    assert_eq!(driver.rebuilds(), 0);
    assert_eq!(frames.stats().rendered, 100);
}

#[test]
fn out_of_date_on_fifth_frame_rebuilds_once_and_skips_it() {
    let mut frames = FrameLoop::new(FRAME_COUNT);
    let mut driver = MockDriver::new(FRAME_COUNT);
    driver
        .acquire_script
        .insert(5, AcquireOutcome::OutOfDate);

    let outcomes: Vec<FrameOutcome> = (0..8).map(|_| frames.tick(&mut driver).unwrap()).collect();

    // Frame 5 (index 4) was skipped on slot 0, frame 6 went to slot 1
    assert_eq!(outcomes[4], FrameOutcome::Skipped { slot: 0 });
    assert!(matches!(outcomes[5], FrameOutcome::Rendered { slot: 1, .. }));

    let slots: Vec<usize> = outcomes.iter().map(|&o| slot_of(o).unwrap()).collect();
    assert_eq!(slots, vec![0, 1, 0, 1, 0, 1, 0, 1]);

    assert_eq!(driver.rebuilds(), 1);
    assert_eq!(driver.submits(), 7);
    assert_eq!(driver.presents(), 7);

    // Nothing between the failed acquire and the rebuild
    let fifth_acquire = driver
        .calls
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, Call::Acquire(_)))
        .nth(4)
        .map(|(i, _)| i)
        .unwrap();
    assert_eq!(driver.calls[fifth_acquire + 1], Call::Recreate);
    assert_eq!(driver.calls[fifth_acquire + 2], Call::Wait(1));

    assert_eq!(frames.stats().skipped, 1);
    assert_eq!(frames.stats().rebuilds, 1);
}

#[test]
fn minimized_window_makes_no_gpu_calls() {
    let mut frames = FrameLoop::new(FRAME_COUNT);
    let mut driver = MockDriver::new(FRAME_COUNT);

    for _ in 0..3 {
        frames.tick(&mut driver).unwrap();
    }

    frames.handle(WindowSignal::Minimized);
    let before = driver.calls.len();
    for _ in 0..50 {
        assert_eq!(frames.tick(&mut driver).unwrap(), FrameOutcome::Suspended);
    }
    assert_eq!(driver.calls.len(), before, "GPU touched while minimized");
    // Suspension does not advance the slot
    assert_eq!(frames.current_slot(), 1);

    frames.handle(WindowSignal::Restored);
    let outcomes: Vec<FrameOutcome> = (0..10).map(|_| frames.tick(&mut driver).unwrap()).collect();
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, FrameOutcome::Rendered { .. })));

    // First call after restore is the rebuild for the possibly new size
    assert_eq!(driver.calls[before], Call::Recreate);
    assert_eq!(driver.rebuilds(), 1);
    assert_eq!(driver.submits(), 13);
    assert_eq!(driver.presents(), 13);
}

#[test]
fn zero_area_resize_suspends_until_real_size() {
    let mut frames = FrameLoop::new(FRAME_COUNT);
    let mut driver = MockDriver::new(FRAME_COUNT);

    frames.handle(WindowSignal::Resized {
        width: 0,
        height: 0,
    });
    assert_eq!(frames.tick(&mut driver).unwrap(), FrameOutcome::Suspended);
    assert!(driver.calls.is_empty());

    frames.handle(WindowSignal::Resized {
        width: 640,
        height: 480,
    });
    assert!(matches!(
        frames.tick(&mut driver).unwrap(),
        FrameOutcome::Rendered { slot: 0, .. }
    ));
    assert_eq!(driver.calls[0], Call::Recreate);
}

#[test]
fn burst_of_resizes_rebuilds_once() {
    let mut frames = FrameLoop::new(FRAME_COUNT);
    let mut driver = MockDriver::new(FRAME_COUNT);

    for width in [800, 900, 1000, 1000] {
        frames.handle(WindowSignal::Resized { width, height: 600 });
    }
    frames.tick(&mut driver).unwrap();
    frames.tick(&mut driver).unwrap();

    assert_eq!(driver.rebuilds(), 1);
    assert_eq!(driver.calls[0], Call::Recreate);
}

#[test]
fn back_to_back_rebuilds_agree_on_image_count_and_extent() {
    let mut frames = FrameLoop::new(FRAME_COUNT);
    let mut driver = MockDriver::new(FRAME_COUNT);
    driver.drawable = vk::Extent2D {
        width: 1024,
        height: 768,
    };
    // Out of date twice in a row: the second rebuild follows the first
    // with no frame in between
    driver.acquire_script.insert(1, AcquireOutcome::OutOfDate);
    driver.acquire_script.insert(2, AcquireOutcome::OutOfDate);

    for _ in 0..4 {
        frames.tick(&mut driver).unwrap();
    }

    assert_eq!(driver.rebuilds(), 2);
    assert_eq!(driver.builds[0], driver.builds[1]);
    assert_eq!(
        driver.builds[0],
        (
            3,
            vk::Extent2D {
                width: 1024,
                height: 768
            }
        )
    );
    assert_eq!(frames.stats().rendered, 2);
}

#[test]
fn rebuild_follows_the_new_drawable_size() {
    let mut frames = FrameLoop::new(FRAME_COUNT);
    let mut driver = MockDriver::new(FRAME_COUNT);

    frames.tick(&mut driver).unwrap();
    driver.drawable = vk::Extent2D {
        width: 5000,
        height: 300,
    };
    frames.handle(WindowSignal::Resized {
        width: 5000,
        height: 300,
    });
    frames.tick(&mut driver).unwrap();

    // Clamped to the surface's maximum extent
    assert_eq!(
        driver.builds,
        vec![(
            3,
            vk::Extent2D {
                width: 4096,
                height: 300
            }
        )]
    );
}

#[test]
fn stale_present_rebuilds_before_next_acquire() {
    let mut frames = FrameLoop::new(FRAME_COUNT);
    let mut driver = MockDriver::new(FRAME_COUNT);
    driver.present_script.insert(2, PresentOutcome::OutOfDate);
    driver.present_script.insert(4, PresentOutcome::Suboptimal);

    for _ in 0..6 {
        assert!(matches!(
            frames.tick(&mut driver).unwrap(),
            FrameOutcome::Rendered { .. }
        ));
    }

    assert_eq!(driver.rebuilds(), 2);
    for (i, call) in driver.calls.iter().enumerate() {
        if *call == Call::Recreate {
            assert!(matches!(driver.calls[i - 1], Call::Present(..)));
            assert!(matches!(driver.calls[i + 1], Call::Wait(_)));
        }
    }
}

#[test]
fn suboptimal_acquire_still_renders() {
    let mut frames = FrameLoop::new(FRAME_COUNT);
    let mut driver = MockDriver::new(FRAME_COUNT);
    driver.acquire_script.insert(
        1,
        AcquireOutcome::Ready {
            image_index: 2,
            suboptimal: true,
        },
    );

    assert_eq!(
        frames.tick(&mut driver).unwrap(),
        FrameOutcome::Rendered {
            slot: 0,
            image_index: 2
        }
    );
    assert!(frames.is_stale());
    assert_eq!(driver.calls.last(), Some(&Call::Present(0, 2)));

    frames.tick(&mut driver).unwrap();
    assert_eq!(driver.rebuilds(), 1);
}

#[test]
fn round_robin_holds_for_any_slot_count_with_skips() {
    for n in 1..=4 {
        let mut frames = FrameLoop::new(n);
        let mut driver = MockDriver::new(n);
        for k in [3, 4, 9, 17] {
            driver.acquire_script.insert(k, AcquireOutcome::OutOfDate);
        }

        let slots: Vec<usize> = (0..40)
            .map(|_| slot_of(frames.tick(&mut driver).unwrap()).unwrap())
            .collect();

        let expected: Vec<usize> = (0..40).map(|i| i % n).collect();
        assert_eq!(slots, expected, "slot order with {n} slots");
        assert_eq!(frames.stats().skipped, 4);
        assert_eq!(frames.stats().rendered, 36);
    }
}

#[test]
fn skipped_frame_leaves_fence_signaled() {
    let mut frames = FrameLoop::new(2);
    let mut driver = MockDriver::new(2);
    // First frame on slot 0 is out of date; slot 0 comes around again at frame 3
    driver.acquire_script.insert(1, AcquireOutcome::OutOfDate);

    for _ in 0..5 {
        frames.tick(&mut driver).unwrap();
    }

    // The skipped frame waited and acquired, nothing else
    assert_eq!(driver.calls[..3], [Call::Wait(0), Call::Acquire(0), Call::Recreate]);
    // Slot 0 came around twice more; the mock panics if its fence was left unsignaled
    assert_eq!(driver.count(|c| *c == Call::Wait(0)), 3);
    assert_eq!(frames.slot_state(0), SlotState::Presented);
}

#[test]
fn every_record_follows_a_wait_on_the_same_slot() {
    let mut frames = FrameLoop::new(FRAME_COUNT);
    let mut driver = MockDriver::new(FRAME_COUNT);
    driver.acquire_script.insert(7, AcquireOutcome::OutOfDate);
    driver.present_script.insert(12, PresentOutcome::OutOfDate);

    for _ in 0..30 {
        frames.tick(&mut driver).unwrap();
    }

    let mut waited = [false; FRAME_COUNT];
    for call in &driver.calls {
        match *call {
            Call::Wait(slot) => waited[slot] = true,
            Call::Record(slot, _) => {
                assert!(waited[slot], "slot {slot} recorded without a wait");
            }
            Call::Submit(slot) => waited[slot] = false,
            _ => {}
        }
    }
}

#[test]
fn acquire_failure_is_fatal() {
    let mut frames = FrameLoop::new(FRAME_COUNT);
    let mut driver = MockDriver::new(FRAME_COUNT);
    driver.fail_acquire_at = Some(2);

    frames.tick(&mut driver).unwrap();
    let err = frames.tick(&mut driver).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Surface(vk::Result::ERROR_SURFACE_LOST_KHR)
    ));
    // Nothing after the failed acquire
    assert_eq!(driver.calls.last(), Some(&Call::Acquire(1)));
}

#[test]
fn close_request_stops_the_loop() {
    let mut frames = FrameLoop::new(FRAME_COUNT);
    let mut driver = MockDriver::new(FRAME_COUNT);

    frames.tick(&mut driver).unwrap();
    frames.handle(WindowSignal::CloseRequested);
    let before = driver.calls.len();

    assert_eq!(frames.tick(&mut driver).unwrap(), FrameOutcome::Suspended);
    assert_eq!(driver.calls.len(), before);
    assert!(frames.close_requested());
}
