//! Frame management and synchronization.
//!
//! [`FrameManager`] drives the per-frame protocol and the swapchain
//! recreation protocol. It talks to the GPU only through [`FrameBackend`]
//! and to the window only through [`FramebufferSource`], so the ordering
//! rules can be exercised against a fake backend.
//!
//! # Per-frame protocol
//!
//! ```text
//! wait in-flight fence (slot)
//!   -> acquire image        OUT_OF_DATE: recreate, return without drawing
//!   -> reset fence (slot)
//!   -> record
//!   -> submit               signals render-finished + in-flight fence
//!   -> present              OUT_OF_DATE / SUBOPTIMAL / resize: recreate next frame
//!   -> slot = (slot + 1) % MAX_FRAMES_IN_FLIGHT
//! ```
//!
//! The fence is reset only after a successful acquire. An abandoned
//! iteration therefore never leaves a slot with an unsignaled fence and
//! nothing pending to signal it.
//!
//! # Example
//!
//! ```no_run
//! use triangle_renderer::frame_manager::{FrameBackend, FrameManager, FrameOutcome, FramebufferSource};
//!
//! # fn example(backend: &mut impl FrameBackend, window: &mut impl FramebufferSource) -> Result<(), triangle_rhi::RhiError> {
//! let mut frames = FrameManager::new();
//! loop {
//!     if frames.draw_frame(backend, window)? == FrameOutcome::Closing {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use tracing::{debug, info, trace};

use triangle_rhi::RhiResult;
use triangle_rhi::sync::MAX_FRAMES_IN_FLIGHT;

/// Result of asking the presentation engine for an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired. `suboptimal` means it is still usable but the
    /// swapchain no longer matches the surface exactly.
    Ready { image_index: u32, suboptimal: bool },
    /// The swapchain can no longer be presented to.
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// What a call to [`FrameManager::draw_frame`] ended with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A frame was submitted and presented.
    Presented,
    /// Acquire reported out-of-date; the swapchain was rebuilt and nothing
    /// was drawn this iteration.
    Recreated,
    /// The window closed while recreation waited for a nonzero size.
    Closing,
}

/// GPU side of the frame loop.
///
/// `slot` is always in `0..MAX_FRAMES_IN_FLIGHT`. Every error returned from
/// these methods is fatal to the loop.
pub trait FrameBackend {
    /// Blocks until the slot's last submission has completed.
    fn wait_for_slot(&mut self, slot: usize) -> RhiResult<()>;

    /// Acquires the next swapchain image, signaling the slot's
    /// image-available semaphore.
    fn acquire_image(&mut self, slot: usize) -> RhiResult<AcquireOutcome>;

    /// Returns the slot's in-flight fence to the unsignaled state.
    fn reset_slot(&mut self, slot: usize) -> RhiResult<()>;

    /// Re-records the slot's command buffer to draw into `image_index`.
    fn record(&mut self, slot: usize, image_index: u32) -> RhiResult<()>;

    /// Submits the slot's command buffer, arming its in-flight fence.
    fn submit(&mut self, slot: usize) -> RhiResult<()>;

    /// Queues `image_index` for presentation after the slot's render-finished
    /// semaphore.
    fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome>;

    /// Blocks until the device has no outstanding work.
    fn wait_idle(&mut self) -> RhiResult<()>;

    /// Destroys every object that depends on the swapchain, including the
    /// per-slot synchronization primitives.
    fn destroy_swapchain_resources(&mut self);

    /// Builds a new swapchain generation for `framebuffer_size`, with fresh
    /// per-slot synchronization primitives.
    fn build_swapchain_resources(&mut self, framebuffer_size: (u32, u32)) -> RhiResult<()>;
}

/// Window side of the frame loop.
pub trait FramebufferSource {
    /// Current framebuffer size in pixels. `(0, 0)` while minimized.
    fn framebuffer_size(&self) -> (u32, u32);

    /// Returns whether a resize happened since the last call, and clears it.
    fn take_resized(&mut self) -> bool;

    /// Blocks until at least one window event has been processed.
    ///
    /// Returns `false` once the window is closing.
    fn wait_events(&mut self) -> bool;
}

/// Blocks on the event pump until the framebuffer has a nonzero area.
///
/// Returns `None` if the window closes first.
pub fn wait_for_nonzero_extent<W: FramebufferSource + ?Sized>(window: &mut W) -> Option<(u32, u32)> {
    loop {
        let (width, height) = window.framebuffer_size();
        if width != 0 && height != 0 {
            return Some((width, height));
        }

        trace!("Framebuffer is {}x{}, waiting for events", width, height);
        if !window.wait_events() {
            return None;
        }
    }
}

/// Round-robin frame slot state and the recreation flag.
#[derive(Debug, Default)]
pub struct FrameManager {
    current_frame: usize,
    needs_recreation: bool,
    recreations: u64,
}

impl FrameManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot the next [`draw_frame`](Self::draw_frame) will use.
    #[inline]
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Whether the next [`draw_frame`](Self::draw_frame) starts with a
    /// swapchain rebuild.
    #[inline]
    pub fn needs_recreation(&self) -> bool {
        self.needs_recreation
    }

    /// Number of completed recreations.
    #[inline]
    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    /// Runs one iteration of the per-frame protocol.
    ///
    /// A recreation deferred by the previous iteration runs first.
    ///
    /// # Errors
    ///
    /// Any backend error. The slot index is not advanced on error.
    pub fn draw_frame<B, W>(&mut self, backend: &mut B, window: &mut W) -> RhiResult<FrameOutcome>
    where
        B: FrameBackend + ?Sized,
        W: FramebufferSource + ?Sized,
    {
        if self.needs_recreation {
            debug!("Running deferred swapchain recreation");
            if !self.recreate(backend, window)? {
                return Ok(FrameOutcome::Closing);
            }
        }

        let slot = self.current_frame;

        backend.wait_for_slot(slot)?;

        let (image_index, suboptimal) = match backend.acquire_image(slot)? {
            AcquireOutcome::Ready {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            AcquireOutcome::OutOfDate => {
                debug!("Swapchain out of date on acquire (slot {})", slot);
                return if self.recreate(backend, window)? {
                    Ok(FrameOutcome::Recreated)
                } else {
                    Ok(FrameOutcome::Closing)
                };
            }
        };

        if suboptimal {
            debug!("Swapchain suboptimal on acquire, recreating after this frame");
            self.needs_recreation = true;
        }

        backend.reset_slot(slot)?;
        backend.record(slot, image_index)?;
        backend.submit(slot)?;

        let presented = backend.present(slot, image_index)?;
        let resized = window.take_resized();

        if resized || presented != PresentOutcome::Presented {
            debug!(
                "Swapchain recreation requested (present: {:?}, resized: {})",
                presented, resized
            );
            self.needs_recreation = true;
        }

        self.current_frame = (slot + 1) % MAX_FRAMES_IN_FLIGHT;

        Ok(FrameOutcome::Presented)
    }

    /// Rebuilds every swapchain-dependent object.
    ///
    /// Waits out minimization, then the device, before anything is
    /// destroyed. Returns `Ok(false)` if the window closed while minimized.
    pub fn recreate<B, W>(&mut self, backend: &mut B, window: &mut W) -> RhiResult<bool>
    where
        B: FrameBackend + ?Sized,
        W: FramebufferSource + ?Sized,
    {
        let Some(framebuffer_size) = wait_for_nonzero_extent(window) else {
            info!("Window closed while minimized, skipping swapchain recreation");
            return Ok(false);
        };

        backend.wait_idle()?;
        backend.destroy_swapchain_resources();
        backend.build_swapchain_resources(framebuffer_size)?;

        self.needs_recreation = false;
        window.take_resized();
        self.recreations += 1;

        info!(
            "Swapchain recreated at {}x{} (generation {})",
            framebuffer_size.0,
            framebuffer_size.1,
            self.recreations + 1
        );

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use triangle_rhi::RhiError;
    use triangle_rhi::vk;

    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        WaitIdle,
        Destroy,
        Build((u32, u32)),
    }

    /// Records every call and models one fence per slot.
    #[derive(Default)]
    struct FakeGpu {
        calls: Vec<Call>,
        /// A submission on the slot has not been observed complete.
        pending: [bool; MAX_FRAMES_IN_FLIGHT],
        /// Fence state; true once signaled.
        fence_signaled: [bool; MAX_FRAMES_IN_FLIGHT],
        violations: Vec<String>,
        acquire_script: VecDeque<AcquireOutcome>,
        present_script: VecDeque<PresentOutcome>,
        next_image: u32,
        fail_submit: bool,
        fail_acquire: bool,
        built: bool,
    }

    impl FakeGpu {
        fn new() -> Self {
            Self {
                fence_signaled: [true; MAX_FRAMES_IN_FLIGHT],
                built: true,
                ..Default::default()
            }
        }

        fn count(&self, wanted: fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| wanted(c)).count()
        }
    }

    impl FrameBackend for FakeGpu {
        fn wait_for_slot(&mut self, slot: usize) -> RhiResult<()> {
            self.calls.push(Call::Wait(slot));
            // The fake GPU finishes the slot's work when waited on.
            self.pending[slot] = false;
            self.fence_signaled[slot] = true;
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> RhiResult<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            if self.fail_acquire {
                return Err(RhiError::SwapchainAcquireError(vk::Result::ERROR_DEVICE_LOST));
            }
            Ok(self.acquire_script.pop_front().unwrap_or_else(|| {
                let image_index = self.next_image;
                self.next_image = (self.next_image + 1) % 3;
                AcquireOutcome::Ready {
                    image_index,
                    suboptimal: false,
                }
            }))
        }

        fn reset_slot(&mut self, slot: usize) -> RhiResult<()> {
            self.calls.push(Call::Reset(slot));
            if self.pending[slot] {
                self.violations.push(format!("reset fence of busy slot {slot}"));
            }
            self.fence_signaled[slot] = false;
            Ok(())
        }

        fn record(&mut self, slot: usize, image_index: u32) -> RhiResult<()> {
            self.calls.push(Call::Record(slot, image_index));
            if self.pending[slot] {
                self.violations.push(format!("recorded into busy slot {slot}"));
            }
            if !self.built {
                self.violations.push("recorded with no swapchain".to_string());
            }
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> RhiResult<()> {
            self.calls.push(Call::Submit(slot));
            if self.fail_submit {
                return Err(RhiError::SubmissionError(vk::Result::ERROR_DEVICE_LOST));
            }
            if self.fence_signaled[slot] {
                self.violations.push(format!("submitted with signaled fence on slot {slot}"));
            }
            self.pending[slot] = true;
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome> {
            self.calls.push(Call::Present(slot, image_index));
            Ok(self
                .present_script
                .pop_front()
                .unwrap_or(PresentOutcome::Presented))
        }

        fn wait_idle(&mut self) -> RhiResult<()> {
            self.calls.push(Call::WaitIdle);
            self.pending = [false; MAX_FRAMES_IN_FLIGHT];
            Ok(())
        }

        fn destroy_swapchain_resources(&mut self) {
            self.calls.push(Call::Destroy);
            if self.pending.iter().any(|&p| p) {
                self.violations.push("destroyed resources with work pending".to_string());
            }
            self.built = false;
        }

        fn build_swapchain_resources(&mut self, framebuffer_size: (u32, u32)) -> RhiResult<()> {
            self.calls.push(Call::Build(framebuffer_size));
            // Fresh fences start signaled.
            self.fence_signaled = [true; MAX_FRAMES_IN_FLIGHT];
            self.built = true;
            Ok(())
        }
    }

    /// Scripted window. The last queued size repeats forever.
    struct FakeWindow {
        sizes: RefCell<VecDeque<(u32, u32)>>,
        resized: bool,
        closed: bool,
        waits: usize,
    }

    impl FakeWindow {
        fn new(size: (u32, u32)) -> Self {
            Self::with_sizes(&[size])
        }

        fn with_sizes(sizes: &[(u32, u32)]) -> Self {
            Self {
                sizes: RefCell::new(sizes.iter().copied().collect()),
                resized: false,
                closed: false,
                waits: 0,
            }
        }
    }

    impl FramebufferSource for FakeWindow {
        fn framebuffer_size(&self) -> (u32, u32) {
            let mut sizes = self.sizes.borrow_mut();
            if sizes.len() > 1 {
                sizes.pop_front().unwrap()
            } else {
                *sizes.front().unwrap()
            }
        }

        fn take_resized(&mut self) -> bool {
            std::mem::take(&mut self.resized)
        }

        fn wait_events(&mut self) -> bool {
            self.waits += 1;
            !self.closed
        }
    }

    #[test]
    fn test_frame_protocol_order() {
        let mut gpu = FakeGpu::new();
        let mut window = FakeWindow::new((800, 600));
        let mut frames = FrameManager::new();

        let outcome = frames.draw_frame(&mut gpu, &mut window).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented);
        assert_eq!(
            gpu.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Record(0, 0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
    }

    #[test]
    fn test_backpressure_never_records_into_busy_slot() {
        let mut gpu = FakeGpu::new();
        let mut window = FakeWindow::new((800, 600));
        let mut frames = FrameManager::new();

        for _ in 0..25 {
            frames.draw_frame(&mut gpu, &mut window).unwrap();
        }

        assert!(gpu.violations.is_empty(), "{:?}", gpu.violations);

        // Every record into a slot is preceded by a wait on that slot since
        // the slot's previous submit.
        for slot in 0..MAX_FRAMES_IN_FLIGHT {
            let mut waited_since_submit = true;
            for call in &gpu.calls {
                match *call {
                    Call::Submit(s) if s == slot => waited_since_submit = false,
                    Call::Wait(s) if s == slot => waited_since_submit = true,
                    Call::Record(s, _) if s == slot => assert!(waited_since_submit),
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn test_round_robin_slot_index() {
        let mut gpu = FakeGpu::new();
        let mut window = FakeWindow::new((800, 600));
        let mut frames = FrameManager::new();

        for k in 0..10 {
            assert_eq!(frames.current_frame(), k % MAX_FRAMES_IN_FLIGHT);
            frames.draw_frame(&mut gpu, &mut window).unwrap();
        }
        assert_eq!(frames.current_frame(), 10 % MAX_FRAMES_IN_FLIGHT);

        let slots: Vec<usize> = gpu
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Submit(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(slots, vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn test_out_of_date_acquire_skips_drawing_and_recreates_once() {
        let mut gpu = FakeGpu::new();
        gpu.acquire_script.push_back(AcquireOutcome::OutOfDate);
        let mut window = FakeWindow::new((1024, 768));
        let mut frames = FrameManager::new();

        let outcome = frames.draw_frame(&mut gpu, &mut window).unwrap();

        assert_eq!(outcome, FrameOutcome::Recreated);
        assert_eq!(
            gpu.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::WaitIdle,
                Call::Destroy,
                Call::Build((1024, 768)),
            ]
        );
        assert_eq!(frames.current_frame(), 0);
        assert!(!frames.needs_recreation());

        frames.draw_frame(&mut gpu, &mut window).unwrap();
        assert_eq!(gpu.count(|c| matches!(c, Call::Build(_))), 1);
        assert_eq!(gpu.count(|c| matches!(c, Call::Submit(_))), 1);
        assert!(gpu.violations.is_empty(), "{:?}", gpu.violations);
    }

    #[test]
    fn test_minimization_stall() {
        let mut gpu = FakeGpu::new();
        gpu.acquire_script.push_back(AcquireOutcome::OutOfDate);
        let mut window = FakeWindow::with_sizes(&[(0, 0), (0, 0), (800, 600)]);
        let mut frames = FrameManager::new();

        frames.draw_frame(&mut gpu, &mut window).unwrap();

        assert_eq!(window.waits, 2);
        assert!(gpu.calls.contains(&Call::Build((800, 600))));

        // Nothing was torn down before the size became nonzero.
        let first_destroy = gpu.calls.iter().position(|c| *c == Call::Destroy);
        let first_idle = gpu.calls.iter().position(|c| *c == Call::WaitIdle);
        assert!(first_idle < first_destroy);
    }

    #[test]
    fn test_wait_for_nonzero_extent_partial_zero() {
        let mut window = FakeWindow::with_sizes(&[(0, 600), (800, 0), (800, 600)]);
        assert_eq!(wait_for_nonzero_extent(&mut window), Some((800, 600)));
        assert_eq!(window.waits, 2);
    }

    #[test]
    fn test_close_while_minimized() {
        let mut gpu = FakeGpu::new();
        gpu.acquire_script.push_back(AcquireOutcome::OutOfDate);
        let mut window = FakeWindow::new((0, 0));
        window.closed = true;
        let mut frames = FrameManager::new();

        let outcome = frames.draw_frame(&mut gpu, &mut window).unwrap();

        assert_eq!(outcome, FrameOutcome::Closing);
        assert!(!gpu.calls.contains(&Call::Destroy));
        assert_eq!(frames.recreations(), 0);
    }

    #[test]
    fn test_suboptimal_present_defers_recreation() {
        let mut gpu = FakeGpu::new();
        gpu.present_script.push_back(PresentOutcome::Suboptimal);
        let mut window = FakeWindow::new((800, 600));
        let mut frames = FrameManager::new();

        assert_eq!(
            frames.draw_frame(&mut gpu, &mut window).unwrap(),
            FrameOutcome::Presented
        );
        assert!(frames.needs_recreation());
        assert!(!gpu.calls.contains(&Call::WaitIdle));

        gpu.calls.clear();
        frames.draw_frame(&mut gpu, &mut window).unwrap();

        assert_eq!(
            &gpu.calls[..4],
            &[
                Call::WaitIdle,
                Call::Destroy,
                Call::Build((800, 600)),
                Call::Wait(1),
            ]
        );
        assert!(!frames.needs_recreation());
    }

    #[test]
    fn test_out_of_date_present_defers_recreation() {
        let mut gpu = FakeGpu::new();
        gpu.present_script.push_back(PresentOutcome::OutOfDate);
        let mut window = FakeWindow::new((800, 600));
        let mut frames = FrameManager::new();

        frames.draw_frame(&mut gpu, &mut window).unwrap();

        assert!(frames.needs_recreation());
        assert_eq!(frames.current_frame(), 1);
        assert_eq!(gpu.count(|c| matches!(c, Call::Build(_))), 0);
    }

    #[test]
    fn test_resize_flag_is_consumed_at_present() {
        let mut gpu = FakeGpu::new();
        let mut window = FakeWindow::new((640, 480));
        window.resized = true;
        let mut frames = FrameManager::new();

        frames.draw_frame(&mut gpu, &mut window).unwrap();

        assert!(!window.resized);
        assert!(frames.needs_recreation());

        frames.draw_frame(&mut gpu, &mut window).unwrap();
        assert!(gpu.calls.contains(&Call::Build((640, 480))));
        assert_eq!(frames.recreations(), 1);
    }

    #[test]
    fn test_suboptimal_acquire_still_draws() {
        let mut gpu = FakeGpu::new();
        gpu.acquire_script.push_back(AcquireOutcome::Ready {
            image_index: 2,
            suboptimal: true,
        });
        let mut window = FakeWindow::new((800, 600));
        let mut frames = FrameManager::new();

        frames.draw_frame(&mut gpu, &mut window).unwrap();

        assert!(gpu.calls.contains(&Call::Record(0, 2)));
        assert!(gpu.calls.contains(&Call::Present(0, 2)));
        assert!(frames.needs_recreation());
    }

    #[test]
    fn test_fence_untouched_when_acquire_out_of_date() {
        let mut gpu = FakeGpu::new();
        gpu.acquire_script.push_back(AcquireOutcome::OutOfDate);
        let mut window = FakeWindow::new((800, 600));
        let mut frames = FrameManager::new();

        frames.draw_frame(&mut gpu, &mut window).unwrap();

        assert_eq!(gpu.count(|c| matches!(c, Call::Reset(_))), 0);
    }

    #[test]
    fn test_submission_failure_is_fatal() {
        let mut gpu = FakeGpu::new();
        gpu.fail_submit = true;
        let mut window = FakeWindow::new((800, 600));
        let mut frames = FrameManager::new();

        let result = frames.draw_frame(&mut gpu, &mut window);

        assert!(matches!(result, Err(RhiError::SubmissionError(_))));
        assert_eq!(frames.current_frame(), 0);
        assert_eq!(gpu.count(|c| matches!(c, Call::Present(..))), 0);
    }

    #[test]
    fn test_acquire_failure_is_fatal() {
        let mut gpu = FakeGpu::new();
        gpu.fail_acquire = true;
        let mut window = FakeWindow::new((800, 600));
        let mut frames = FrameManager::new();

        let result = frames.draw_frame(&mut gpu, &mut window);

        assert!(matches!(result, Err(RhiError::SwapchainAcquireError(_))));
        assert_eq!(gpu.count(|c| matches!(c, Call::Reset(_))), 0);
    }
}
