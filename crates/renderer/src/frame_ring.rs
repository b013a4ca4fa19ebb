//! Frame slots and the ring that recycles them.
//!
//! This module provides the [`FrameRing`] struct for managing per-frame
//! resources. Each [`FrameSlot`] owns:
//!
//! - A command buffer that retains what its frame used
//! - An image-available and a render-finished semaphore
//! - An in-flight fence
//!
//! # Overview
//!
//! The ring implements the "frames in flight" pattern: with N slots the CPU
//! may record frame K while the GPU still executes frames K-1 .. K-N+1.
//! Before a slot is reused its fence is waited on, and only then is its
//! command buffer reset. The reset is what releases the resources the
//! previous frame on that slot retained, so nothing a frame used can be
//! destroyed while the GPU may still read it.
//!
//! ```text
//! next_slot():  wait(in_flight) -> reset(command_buffer) -> slot index
//! end of frame: reset(in_flight) -> submit(.., in_flight) -> mark_submitted
//! ```
//!
//! # Example
//!
//! ```no_run
//! use strand_renderer::frame_ring::FrameRing;
//! use strand_rhi::command::{CommandPool, RetainPolicy};
//! use strand_rhi::BackendRef;
//!
//! # fn example(backend: BackendRef) -> strand_rhi::RhiResult<()> {
//! let pool = CommandPool::new(backend)?;
//! let mut ring = FrameRing::new(&pool, 2, RetainPolicy::default())?;
//!
//! let index = ring.next_slot()?;
//! let slot = ring.slot_mut(index);
//! let _command_buffer = slot.command_buffer_mut();
//! # Ok(())
//! # }
//! ```

use tracing::{debug, trace};

use strand_rhi::command::{CommandBuffer, CommandBufferState, CommandPool, RetainPolicy};
use strand_rhi::sync::{Fence, Semaphore};
use strand_rhi::{RhiError, RhiResult, Shared};

/// Per-frame resources.
///
/// # Synchronization Flow
///
/// ```text
/// 1. Wait on in_flight (CPU waits for the previous use of this slot)
/// 2. Acquire swapchain image (signals image_available)
/// 3. Record commands to command_buffer
/// 4. Submit command_buffer:
///    - Wait on image_available
///    - Signal render_finished
///    - Signal in_flight
/// 5. Present (waits on render_finished)
/// ```
pub struct FrameSlot {
    // Declared first so its retained resources are released before the
    // semaphores and fence of the slot go away.
    command_buffer: Option<CommandBuffer>,
    image_available: Semaphore,
    render_finished: Semaphore,
    /// Created signaled so the first wait on each slot does not block.
    in_flight: Fence,
    /// Whether `in_flight` guards a submission nobody has waited on yet.
    submitted: bool,
}

impl FrameSlot {
    fn new(pool: &Shared<CommandPool>, policy: RetainPolicy) -> RhiResult<Self> {
        let backend = pool.backend().clone();
        Ok(Self {
            command_buffer: Some(CommandBuffer::new(pool, policy)?),
            image_available: Semaphore::new(backend.clone())?,
            render_finished: Semaphore::new(backend.clone())?,
            in_flight: Fence::new(backend, true)?,
            submitted: false,
        })
    }

    /// The slot's command buffer, unless it is currently lent out.
    #[inline]
    pub fn command_buffer(&self) -> Option<&CommandBuffer> {
        self.command_buffer.as_ref()
    }

    #[inline]
    pub fn command_buffer_mut(&mut self) -> Option<&mut CommandBuffer> {
        self.command_buffer.as_mut()
    }

    #[inline]
    pub fn image_available(&self) -> &Semaphore {
        &self.image_available
    }

    #[inline]
    pub fn render_finished(&self) -> &Semaphore {
        &self.render_finished
    }

    #[inline]
    pub fn in_flight(&self) -> &Fence {
        &self.in_flight
    }

    /// Whether the slot has a submission that has not been waited on.
    #[inline]
    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    /// Lends the command buffer out for recording.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidState`] if it is already lent out.
    pub fn take_command_buffer(&mut self) -> RhiResult<CommandBuffer> {
        self.command_buffer
            .take()
            .ok_or_else(|| RhiError::InvalidState("frame slot command buffer is in use".into()))
    }

    /// Hands a lent command buffer back.
    pub fn return_command_buffer(&mut self, command_buffer: CommandBuffer) {
        self.command_buffer = Some(command_buffer);
    }

    /// Records that `in_flight` now guards a submission.
    pub fn mark_submitted(&mut self) {
        self.submitted = true;
    }
}

/// A fixed ring of [`FrameSlot`]s.
///
/// # Thread Safety
///
/// The ring is not thread-safe. It should only be accessed from the render
/// thread.
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    cursor: usize,
    fence_waits: u64,
    blocking_waits: u64,
}

impl FrameRing {
    /// Creates `size` slots, each with its own command buffer from `pool`.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidState`] for a ring of size zero, or any error from
    /// creating the slot objects.
    pub fn new(pool: &Shared<CommandPool>, size: usize, policy: RetainPolicy) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidState(
                "frame ring needs at least one slot".into(),
            ));
        }
        let slots = (0..size)
            .map(|_| FrameSlot::new(pool, policy))
            .collect::<RhiResult<Vec<_>>>()?;
        debug!("Created frame ring with {} slots", size);
        Ok(Self {
            slots,
            cursor: 0,
            fence_waits: 0,
            blocking_waits: 0,
        })
    }

    /// Advances to the next slot and makes it ready for recording.
    ///
    /// Waits for the slot's previous submission, then resets its command
    /// buffer, releasing everything the previous frame on this slot
    /// retained. Returns the slot index.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails (device loss) or the slot's
    /// command buffer is still lent out.
    pub fn next_slot(&mut self) -> RhiResult<usize> {
        let index = self.cursor;
        self.cursor = (self.cursor + 1) % self.slots.len();

        let slot = &mut self.slots[index];
        if slot.submitted {
            self.fence_waits += 1;
            if !slot.in_flight.is_signaled()? {
                self.blocking_waits += 1;
                trace!("Frame slot {} still in flight, blocking", index);
            }
            slot.in_flight.wait_forever()?;
            slot.submitted = false;
        }

        let Some(command_buffer) = slot.command_buffer.as_mut() else {
            return Err(RhiError::InvalidState(format!(
                "frame slot {} command buffer is in use",
                index
            )));
        };
        if command_buffer.state() != CommandBufferState::Initial {
            command_buffer.reset()?;
        }
        Ok(index)
    }

    /// Undoes the cursor advance of the last [`next_slot`](Self::next_slot)
    /// so the next frame reuses slot `index`. Used when a frame is abandoned
    /// before anything was submitted on it.
    pub fn give_back(&mut self, index: usize) {
        debug_assert!(index < self.slots.len());
        self.cursor = index;
    }

    /// Resets every slot after the device has gone idle.
    ///
    /// All fences are known to be signaled at this point, so the command
    /// buffers can release their retained resources immediately.
    pub fn reclaim_after_idle(&mut self) -> RhiResult<()> {
        for slot in &mut self.slots {
            slot.submitted = false;
            if let Some(command_buffer) = slot.command_buffer.as_mut()
                && command_buffer.state() != CommandBufferState::Initial
            {
                command_buffer.reset()?;
            }
        }
        Ok(())
    }

    /// The slot whose command buffer is currently lent out for recording.
    pub fn recording_slot(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.command_buffer.is_none())
    }

    #[inline]
    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }

    #[inline]
    pub fn slot_mut(&mut self, index: usize) -> &mut FrameSlot {
        &mut self.slots[index]
    }

    /// Number of slots (frames in flight).
    #[inline]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Slots with a submission that has not been waited on.
    pub fn pending(&self) -> usize {
        self.slots.iter().filter(|slot| slot.submitted).count()
    }

    /// Waits performed on slot fences before reuse.
    #[inline]
    pub fn fence_waits(&self) -> u64 {
        self.fence_waits
    }

    /// Waits that found the slot's submission still executing.
    #[inline]
    pub fn blocking_waits(&self) -> u64 {
        self.blocking_waits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_rhi::mock::{MockBackend, ObjectKind};

    fn submit_slot(ring: &mut FrameRing, index: usize) {
        let slot = ring.slot_mut(index);
        let mut cb = slot.take_command_buffer().unwrap();
        cb.begin().unwrap();
        cb.end().unwrap();
        slot.in_flight().reset().unwrap();
        cb.submit(slot.in_flight()).unwrap();
        slot.return_command_buffer(cb);
        slot.mark_submitted();
    }

    #[test]
    fn test_zero_slots_rejected() {
        let mock = MockBackend::new();
        let pool = CommandPool::new(mock.backend()).unwrap();
        assert!(matches!(
            FrameRing::new(&pool, 0, RetainPolicy::default()),
            Err(RhiError::InvalidState(_))
        ));
    }

    #[test]
    fn test_slots_own_their_objects() {
        let mock = MockBackend::new();
        let pool = CommandPool::new(mock.backend()).unwrap();
        let ring = FrameRing::new(&pool, 3, RetainPolicy::default()).unwrap();
        assert_eq!(ring.size(), 3);
        assert_eq!(mock.live(ObjectKind::Fence), 3);
        assert_eq!(mock.live(ObjectKind::Semaphore), 6);
        assert_eq!(mock.live(ObjectKind::CommandBuffer), 3);

        drop(ring);
        drop(pool);
        assert_eq!(mock.live(ObjectKind::Fence), 0);
        assert_eq!(mock.live(ObjectKind::Semaphore), 0);
        assert_eq!(mock.live(ObjectKind::CommandBuffer), 0);
        assert!(mock.errors().is_empty(), "{:?}", mock.errors());
    }

    #[test]
    fn test_slots_cycle_in_order() {
        let mock = MockBackend::new();
        let pool = CommandPool::new(mock.backend()).unwrap();
        let mut ring = FrameRing::new(&pool, 2, RetainPolicy::default()).unwrap();
        let order: Vec<usize> = (0..5).map(|_| ring.next_slot().unwrap()).collect();
        assert_eq!(order, vec![0, 1, 0, 1, 0]);
        // Nothing was submitted, so nothing was waited on.
        assert_eq!(ring.fence_waits(), 0);
    }

    #[test]
    fn test_reuse_waits_on_previous_submission() {
        let mock = MockBackend::new();
        let pool = CommandPool::new(mock.backend()).unwrap();
        let mut ring = FrameRing::new(&pool, 2, RetainPolicy::default()).unwrap();

        for _ in 0..2 {
            let index = ring.next_slot().unwrap();
            submit_slot(&mut ring, index);
        }
        assert_eq!(ring.pending(), 2);

        // Slot 0 comes around again while its work is still pending.
        let index = ring.next_slot().unwrap();
        assert_eq!(index, 0);
        assert_eq!(ring.fence_waits(), 1);
        assert_eq!(ring.blocking_waits(), 1);
        assert_eq!(mock.stats().blocking_fence_waits, 1);
        assert_eq!(
            ring.slot(0).command_buffer().unwrap().state(),
            CommandBufferState::Initial
        );
        assert_eq!(ring.pending(), 1);
    }

    #[test]
    fn test_completed_work_is_not_a_blocking_wait() {
        let mock = MockBackend::new();
        let pool = CommandPool::new(mock.backend()).unwrap();
        let mut ring = FrameRing::new(&pool, 1, RetainPolicy::default()).unwrap();

        let index = ring.next_slot().unwrap();
        submit_slot(&mut ring, index);
        mock.complete_all();

        ring.next_slot().unwrap();
        assert_eq!(ring.fence_waits(), 1);
        assert_eq!(ring.blocking_waits(), 0);
    }

    #[test]
    fn test_give_back_reuses_slot() {
        let mock = MockBackend::new();
        let pool = CommandPool::new(mock.backend()).unwrap();
        let mut ring = FrameRing::new(&pool, 3, RetainPolicy::default()).unwrap();

        let first = ring.next_slot().unwrap();
        ring.give_back(first);
        assert_eq!(ring.next_slot().unwrap(), first);
        assert_eq!(ring.next_slot().unwrap(), 1);
    }

    #[test]
    fn test_lent_command_buffer_is_reported() {
        let mock = MockBackend::new();
        let pool = CommandPool::new(mock.backend()).unwrap();
        let mut ring = FrameRing::new(&pool, 1, RetainPolicy::default()).unwrap();

        let index = ring.next_slot().unwrap();
        let cb = ring.slot_mut(index).take_command_buffer().unwrap();
        assert!(ring.slot_mut(index).take_command_buffer().is_err());
        assert!(matches!(ring.next_slot(), Err(RhiError::InvalidState(_))));
        ring.slot_mut(index).return_command_buffer(cb);
    }

    #[test]
    fn test_reclaim_after_idle_resets_everything() {
        let mock = MockBackend::new();
        let backend = mock.backend();
        let pool = CommandPool::new(backend.clone()).unwrap();
        let mut ring = FrameRing::new(&pool, 2, RetainPolicy::default()).unwrap();

        for _ in 0..2 {
            let index = ring.next_slot().unwrap();
            submit_slot(&mut ring, index);
        }
        backend.wait_idle().unwrap();
        ring.reclaim_after_idle().unwrap();

        assert_eq!(ring.pending(), 0);
        for index in 0..2 {
            assert_eq!(
                ring.slot(index).command_buffer().unwrap().state(),
                CommandBufferState::Initial
            );
        }
        // No further waits are needed for either slot.
        ring.next_slot().unwrap();
        ring.next_slot().unwrap();
        assert_eq!(ring.fence_waits(), 0);
    }
}
