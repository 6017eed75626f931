//! Transition - The Guard Algebra
//!
//! Every method here is a guard test, a bit assignment, or both. Nothing
//! allocates, blocks, or calls out; the stream core composes these into its
//! update loops and fires the extension points in between.
//!
//! Transitions come in mirrored families for the two halves:
//!
//! - **Acquire-active**: `can_shift_*` / `should_read` then `begin_*`
//! - **Sync release**: `end_*_sync`, run right after the hook returns
//! - **Non-primary drive**: `take_read_end` / `take_final`, then `next_teardown`

use crate::state::StreamState;

/// What the non-primary drive should do once a half cannot make progress.
///
/// The check order is fixed: a pending destroy wins over opening, so a stream
/// destroyed before it ever opened never opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// Invoke `destroy` now. Both active bits have been claimed.
    Destroy,
    /// Destroy is pending but a hook is still in flight.
    Wait,
    /// Invoke `open` now. Both active bits have been claimed.
    Open,
    /// Nothing to do.
    Idle,
}

// Read half
impl StreamState {
    pub const fn can_shift_read(self) -> bool {
        self.is(Self::READ_STATUS, Self::READ_QUEUED)
    }

    pub const fn is_read_flowing(self) -> bool {
        !self.none_of(Self::READ_FLOWING)
    }

    pub const fn should_read(self) -> bool {
        self.none_of(Self::SHOULD_NOT_READ)
    }

    pub fn begin_read(&mut self) {
        self.insert(Self::READ_ACTIVE_AND_SYNC_AND_NEEDS_PUSH);
    }

    pub fn end_read_sync(&mut self) {
        self.remove(Self::READ_SYNC);
    }

    pub fn release_read(&mut self) {
        self.remove(Self::READ_ACTIVE);
    }

    pub const fn should_emit_readable(self) -> bool {
        self.is(Self::READ_READABLE_STATUS, Self::READ_EMIT_READABLE_AND_QUEUED)
    }

    pub const fn read_is_non_primary(self) -> bool {
        self.none_of(Self::READ_PRIMARY_AND_ACTIVE)
    }

    /// Records a buffered push.
    pub fn push_data(&mut self) {
        self.insert(Self::READ_QUEUED);
        self.remove(Self::READ_NEEDS_PUSH);
    }

    /// Records the end-of-stream sentinel.
    pub fn push_end(&mut self) {
        self.insert(Self::READ_ENDING);
        self.remove(Self::READ_PRIMARY | Self::READ_NEEDS_PUSH);
    }

    pub const fn is_read_ended(self) -> bool {
        !self.none_of(Self::READ_ENDING.union(Self::READ_DONE))
    }

    pub fn clear_read_queued(&mut self) {
        self.remove(Self::READ_NOT_QUEUED);
    }

    /// Claims the `end` notification once the queue is empty.
    pub fn take_read_end(&mut self) -> bool {
        if !self.is(Self::READ_ENDING_STATUS, Self::READ_ENDING) {
            return false;
        }
        self.insert(Self::READ_DONE);
        self.remove(Self::READ_ENDING);
        true
    }

    /// The pipe target refused a write.
    pub fn pipe_backpressured(&mut self) {
        self.remove(Self::READ_FLOWING);
    }

    /// The pipe target drained. Returns whether a deferred update is needed.
    pub fn pipe_drained(&mut self) -> bool {
        self.insert(Self::READ_PIPE_DRAINED);
        self.none_of(Self::READ_ACTIVE_AND_SYNC)
    }

    pub const fn is_read_backpressured(self) -> bool {
        !self.none_of(Self::READ_BACKPRESSURE_STATUS)
    }

    /// Coalesces deferred read updates. Returns `true` if one must be scheduled.
    pub fn schedule_read_tick(&mut self) -> bool {
        if self.contains(Self::READ_NEXT_TICK) {
            return false;
        }
        self.insert(Self::READ_NEXT_TICK);
        true
    }
}

// Write half
impl StreamState {
    pub const fn can_shift_write(self) -> bool {
        self.is(Self::WRITE_STATUS, Self::WRITE_QUEUED)
    }

    pub fn begin_write(&mut self) {
        self.insert(Self::WRITE_ACTIVE_AND_SYNC);
    }

    pub fn end_write_sync(&mut self) {
        self.remove(Self::WRITE_SYNC);
    }

    pub fn release_write(&mut self) {
        self.remove(Self::WRITE_ACTIVE);
    }

    pub const fn write_is_non_primary(self) -> bool {
        self.none_of(Self::WRITE_PRIMARY_AND_ACTIVE)
    }

    /// Records a buffered write; `saturated` marks a drain as owed.
    pub fn queue_write(&mut self, saturated: bool) {
        if saturated {
            self.insert(Self::WRITE_QUEUED_AND_UNDRAINED);
        } else {
            self.insert(Self::WRITE_QUEUED);
        }
    }

    /// The write queue emptied. Returns whether `drain` must be emitted.
    pub fn mark_drained(&mut self) -> bool {
        let owed = self.contains(Self::WRITE_NEEDS_EMIT_DRAIN);
        self.remove(Self::WRITE_QUEUED_AND_UNDRAINED);
        owed
    }

    pub const fn is_write_ended(self) -> bool {
        !self.none_of(Self::WRITE_ENDED)
    }

    pub fn begin_finish(&mut self) {
        self.insert(Self::WRITE_FINISHING | Self::WRITE_END_CALLED);
        self.remove(Self::WRITE_PRIMARY);
    }

    /// Claims the `final` invocation once the queue is empty.
    pub fn take_final(&mut self) -> bool {
        if !self.is(Self::WRITE_FINISHING_STATUS, Self::WRITE_FINISHING) {
            return false;
        }
        self.insert(Self::WRITE_ACTIVE);
        self.remove(Self::WRITE_FINISHING);
        true
    }

    /// `final` called back. Returns whether `finish` should fire.
    pub fn complete_final(&mut self) -> bool {
        if !self.none_of(Self::DESTROY_STATUS) {
            return false;
        }
        self.insert(Self::WRITE_DONE);
        true
    }

    pub const fn is_write_backpressured(self) -> bool {
        !self.none_of(Self::WRITE_BACKPRESSURE_STATUS)
    }

    /// Coalesces deferred write updates. Returns `true` if one must be scheduled.
    pub fn schedule_write_tick(&mut self) -> bool {
        if self.contains(Self::WRITE_NEXT_TICK) {
            return false;
        }
        self.insert(Self::WRITE_NEXT_TICK);
        true
    }
}

// Shared lifecycle
impl StreamState {
    /// Both halves are done and nobody asked for teardown yet: request it.
    pub fn take_auto_destroy(&mut self) -> bool {
        if !self.is(Self::AUTO_DESTROY, Self::DONE) {
            return false;
        }
        self.insert(Self::DESTROYING);
        true
    }

    /// Priority-ordered destroy/open decision shared by both halves.
    pub fn next_teardown(&mut self) -> Teardown {
        if self.is(Self::DESTROY_STATUS, Self::DESTROYING) {
            if !self.none_of(Self::ACTIVE) {
                return Teardown::Wait;
            }
            self.insert(Self::ACTIVE);
            return Teardown::Destroy;
        }

        if self.is(Self::OPEN_STATUS, Self::OPENING) {
            self.insert(Self::ACTIVE);
            self.remove(Self::OPENING);
            return Teardown::Open;
        }

        Teardown::Idle
    }

    /// First destroy request wins. Returns `false` for every later call.
    pub fn begin_destroy(&mut self) -> bool {
        if !self.none_of(Self::DESTROY_STATUS) {
            return false;
        }
        self.insert(Self::DESTROYING);
        self.remove(Self::PRIMARY);
        true
    }

    /// `open` called back. Grants primary to every half that is not already
    /// ending or done and returns whether the stream actually opened.
    pub fn complete_open(&mut self) -> bool {
        let opened = !self.contains(Self::DESTROYING);
        if opened {
            if self.none_of(Self::READ_PRIMARY_STATUS) {
                self.insert(Self::READ_PRIMARY);
            }
            if self.none_of(Self::WRITE_PRIMARY_STATUS) {
                self.insert(Self::WRITE_PRIMARY);
            }
        }
        self.remove(Self::ACTIVE);
        opened
    }

    pub fn complete_destroy(&mut self) {
        self.insert(Self::DESTROYED);
    }

    pub const fn is_destroying(self) -> bool {
        !self.none_of(Self::DESTROY_STATUS)
    }

    pub const fn is_destroyed(self) -> bool {
        self.contains(Self::DESTROYED)
    }
}
