//! StreamState - The Packed State Register
//!
//! Every stream owns exactly one `StreamState`. The register is split into
//! three disjoint bit-groups:
//!
//! - **Shared**: `OPENING`, `DESTROYING`, `DESTROYED`
//! - **Read half**: bits 3..=15
//! - **Write half**: bits 16..=25
//!
//! Both halves of a duplex test and set the shared group; neither half ever
//! touches the other half's group except through the combined masks below.
//!
//! # Philosophy
//! > The transition table is the artifact, the bit-packing is an encoding.
//!
//! Every composite mask is a pure union of the primitive flags it names.

use bitflags::bitflags;

bitflags! {
    /// The per-stream state register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StreamState: u32 {
        // Shared
        /// `open` has not been invoked yet.
        const OPENING     = 1 << 0;
        /// Teardown requested; `destroy` is pending or in flight.
        const DESTROYING  = 1 << 1;
        /// `destroy` completed and `close` fired. Terminal.
        const DESTROYED   = 1 << 2;

        // Read half
        /// A read-side hook (`read`, or `open`/`destroy`) is in flight.
        const READ_ACTIVE           = 1 << 3;
        /// The read half has been opened and is not yet ending.
        const READ_PRIMARY          = 1 << 4;
        /// Inside the synchronous part of a `read` invocation.
        const READ_SYNC             = 1 << 5;
        /// The read queue is non-empty.
        const READ_QUEUED           = 1 << 6;
        /// Flowing mode requested (`resume` or a data listener).
        const READ_RESUMED          = 1 << 7;
        /// The pipe target accepted the last write without backpressure.
        const READ_PIPE_DRAINED     = 1 << 8;
        /// End-of-stream was pushed; `end` fires once the queue drains.
        const READ_ENDING           = 1 << 9;
        /// Data listeners are registered.
        const READ_EMIT_DATA        = 1 << 10;
        /// Readable listeners are registered.
        const READ_EMIT_READABLE    = 1 << 11;
        /// `readable` already fired for the current batch.
        const READ_EMITTED_READABLE = 1 << 12;
        /// `end` fired.
        const READ_DONE             = 1 << 13;
        /// A deferred read update is scheduled.
        const READ_NEXT_TICK        = 1 << 14;
        /// `read` completed without a push; do not call it again until one happens.
        const READ_NEEDS_PUSH       = 1 << 15;

        // Write half
        /// A write-side hook (`write`, `final`, or `open`/`destroy`) is in flight.
        const WRITE_ACTIVE     = 1 << 16;
        /// The write half has been opened and is not yet finishing.
        const WRITE_PRIMARY    = 1 << 17;
        /// Inside the synchronous part of a `write` invocation.
        const WRITE_SYNC       = 1 << 18;
        /// The write queue is non-empty.
        const WRITE_QUEUED     = 1 << 19;
        /// A write returned `false`; `drain` is owed once the queue empties.
        const WRITE_UNDRAINED  = 1 << 20;
        /// `finish` fired.
        const WRITE_DONE       = 1 << 21;
        /// Drain listeners are registered.
        const WRITE_EMIT_DRAIN = 1 << 22;
        /// A deferred write update is scheduled.
        const WRITE_NEXT_TICK  = 1 << 23;
        /// `end` was called; `final` runs once the queue drains.
        const WRITE_FINISHING  = 1 << 24;
        /// `end` was called. Never cleared; later `end` and `write` calls see it.
        const WRITE_END_CALLED = 1 << 25;
    }
}

// Combined shared state
impl StreamState {
    pub const ACTIVE: Self = Self::READ_ACTIVE.union(Self::WRITE_ACTIVE);
    pub const PRIMARY: Self = Self::READ_PRIMARY.union(Self::WRITE_PRIMARY);
    pub const DONE: Self = Self::READ_DONE.union(Self::WRITE_DONE);
    pub const DESTROY_STATUS: Self = Self::DESTROYING.union(Self::DESTROYED);
    pub const OPEN_STATUS: Self = Self::DESTROY_STATUS.union(Self::OPENING);
    pub const AUTO_DESTROY: Self = Self::DESTROY_STATUS.union(Self::DONE);
}

// Combined read state
impl StreamState {
    pub const READ_PRIMARY_STATUS: Self = Self::OPEN_STATUS
        .union(Self::READ_ENDING)
        .union(Self::READ_DONE);
    pub const READ_STATUS: Self = Self::OPEN_STATUS
        .union(Self::READ_DONE)
        .union(Self::READ_QUEUED);
    pub const READ_FLOWING: Self = Self::READ_RESUMED.union(Self::READ_PIPE_DRAINED);
    pub const READ_ACTIVE_AND_SYNC: Self = Self::READ_ACTIVE.union(Self::READ_SYNC);
    pub const READ_ACTIVE_AND_SYNC_AND_NEEDS_PUSH: Self =
        Self::READ_ACTIVE_AND_SYNC.union(Self::READ_NEEDS_PUSH);
    pub const READ_PRIMARY_AND_ACTIVE: Self = Self::READ_PRIMARY.union(Self::READ_ACTIVE);
    pub const READ_ENDING_STATUS: Self = Self::OPEN_STATUS
        .union(Self::READ_ENDING)
        .union(Self::READ_QUEUED);
    pub const READ_EMIT_READABLE_AND_QUEUED: Self =
        Self::READ_EMIT_READABLE.union(Self::READ_QUEUED);
    pub const READ_READABLE_STATUS: Self = Self::OPEN_STATUS
        .union(Self::READ_EMIT_READABLE)
        .union(Self::READ_QUEUED)
        .union(Self::READ_EMITTED_READABLE);
    pub const SHOULD_NOT_READ: Self = Self::OPEN_STATUS
        .union(Self::READ_ACTIVE)
        .union(Self::READ_ENDING)
        .union(Self::READ_DONE)
        .union(Self::READ_NEEDS_PUSH);
    pub const READ_NOT_QUEUED: Self = Self::READ_QUEUED.union(Self::READ_EMITTED_READABLE);
    pub const READ_BACKPRESSURE_STATUS: Self = Self::DESTROY_STATUS
        .union(Self::READ_ENDING)
        .union(Self::READ_DONE);
}

// Combined write state
impl StreamState {
    pub const WRITE_PRIMARY_STATUS: Self = Self::OPEN_STATUS
        .union(Self::WRITE_FINISHING)
        .union(Self::WRITE_DONE);
    pub const WRITE_QUEUED_AND_UNDRAINED: Self = Self::WRITE_QUEUED.union(Self::WRITE_UNDRAINED);
    pub const WRITE_NEEDS_EMIT_DRAIN: Self = Self::WRITE_UNDRAINED.union(Self::WRITE_EMIT_DRAIN);
    pub const WRITE_STATUS: Self = Self::OPEN_STATUS
        .union(Self::WRITE_ACTIVE)
        .union(Self::WRITE_QUEUED);
    pub const WRITE_PRIMARY_AND_ACTIVE: Self = Self::WRITE_PRIMARY.union(Self::WRITE_ACTIVE);
    pub const WRITE_ACTIVE_AND_SYNC: Self = Self::WRITE_ACTIVE.union(Self::WRITE_SYNC);
    pub const WRITE_FINISHING_STATUS: Self = Self::OPEN_STATUS
        .union(Self::WRITE_FINISHING)
        .union(Self::WRITE_QUEUED);
    pub const WRITE_ENDED: Self = Self::WRITE_END_CALLED
        .union(Self::WRITE_FINISHING)
        .union(Self::WRITE_DONE);
    pub const WRITE_BACKPRESSURE_STATUS: Self = Self::DESTROY_STATUS.union(Self::WRITE_ENDED);
}

impl StreamState {
    /// Initial register of a duplex stream.
    pub const fn duplex() -> Self {
        Self::OPENING
    }

    /// Initial register of a read-only stream: the write half starts done.
    pub const fn readable() -> Self {
        Self::OPENING.union(Self::WRITE_DONE)
    }

    /// Initial register of a write-only stream: the read half starts done.
    pub const fn writable() -> Self {
        Self::OPENING.union(Self::READ_DONE)
    }

    /// The guard test every transition is built from: `(state & mask) == expected`.
    #[inline]
    pub const fn is(self, mask: Self, expected: Self) -> bool {
        self.bits() & mask.bits() == expected.bits()
    }

    /// `(state & mask) == 0`
    #[inline]
    pub const fn none_of(self, mask: Self) -> bool {
        self.bits() & mask.bits() == 0
    }

    /// Coarse lifecycle phase, for reporting.
    pub const fn phase(self) -> Phase {
        if self.contains(Self::DESTROYED) {
            Phase::Destroyed
        } else if self.contains(Self::DESTROYING) {
            Phase::Destroying
        } else if self.contains(Self::OPENING) {
            Phase::Opening
        } else {
            Phase::Open
        }
    }
}

/// Coarse lifecycle phase derived from the register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// `open` has not run yet.
    Opening,
    /// Opened (or opening in flight) and not torn down.
    Open,
    /// Teardown requested.
    Destroying,
    /// Closed. Terminal.
    Destroyed,
}
