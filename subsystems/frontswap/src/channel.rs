//! # Async Operation Channel
//!
//! One single-slot handoff per CPU between the code that submits an async
//! backend request, the backend completion path, and the poller.
//!
//! ## Slot State Machine
//!
//! ```text
//!             claim()                publish()
//!   ┌──────┐ ─────────▶ ┌─────────┐ ─────────▶ ┌─────────┐
//!   │ Idle │            │ Claimed │            │ Pending │
//!   └──────┘ ◀───────── └─────────┘            └────┬────┘
//!      ▲      abandon()      │ Completion::complete()│
//!      │                     └──────────┬────────────┘
//!      │                                ▼
//!      │      try_consume()     ┌───────────────┐
//!      └──── (via Consuming) ── │ Ready / Failed│
//!                               └───────────────┘
//! ```
//!
//! `Claimed` and `Consuming` are internal: they give the submitter and the
//! poller exclusive access to the request cell, so the cell needs no lock.
//! The state word also carries a generation that advances every time the
//! slot returns to `Idle`; a `Completion` only ever fires against the
//! generation it was issued for.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::error::{FrontswapError, FrontswapResult};
use crate::types::{CpuId, PageHandle};

// =============================================================================
// SLOT STATE
// =============================================================================

const STATE_BITS: u32 = 8;
const STATE_MASK: u64 = (1 << STATE_BITS) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum RawState {
    Idle      = 0,
    Claimed   = 1,
    Pending   = 2,
    Ready     = 3,
    Failed    = 4,
    Consuming = 5,
}

impl RawState {
    fn from_word(word: u64) -> Self {
        match word & STATE_MASK {
            0 => Self::Idle,
            1 => Self::Claimed,
            2 => Self::Pending,
            3 => Self::Ready,
            4 => Self::Failed,
            _ => Self::Consuming,
        }
    }
}

#[inline]
const fn pack(generation: u64, state: RawState) -> u64 {
    (generation << STATE_BITS) | state as u64
}

#[inline]
const fn generation_of(word: u64) -> u64 {
    word >> STATE_BITS
}

/// Observable status of a per-CPU slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// Nothing outstanding
    Idle,
    /// Submitted, backend has not completed it yet
    Pending,
    /// Completed successfully, waiting for a poll
    Ready,
    /// Completed with a failure, waiting for a poll
    Failed,
}

/// Final outcome of a consumed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Backend completed the request
    Ready,
    /// Backend failed the request
    Failed,
}

/// A request parked in a slot
#[derive(Debug)]
pub struct AsyncRequest<C> {
    /// Page the request is about
    pub handle: PageHandle,
    /// Submitter context, handed back on consumption
    pub context: C,
}

/// A consumed request with its outcome
#[derive(Debug)]
pub struct Completed<C> {
    /// The request as submitted
    pub request: AsyncRequest<C>,
    /// What the backend reported
    pub outcome: Outcome,
}

// =============================================================================
// SLOT WORD / COMPLETION
// =============================================================================

/// The state word shared between a slot and its outstanding completion
#[derive(Debug)]
struct SlotWord {
    word: AtomicU64,
    cpu: CpuId,
}

impl SlotWord {
    /// Move `(generation, Claimed|Pending)` to `(generation, target)`
    ///
    /// Returns the state it moved from, `None` if the completion was stale.
    fn fire(&self, generation: u64, target: RawState) -> Option<RawState> {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            if generation_of(current) != generation {
                return None;
            }
            let from = RawState::from_word(current);
            match from {
                RawState::Claimed | RawState::Pending => {},
                _ => return None,
            }
            match self.word.compare_exchange_weak(
                current,
                pack(generation, target),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(from),
                Err(actual) => current = actual,
            }
        }
    }
}

/// Completion token handed to the backend with an async request
///
/// The backend fires it exactly once from its completion path. Dropping it
/// without firing reports the request as failed, so a slot can never be
/// left pending by a backend that loses track of a request.
#[must_use = "dropping a Completion fails the request"]
#[derive(Debug)]
pub struct Completion {
    slot: Arc<SlotWord>,
    generation: u64,
    fired: bool,
}

impl Completion {
    /// CPU whose slot this completion belongs to
    pub fn cpu(&self) -> CpuId {
        self.slot.cpu
    }

    /// Slot generation this completion was issued for
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report the backend's outcome
    pub fn complete(mut self, result: FrontswapResult<()>) {
        let target = match result {
            Ok(()) => RawState::Ready,
            Err(_) => RawState::Failed,
        };
        self.fired = true;
        self.slot.fire(self.generation, target);
    }

    /// Report success
    pub fn succeed(self) {
        self.complete(Ok(()));
    }

    /// Report failure
    pub fn fail(self) {
        self.complete(Err(FrontswapError::BackendFailed));
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.fired {
            return;
        }
        match self.slot.fire(self.generation, RawState::Failed) {
            // Still claimed: the backend refused the request and the
            // submitter is about to abandon the slot.
            Some(RawState::Claimed) => {
                log::trace!("frontswap: {} request refused", self.slot.cpu);
            },
            Some(_) => {
                log::warn!(
                    "frontswap: {} completion dropped unfired, request failed",
                    self.slot.cpu
                );
            },
            None => {},
        }
    }
}

// =============================================================================
// ASYNC SLOT
// =============================================================================

/// A single per-CPU handoff slot
pub struct AsyncSlot<C> {
    state: Arc<SlotWord>,
    request: UnsafeCell<Option<AsyncRequest<C>>>,
}

// SAFETY: `request` is only accessed by the party that moved the state word
// into `Claimed` (submitter) or `Consuming` (poller) via a successful CAS,
// so at most one thread touches the cell at a time.
unsafe impl<C: Send> Sync for AsyncSlot<C> {}

impl<C> AsyncSlot<C> {
    fn new(cpu: CpuId) -> Self {
        Self {
            state: Arc::new(SlotWord {
                word: AtomicU64::new(pack(0, RawState::Idle)),
                cpu,
            }),
            request: UnsafeCell::new(None),
        }
    }

    /// CPU owning this slot
    pub fn cpu(&self) -> CpuId {
        self.state.cpu
    }

    /// Reserve the slot for `request`
    ///
    /// Fails with `SlotBusy` unless the slot is idle. The returned
    /// completion must be handed to the backend; afterwards the submitter
    /// calls [`publish`](Self::publish) if the backend accepted it, or
    /// [`abandon`](Self::abandon) if it refused.
    pub fn claim(&self, request: AsyncRequest<C>) -> FrontswapResult<Completion> {
        let current = self.state.word.load(Ordering::Acquire);
        if RawState::from_word(current) != RawState::Idle {
            return Err(FrontswapError::SlotBusy);
        }
        let generation = generation_of(current);
        self.state
            .word
            .compare_exchange(
                current,
                pack(generation, RawState::Claimed),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| FrontswapError::SlotBusy)?;

        // SAFETY: we own the cell while the slot is `Claimed`.
        unsafe { *self.request.get() = Some(request) };

        Ok(Completion {
            slot: Arc::clone(&self.state),
            generation,
            fired: false,
        })
    }

    /// Mark a claimed request as submitted
    ///
    /// A completion that already fired moved the slot past `Claimed`; that
    /// is fine and leaves the outcome in place.
    pub fn publish(&self, generation: u64) {
        let _ = self.state.word.compare_exchange(
            pack(generation, RawState::Claimed),
            pack(generation, RawState::Pending),
            Ordering::Release,
            Ordering::Relaxed,
        );
    }

    /// Roll back a claim the backend refused, returning the slot to idle
    pub fn abandon(&self, generation: u64) {
        let mut current = self.state.word.load(Ordering::Acquire);
        loop {
            if generation_of(current) != generation {
                return;
            }
            match RawState::from_word(current) {
                RawState::Claimed | RawState::Pending | RawState::Ready | RawState::Failed => {},
                RawState::Idle | RawState::Consuming => return,
            }
            match self.state.word.compare_exchange_weak(
                current,
                pack(generation, RawState::Consuming),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        // SAFETY: we own the cell while the slot is `Consuming`.
        unsafe { *self.request.get() = None };
        self.state
            .word
            .store(pack(generation + 1, RawState::Idle), Ordering::Release);
    }

    /// Inspect the slot without consuming it
    pub fn status(&self) -> SlotStatus {
        match RawState::from_word(self.state.word.load(Ordering::Acquire)) {
            RawState::Idle | RawState::Consuming => SlotStatus::Idle,
            RawState::Claimed | RawState::Pending => SlotStatus::Pending,
            RawState::Ready => SlotStatus::Ready,
            RawState::Failed => SlotStatus::Failed,
        }
    }

    /// Take a completed request out of the slot, returning it to idle
    pub fn try_consume(&self) -> Option<Completed<C>> {
        let current = self.state.word.load(Ordering::Acquire);
        let outcome = match RawState::from_word(current) {
            RawState::Ready => Outcome::Ready,
            RawState::Failed => Outcome::Failed,
            _ => return None,
        };
        let generation = generation_of(current);
        self.state
            .word
            .compare_exchange(
                current,
                pack(generation, RawState::Consuming),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()?;

        // SAFETY: we own the cell while the slot is `Consuming`.
        let request = unsafe { (*self.request.get()).take() };
        self.state
            .word
            .store(pack(generation + 1, RawState::Idle), Ordering::Release);

        request.map(|request| Completed { request, outcome })
    }
}

impl<C> core::fmt::Debug for AsyncSlot<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AsyncSlot")
            .field("cpu", &self.state.cpu)
            .field("status", &self.status())
            .finish()
    }
}

// =============================================================================
// ASYNC OP CHANNEL
// =============================================================================

/// Per-CPU array of async slots
#[derive(Debug)]
pub struct AsyncOpChannel<C> {
    slots: Box<[AsyncSlot<C>]>,
}

impl<C> AsyncOpChannel<C> {
    /// Create one idle slot per CPU
    pub fn new(nr_cpus: usize) -> Self {
        let slots = (0..nr_cpus)
            .map(|cpu| AsyncSlot::new(CpuId::new(cpu as u32)))
            .collect();
        Self { slots }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Is the channel empty?
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot of `cpu`
    #[inline]
    pub fn slot(&self, cpu: CpuId) -> FrontswapResult<&AsyncSlot<C>> {
        self.slots
            .get(cpu.index())
            .ok_or(FrontswapError::InvalidCpu)
    }
}
