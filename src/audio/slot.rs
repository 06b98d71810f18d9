// Stream slot: the full state of one playback in the pool
//
// A slot's identity and lifecycle state share one atomic word so claims,
// stops and the worker's own exit are decided by a single compare-and-swap.

use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use parking_lot::{Mutex, MutexGuard};

use super::decoder::StreamDecoder;
use super::ring::BufferRing;
use super::signal::WakeSignal;

const STATE_BITS: u32 = 3;
const STATE_MASK: u64 = (1 << STATE_BITS) - 1;
const ID_LIMIT: u64 = 1 << (u64::BITS - STATE_BITS);

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a playing stream, unique among active streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(NonZeroU64);

impl StreamId {
    /// Wrap a raw id; `None` for 0 or values outside the id space.
    pub fn new(raw: u64) -> Option<Self> {
        if raw >= ID_LIMIT {
            return None;
        }
        NonZeroU64::new(raw).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Draw the next id from the process-wide counter.
    pub(crate) fn next() -> Self {
        loop {
            let raw = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed) % ID_LIMIT;
            if let Some(id) = Self::new(raw) {
                return id;
            }
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    /// Nothing allocated
    Idle = 0,
    /// Claimed by `play`, resources being opened
    Starting = 1,
    /// Worker running
    Active = 2,
    /// Worker exited on its own; resources await release
    Finished = 3,
    /// Claimed by a stop path
    Stopping = 4,
}

impl SlotState {
    fn from_bits(bits: u64) -> Self {
        match bits & STATE_MASK {
            0 => SlotState::Idle,
            1 => SlotState::Starting,
            2 => SlotState::Active,
            3 => SlotState::Finished,
            _ => SlotState::Stopping,
        }
    }
}

fn pack(id: u64, state: SlotState) -> u64 {
    (id << STATE_BITS) | state as u64
}

/// Everything a running stream owns besides its flags.
///
/// The worker hands its decoder back through the join handle, so joining is
/// the only way to get at it.
pub(crate) struct SlotResources {
    pub(crate) worker: JoinHandle<Box<dyn StreamDecoder>>,
    pub(crate) ring: BufferRing,
}

pub(crate) struct StreamSlot {
    index: usize,
    tag: AtomicU64,
    looping: AtomicBool,
    quit: AtomicBool,
    signal: WakeSignal,
    resources: Mutex<Option<SlotResources>>,
}

impl StreamSlot {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            tag: AtomicU64::new(pack(0, SlotState::Idle)),
            looping: AtomicBool::new(false),
            quit: AtomicBool::new(false),
            signal: WakeSignal::new(),
            resources: Mutex::new(None),
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Hardware channel bound to this slot.
    pub(crate) fn channel(&self) -> usize {
        self.index
    }

    pub(crate) fn id(&self) -> Option<StreamId> {
        StreamId::new(self.tag.load(Ordering::Acquire) >> STATE_BITS)
    }

    pub(crate) fn state(&self) -> SlotState {
        SlotState::from_bits(self.tag.load(Ordering::Acquire))
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state() == SlotState::Active
    }

    pub(crate) fn holds(&self, id: StreamId) -> bool {
        self.id() == Some(id)
    }

    pub(crate) fn looping(&self) -> bool {
        self.looping.load(Ordering::Acquire)
    }

    pub(crate) fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }

    pub(crate) fn request_quit(&self) {
        self.quit.store(true, Ordering::Release);
    }

    /// Whether the completion callback should wake this slot's worker.
    pub(crate) fn wants_wake(&self) -> bool {
        self.is_active() && !self.quit_requested()
    }

    pub(crate) fn wake(&self) {
        self.signal.raise();
    }

    pub(crate) fn wait_for_wake(&self) {
        self.signal.wait();
    }

    /// Claim an idle or finished slot for a new playback.
    pub(crate) fn try_claim(&self) -> bool {
        let current = self.tag.load(Ordering::Acquire);
        match SlotState::from_bits(current) {
            SlotState::Idle | SlotState::Finished => self
                .tag
                .compare_exchange(
                    current,
                    pack(0, SlotState::Starting),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok(),
            _ => false,
        }
    }

    /// Reset the per-playback flags of a claimed slot.
    pub(crate) fn prepare(&self, looping: bool) {
        self.looping.store(looping, Ordering::Release);
        self.quit.store(false, Ordering::Release);
        self.signal.clear();
    }

    /// Publish a claimed slot as active under `id`.
    pub(crate) fn activate(&self, id: StreamId) {
        self.tag.store(pack(id.get(), SlotState::Active), Ordering::Release);
    }

    /// Return a claimed slot to the pool without it ever having played.
    pub(crate) fn abandon(&self) {
        self.tag.store(pack(0, SlotState::Idle), Ordering::Release);
    }

    /// Undo `activate` when the worker never started. Fails if a stop
    /// already claimed the slot; that stop then returns it to the pool.
    pub(crate) fn retract(&self, id: StreamId) -> bool {
        self.tag
            .compare_exchange(
                pack(id.get(), SlotState::Active),
                pack(0, SlotState::Idle),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Worker's terminal act: `Active -> Finished`, unless a stop got there first.
    pub(crate) fn mark_finished(&self) -> bool {
        let current = self.tag.load(Ordering::Acquire);
        if SlotState::from_bits(current) != SlotState::Active {
            return false;
        }
        let finished = (current & !STATE_MASK) | SlotState::Finished as u64;
        self.tag
            .compare_exchange(current, finished, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claim the slot holding `id` for the stop path.
    pub(crate) fn begin_stop(&self, id: StreamId) -> bool {
        [SlotState::Active, SlotState::Finished].iter().any(|&state| {
            self.tag
                .compare_exchange(
                    pack(id.get(), state),
                    pack(id.get(), SlotState::Stopping),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        })
    }

    pub(crate) fn finish_stop(&self) {
        self.tag.store(pack(0, SlotState::Idle), Ordering::Release);
    }

    pub(crate) fn resources(&self) -> MutexGuard<'_, Option<SlotResources>> {
        self.resources.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_increase() {
        let a = StreamId::next();
        let b = StreamId::next();
        assert!(b > a);
        assert!(a.get() >= 1);
    }

    #[test]
    fn raw_id_bounds() {
        assert!(StreamId::new(0).is_none());
        assert!(StreamId::new(ID_LIMIT).is_none());
        assert_eq!(StreamId::new(7).map(StreamId::get), Some(7));
    }

    #[test]
    fn claim_activate_finish_and_reclaim() {
        let slot = StreamSlot::new(3);
        assert_eq!(slot.state(), SlotState::Idle);
        assert!(slot.try_claim());
        assert!(!slot.try_claim());

        let id = StreamId::next();
        slot.prepare(false);
        slot.activate(id);
        assert!(slot.is_active());
        assert!(slot.holds(id));
        assert!(slot.wants_wake());

        assert!(slot.mark_finished());
        assert_eq!(slot.state(), SlotState::Finished);
        assert!(!slot.is_active());
        assert!(slot.holds(id));

        // A finished slot can be claimed again
        assert!(slot.try_claim());
        assert_eq!(slot.id(), None);
    }

    #[test]
    fn stop_wins_over_worker_exit() {
        let slot = StreamSlot::new(0);
        assert!(slot.try_claim());
        let id = StreamId::next();
        slot.activate(id);

        assert!(slot.begin_stop(id));
        assert!(!slot.mark_finished());
        assert_eq!(slot.state(), SlotState::Stopping);

        slot.finish_stop();
        assert_eq!(slot.state(), SlotState::Idle);
        assert_eq!(slot.id(), None);
    }

    #[test]
    fn stop_requires_matching_id() {
        let slot = StreamSlot::new(0);
        assert!(slot.try_claim());
        let id = StreamId::next();
        slot.activate(id);

        let other = StreamId::next();
        assert!(!slot.begin_stop(other));
        assert!(slot.is_active());
    }

    #[test]
    fn retract_loses_to_a_stop() {
        let slot = StreamSlot::new(2);
        assert!(slot.try_claim());
        let id = StreamId::next();
        slot.activate(id);
        assert!(slot.retract(id));
        assert_eq!(slot.state(), SlotState::Idle);

        assert!(slot.try_claim());
        let id = StreamId::next();
        slot.activate(id);
        assert!(slot.begin_stop(id));
        assert!(!slot.retract(id));
        assert_eq!(slot.state(), SlotState::Stopping);
    }

    #[test]
    fn quit_suppresses_wakes() {
        let slot = StreamSlot::new(1);
        assert!(slot.try_claim());
        slot.prepare(true);
        slot.activate(StreamId::next());
        assert!(slot.looping());

        slot.request_quit();
        assert!(slot.quit_requested());
        assert!(!slot.wants_wake());
    }
}
