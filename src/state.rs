// Engine state: the fixed pool of stream slots
use std::sync::Arc;

use crate::audio::slot::{StreamId, StreamSlot};

/// Maximum number of streams that can play simultaneously.
pub const MAX_STREAMS: usize = 8;

/// Slot table shared by the caller, every worker and the completion callback.
pub(crate) struct EngineState {
    slots: Vec<Arc<StreamSlot>>,
}

impl EngineState {
    pub(crate) fn new() -> Self {
        Self {
            slots: (0..MAX_STREAMS).map(|i| Arc::new(StreamSlot::new(i))).collect(),
        }
    }

    pub(crate) fn slots(&self) -> &[Arc<StreamSlot>] {
        &self.slots
    }

    /// Claim the first idle or finished slot, in index order.
    pub(crate) fn claim_free(&self) -> Option<Arc<StreamSlot>> {
        self.slots.iter().find(|slot| slot.try_claim()).cloned()
    }

    pub(crate) fn find(&self, id: StreamId) -> Option<&Arc<StreamSlot>> {
        self.slots.iter().find(|slot| slot.holds(id))
    }

    /// Completion fan-out: wake every active worker that has not been told to quit.
    pub(crate) fn wake_active(&self) {
        for slot in &self.slots {
            if slot.wants_wake() {
                slot.wake();
            }
        }
    }

    pub(crate) fn active_streams(&self) -> Vec<StreamId> {
        self.slots
            .iter()
            .filter(|slot| slot.is_active())
            .filter_map(|slot| slot.id())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_lowest_free_index() {
        let state = EngineState::new();
        let first = state.claim_free().unwrap();
        let second = state.claim_free().unwrap();
        assert_eq!(first.index(), 0);
        assert_eq!(second.index(), 1);

        first.abandon();
        assert_eq!(state.claim_free().unwrap().index(), 0);
    }

    #[test]
    fn pool_is_bounded() {
        let state = EngineState::new();
        for _ in 0..MAX_STREAMS {
            assert!(state.claim_free().is_some());
        }
        assert!(state.claim_free().is_none());
    }

    #[test]
    fn lists_and_finds_active_streams() {
        let state = EngineState::new();
        let slot = state.claim_free().unwrap();
        let id = StreamId::next();
        slot.prepare(false);
        slot.activate(id);

        assert_eq!(state.active_streams(), vec![id]);
        assert_eq!(state.find(id).map(|s| s.index()), Some(0));
        assert!(state.find(StreamId::next()).is_none());
    }
}
