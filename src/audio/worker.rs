// Stream worker: keeps one stream's ring filled
//
// Runs on its own thread from `play` until the slot's quit flag is seen. It
// never releases anything; the decoder goes back to the stop path through the
// join handle.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::decoder::StreamDecoder;
use super::output::AudioOutput;
use super::priority;
use super::ring::{BufferRing, WaveBuffer, RING_SLICES};
use super::slot::StreamSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Running,
    WaitingForSignal,
    Exited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FillOutcome {
    DataProduced,
    NoData,
}

pub(crate) struct StreamWorker {
    slot: Arc<StreamSlot>,
    decoder: Box<dyn StreamDecoder>,
    ring: BufferRing,
    output: Arc<dyn AudioOutput>,
    scratch: Vec<i16>,
    looping: bool,
    priority: i32,
    // Decoder has nothing more to give; waiting for the ring to drain
    exhausted: bool,
}

impl StreamWorker {
    pub(crate) fn new(
        slot: Arc<StreamSlot>,
        decoder: Box<dyn StreamDecoder>,
        ring: BufferRing,
        output: Arc<dyn AudioOutput>,
        priority: i32,
    ) -> Self {
        let scratch = vec![0; ring.slice_samples()];
        let looping = slot.looping();
        Self {
            slot,
            decoder,
            ring,
            output,
            scratch,
            looping,
            priority,
            exhausted: false,
        }
    }

    /// Thread body. Returns the decoder so the stop path can close it.
    pub(crate) fn run(mut self) -> Box<dyn StreamDecoder> {
        priority::apply(self.priority);
        debug!(slot = self.slot.index(), looping = self.looping, "Stream worker started");

        let mut state = WorkerState::Running;
        while state != WorkerState::Exited {
            state = match state {
                WorkerState::Running => {
                    self.fill_pass();
                    WorkerState::WaitingForSignal
                }
                WorkerState::WaitingForSignal => {
                    if !self.slot.quit_requested() {
                        self.slot.wait_for_wake();
                    }
                    if self.slot.quit_requested() {
                        WorkerState::Exited
                    } else {
                        WorkerState::Running
                    }
                }
                WorkerState::Exited => WorkerState::Exited,
            };
        }

        if self.slot.mark_finished() {
            info!(slot = self.slot.index(), stream = ?self.slot.id(), "Stream finished");
        } else {
            debug!(slot = self.slot.index(), "Stream worker stopped");
        }
        self.decoder
    }

    /// One pass over the ring in slice order.
    fn fill_pass(&mut self) {
        if self.exhausted {
            self.quit_when_drained();
            return;
        }

        let mut index = 0;
        let mut rewound = false;
        while index < RING_SLICES {
            if self.slot.quit_requested() {
                return;
            }
            let slice = self.ring.slice(index).clone();
            if !slice.is_reusable() {
                index += 1;
                continue;
            }

            match self.fill_and_submit(&slice) {
                FillOutcome::DataProduced => {
                    rewound = false;
                    index += 1;
                }
                FillOutcome::NoData if self.looping && !rewound => {
                    if let Err(e) = self.decoder.raw_seek(0) {
                        warn!(
                            slot = self.slot.index(),
                            kind = e.kind.name(),
                            error = %e,
                            "Rewind failed, ending looped stream"
                        );
                        self.exhaust();
                        return;
                    }
                    debug!(slot = self.slot.index(), "Rewound looping stream");
                    rewound = true;
                }
                FillOutcome::NoData => {
                    if self.looping {
                        warn!(
                            slot = self.slot.index(),
                            "No data after rewind, ending looped stream"
                        );
                    }
                    self.exhaust();
                    return;
                }
            }
        }
    }

    fn exhaust(&mut self) {
        debug!(slot = self.slot.index(), "End of stream");
        self.exhausted = true;
        self.quit_when_drained();
    }

    fn quit_when_drained(&self) {
        if self.ring.all_reusable() {
            self.slot.request_quit();
        }
    }

    /// Decode into `slice` and hand it to the hardware.
    fn fill_and_submit(&mut self, slice: &WaveBuffer) -> FillOutcome {
        slice.reset_len();
        let capacity = slice.capacity_samples().min(self.scratch.len());
        let channels = slice.channels().max(1) as usize;

        let mut filled = 0;
        while filled < capacity {
            match self.decoder.read(&mut self.scratch[filled..capacity]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => {
                    warn!(
                        slot = self.slot.index(),
                        kind = e.kind.name(),
                        error = %e,
                        "Decode error, keeping short read"
                    );
                    break;
                }
            }
        }
        // Never hand the hardware half a frame
        filled -= filled % channels;
        if filled == 0 {
            return FillOutcome::NoData;
        }

        slice.publish(&self.scratch[..filled]);
        slice.mark_queued();
        let channel = self.slot.channel();
        if let Err(e) = self.output.enqueue(channel, slice.clone()) {
            error!(slot = self.slot.index(), channel, error = %e, "Failed to enqueue buffer");
            slice.mark_done();
        }
        FillOutcome::DataProduced
    }
}
