// Stream engine: the slot pool and its public operations
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info, warn};

use super::decoder::{AudioCodec, StreamDecoder, SymphoniaCodec};
use super::output::{AudioOutput, ChannelFormat, CpalOutput};
use super::priority;
use super::ring::{slice_frames, BufferRing};
use super::slot::{SlotResources, StreamId, StreamSlot};
use super::source::{FileSystem, SourceOpener};
use super::worker::StreamWorker;
use crate::error::{CodecError, CodecErrorKind, EngineError, PlayError};
use crate::settings::EngineSettings;
use crate::state::EngineState;

/// The collaborators an engine drives.
#[derive(Clone)]
pub struct EngineBackends {
    pub output: Arc<dyn AudioOutput>,
    pub codec: Arc<dyn AudioCodec>,
    pub sources: Arc<dyn SourceOpener>,
}

impl EngineBackends {
    /// Local files, symphonia decoding and the system audio device.
    pub fn system(settings: &EngineSettings) -> Self {
        Self {
            output: Arc::new(CpalOutput::new(settings.output.device.clone())),
            codec: Arc::new(SymphoniaCodec),
            sources: Arc::new(FileSystem),
        }
    }
}

/// A fixed pool of independently playing streams.
///
/// `play` and `stop` may be called from any thread. Dropping the engine
/// shuts it down.
pub struct StreamEngine {
    state: Arc<EngineState>,
    output: Arc<dyn AudioOutput>,
    codec: Arc<dyn AudioCodec>,
    sources: Arc<dyn SourceOpener>,
    settings: EngineSettings,
    shut_down: AtomicBool,
}

impl StreamEngine {
    /// Bring up the hardware output and install the completion callback.
    pub fn initialize(
        settings: EngineSettings,
        backends: EngineBackends,
    ) -> Result<Self, EngineError> {
        let EngineBackends {
            output,
            codec,
            sources,
        } = backends;

        output.init()?;
        output.set_output_mode(settings.output.mode);

        let state = Arc::new(EngineState::new());
        let wake_state = Arc::clone(&state);
        output.set_completion_callback(Arc::new(move || wake_state.wake_active()));

        info!(
            mode = ?settings.output.mode,
            slots = state.slots().len(),
            "Stream engine initialized"
        );
        Ok(Self {
            state,
            output,
            codec,
            sources,
            settings,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Start playing `path` on the first free slot.
    pub fn play(&self, path: impl AsRef<Path>, looping: bool) -> Result<StreamId, PlayError> {
        let path = path.as_ref();
        let slot = self.state.claim_free().ok_or_else(|| {
            warn!(path = ?path, "No free stream slot");
            PlayError::NoFreeSlot
        })?;

        // A finished slot still holds its last playback
        let stale = slot.resources().take();
        if let Some(resources) = stale {
            self.release(&slot, resources);
        }

        match self.start(&slot, path, looping) {
            Ok(id) => {
                info!(stream = %id, slot = slot.index(), path = ?path, looping, "Stream started");
                Ok(id)
            }
            Err(e) => {
                warn!(slot = slot.index(), path = ?path, error = %e, "Failed to start stream");
                Err(e)
            }
        }
    }

    fn start(
        &self,
        slot: &Arc<StreamSlot>,
        path: &Path,
        looping: bool,
    ) -> Result<StreamId, PlayError> {
        let (decoder, ring) = match self.open_decoder(slot, path) {
            Ok(parts) => parts,
            Err(e) => {
                slot.abandon();
                return Err(e);
            }
        };

        slot.prepare(looping);
        let worker_priority =
            priority::boosted(priority::current(), self.settings.worker.priority_ceiling);
        let worker = StreamWorker::new(
            Arc::clone(slot),
            decoder,
            ring.clone(),
            Arc::clone(&self.output),
            worker_priority,
        );

        // Resources are stored before any stop can take them
        let mut resources = slot.resources();
        let id = StreamId::next();
        slot.activate(id);
        let spawned = thread::Builder::new()
            .name(format!("stream-worker-{}", slot.index()))
            .stack_size(self.settings.worker.stack_size)
            .spawn(move || worker.run());

        match spawned {
            Ok(handle) => {
                *resources = Some(SlotResources {
                    worker: handle,
                    ring,
                });
                Ok(id)
            }
            Err(e) => {
                drop(resources);
                self.output.reset_channel(slot.channel());
                if !slot.retract(id) {
                    debug!(stream = %id, "Stop claimed the slot of a failed spawn");
                }
                Err(PlayError::WorkerSpawnFailed(e))
            }
        }
    }

    /// Open source and decoder, bind the channel and allocate the ring.
    fn open_decoder(
        &self,
        slot: &StreamSlot,
        path: &Path,
    ) -> Result<(Box<dyn StreamDecoder>, BufferRing), PlayError> {
        let source = self
            .sources
            .open(path)
            .map_err(|source| PlayError::SourceUnavailable {
                path: path.to_path_buf(),
                source,
            })?;

        // The codec owns the source from here on
        let decoder = self.codec.open(source, path)?;
        let info = decoder.info();

        let format = ChannelFormat::for_channels(info.channels).ok_or_else(|| {
            CodecError::new(
                CodecErrorKind::Unsupported,
                format!("{} channels", info.channels),
            )
        })?;
        if slice_frames(info.sample_rate, self.settings.buffering.slice_duration_ms) == 0 {
            return Err(CodecError::new(
                CodecErrorKind::Unsupported,
                format!("sample rate {} Hz", info.sample_rate),
            )
            .into());
        }

        let channel = slot.channel();
        self.output.reset_channel(channel);
        self.output.set_rate(channel, info.sample_rate);
        self.output.set_format(channel, format);

        let ring = BufferRing::allocate(&info, self.settings.buffering.slice_duration_ms)?;
        debug!(
            slot = slot.index(),
            sample_rate = info.sample_rate,
            channels = info.channels,
            bytes = ring.bytes(),
            "Allocated buffer ring"
        );
        Ok((decoder, ring))
    }

    /// Stop the stream `id`. Does nothing if `id` is not playing.
    pub fn stop(&self, id: StreamId) {
        let Some(slot) = self.state.find(id) else {
            debug!(stream = %id, "Stop on unknown stream");
            return;
        };
        if !slot.begin_stop(id) {
            return;
        }

        slot.request_quit();
        slot.wake();
        let resources = slot.resources().take();
        if let Some(resources) = resources {
            self.release(slot, resources);
        }
        slot.finish_stop();
        info!(stream = %id, slot = slot.index(), "Stream stopped");
    }

    /// Stop every stream, in slot order.
    pub fn stop_all(&self) {
        for slot in self.state.slots() {
            if let Some(id) = slot.id() {
                self.stop(id);
            }
        }
    }

    /// Join the worker, then free channel, ring and decoder in that order.
    fn release(&self, slot: &StreamSlot, resources: SlotResources) {
        let SlotResources { worker, ring } = resources;
        let decoder = match worker.join() {
            Ok(decoder) => Some(decoder),
            Err(_) => {
                error!(slot = slot.index(), "Stream worker panicked");
                None
            }
        };
        self.output.reset_channel(slot.channel());
        drop(ring);
        drop(decoder);
        debug!(slot = slot.index(), "Released stream resources");
    }

    pub fn is_active(&self, id: StreamId) -> bool {
        self.state.find(id).is_some_and(|slot| slot.is_active())
    }

    /// Hardware channel of an active stream.
    pub fn channel(&self, id: StreamId) -> Option<usize> {
        self.state
            .find(id)
            .filter(|slot| slot.is_active())
            .map(|slot| slot.channel())
    }

    /// Active streams in slot order.
    pub fn active_streams(&self) -> Vec<StreamId> {
        self.state.active_streams()
    }

    pub fn active_count(&self) -> usize {
        self.state.slots().iter().filter(|slot| slot.is_active()).count()
    }

    /// Stop everything and close the hardware output.
    pub fn shutdown(self) {
        self.teardown();
    }

    fn teardown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_all();
        self.output.exit();
        info!("Stream engine shut down");
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}
