// Buffer ring shared between a stream worker and the hardware output
// Three equal slices carved from one backing allocation

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::decoder::StreamInfo;
use crate::error::PlayError;

/// Number of slices in every stream's ring.
pub const RING_SLICES: usize = 3;

/// Status marker of one slice, owned by the hardware path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BufferStatus {
    Free = 0,
    Queued = 1,
    Playing = 2,
    Done = 3,
}

impl BufferStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => BufferStatus::Free,
            1 => BufferStatus::Queued,
            2 => BufferStatus::Playing,
            _ => BufferStatus::Done,
        }
    }
}

/// Frames held by one slice of `duration_ms` at `sample_rate`.
pub fn slice_frames(sample_rate: u32, duration_ms: u32) -> usize {
    (sample_rate as u64 * duration_ms as u64 / 1000) as usize
}

struct SliceInner {
    memory: Arc<Mutex<Box<[i16]>>>,
    index: usize,
    offset: usize,
    capacity: usize, // samples
    channels: u16,
    len: AtomicUsize, // samples
    status: AtomicU8,
}

/// Handle to one ring slice as seen by the hardware output.
#[derive(Clone)]
pub struct WaveBuffer {
    inner: Arc<SliceInner>,
}

impl WaveBuffer {
    /// Position of this slice within its ring.
    pub fn index(&self) -> usize {
        self.inner.index
    }

    pub fn channels(&self) -> u16 {
        self.inner.channels
    }

    /// Declared length in frames.
    pub fn frames(&self) -> usize {
        self.inner.len.load(Ordering::Acquire) / self.inner.channels as usize
    }

    pub fn capacity_frames(&self) -> usize {
        self.inner.capacity / self.inner.channels as usize
    }

    pub fn capacity_samples(&self) -> usize {
        self.inner.capacity
    }

    pub fn status(&self) -> BufferStatus {
        BufferStatus::from_u8(self.inner.status.load(Ordering::Acquire))
    }

    /// True once the hardware has finished with the slice (or never had it).
    pub fn is_reusable(&self) -> bool {
        matches!(self.status(), BufferStatus::Done | BufferStatus::Free)
    }

    pub fn mark_playing(&self) {
        self.set_status(BufferStatus::Playing);
    }

    pub fn mark_done(&self) {
        self.set_status(BufferStatus::Done);
    }

    pub(crate) fn mark_queued(&self) {
        self.set_status(BufferStatus::Queued);
    }

    fn set_status(&self, status: BufferStatus) {
        self.inner.status.store(status as u8, Ordering::Release);
    }

    /// Copy the declared samples into `out`, replacing its contents.
    pub fn copy_samples(&self, out: &mut Vec<i16>) {
        let len = self.inner.len.load(Ordering::Acquire);
        let memory = self.inner.memory.lock();
        out.clear();
        out.extend_from_slice(&memory[self.inner.offset..self.inner.offset + len]);
    }

    /// Restore the declared length to the full capacity.
    pub(crate) fn reset_len(&self) {
        self.inner.len.store(self.inner.capacity, Ordering::Release);
    }

    /// Write `samples` into the slice and shrink the declared length to match.
    ///
    /// The release store of the length is the point after which the hardware
    /// may read the new samples.
    pub(crate) fn publish(&self, samples: &[i16]) {
        let len = samples.len().min(self.inner.capacity);
        {
            let mut memory = self.inner.memory.lock();
            memory[self.inner.offset..self.inner.offset + len].copy_from_slice(&samples[..len]);
        }
        self.inner.len.store(len, Ordering::Release);
    }
}

impl std::fmt::Debug for WaveBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaveBuffer")
            .field("index", &self.inner.index)
            .field("frames", &self.frames())
            .field("status", &self.status())
            .finish()
    }
}

/// The ring of a single stream.
#[derive(Clone)]
pub(crate) struct BufferRing {
    slices: Vec<WaveBuffer>,
    bytes: usize,
}

impl BufferRing {
    /// Size the ring for `info` and allocate its backing block.
    pub(crate) fn allocate(info: &StreamInfo, slice_duration_ms: u32) -> Result<Self, PlayError> {
        let channels = info.channels.max(1) as usize;
        let frames = slice_frames(info.sample_rate, slice_duration_ms);
        let slice_samples = frames
            .checked_mul(channels)
            .ok_or(PlayError::OutOfMemory { bytes: usize::MAX })?;
        let total_samples = slice_samples
            .checked_mul(RING_SLICES)
            .ok_or(PlayError::OutOfMemory { bytes: usize::MAX })?;
        let bytes = total_samples.saturating_mul(std::mem::size_of::<i16>());

        let mut block: Vec<i16> = Vec::new();
        block
            .try_reserve_exact(total_samples)
            .map_err(|_| PlayError::OutOfMemory { bytes })?;
        block.resize(total_samples, 0);
        let memory = Arc::new(Mutex::new(block.into_boxed_slice()));

        let slices = (0..RING_SLICES)
            .map(|index| WaveBuffer {
                inner: Arc::new(SliceInner {
                    memory: Arc::clone(&memory),
                    index,
                    offset: index * slice_samples,
                    capacity: slice_samples,
                    channels: channels as u16,
                    len: AtomicUsize::new(slice_samples),
                    status: AtomicU8::new(BufferStatus::Done as u8),
                }),
            })
            .collect();

        Ok(Self { slices, bytes })
    }

    pub(crate) fn slice(&self, index: usize) -> &WaveBuffer {
        &self.slices[index]
    }

    pub(crate) fn slice_samples(&self) -> usize {
        self.slices[0].capacity_samples()
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }

    pub(crate) fn all_reusable(&self) -> bool {
        self.slices.iter().all(WaveBuffer::is_reusable)
    }
}
