//! Hardware output double driven by the test thread
//!
//! Buffers sit in a per-channel queue until the test consumes them; the
//! completion callback only runs when the test fires it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;
use streampool_lib::{
    AudioOutput, ChannelFormat, CompletionCallback, OutputError, OutputMode, WaveBuffer,
    MAX_STREAMS,
};

#[derive(Default, Clone)]
struct ChannelRecord {
    queue: VecDeque<WaveBuffer>,
    played: Vec<i16>,
    enqueued: usize,
    resets: usize,
    format: Option<ChannelFormat>,
    rate: Option<u32>,
}

pub struct ManualOutput {
    channels: Mutex<Vec<ChannelRecord>>,
    callback: OnceLock<CompletionCallback>,
    mode: Mutex<Option<OutputMode>>,
    fail_init: AtomicBool,
    inits: AtomicUsize,
    exits: AtomicUsize,
}

impl ManualOutput {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(vec![ChannelRecord::default(); MAX_STREAMS]),
            callback: OnceLock::new(),
            mode: Mutex::new(None),
            fail_init: AtomicBool::new(false),
            inits: AtomicUsize::new(0),
            exits: AtomicUsize::new(0),
        }
    }

    /// An output whose `init` reports a missing device.
    pub fn failing() -> Self {
        let output = Self::new();
        output.fail_init.store(true, Ordering::SeqCst);
        output
    }

    /// Play the oldest queued buffer of `channel` to completion.
    pub fn consume_one(&self, channel: usize) -> bool {
        let buffer = self.channels.lock()[channel].queue.pop_front();
        let Some(buffer) = buffer else {
            return false;
        };
        buffer.mark_playing();
        let mut samples = Vec::new();
        buffer.copy_samples(&mut samples);
        self.channels.lock()[channel].played.extend_from_slice(&samples);
        buffer.mark_done();
        true
    }

    /// Run the completion callback, as the hardware does after a buffer ends.
    pub fn fire(&self) {
        if let Some(callback) = self.callback.get() {
            callback();
        }
    }

    pub fn has_callback(&self) -> bool {
        self.callback.get().is_some()
    }

    pub fn queued(&self, channel: usize) -> usize {
        self.channels.lock()[channel].queue.len()
    }

    pub fn enqueued(&self, channel: usize) -> usize {
        self.channels.lock()[channel].enqueued
    }

    pub fn played(&self, channel: usize) -> Vec<i16> {
        self.channels.lock()[channel].played.clone()
    }

    pub fn resets(&self, channel: usize) -> usize {
        self.channels.lock()[channel].resets
    }

    pub fn format(&self, channel: usize) -> Option<ChannelFormat> {
        self.channels.lock()[channel].format
    }

    pub fn rate(&self, channel: usize) -> Option<u32> {
        self.channels.lock()[channel].rate
    }

    pub fn mode(&self) -> Option<OutputMode> {
        *self.mode.lock()
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn exits(&self) -> usize {
        self.exits.load(Ordering::SeqCst)
    }
}

impl AudioOutput for ManualOutput {
    fn init(&self) -> Result<(), OutputError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(OutputError::NoDevice);
        }
        Ok(())
    }

    fn exit(&self) {
        self.exits.fetch_add(1, Ordering::SeqCst);
    }

    fn set_output_mode(&self, mode: OutputMode) {
        *self.mode.lock() = Some(mode);
    }

    fn set_completion_callback(&self, callback: CompletionCallback) {
        let _ = self.callback.set(callback);
    }

    fn reset_channel(&self, channel: usize) {
        let mut channels = self.channels.lock();
        let record = &mut channels[channel];
        for buffer in record.queue.drain(..) {
            buffer.mark_done();
        }
        record.resets += 1;
    }

    fn set_format(&self, channel: usize, format: ChannelFormat) {
        self.channels.lock()[channel].format = Some(format);
    }

    fn set_rate(&self, channel: usize, sample_rate: u32) {
        self.channels.lock()[channel].rate = Some(sample_rate);
    }

    fn enqueue(&self, channel: usize, buffer: WaveBuffer) -> Result<(), OutputError> {
        let mut channels = self.channels.lock();
        let record = channels
            .get_mut(channel)
            .ok_or(OutputError::InvalidChannel(channel))?;
        record.queue.push_back(buffer);
        record.enqueued += 1;
        Ok(())
    }
}
