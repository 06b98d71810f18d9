// Audio output using cpal
// One hardware channel per stream slot, mixed into the device in the cpal callback

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use parking_lot::Mutex;
use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapRb,
};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, error, info, warn};

use super::ring::{WaveBuffer, RING_SLICES};
use crate::error::OutputError;
use crate::settings::OutputMode;
use crate::state::MAX_STREAMS;

type QueueProducer = ringbuf::HeapProd<WaveBuffer>;
type QueueConsumer = ringbuf::HeapCons<WaveBuffer>;

/// Handler the output invokes whenever it finishes consuming a buffer on any channel.
pub type CompletionCallback = Arc<dyn Fn() + Send + Sync>;

/// Sample layout of one hardware channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelFormat {
    MonoPcm16,
    StereoPcm16,
}

impl ChannelFormat {
    pub fn for_channels(channels: u16) -> Option<Self> {
        match channels {
            1 => Some(ChannelFormat::MonoPcm16),
            2 => Some(ChannelFormat::StereoPcm16),
            _ => None,
        }
    }

    pub fn channels(self) -> usize {
        match self {
            ChannelFormat::MonoPcm16 => 1,
            ChannelFormat::StereoPcm16 => 2,
        }
    }
}

/// The hardware audio output the engine drives.
///
/// Buffers handed to `enqueue` are played in submission order per channel;
/// the output marks each one `Playing` then `Done` and invokes the completion
/// callback after finishing any of them.
pub trait AudioOutput: Send + Sync {
    fn init(&self) -> Result<(), OutputError>;

    fn exit(&self);

    fn set_output_mode(&self, mode: OutputMode);

    /// Install the single completion handler. It is never swapped once set.
    fn set_completion_callback(&self, callback: CompletionCallback);

    /// Drop everything queued on `channel` and return it to its initial state.
    fn reset_channel(&self, channel: usize);

    fn set_format(&self, channel: usize, format: ChannelFormat);

    fn set_rate(&self, channel: usize, sample_rate: u32);

    fn enqueue(&self, channel: usize, buffer: WaveBuffer) -> Result<(), OutputError>;
}

/// Input frames per resampler call.
const RESAMPLE_CHUNK: usize = 256;

/// Streaming rate conversion of one channel's stereo frames.
///
/// Frames are staged until a full chunk is available; `flush` pushes out a
/// partial chunk when the channel runs dry.
struct RateConverter {
    resampler: FastFixedIn<f32>,
    from: u32,
    to: u32,
    staged: [Vec<f32>; 2],
}

impl RateConverter {
    fn new(from: u32, to: u32) -> Result<Self, OutputError> {
        let resampler = FastFixedIn::<f32>::new(
            to as f64 / from as f64,
            1.0,
            PolynomialDegree::Cubic,
            RESAMPLE_CHUNK,
            2,
        )
        .map_err(|e| OutputError::Stream(format!("Failed to create resampler: {}", e)))?;

        Ok(Self {
            resampler,
            from,
            to,
            staged: [
                Vec::with_capacity(RESAMPLE_CHUNK),
                Vec::with_capacity(RESAMPLE_CHUNK),
            ],
        })
    }

    fn converts(&self, from: u32, to: u32) -> bool {
        self.from == from && self.to == to
    }

    fn push(&mut self, left: f32, right: f32, out: &mut VecDeque<(f32, f32)>) {
        self.staged[0].push(left);
        self.staged[1].push(right);
        if self.staged[0].len() < RESAMPLE_CHUNK {
            return;
        }
        match self.resampler.process(&self.staged[..], None) {
            Ok(planar) => append_frames(out, &planar, usize::MAX),
            Err(e) => warn!(error = %e, "Resampling failed, dropping chunk"),
        }
        self.clear_staged();
    }

    fn flush(&mut self, out: &mut VecDeque<(f32, f32)>) {
        let staged = self.staged[0].len();
        if staged == 0 {
            return;
        }
        // The partial call pads to a whole chunk; keep only our share
        let expected = (staged as f64 * self.to as f64 / self.from as f64).round() as usize;
        match self.resampler.process_partial(Some(&self.staged[..]), None) {
            Ok(planar) => append_frames(out, &planar, expected),
            Err(e) => warn!(error = %e, "Resampling failed, dropping tail"),
        }
        self.clear_staged();
    }

    fn clear_staged(&mut self) {
        for channel in &mut self.staged {
            channel.clear();
        }
    }
}

fn append_frames(out: &mut VecDeque<(f32, f32)>, planar: &[Vec<f32>], limit: usize) {
    let frames = planar[0].iter().zip(&planar[1]).take(limit);
    out.extend(frames.map(|(&l, &r)| (l, r)));
}

/// Playback side of a hardware channel, touched from the device callback.
struct Voice {
    queue: QueueConsumer,
    format: ChannelFormat,
    sample_rate: u32,
    converter: Option<RateConverter>,
    samples: Vec<i16>,
    // Device-rate frames waiting for the mix
    frames: VecDeque<(f32, f32)>,
    // Loaded buffers and the played-frame count at which each one ends
    in_flight: VecDeque<(WaveBuffer, u64)>,
    played: u64,
}

impl Voice {
    fn new(queue: QueueConsumer) -> Self {
        Self {
            queue,
            format: ChannelFormat::StereoPcm16,
            sample_rate: 48000,
            converter: None,
            samples: Vec::new(),
            frames: VecDeque::new(),
            in_flight: VecDeque::new(),
            played: 0,
        }
    }

    fn set_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.converter = None;
    }

    fn reset(&mut self) {
        while let Some(buffer) = self.queue.try_pop() {
            buffer.mark_done();
        }
        for (buffer, _) in self.in_flight.drain(..) {
            buffer.mark_done();
        }
        self.frames.clear();
        self.converter = None;
        self.played = 0;
    }

    /// Build (or drop) the resampler for the current rates.
    fn prepare_converter(&mut self, device_rate: u32) {
        if device_rate == 0 || self.sample_rate == 0 || self.sample_rate == device_rate {
            self.converter = None;
            return;
        }
        if self
            .converter
            .as_ref()
            .is_some_and(|c| c.converts(self.sample_rate, device_rate))
        {
            return;
        }
        match RateConverter::new(self.sample_rate, device_rate) {
            Ok(converter) => {
                debug!(from = self.sample_rate, to = device_rate, "Resampling channel");
                self.converter = Some(converter);
            }
            Err(e) => {
                error!(error = %e, "Playing channel without rate conversion");
                self.converter = None;
            }
        }
    }

    /// Move the next queued buffer into the frame queue.
    fn load_next(&mut self) -> bool {
        const SCALE: f32 = 1.0 / 32768.0;

        let Some(buffer) = self.queue.try_pop() else {
            return false;
        };
        buffer.mark_playing();
        buffer.copy_samples(&mut self.samples);

        for frame in self.samples.chunks_exact(self.format.channels()) {
            let (l, r) = match self.format {
                ChannelFormat::MonoPcm16 => {
                    let v = frame[0] as f32 * SCALE;
                    (v, v)
                }
                ChannelFormat::StereoPcm16 => (frame[0] as f32 * SCALE, frame[1] as f32 * SCALE),
            };
            match &mut self.converter {
                Some(converter) => converter.push(l, r, &mut self.frames),
                None => self.frames.push_back((l, r)),
            }
        }

        let end = self.played + self.frames.len() as u64;
        self.in_flight.push_back((buffer, end));
        true
    }

    fn complete_played(&mut self, completed: &mut bool) {
        while self
            .in_flight
            .front()
            .is_some_and(|(_, end)| *end <= self.played)
        {
            if let Some((buffer, _)) = self.in_flight.pop_front() {
                buffer.mark_done();
                *completed = true;
            }
        }
    }

    /// Add this voice into an interleaved stereo mix.
    /// Returns true if at least one buffer finished.
    fn render(&mut self, mix: &mut [f32], device_rate: u32) -> bool {
        self.prepare_converter(device_rate);
        let mut completed = false;

        for out in mix.chunks_exact_mut(2) {
            while self.frames.is_empty() {
                if !self.load_next() {
                    if let Some(converter) = &mut self.converter {
                        converter.flush(&mut self.frames);
                    }
                    break;
                }
                self.complete_played(&mut completed);
            }
            let Some((l, r)) = self.frames.pop_front() else {
                break;
            };
            out[0] += l;
            out[1] += r;
            self.played += 1;
            self.complete_played(&mut completed);
        }
        self.complete_played(&mut completed);
        completed
    }
}

struct HwChannel {
    producer: Mutex<QueueProducer>,
    voice: Mutex<Voice>,
}

impl HwChannel {
    fn new() -> Self {
        let (producer, consumer) = HeapRb::<WaveBuffer>::new(RING_SLICES).split();
        Self {
            producer: Mutex::new(producer),
            voice: Mutex::new(Voice::new(consumer)),
        }
    }
}

struct OutputShared {
    channels: Vec<HwChannel>,
    mode: AtomicU8,
    callback: OnceLock<CompletionCallback>,
}

impl OutputShared {
    fn new(channel_count: usize) -> Self {
        Self {
            channels: (0..channel_count).map(|_| HwChannel::new()).collect(),
            mode: AtomicU8::new(0),
            callback: OnceLock::new(),
        }
    }

    fn mode(&self) -> OutputMode {
        match self.mode.load(Ordering::Relaxed) {
            1 => OutputMode::Mono,
            _ => OutputMode::Stereo,
        }
    }

    fn channel(&self, channel: usize) -> Option<&HwChannel> {
        let found = self.channels.get(channel);
        if found.is_none() {
            warn!(channel, "Ignoring request for unknown output channel");
        }
        found
    }

    /// Mix every channel into `data` (interleaved, `device_channels` wide).
    /// Returns true if any buffer finished.
    fn render(
        &self,
        data: &mut [f32],
        device_channels: usize,
        device_rate: u32,
        mix: &mut Vec<f32>,
    ) -> bool {
        let device_channels = device_channels.max(1);
        let frames = data.len() / device_channels;
        mix.clear();
        mix.resize(frames * 2, 0.0);

        let mut completed = false;
        for channel in &self.channels {
            // Skip a channel that is being reconfigured right now
            if let Some(mut voice) = channel.voice.try_lock() {
                completed |= voice.render(mix, device_rate);
            }
        }

        let mono = self.mode() == OutputMode::Mono;
        for (frame, out) in mix.chunks_exact(2).zip(data.chunks_exact_mut(device_channels)) {
            let (l, r) = if mono {
                let m = (frame[0] + frame[1]) * 0.5;
                (m, m)
            } else {
                (frame[0], frame[1])
            };
            if out.len() == 1 {
                out[0] = ((l + r) * 0.5).clamp(-1.0, 1.0);
            } else {
                out[0] = l.clamp(-1.0, 1.0);
                out[1] = r.clamp(-1.0, 1.0);
                for extra in &mut out[2..] {
                    *extra = 0.0;
                }
            }
        }
        completed
    }

    fn notify(&self) {
        if let Some(callback) = self.callback.get() {
            callback();
        }
    }
}

struct OutputThread {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Hardware output on the system's audio device.
///
/// The cpal stream lives on a dedicated `audio-output` thread between
/// `init` and `exit`.
pub struct CpalOutput {
    device_name: Option<String>,
    shared: Arc<OutputShared>,
    thread: Mutex<Option<OutputThread>>,
}

impl CpalOutput {
    /// Output on the named device, or the default device for `None`
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            shared: Arc::new(OutputShared::new(MAX_STREAMS)),
            thread: Mutex::new(None),
        }
    }

    /// List available audio output devices.
    pub fn list_devices() -> Result<Vec<String>, OutputError> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| OutputError::Device(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();
        Ok(devices)
    }

    fn select_device(device_name: Option<&str>) -> Result<cpal::Device, OutputError> {
        let host = cpal::default_host();

        if let Some(name) = device_name {
            let mut devices = host
                .output_devices()
                .map_err(|e| OutputError::Device(format!("Failed to enumerate devices: {}", e)))?;
            if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                return Ok(device);
            }
            warn!(device = name, "Requested device not found, falling back to default device");
        }

        host.default_output_device().ok_or(OutputError::NoDevice)
    }

    fn open_stream(
        device_name: Option<&str>,
        shared: Arc<OutputShared>,
    ) -> Result<Stream, OutputError> {
        let device = Self::select_device(device_name)?;
        let config = device
            .default_output_config()
            .map_err(|e| {
                OutputError::Device(format!("Failed to get default output config: {}", e))
            })?;

        info!(
            device = %device.name().unwrap_or_else(|_| "Unknown".to_string()),
            sample_rate = config.sample_rate().0,
            channels = config.channels(),
            format = ?config.sample_format(),
            "Opening audio output"
        );

        match config.sample_format() {
            cpal::SampleFormat::F32 => Self::build_stream::<f32>(&device, &config.into(), shared),
            cpal::SampleFormat::I16 => Self::build_stream::<i16>(&device, &config.into(), shared),
            cpal::SampleFormat::U16 => Self::build_stream::<u16>(&device, &config.into(), shared),
            format => Err(OutputError::Device(format!(
                "Unsupported sample format: {:?}",
                format
            ))),
        }
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &cpal::Device,
        config: &StreamConfig,
        shared: Arc<OutputShared>,
    ) -> Result<Stream, OutputError> {
        let device_channels = config.channels as usize;
        let device_rate = config.sample_rate.0;
        let mut staging: Vec<f32> = Vec::new();
        let mut mix: Vec<f32> = Vec::new();

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    staging.clear();
                    staging.resize(data.len(), 0.0);
                    let completed =
                        shared.render(&mut staging, device_channels, device_rate, &mut mix);
                    for (sample, value) in data.iter_mut().zip(&staging) {
                        *sample = T::from_sample(*value);
                    }
                    if completed {
                        shared.notify();
                    }
                },
                move |err| {
                    error!(error = %err, "Audio output error");
                },
                None,
            )
            .map_err(|e| OutputError::Stream(format!("Failed to build output stream: {}", e)))
    }
}

impl AudioOutput for CpalOutput {
    fn init(&self) -> Result<(), OutputError> {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            warn!("Audio output already initialized");
            return Ok(());
        }

        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), OutputError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let shared = Arc::clone(&self.shared);
        let device_name = self.device_name.clone();

        let handle = thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                let stream = match Self::open_stream(device_name.as_deref(), shared) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(OutputError::Stream(format!(
                        "Failed to start stream: {}",
                        e
                    ))));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive until exit (or the engine is gone)
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Audio output stream closed");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                *thread = Some(OutputThread {
                    stop: stop_tx,
                    handle,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(OutputError::Stream(
                    "Output thread exited during startup".to_string(),
                ))
            }
        }
    }

    fn exit(&self) {
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.stop.send(());
            if thread.handle.join().is_err() {
                error!("Audio output thread panicked");
            }
        }
        for channel in &self.shared.channels {
            channel.voice.lock().reset();
        }
        info!("Audio output closed");
    }

    fn set_output_mode(&self, mode: OutputMode) {
        let value = match mode {
            OutputMode::Stereo => 0,
            OutputMode::Mono => 1,
        };
        self.shared.mode.store(value, Ordering::Relaxed);
    }

    fn set_completion_callback(&self, callback: CompletionCallback) {
        if self.shared.callback.set(callback).is_err() {
            warn!("Completion callback already installed, keeping the first one");
        }
    }

    fn reset_channel(&self, channel: usize) {
        if let Some(hw) = self.shared.channel(channel) {
            hw.voice.lock().reset();
        }
    }

    fn set_format(&self, channel: usize, format: ChannelFormat) {
        if let Some(hw) = self.shared.channel(channel) {
            hw.voice.lock().format = format;
        }
    }

    fn set_rate(&self, channel: usize, sample_rate: u32) {
        if let Some(hw) = self.shared.channel(channel) {
            hw.voice.lock().set_rate(sample_rate);
        }
    }

    fn enqueue(&self, channel: usize, buffer: WaveBuffer) -> Result<(), OutputError> {
        let hw = self
            .shared
            .channels
            .get(channel)
            .ok_or(OutputError::InvalidChannel(channel))?;
        hw.producer
            .lock()
            .try_push(buffer)
            .map_err(|_| OutputError::QueueFull(channel))
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.get_mut().take() {
            let _ = thread.stop.send(());
            let _ = thread.handle.join();
        }
    }
}
