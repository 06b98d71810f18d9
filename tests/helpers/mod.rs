//! Shared fixtures for engine integration tests
//!
//! A manually driven hardware output, a synthetic codec and an in-memory
//! source opener that counts open and closed handles.
#![allow(dead_code, unused_imports)]

pub mod manual_output;
pub mod memory_fs;
pub mod tone_codec;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use streampool_lib::{EngineBackends, EngineSettings, StreamEngine, StreamId};

pub use manual_output::ManualOutput;
pub use memory_fs::MemoryFs;
pub use tone_codec::{tone_sample, tone_spec, ToneCodec};

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Engine over the given doubles with default settings.
pub fn engine_with(output: &Arc<ManualOutput>, fs: &Arc<MemoryFs>) -> StreamEngine {
    engine_with_settings(output, fs, EngineSettings::default())
}

pub fn engine_with_settings(
    output: &Arc<ManualOutput>,
    fs: &Arc<MemoryFs>,
    settings: EngineSettings,
) -> StreamEngine {
    let backends = EngineBackends {
        output: output.clone(),
        codec: Arc::new(ToneCodec),
        sources: fs.clone(),
    };
    StreamEngine::initialize(settings, backends).expect("engine init")
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Play out `channel` like the hardware would until `id` is no longer active.
pub fn drain(engine: &StreamEngine, output: &ManualOutput, id: StreamId, channel: usize) -> bool {
    wait_until(TIMEOUT, || {
        if output.consume_one(channel) {
            output.fire();
        }
        !engine.is_active(id)
    })
}

/// Consume from `channel` until at least `samples` samples were played.
pub fn play_out(output: &ManualOutput, channel: usize, samples: usize) -> bool {
    wait_until(TIMEOUT, || {
        if output.consume_one(channel) {
            output.fire();
        }
        output.played(channel).len() >= samples
    })
}

/// Write a mono 16-bit WAV of `samples` at `sample_rate`.
pub fn write_wav(path: &Path, sample_rate: u32, samples: &[i16]) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
    for &sample in samples {
        writer.write_sample(sample).expect("write sample");
    }
    writer.finalize().expect("finalize wav");
}
