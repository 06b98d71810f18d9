//! Synthetic codec for engine tests
//!
//! A source holding `TONE <rate> <channels> <frames> [fail_at]` decodes to
//! `frames * channels` samples with values from `tone_sample`. With `fail_at`
//! the decoder reports one read error when it reaches that sample.

use std::io::Read;
use std::path::Path;

use streampool_lib::{
    AudioCodec, CodecError, CodecErrorKind, StreamDecoder, StreamInfo,
};
use symphonia::core::io::MediaSource;

/// Value of the sample at `index` of every tone.
pub fn tone_sample(index: usize) -> i16 {
    (index % 1000) as i16 + 1
}

/// Header for a tone source.
pub fn tone_spec(sample_rate: u32, channels: u16, frames: usize) -> String {
    format!("TONE {sample_rate} {channels} {frames}")
}

pub struct ToneCodec;

impl AudioCodec for ToneCodec {
    fn open(
        &self,
        mut source: Box<dyn MediaSource>,
        _path: &Path,
    ) -> Result<Box<dyn StreamDecoder>, CodecError> {
        let mut header = String::new();
        source
            .read_to_string(&mut header)
            .map_err(|e| CodecError::new(CodecErrorKind::Malformed, e.to_string()))?;

        let fields: Vec<&str> = header.split_whitespace().collect();
        let malformed = || CodecError::new(CodecErrorKind::Malformed, "not a tone");
        if fields.first() != Some(&"TONE") || fields.len() < 4 {
            return Err(malformed());
        }
        let sample_rate: u32 = fields[1].parse().map_err(|_| malformed())?;
        let channels: u16 = fields[2].parse().map_err(|_| malformed())?;
        let frames: usize = fields[3].parse().map_err(|_| malformed())?;
        let fail_at = match fields.get(4) {
            Some(value) => Some(value.parse::<usize>().map_err(|_| malformed())?),
            None => None,
        };

        Ok(Box::new(ToneDecoder {
            _source: source,
            info: StreamInfo {
                sample_rate,
                channels,
            },
            total: frames * channels as usize,
            position: 0,
            fail_at,
        }))
    }
}

struct ToneDecoder {
    _source: Box<dyn MediaSource>,
    info: StreamInfo,
    total: usize,
    position: usize,
    fail_at: Option<usize>,
}

impl StreamDecoder for ToneDecoder {
    fn info(&self) -> StreamInfo {
        self.info
    }

    fn read(&mut self, out: &mut [i16]) -> Result<usize, CodecError> {
        let mut end = (self.position + out.len()).min(self.total);
        if let Some(fail_at) = self.fail_at {
            if self.position == fail_at {
                self.fail_at = None;
                return Err(CodecError::new(CodecErrorKind::Read, "injected"));
            }
            if self.position < fail_at {
                end = end.min(fail_at);
            }
        }

        let count = end - self.position;
        for (offset, sample) in out[..count].iter_mut().enumerate() {
            *sample = tone_sample(self.position + offset);
        }
        self.position = end;
        Ok(count)
    }

    fn raw_seek(&mut self, position: u64) -> Result<(), CodecError> {
        self.position = (position as usize).min(self.total);
        Ok(())
    }
}
