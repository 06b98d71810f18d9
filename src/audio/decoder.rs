// Audio decoder using Symphonia
// Decodes a compressed container incrementally to interleaved 16-bit PCM

use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::error::{CodecError, CodecErrorKind};

/// Format of a decoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channels: u16,
}

/// An open, incrementally decodable stream.
///
/// Dropping the decoder closes it together with the source it owns.
pub trait StreamDecoder: Send {
    fn info(&self) -> StreamInfo;

    /// Decode up to `out.len()` interleaved samples into `out`.
    ///
    /// Returns the number of samples written; `Ok(0)` marks the end of the
    /// stream.
    fn read(&mut self, out: &mut [i16]) -> Result<usize, CodecError>;

    /// Reposition the read cursor to a raw stream timestamp (0 = start).
    fn raw_seek(&mut self, position: u64) -> Result<(), CodecError>;
}

/// Opens a decoder on a source.
pub trait AudioCodec: Send + Sync {
    /// `path` is only a hint for container detection. On failure the source
    /// has already been closed.
    fn open(
        &self,
        source: Box<dyn MediaSource>,
        path: &Path,
    ) -> Result<Box<dyn StreamDecoder>, CodecError>;
}

/// Codec backed by Symphonia's default format and codec registries.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaCodec;

impl AudioCodec for SymphoniaCodec {
    fn open(
        &self,
        source: Box<dyn MediaSource>,
        path: &Path,
    ) -> Result<Box<dyn StreamDecoder>, CodecError> {
        Ok(Box::new(SymphoniaDecoder::open(source, path)?))
    }
}

pub struct SymphoniaDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: StreamInfo,
    pending: Option<SampleBuffer<i16>>,
    cursor: usize,
}

impl SymphoniaDecoder {
    /// Probe the source and prepare the first audio track for decoding
    pub fn open(source: Box<dyn MediaSource>, path: &Path) -> Result<Self, CodecError> {
        let mss = MediaSourceStream::new(source, Default::default());

        // Create a hint using the file extension
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let format = probed.format;

        // Find the first audio track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| CodecError::new(CodecErrorKind::NoAudioTrack, "no audio track found"))?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.ok_or_else(|| {
            CodecError::new(CodecErrorKind::Unsupported, "sample rate not declared")
        })?;
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| {
                CodecError::new(CodecErrorKind::Unsupported, "channel layout not declared")
            })?;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())?;

        debug!(
            path = %path.display(),
            sample_rate,
            channels,
            "Opened stream"
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            info: StreamInfo {
                sample_rate,
                channels,
            },
            pending: None,
            cursor: 0,
        })
    }

    fn remaining(&self) -> &[i16] {
        match &self.pending {
            Some(buf) => &buf.samples()[self.cursor..],
            None => &[],
        }
    }

    /// Decode the next packet of our track into `pending`.
    /// Returns false at end of stream.
    fn decode_next_packet(&mut self) -> Result<bool, CodecError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            // Skip packets from other tracks
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = self.decoder.decode(&packet)?;
            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let mut buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
            buf.copy_interleaved_ref(decoded);

            self.pending = Some(buf);
            self.cursor = 0;
            return Ok(true);
        }
    }
}

impl StreamDecoder for SymphoniaDecoder {
    fn info(&self) -> StreamInfo {
        self.info
    }

    fn read(&mut self, out: &mut [i16]) -> Result<usize, CodecError> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.remaining().is_empty() && !self.decode_next_packet()? {
            return Ok(0);
        }

        let available = self.remaining();
        let count = available.len().min(out.len());
        out[..count].copy_from_slice(&available[..count]);
        self.cursor += count;
        Ok(count)
    }

    fn raw_seek(&mut self, position: u64) -> Result<(), CodecError> {
        self.format.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp {
                ts: position,
                track_id: self.track_id,
            },
        )?;

        // Reset decoder state after seek
        self.decoder.reset();
        self.pending = None;
        self.cursor = 0;
        Ok(())
    }
}
