//! Audio decoding.
//!
//! The engine consumes PCM; everything upstream of PCM is behind the
//! [`Decoder`] trait. The bundled [`SymphoniaDecoder`] handles container
//! formats from a file or a byte buffer, and raw PCM sources pass through
//! untouched.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::Cursor;
use std::path::PathBuf;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// Audio input accepted by the engine.
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// A file on disk in any container format the decoder supports.
    File(PathBuf),
    /// An in-memory encoded payload.
    Bytes(Vec<u8>),
    /// Already-decoded PCM; bypasses the decoder entirely.
    Pcm(PcmAudio),
}

/// Interleaved 32-bit float PCM with its format parameters.
#[derive(Debug, Clone)]
pub struct PcmAudio {
    /// Samples in [-1, 1], interleaved by channel.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmAudio {
    /// Duration of the buffer in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }
}

/// Narrow decoding interface: any source the implementation understands
/// to PCM plus format parameters.
pub trait Decoder: Send + Sync {
    fn decode(&self, source: AudioSource) -> Result<PcmAudio>;
}

/// Symphonia-backed decoder for files and byte buffers.
#[derive(Debug, Default)]
pub struct SymphoniaDecoder;

impl Decoder for SymphoniaDecoder {
    fn decode(&self, source: AudioSource) -> Result<PcmAudio> {
        match source {
            AudioSource::Pcm(pcm) => Ok(pcm),
            AudioSource::File(path) => {
                let mut hint = Hint::new();
                if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                    hint.with_extension(ext);
                }
                let file = File::open(&path)?;
                debug!(path = %path.display(), "decoding audio file");
                decode_stream(Box::new(file), hint)
            }
            AudioSource::Bytes(bytes) => {
                debug!(len = bytes.len(), "decoding audio buffer");
                decode_stream(Box::new(Cursor::new(bytes)), Hint::new())
            }
        }
    }
}

fn decode_stream(source: Box<dyn MediaSource>, hint: Hint) -> Result<PcmAudio> {
    let mss = MediaSourceStream::new(source, Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::InvalidInput(format!("unsupported audio format: {e}")))?;
    let mut format: Box<dyn FormatReader> = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| Error::InvalidInput("no audio track in input".to_string()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| Error::InvalidInput("input does not declare a sample rate".to_string()))?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .ok_or_else(|| Error::InvalidInput("input does not declare channel layout".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::InvalidInput(format!("unsupported codec: {e}")))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(_) => break,
        };
        if packet.track_id() != track_id {
            continue;
        }

        // Corrupt packets are skipped rather than failing the whole decode.
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(_) => continue,
        };

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    if samples.is_empty() {
        return Err(Error::InvalidInput(
            "decoder produced no samples".to_string(),
        ));
    }

    Ok(PcmAudio {
        samples,
        sample_rate,
        channels,
    })
}
