//! PCM conversion helpers used at the provider boundaries.
//!
//! The gateway moves linear PCM between three sample-rate domains: the client
//! microphone, the transcription input, and the synthesis output. Resampling
//! is nearest-neighbor index mapping with no anti-aliasing filter - adequate
//! for speech-bandwidth voice, not hi-fi audio.

use bytes::Bytes;
use thiserror::Error;

/// Errors from PCM conversion.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AudioError {
    /// Sample rates must be positive.
    #[error("Invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),

    /// 16-bit PCM byte buffers must contain whole samples.
    #[error("PCM buffer length {0} is not sample-aligned")]
    MisalignedBuffer(usize),
}

/// Resample 16-bit linear PCM between two integer sample rates.
///
/// Uses nearest-neighbor index mapping: output sample `i` is taken from input
/// index `i * from_rate / to_rate`. Rejects zero rates; equal rates copy.
pub fn resample_i16(input: &[i16], from_rate: u32, to_rate: u32) -> Result<Vec<i16>, AudioError> {
    if from_rate == 0 {
        return Err(AudioError::InvalidSampleRate(from_rate));
    }
    if to_rate == 0 {
        return Err(AudioError::InvalidSampleRate(to_rate));
    }
    if from_rate == to_rate {
        return Ok(input.to_vec());
    }

    let out_len = (input.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src = (i as u64 * from_rate as u64 / to_rate as u64) as usize;
        // Integer truncation keeps src strictly below input.len() for i < out_len,
        // but guard anyway for the degenerate rounding cases.
        let src = src.min(input.len() - 1);
        output.push(input[src]);
    }
    Ok(output)
}

/// Resample a little-endian 16-bit PCM byte buffer between two sample rates.
///
/// Convenience wrapper for the relay, which handles audio as raw byte chunks.
pub fn resample_pcm16_bytes(data: &[u8], from_rate: u32, to_rate: u32) -> Result<Bytes, AudioError> {
    if data.len() % 2 != 0 {
        return Err(AudioError::MisalignedBuffer(data.len()));
    }

    let samples: Vec<i16> = data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let resampled = resample_i16(&samples, from_rate, to_rate)?;

    let mut out = Vec::with_capacity(resampled.len() * 2);
    for sample in resampled {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    Ok(Bytes::from(out))
}

/// Convert normalized floating-point samples to 16-bit signed integers,
/// clamping to the representable range.
pub fn f32_to_i16(input: &[f32]) -> Vec<i16> {
    input
        .iter()
        .map(|&sample| (sample * 32767.0).clamp(-32768.0, 32767.0) as i16)
        .collect()
}

/// Convert 16-bit signed integer samples to normalized floating-point.
pub fn i16_to_f32(input: &[i16]) -> Vec<f32> {
    input.iter().map(|&sample| sample as f32 / 32767.0).collect()
}
