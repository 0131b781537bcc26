use base64::{Engine, engine::general_purpose::STANDARD, write::EncoderStringWriter};
use bytes::{BufMut, BytesMut};
use std::io::Write;

/// Sample rate of captured microphone audio sent to every provider.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Slice size used when base64-encoding large buffers.
pub const BASE64_SLICE_BYTES: usize = 8192;

/// Size of the canonical RIFF/WAVE header written by [`wrap_wav`].
pub const WAV_HEADER_LEN: usize = 44;

/// Converts one float sample to PCM16.
///
/// Clamps to [-1, 1], then scales negatives by 32768 and non-negatives by
/// 32767, truncating toward zero. NaN maps to 0.
pub fn f32_to_pcm16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Serializes samples as little-endian bytes.
pub fn i16_to_le_bytes(pcm16: &[i16]) -> Vec<u8> {
    pcm16.iter().flat_map(|&sample| sample.to_le_bytes()).collect()
}

/// Reads little-endian samples; a trailing odd byte is ignored.
pub fn le_bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Base64-encodes `bytes`, feeding the encoder in [`BASE64_SLICE_BYTES`] slices.
///
/// The encoder carries partial triples across slices, so the output is
/// identical to a one-shot encode.
pub fn encode_base64(bytes: &[u8]) -> String {
    let mut writer = EncoderStringWriter::new(&STANDARD);
    for slice in bytes.chunks(BASE64_SLICE_BYTES) {
        // Writing into a String never fails.
        let _ = writer.write_all(slice);
    }
    writer.into_inner()
}

pub fn decode_base64(base64_fragment: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(base64_fragment)
}

/// Reduces 24-bit little-endian PCM to 16-bit by dropping the low byte.
///
/// For every `[L, M, H]` triple the output sample is `M | (H << 8)`. This is a
/// lossy, undithered bit-depth reduction kept for wire compatibility.
/// Trailing bytes that do not form a full sample are discarded.
pub fn pcm24_to_pcm16(bytes: &[u8]) -> Vec<u8> {
    bytes
        .chunks_exact(3)
        .flat_map(|sample| [sample[1], sample[2]])
        .collect()
}

/// Base64 PCM24 in, base64 PCM16 out.
pub fn pcm24_base64_to_pcm16_base64(base64_pcm24: &str) -> Result<String, base64::DecodeError> {
    let pcm24 = decode_base64(base64_pcm24)?;
    Ok(encode_base64(&pcm24_to_pcm16(&pcm24)))
}

/// Prefixes PCM16 mono audio with a minimal RIFF/WAVE header.
pub fn wrap_wav(pcm16: &[u8], sample_rate: u32) -> Vec<u8> {
    let data_len = pcm16.len() as u32;
    let mut wav = BytesMut::with_capacity(WAV_HEADER_LEN + pcm16.len());
    wav.put_slice(b"RIFF");
    wav.put_u32_le(36 + data_len);
    wav.put_slice(b"WAVE");
    wav.put_slice(b"fmt ");
    wav.put_u32_le(16); // fmt chunk size
    wav.put_u16_le(1); // PCM
    wav.put_u16_le(1); // mono
    wav.put_u32_le(sample_rate);
    wav.put_u32_le(sample_rate * 2); // byte rate
    wav.put_u16_le(2); // block align
    wav.put_u16_le(16); // bits per sample
    wav.put_slice(b"data");
    wav.put_u32_le(data_len);
    wav.put_slice(pcm16);
    wav.to_vec()
}
