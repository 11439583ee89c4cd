use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;

use super::Decoder;
use crate::{
    audio::{
        PcmBuffer,
        constants::{BYTES_PER_SAMPLE, INV_INT16},
    },
    common::errors::DecodeError,
};

/// Base64-wrapped signed 16-bit little-endian interleaved PCM.
#[derive(Debug, Default, Clone, Copy)]
pub struct Pcm16Decoder;

impl Pcm16Decoder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Decoder for Pcm16Decoder {
    fn decode(&self, raw: &[u8]) -> Result<Bytes, DecodeError> {
        let trimmed = raw.trim_ascii();
        if trimmed.is_empty() {
            return Err(DecodeError::Empty);
        }
        Ok(Bytes::from(STANDARD.decode(trimmed)?))
    }

    async fn decode_audio_data(
        &self,
        bytes: Bytes,
        sample_rate: u32,
        channels: usize,
    ) -> Result<PcmBuffer, DecodeError> {
        if channels == 0 || channels > 8 {
            return Err(DecodeError::Channels(channels));
        }
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        let frame_bytes = BYTES_PER_SAMPLE * channels;
        if bytes.len() % frame_bytes != 0 {
            return Err(DecodeError::Misaligned {
                len: bytes.len(),
                frame_bytes,
            });
        }

        let mut ints = vec![0i16; bytes.len() / BYTES_PER_SAMPLE];
        LittleEndian::read_i16_into(&bytes, &mut ints);
        let samples = ints.into_iter().map(|s| s as f32 * INV_INT16).collect();

        Ok(PcmBuffer::new(samples, sample_rate, channels))
    }
}
