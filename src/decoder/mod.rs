//! Chunk payload decoding.
//!
//! Decoding is two-phase: `decode` turns the transport payload into raw
//! bytes, `decode_audio_data` turns those into a PCM buffer at the graph's
//! sample rate and channel count.

pub mod pcm;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{audio::PcmBuffer, common::errors::DecodeError};

pub use pcm::Pcm16Decoder;

#[async_trait]
pub trait Decoder: Send + Sync {
    fn decode(&self, raw: &[u8]) -> Result<Bytes, DecodeError>;

    async fn decode_audio_data(
        &self,
        bytes: Bytes,
        sample_rate: u32,
        channels: usize,
    ) -> Result<PcmBuffer, DecodeError>;
}
