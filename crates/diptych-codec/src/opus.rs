//! Opus re-encoding through `audiopus` (native libopus).
//!
//! Incoming PCM is repackaged onto the 20 ms grid the pipeline emits on:
//! samples accumulate in an interleaved FIFO and every full 960-frame
//! block (at 48 kHz) leaves as one key-frame chunk.

use std::collections::VecDeque;

use audiopus::{coder::Encoder as LibOpusEncoder, Application, Bitrate, Channels, SampleRate};
use bytes::Bytes;
use diptych_core::{consts, TrackKind};
use tracing::debug;

use crate::{
    chunk::EncodedChunk,
    config::AudioEncoderConfig,
    error::{CodecError, CodecResult},
    frame::RawAudioFrame,
    traits::AudioEncoder,
};

/// Samples per channel in one 20 ms grain at 48 kHz.
const GRAIN_FRAMES: usize = 960;
/// libopus recommends 4000 bytes of headroom per packet.
const MAX_PACKET: usize = 4_000;

pub struct OpusEncoder {
    inner: Option<LibOpusEncoder>,
    channels: usize,
    fifo: VecDeque<f32>,
    next_pts_us: i64,
    out: VecDeque<EncodedChunk>,
}

impl OpusEncoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: None,
            channels: usize::from(consts::CHANNELS),
            fifo: VecDeque::new(),
            next_pts_us: 0,
            out: VecDeque::new(),
        }
    }

    fn drain_full_grains(&mut self) -> CodecResult<()> {
        let block = GRAIN_FRAMES * self.channels;
        while self.fifo.len() >= block {
            let input: Vec<f32> = self.fifo.drain(..block).collect();
            let encoder = self.inner.as_mut().ok_or(CodecError::NotConfigured)?;
            let mut packet = vec![0u8; MAX_PACKET];
            let written = encoder
                .encode_float(&input, &mut packet)
                .map_err(|e| CodecError::Encode(e.to_string()))?;
            packet.truncate(written);

            self.out.push_back(EncodedChunk {
                track: TrackKind::Audio,
                is_keyframe: true,
                pts_us: self.next_pts_us,
                duration_us: consts::AUDIO_GRAIN_US,
                bytes: Bytes::from(packet),
            });
            self.next_pts_us += consts::AUDIO_GRAIN_US;
        }
        Ok(())
    }
}

impl Default for OpusEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEncoder for OpusEncoder {
    fn configure(&mut self, config: &AudioEncoderConfig) -> CodecResult<()> {
        if config.sample_rate != consts::SAMPLE_RATE || config.channels != consts::CHANNELS {
            return Err(CodecError::Unsupported(format!(
                "opus re-encode is fixed at {} Hz / {} ch",
                consts::SAMPLE_RATE,
                consts::CHANNELS
            )));
        }
        let mut encoder =
            LibOpusEncoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)
                .map_err(|e| CodecError::Unsupported(e.to_string()))?;
        encoder
            .set_bitrate(Bitrate::BitsPerSecond(config.bitrate as i32))
            .map_err(|e| CodecError::Unsupported(e.to_string()))?;

        debug!(bitrate = config.bitrate, "opus encoder configured");
        self.channels = usize::from(config.channels);
        self.inner = Some(encoder);
        Ok(())
    }

    fn encode(&mut self, frame: RawAudioFrame, pts_us: i64) -> CodecResult<()> {
        if self.inner.is_none() {
            frame.release();
            return Err(CodecError::NotConfigured);
        }
        if self.fifo.is_empty() {
            self.next_pts_us = pts_us;
        }

        let pcm = frame.pcm();
        if pcm.channel_count() == 0 {
            frame.release();
            return Ok(());
        }
        let frames = pcm.frames();
        for i in 0..frames {
            for channel in 0..self.channels {
                let plane = pcm.plane(channel.min(pcm.channel_count() - 1));
                self.fifo.push_back(plane[i]);
            }
        }
        frame.release();

        self.drain_full_grains()
    }

    fn poll_chunk(&mut self) -> Option<EncodedChunk> {
        self.out.pop_front()
    }

    fn flush(&mut self) -> CodecResult<()> {
        // Pad the tail out to one last full grain.
        if !self.fifo.is_empty() {
            let block = GRAIN_FRAMES * self.channels;
            while self.fifo.len() % block != 0 {
                self.fifo.push_back(0.0);
            }
            self.drain_full_grains()?;
        }
        Ok(())
    }
}
