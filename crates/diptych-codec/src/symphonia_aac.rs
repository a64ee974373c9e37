//! AAC decoding through Symphonia.
//!
//! The demuxer hands us raw access units plus the AudioSpecificConfig;
//! Symphonia's AAC codec consumes them packet by packet without a format
//! reader in front.

use std::{collections::VecDeque, sync::Arc};

use symphonia::core::{
    audio::SampleBuffer,
    codecs::{CodecParameters, Decoder as SymphoniaDecoder, DecoderOptions, CODEC_TYPE_AAC},
    formats::Packet,
};
use tracing::{debug, warn};

use diptych_demux::EncodedUnit;

use crate::{
    config::AudioDecoderConfig,
    error::{CodecError, CodecResult},
    frame::{FrameLot, PlanarPcm, RawAudioFrame},
    traits::AudioDecoder,
};

/// AAC decoder box backed by `symphonia`.
pub struct SymphoniaAacDecoder {
    lot: Arc<FrameLot>,
    inner: Option<Box<dyn SymphoniaDecoder>>,
    out: VecDeque<RawAudioFrame>,
}

impl SymphoniaAacDecoder {
    #[must_use]
    pub fn new(lot: Arc<FrameLot>) -> Self {
        Self {
            lot,
            inner: None,
            out: VecDeque::new(),
        }
    }
}

impl AudioDecoder for SymphoniaAacDecoder {
    fn configure(&mut self, config: &AudioDecoderConfig) -> CodecResult<()> {
        if !config.codec.starts_with("mp4a.40.") {
            return Err(CodecError::Unsupported(config.codec.clone()));
        }

        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_AAC)
            .with_sample_rate(config.sample_rate)
            .with_extra_data(config.config.to_vec().into_boxed_slice());

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| CodecError::Unsupported(format!("{}: {e}", config.codec)))?;

        debug!(
            codec = %config.codec,
            sample_rate = config.sample_rate,
            channels = config.channels,
            "symphonia AAC decoder configured"
        );
        self.inner = Some(decoder);
        Ok(())
    }

    fn decode(&mut self, unit: EncodedUnit) -> CodecResult<()> {
        let decoder = self.inner.as_mut().ok_or(CodecError::NotConfigured)?;

        let packet = Packet::new_from_slice(
            0,
            unit.pts_us.max(0) as u64,
            unit.duration_us.max(0) as u64,
            &unit.bytes,
        );

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(pts_us = unit.pts_us, error = %e, "AAC unit failed to decode");
                return Err(CodecError::Decode(e.to_string()));
            }
        };

        let spec = *decoded.spec();
        let channel_count = spec.channels.count();
        let frames = decoded.frames();

        let mut interleaved = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        interleaved.copy_interleaved_ref(decoded);
        let samples = interleaved.samples();

        let mut planes = vec![Vec::with_capacity(frames); channel_count];
        for frame in 0..frames {
            for (channel, plane) in planes.iter_mut().enumerate() {
                plane.push(samples[frame * channel_count + channel]);
            }
        }

        self.out.push_back(RawAudioFrame::new(
            &self.lot,
            unit.pts_us,
            unit.duration_us,
            PlanarPcm::new(spec.rate, planes),
        ));
        Ok(())
    }

    fn poll_frame(&mut self) -> Option<RawAudioFrame> {
        self.out.pop_front()
    }

    fn in_flight(&self) -> usize {
        self.out.len()
    }

    fn flush(&mut self) -> CodecResult<()> {
        if let Some(decoder) = self.inner.as_mut() {
            decoder.reset();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn non_aac_codec_is_rejected() {
        let mut decoder = SymphoniaAacDecoder::new(FrameLot::new());
        let err = decoder
            .configure(&AudioDecoderConfig {
                codec: "opus".to_string(),
                config: Bytes::new(),
                sample_rate: 48_000,
                channels: 2,
            })
            .unwrap_err();
        assert!(matches!(err, CodecError::Unsupported(_)));
    }

    #[test]
    fn decode_before_configure_is_an_error() {
        let mut decoder = SymphoniaAacDecoder::new(FrameLot::new());
        let unit = EncodedUnit {
            track: diptych_core::TrackKind::Audio,
            is_keyframe: true,
            pts_us: 0,
            duration_us: 21_333,
            bytes: Bytes::from_static(&[0x21, 0x10]),
        };
        assert!(matches!(
            decoder.decode(unit),
            Err(CodecError::NotConfigured)
        ));
    }
}
