use anyhow::{bail, Result};

use super::frame::AudioFrame;

/// Parameters of the encoded output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples (per channel) carried by each full packet
    pub packet_samples: usize,
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            packet_samples: 960, // 20ms at 48kHz
        }
    }
}

/// Encoded packet ready to be muxed
#[derive(Debug, Clone)]
pub struct Packet {
    /// Interleaved PCM samples
    pub samples: Vec<i16>,
    /// Index of the first sample (per channel) in the stream
    pub pts: u64,
}

/// 16-bit PCM encoder.
///
/// Converts incoming frames to the stream layout and groups samples into fixed-size
/// packets. Samples that do not fill a packet stay buffered until the next frame or
/// until the terminating `encode(None)` call flushes them.
pub struct PcmEncoder {
    params: StreamParams,
    buffer: Vec<i16>,
    next_pts: u64,
    flushed: bool,
}

impl PcmEncoder {
    pub fn new(params: StreamParams) -> Self {
        Self {
            params,
            buffer: Vec::new(),
            next_pts: 0,
            flushed: false,
        }
    }

    /// Encode one frame, or flush buffered state when `frame` is `None`.
    pub fn encode(&mut self, frame: Option<&AudioFrame>) -> Result<Vec<Packet>> {
        let Some(frame) = frame else {
            return Ok(self.flush());
        };
        if self.flushed {
            bail!("encoder already flushed");
        }

        let frame = self.convert(frame)?;
        self.buffer.extend_from_slice(&frame.samples);

        let packet_len = self.packet_len();
        let mut packets = Vec::new();
        while self.buffer.len() >= packet_len {
            let rest = self.buffer.split_off(packet_len);
            let samples = std::mem::replace(&mut self.buffer, rest);
            packets.push(self.packet(samples));
        }

        Ok(packets)
    }

    /// Number of samples currently held back
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn flush(&mut self) -> Vec<Packet> {
        self.flushed = true;
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let samples = std::mem::take(&mut self.buffer);
        vec![self.packet(samples)]
    }

    fn packet(&mut self, samples: Vec<i16>) -> Packet {
        let pts = self.next_pts;
        self.next_pts += (samples.len() / self.params.channels.max(1) as usize) as u64;
        Packet { samples, pts }
    }

    fn packet_len(&self) -> usize {
        self.params.packet_samples.max(1) * self.params.channels.max(1) as usize
    }

    fn convert(&self, frame: &AudioFrame) -> Result<AudioFrame> {
        let mut converted = frame.clone();

        if converted.sample_rate != self.params.sample_rate {
            converted = downsample_frame(converted, self.params.sample_rate)?;
        }

        if converted.channels != self.params.channels {
            converted = match (converted.channels, self.params.channels) {
                (2, 1) => stereo_to_mono(converted),
                (1, 2) => mono_to_stereo(converted),
                (from, to) => bail!("cannot convert {} channels to {}", from, to),
            };
        }

        Ok(converted)
    }
}

/// Downsample audio frame by decimation
fn downsample_frame(frame: AudioFrame, target_rate: u32) -> Result<AudioFrame> {
    if target_rate == 0 || frame.sample_rate < target_rate || frame.sample_rate % target_rate != 0
    {
        bail!(
            "cannot resample {}Hz to {}Hz",
            frame.sample_rate,
            target_rate
        );
    }

    let ratio = (frame.sample_rate / target_rate) as usize;
    let channels = frame.channels.max(1) as usize;

    // Decimate whole sample frames so interleaving is preserved
    let downsampled: Vec<i16> = frame
        .samples
        .chunks_exact(channels)
        .step_by(ratio)
        .flatten()
        .copied()
        .collect();

    Ok(AudioFrame {
        samples: downsampled,
        sample_rate: target_rate,
        channels: frame.channels,
        timestamp_ms: frame.timestamp_ms,
    })
}

/// Convert stereo to mono by summing channels
fn stereo_to_mono(frame: AudioFrame) -> AudioFrame {
    let mut mono_samples = Vec::with_capacity(frame.samples.len() / 2);

    // Sum left and right channels (no division to preserve volume)
    for chunk in frame.samples.chunks_exact(2) {
        let sum = chunk[0] as i32 + chunk[1] as i32;
        mono_samples.push(sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
    }

    AudioFrame {
        samples: mono_samples,
        sample_rate: frame.sample_rate,
        channels: 1,
        timestamp_ms: frame.timestamp_ms,
    }
}

fn mono_to_stereo(frame: AudioFrame) -> AudioFrame {
    let samples = frame.samples.iter().flat_map(|&s| [s, s]).collect();

    AudioFrame {
        samples,
        sample_rate: frame.sample_rate,
        channels: 2,
        timestamp_ms: frame.timestamp_ms,
    }
}
