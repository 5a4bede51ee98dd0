use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

use super::encoder::{Packet, PcmEncoder, StreamParams};
use super::frame::MediaKind;

/// Output container format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Wav,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Wav => "wav",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wav" => Ok(OutputFormat::Wav),
            other => bail!("unsupported output format: {}", other),
        }
    }
}

enum Output {
    /// File created, stream not yet added
    Pending(BufWriter<File>),
    Writing(hound::WavWriter<BufWriter<File>>),
}

/// Single-stream audio container written to disk.
///
/// `close` finalizes the file (header sizes); dropping an unclosed container
/// finalizes as a fallback.
pub struct Container {
    path: PathBuf,
    output: Option<Output>,
    samples_written: usize,
}

impl Container {
    /// Create the output file, including any missing parent directories
    pub fn open(path: impl AsRef<Path>, format: OutputFormat) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create recordings directory: {:?}", parent)
                })?;
            }
        }

        let file = File::create(&path)
            .with_context(|| format!("Failed to create output file: {:?}", path))?;

        debug!("Opened {} container at {:?}", format.extension(), path);

        Ok(Self {
            path,
            output: Some(Output::Pending(BufWriter::new(file))),
            samples_written: 0,
        })
    }

    /// Add the encoding stream. Only audio streams are supported.
    pub fn add_stream(&mut self, kind: MediaKind, params: StreamParams) -> Result<PcmEncoder> {
        if kind != MediaKind::Audio {
            bail!("cannot record {} streams", kind);
        }

        let file = match self.output.take() {
            Some(Output::Pending(file)) => file,
            Some(writing @ Output::Writing(_)) => {
                self.output = Some(writing);
                bail!("container already has a stream");
            }
            None => bail!("container is closed"),
        };

        let spec = hound::WavSpec {
            channels: params.channels,
            sample_rate: params.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::new(file, spec)
            .with_context(|| format!("Failed to write WAV header: {:?}", self.path))?;
        self.output = Some(Output::Writing(writer));

        Ok(PcmEncoder::new(params))
    }

    /// Write an encoded packet
    pub fn mux(&mut self, packet: &Packet) -> Result<()> {
        let Some(Output::Writing(writer)) = self.output.as_mut() else {
            bail!("no stream to write to: {:?}", self.path);
        };

        for &sample in &packet.samples {
            writer
                .write_sample(sample)
                .context("Failed to write sample to WAV")?;
        }
        self.samples_written += packet.samples.len();

        Ok(())
    }

    /// Finalize and close the file
    pub fn close(mut self) -> Result<usize> {
        self.finish()?;
        Ok(self.samples_written)
    }

    fn finish(&mut self) -> Result<()> {
        match self.output.take() {
            Some(Output::Writing(writer)) => writer
                .finalize()
                .with_context(|| format!("Failed to finalize WAV file: {:?}", self.path)),
            Some(Output::Pending(mut file)) => {
                use std::io::Write;
                file.flush()
                    .with_context(|| format!("Failed to flush output file: {:?}", self.path))
            }
            None => Ok(()),
        }
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!("Failed to finalize container on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!("WAV".parse::<OutputFormat>().unwrap(), OutputFormat::Wav);
        assert!("mp3".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_video_stream_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut container = Container::open(dir.path().join("v.wav"), OutputFormat::Wav).unwrap();
        assert!(container
            .add_stream(MediaKind::Video, StreamParams::default())
            .is_err());
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/out.wav");
        let container = Container::open(&path, OutputFormat::Wav).unwrap();
        container.close().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_close_produces_readable_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let mut container = Container::open(&path, OutputFormat::Wav).unwrap();
        container
            .add_stream(MediaKind::Audio, StreamParams::default())
            .unwrap();
        container
            .mux(&Packet {
                samples: vec![7; 10],
                pts: 0,
            })
            .unwrap();
        assert_eq!(container.close().unwrap(), 10);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.len(), 10);
        assert_eq!(reader.spec().sample_rate, 48000);
    }
}
