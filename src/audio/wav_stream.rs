//! WAV file audio stream for file simulation mode.

use crate::audio::stream::{AudioStream, AudioStreamConfig, StreamEvent};
use crate::defaults::SAMPLE_RATE;
use crate::error::{Result, StreamscribeError};
use async_trait::async_trait;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Audio stream that replays WAV file data as if it were live capture.
/// Supports arbitrary sample rates and channels, resampling to 16kHz mono.
pub struct WavFileStream {
    samples: Vec<i16>,
    chunk_size: usize,
    realtime: bool,
    sender: Option<mpsc::UnboundedSender<StreamEvent>>,
    recording: Arc<AtomicBool>,
    feeder: Option<JoinHandle<()>>,
}

impl WavFileStream {
    /// Create from any reader (for testing/flexibility).
    pub fn from_reader(reader: Box<dyn Read + Send>) -> Result<Self> {
        let mut wav_reader =
            hound::WavReader::new(reader).map_err(|e| StreamscribeError::AudioStream {
                message: format!("Failed to parse WAV file: {}", e),
            })?;

        let spec = wav_reader.spec();
        let source_rate = spec.sample_rate;
        let source_channels = spec.channels;

        let raw_samples: Vec<i16> = wav_reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| StreamscribeError::AudioStream {
                message: format!("Failed to read WAV samples: {}", e),
            })?;

        // Convert to mono if stereo
        let mono_samples = if source_channels == 2 {
            raw_samples
                .chunks_exact(2)
                .map(|chunk| {
                    let left = chunk[0] as i32;
                    let right = chunk[1] as i32;
                    ((left + right) / 2) as i16
                })
                .collect()
        } else {
            raw_samples
        };

        // Resample to 16kHz if needed
        let samples = if source_rate != SAMPLE_RATE {
            resample(&mono_samples, source_rate, SAMPLE_RATE)
        } else {
            mono_samples
        };

        Ok(Self {
            samples,
            // 100ms chunks at 16kHz
            chunk_size: 1600,
            realtime: false,
            sender: None,
            recording: Arc::new(AtomicBool::new(false)),
            feeder: None,
        })
    }

    /// Create from a file path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(Box::new(file))
    }

    /// Pace chunk delivery at playback speed instead of as fast as possible.
    /// Useful when exercising time-based behavior against real wall time.
    pub fn with_realtime_pacing(mut self) -> Self {
        self.realtime = true;
        self
    }

    /// Total duration of the loaded audio.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / SAMPLE_RATE as f64)
    }
}

#[async_trait]
impl AudioStream for WavFileStream {
    async fn initialize(
        &mut self,
        _config: &AudioStreamConfig,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sender = Some(tx);
        Ok(rx)
    }

    async fn start(&mut self) -> Result<()> {
        let tx = self
            .sender
            .clone()
            .ok_or_else(|| StreamscribeError::AudioStream {
                message: "WAV stream started before initialize".to_string(),
            })?;

        self.recording.store(true, Ordering::SeqCst);
        let _ = tx.send(StreamEvent::Status(true));

        let samples = std::mem::take(&mut self.samples);
        let chunk_size = self.chunk_size;
        let realtime = self.realtime;
        let recording = self.recording.clone();
        let chunk_interval = Duration::from_secs_f64(chunk_size as f64 / SAMPLE_RATE as f64);

        self.feeder = Some(tokio::spawn(async move {
            for chunk in samples.chunks(chunk_size) {
                if !recording.load(Ordering::SeqCst) {
                    break;
                }
                let mut bytes = Vec::with_capacity(chunk.len() * 2);
                for &sample in chunk {
                    bytes.extend_from_slice(&sample.to_le_bytes());
                }
                if tx.send(StreamEvent::Data(bytes)).is_err() {
                    break;
                }
                if realtime {
                    tokio::time::sleep(chunk_interval).await;
                } else {
                    // Yield so the consumer keeps up with the burst.
                    tokio::task::yield_now().await;
                }
            }
            recording.store(false, Ordering::SeqCst);
            let _ = tx.send(StreamEvent::Status(false));
        }));

        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.recording.store(false, Ordering::SeqCst);
        if let Some(feeder) = self.feeder.take() {
            let _ = feeder.await;
        }
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    async fn release(&mut self) -> Result<()> {
        self.recording.store(false, Ordering::SeqCst);
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
        self.sender = None;
        Ok(())
    }
}

/// Simple linear interpolation resampling.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = source_pos.floor() as usize;
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    async fn collect_data(stream: &mut WavFileStream) -> Vec<u8> {
        let mut rx = stream
            .initialize(&AudioStreamConfig::default())
            .await
            .unwrap();
        stream.start().await.unwrap();

        let mut data = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Data(bytes) => data.extend_from_slice(&bytes),
                StreamEvent::Status(false) => break,
                _ => {}
            }
        }
        data
    }

    #[test]
    fn from_reader_16khz_mono_matches_exactly() {
        let input_samples = vec![100i16, 200, 300, 400, 500];
        let wav_data = make_wav_data(16000, 1, &input_samples);

        let stream = WavFileStream::from_reader(Box::new(Cursor::new(wav_data))).unwrap();

        assert_eq!(stream.samples, input_samples);
        assert_eq!(stream.chunk_size, 1600);
    }

    #[test]
    fn from_reader_16khz_stereo_downmixes_to_mono() {
        // Stereo pairs: (100, 200), (300, 400), (500, 600)
        let stereo_samples = vec![100i16, 200, 300, 400, 500, 600];
        let wav_data = make_wav_data(16000, 2, &stereo_samples);

        let stream = WavFileStream::from_reader(Box::new(Cursor::new(wav_data))).unwrap();

        // Expected mono: (100+200)/2=150, (300+400)/2=350, (500+600)/2=550
        assert_eq!(stream.samples, vec![150i16, 350, 550]);
    }

    #[test]
    fn from_reader_48khz_mono_resamples_to_16khz() {
        let input_samples = vec![0i16; 48000]; // 1 second at 48kHz
        let wav_data = make_wav_data(48000, 1, &input_samples);

        let stream = WavFileStream::from_reader(Box::new(Cursor::new(wav_data))).unwrap();

        assert!(stream.samples.len() >= 15900 && stream.samples.len() <= 16100);
    }

    #[test]
    fn invalid_wav_data_returns_error() {
        let invalid_data = vec![0u8, 1, 2, 3, 4, 5];

        let result = WavFileStream::from_reader(Box::new(Cursor::new(invalid_data)));

        assert!(result.is_err());
        match result {
            Err(StreamscribeError::AudioStream { message }) => {
                assert!(message.contains("Failed to parse WAV file"));
            }
            _ => panic!("Expected AudioStream error"),
        }
    }

    #[test]
    fn duration_reflects_sample_count() {
        let input_samples = vec![0i16; 32000]; // 2 seconds at 16kHz
        let wav_data = make_wav_data(16000, 1, &input_samples);

        let stream = WavFileStream::from_reader(Box::new(Cursor::new(wav_data))).unwrap();

        assert_eq!(stream.duration(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_stream_delivers_all_bytes_in_order() {
        let input_samples: Vec<i16> = (0..5000).map(|i| i as i16).collect();
        let wav_data = make_wav_data(16000, 1, &input_samples);

        let mut stream = WavFileStream::from_reader(Box::new(Cursor::new(wav_data))).unwrap();
        let data = collect_data(&mut stream).await;

        assert_eq!(data.len(), 10000);
        let decoded: Vec<i16> = data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(decoded, input_samples);
    }

    #[tokio::test]
    async fn test_stream_sends_status_events() {
        let input_samples = vec![1i16; 100];
        let wav_data = make_wav_data(16000, 1, &input_samples);

        let mut stream = WavFileStream::from_reader(Box::new(Cursor::new(wav_data))).unwrap();
        let mut rx = stream
            .initialize(&AudioStreamConfig::default())
            .await
            .unwrap();
        stream.start().await.unwrap();

        let mut statuses = Vec::new();
        while let Some(event) = rx.recv().await {
            if let StreamEvent::Status(s) = event {
                statuses.push(s);
                if !s {
                    break;
                }
            }
        }
        assert_eq!(statuses, vec![true, false]);
    }

    #[tokio::test]
    async fn test_start_before_initialize_fails() {
        let wav_data = make_wav_data(16000, 1, &[1i16; 10]);
        let mut stream = WavFileStream::from_reader(Box::new(Cursor::new(wav_data))).unwrap();

        assert!(stream.start().await.is_err());
    }

    #[tokio::test]
    async fn test_open_reads_file_from_disk() {
        let wav_data = make_wav_data(16000, 1, &[7i16; 1600]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.wav");
        std::fs::write(&path, wav_data).unwrap();

        let mut stream = WavFileStream::open(&path).unwrap();
        let data = collect_data(&mut stream).await;

        assert_eq!(data.len(), 3200);
    }
}
