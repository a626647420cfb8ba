//! Clip decoding off the control thread.
//!
//! Decode jobs go to a dedicated worker over a bounded channel; results come
//! back on a second channel that the fallback drains in `pump`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use squirrel_types::ClipId;

use crate::error::{AudioError, AudioResult};

/// Interleaved PCM in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedClip {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl DecodedClip {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self { samples, channels: channels.max(1), sample_rate }
    }

    pub fn frames(&self) -> u64 {
        (self.samples.len() / self.channels as usize) as u64
    }

    /// Left/right pair of one frame; mono is duplicated, extra channels dropped.
    pub fn frame(&self, index: u64) -> (f32, f32) {
        let channels = self.channels as usize;
        let base = index as usize * channels;
        match self.samples.get(base..base + channels) {
            Some([mono]) => (*mono, *mono),
            Some([l, r, ..]) => (*l, *r),
            _ => (0.0, 0.0),
        }
    }
}

/// Turns a clip locator into PCM.
pub trait ClipLoader: Send + 'static {
    fn load(&self, locator: &str) -> AudioResult<DecodedClip>;
}

/// WAV files via `hound`. Relative locators resolve against `root`.
#[derive(Debug, Clone, Default)]
pub struct WavLoader {
    root: Option<PathBuf>,
}

impl WavLoader {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    fn resolve(&self, locator: &str) -> PathBuf {
        let stripped = locator.strip_prefix("file://").unwrap_or(locator);
        let path = Path::new(stripped);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl ClipLoader for WavLoader {
    fn load(&self, locator: &str) -> AudioResult<DecodedClip> {
        let fail = |reason: String| AudioError::DecodeFailure { locator: locator.to_string(), reason };
        let path = self.resolve(locator);
        let reader = hound::WavReader::open(&path).map_err(|e| fail(e.to_string()))?;
        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int => {
                let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / max_val))
                    .collect::<Result<_, _>>()
                    .map_err(|e| fail(e.to_string()))?
            }
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|e| fail(e.to_string()))?,
        };
        log::debug!(
            target: "audio::decode",
            "decoded {} ({} samples, {} ch, {} Hz)",
            path.display(), samples.len(), spec.channels, spec.sample_rate
        );
        Ok(DecodedClip::new(samples, spec.channels, spec.sample_rate))
    }
}

pub struct DecodeJob {
    pub clip_id: ClipId,
    pub locator: String,
    /// Distinguishes a recreated clip from a stale job for the same id.
    pub generation: u64,
}

pub struct DecodeOutcome {
    pub clip_id: ClipId,
    pub generation: u64,
    pub result: AudioResult<Arc<DecodedClip>>,
}

pub struct DecodeWorker {
    jobs: Option<Sender<DecodeJob>>,
    done: Receiver<DecodeOutcome>,
    handle: Option<JoinHandle<()>>,
}

impl DecodeWorker {
    pub fn spawn(loader: Box<dyn ClipLoader>, capacity: usize) -> std::io::Result<Self> {
        let (job_tx, job_rx) = crossbeam_channel::bounded::<DecodeJob>(capacity.max(1));
        let (done_tx, done_rx) = crossbeam_channel::unbounded();

        let handle = thread::Builder::new()
            .name("clip-decode".into())
            .spawn(move || decode_loop(loader, job_rx, done_tx))?;

        Ok(Self { jobs: Some(job_tx), done: done_rx, handle: Some(handle) })
    }

    pub fn submit(&self, job: DecodeJob) -> AudioResult {
        let Some(jobs) = &self.jobs else {
            return Err(AudioError::DecodeFailure { locator: job.locator, reason: "decoder stopped".into() });
        };
        match jobs.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => {
                log::warn!(target: "audio::decode", "decode queue full, dropping {}", job.clip_id);
                Err(AudioError::DecodeFailure { locator: job.locator, reason: "decode queue full".into() })
            }
            Err(TrySendError::Disconnected(job)) => {
                Err(AudioError::DecodeFailure { locator: job.locator, reason: "decoder stopped".into() })
            }
        }
    }

    /// Outcomes finished since the last call.
    pub fn completed(&self) -> Vec<DecodeOutcome> {
        self.done.try_iter().collect()
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        self.jobs = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn decode_loop(loader: Box<dyn ClipLoader>, jobs: Receiver<DecodeJob>, done: Sender<DecodeOutcome>) {
    while let Ok(job) = jobs.recv() {
        let result = loader.load(&job.locator).map(Arc::new);
        if let Err(e) = &result {
            log::warn!(target: "audio::decode", "{}: {}", job.clip_id, e);
        }
        let outcome = DecodeOutcome { clip_id: job.clip_id, generation: job.generation, result };
        if done.send(outcome).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn write_wav(path: &Path, frames: usize) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            writer.write_sample(((i % 100) as i16) * 100).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn wav_loader_reads_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("tone.wav"), 800);
        let loader = WavLoader::new(Some(dir.path().to_path_buf()));
        let clip = loader.load("tone.wav").unwrap();
        assert_eq!(clip.frames(), 800);
        assert_eq!(clip.sample_rate, 8000);
        assert_eq!(clip.frame(0), (0.0, 0.0));
    }

    #[test]
    fn missing_file_is_a_decode_failure() {
        let loader = WavLoader::default();
        let err = loader.load("/definitely/not/here.wav").unwrap_err();
        assert!(matches!(err, AudioError::DecodeFailure { .. }));
    }

    #[test]
    fn worker_reports_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        write_wav(&path, 100);
        let worker = DecodeWorker::spawn(Box::new(WavLoader::default()), 4).unwrap();
        worker
            .submit(DecodeJob {
                clip_id: ClipId::new("a"),
                locator: path.to_string_lossy().into_owned(),
                generation: 7,
            })
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let outcome = loop {
            if let Some(outcome) = worker.completed().pop() {
                break outcome;
            }
            assert!(Instant::now() < deadline, "decode did not finish");
            thread::sleep(Duration::from_millis(5));
        };
        assert_eq!(outcome.generation, 7);
        assert_eq!(outcome.result.unwrap().frames(), 100);
    }

    #[test]
    fn stereo_frames_split_channels() {
        let clip = DecodedClip::new(vec![0.1, 0.2, 0.3, 0.4], 2, 48000);
        assert_eq!(clip.frames(), 2);
        assert_eq!(clip.frame(1), (0.3, 0.4));
        assert_eq!(clip.frame(5), (0.0, 0.0));
    }
}
