//! Audio output for the fallback mixer using cpal.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};

use super::mixer::{self, SharedMixer};
use crate::error::{AudioError, AudioResult};

/// A running output stream pulling from the shared mixer.
///
/// `cpal::Stream` is not `Send` on every platform, so the stream stays with
/// whoever opened it (the host's main thread) rather than inside the backend.
pub struct CpalOutput {
    _stream: Stream,
    sample_rate: u32,
    device_name: String,
}

impl CpalOutput {
    /// Open the default output device, switch the mixer to its rate and start pulling.
    pub fn start(mixer: SharedMixer) -> AudioResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::Unsupported("audio output without a device"))?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::Transport(format!("output config: {}", e)))?;
        let channels = supported.channels().max(1) as usize;
        let sample_rate = supported.sample_rate().0;
        let config: StreamConfig = supported.into();

        mixer::lock(&mixer).set_sample_rate(sample_rate);

        let mut stereo: Vec<f32> = Vec::new();
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels;
                    stereo.resize(frames * 2, 0.0);
                    // never block the audio thread on the control thread
                    match mixer.try_lock() {
                        Ok(mut m) => m.render(&mut stereo),
                        Err(_) => stereo.fill(0.0),
                    }
                    for (i, frame) in data.chunks_mut(channels).enumerate() {
                        for (ch, out) in frame.iter_mut().enumerate() {
                            *out = match ch {
                                0 => stereo[2 * i],
                                1 => stereo[2 * i + 1],
                                _ => 0.0,
                            };
                        }
                    }
                    if channels == 1 {
                        for (i, out) in data.iter_mut().enumerate() {
                            *out = 0.5 * (stereo[2 * i] + stereo[2 * i + 1]);
                        }
                    }
                },
                |err| {
                    log::error!(target: "audio::fallback", "output stream error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::Transport(format!("build output stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| AudioError::Transport(format!("start output stream: {}", e)))?;

        log::info!(target: "audio::fallback", "output on '{}' at {} Hz, {} ch", device_name, sample_rate, channels);
        Ok(Self { _stream: stream, sample_rate, device_name })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}
