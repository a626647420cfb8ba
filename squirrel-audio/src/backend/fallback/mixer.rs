//! Minimal software mixer: the fallback's clock and audio context.
//!
//! Sources are scheduled at an absolute mixer frame and read a decoded clip
//! with linear interpolation. Each source carries its own gain, pan,
//! attack ramp, end frame and loop region; a release ramp ends it early.
//! `render` fills interleaved stereo and advances the clock.

use std::sync::{Arc, Mutex, MutexGuard};

use super::decode::DecodedClip;

pub type SharedMixer = Arc<Mutex<SoftwareMixer>>;

/// Render granularity used when the clock is advanced without an output device.
const ADVANCE_CHUNK: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopRegion {
    pub start: u64,
    pub end: u64,
    pub pingpong: bool,
    /// Wraps left before playback continues to the end. `None` loops forever.
    pub passes: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub buffer: Arc<DecodedClip>,
    /// Mixer frame at which the source becomes audible.
    pub start_at: u64,
    /// Clip frame to start reading from.
    pub offset: u64,
    /// Exclusive clip frame; `None` plays to the end of the buffer.
    pub end: Option<u64>,
    pub looping: Option<LoopRegion>,
    pub gain: f32,
    pub pan: f32,
    /// Playback rate relative to the clip's own sample rate.
    pub speed: f64,
    pub attack_frames: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndedSource {
    pub id: SourceId,
    /// Clip frame the source had reached.
    pub position: u64,
}

#[derive(Debug, Clone, Copy)]
struct Release {
    total: u64,
    remaining: u64,
}

struct Source {
    id: SourceId,
    spec: SourceSpec,
    position: f64,
    step: f64,
    forward: bool,
    passes_left: Option<u32>,
    played: u64,
    release: Option<Release>,
    done: bool,
}

impl Source {
    fn new(id: SourceId, spec: SourceSpec, mixer_rate: u32) -> Self {
        let rate_ratio = if mixer_rate == 0 {
            1.0
        } else {
            spec.buffer.sample_rate as f64 / mixer_rate as f64
        };
        let passes_left = spec.looping.and_then(|l| l.passes);
        Self {
            id,
            position: spec.offset as f64,
            step: rate_ratio * spec.speed.max(0.0),
            forward: true,
            passes_left,
            played: 0,
            release: None,
            done: false,
            spec,
        }
    }

    fn end_frame(&self) -> f64 {
        let frames = self.spec.buffer.frames();
        self.spec.end.map_or(frames, |end| end.min(frames)) as f64
    }

    fn active_loop(&self) -> Option<LoopRegion> {
        match (self.spec.looping, self.passes_left) {
            (Some(_), Some(0)) => None,
            (Some(region), _) if region.end > region.start => Some(region),
            _ => None,
        }
    }

    fn amplitude(&self) -> f32 {
        let mut amp = self.spec.gain;
        if self.spec.attack_frames > 0 && self.played < self.spec.attack_frames {
            amp *= self.played as f32 / self.spec.attack_frames as f32;
        }
        if let Some(release) = self.release {
            if release.total > 0 {
                amp *= release.remaining as f32 / release.total as f32;
            }
        }
        amp
    }

    fn sample(&self) -> (f32, f32) {
        let index = self.position.floor();
        let frac = (self.position - index) as f32;
        let (l0, r0) = self.spec.buffer.frame(index as u64);
        let (l1, r1) = self.spec.buffer.frame(index as u64 + 1);
        (l0 + (l1 - l0) * frac, r0 + (r1 - r0) * frac)
    }

    fn consume_pass(&mut self) {
        if let Some(n) = self.passes_left.as_mut() {
            *n = n.saturating_sub(1);
        }
    }

    fn advance(&mut self) {
        self.played += 1;
        if let Some(release) = self.release.as_mut() {
            if release.remaining == 0 {
                self.done = true;
                return;
            }
            release.remaining -= 1;
        }

        let previous = self.position;
        if self.forward {
            self.position += self.step;
        } else {
            self.position -= self.step;
        }

        if let Some(region) = self.active_loop() {
            let (start, end) = (region.start as f64, region.end as f64);
            if self.forward && previous < end && self.position >= end {
                if region.pingpong {
                    self.forward = false;
                    self.position = (end - (self.position - end)).max(start);
                } else {
                    self.position = start + (self.position - end);
                    self.consume_pass();
                }
            } else if !self.forward && previous > start && self.position <= start {
                self.forward = true;
                self.position = (start + (start - self.position)).min(end);
                self.consume_pass();
            }
        } else if !self.forward && self.position <= 0.0 {
            self.forward = true;
            self.position = 0.0;
        }

        if self.forward && self.position >= self.end_frame() {
            self.done = true;
        }
    }
}

pub struct SoftwareMixer {
    sample_rate: u32,
    frame: u64,
    output_gain: f32,
    sources: Vec<Source>,
    next_id: u64,
    ended: Vec<EndedSource>,
    scratch: Vec<f32>,
}

impl SoftwareMixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frame: 0,
            output_gain: 1.0,
            sources: Vec::new(),
            next_id: 0,
            ended: Vec::new(),
            scratch: Vec::new(),
        }
    }

    pub fn shared(sample_rate: u32) -> SharedMixer {
        Arc::new(Mutex::new(Self::new(sample_rate)))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Adopt the output device's rate. The frame clock is kept.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1);
    }

    pub fn current_frame(&self) -> u64 {
        self.frame
    }

    pub fn current_time(&self) -> f64 {
        self.frame as f64 / self.sample_rate.max(1) as f64
    }

    pub fn output_gain(&self) -> f32 {
        self.output_gain
    }

    pub fn set_output_gain(&mut self, gain: f32) {
        self.output_gain = gain.max(0.0);
    }

    pub fn start(&mut self, spec: SourceSpec) -> SourceId {
        self.next_id += 1;
        let id = SourceId(self.next_id);
        self.sources.push(Source::new(id, spec, self.sample_rate));
        id
    }

    /// Fade the source out over `frames` and drop it. Returns false if it is gone.
    pub fn release(&mut self, id: SourceId, frames: u64) -> bool {
        let Some(index) = self.sources.iter().position(|s| s.id == id) else {
            return false;
        };
        if frames == 0 || self.sources[index].spec.start_at > self.frame {
            self.sources.remove(index);
        } else {
            self.sources[index].release = Some(Release { total: frames, remaining: frames });
        }
        true
    }

    pub fn set_gain_pan(&mut self, id: SourceId, gain: f32, pan: f32) -> bool {
        match self.sources.iter_mut().find(|s| s.id == id) {
            Some(source) => {
                source.spec.gain = gain;
                source.spec.pan = pan.clamp(-1.0, 1.0);
                true
            }
            None => false,
        }
    }

    /// Clip frame the source is at, `None` once it has ended or been released.
    pub fn position(&self, id: SourceId) -> Option<u64> {
        self.sources
            .iter()
            .find(|s| s.id == id && s.release.is_none())
            .map(|s| s.position as u64)
    }

    pub fn active_sources(&self) -> usize {
        self.sources.len()
    }

    /// Sources that reached their end since the last call.
    pub fn take_ended(&mut self) -> Vec<EndedSource> {
        std::mem::take(&mut self.ended)
    }

    /// Mix into interleaved stereo and advance the clock by `out.len() / 2` frames.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let frames = out.len() / 2;
        let output_gain = self.output_gain;
        for source in self.sources.iter_mut() {
            let angle = (source.spec.pan + 1.0) * std::f32::consts::FRAC_PI_4;
            let (pan_l, pan_r) = (angle.cos(), angle.sin());
            for i in 0..frames {
                if self.frame + (i as u64) < source.spec.start_at {
                    continue;
                }
                if source.done {
                    break;
                }
                let amp = source.amplitude() * output_gain;
                let (l, r) = source.sample();
                out[2 * i] += l * amp * pan_l;
                out[2 * i + 1] += r * amp * pan_r;
                source.advance();
            }
        }
        self.frame += frames as u64;

        let mut index = 0;
        while index < self.sources.len() {
            if self.sources[index].done {
                let source = self.sources.remove(index);
                if source.release.is_none() {
                    self.ended.push(EndedSource { id: source.id, position: source.position as u64 });
                }
            } else {
                index += 1;
            }
        }
    }

    /// Run the mix for `frames` without an output device.
    pub fn advance(&mut self, frames: u64) {
        let mut scratch = std::mem::take(&mut self.scratch);
        let mut left = frames;
        while left > 0 {
            let chunk = left.min(ADVANCE_CHUNK as u64) as usize;
            scratch.resize(chunk * 2, 0.0);
            self.render(&mut scratch);
            left -= chunk as u64;
        }
        self.scratch = scratch;
    }
}

/// Lock the mixer, recovering from a poisoned lock.
pub fn lock(mixer: &SharedMixer) -> MutexGuard<'_, SoftwareMixer> {
    mixer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize) -> Arc<DecodedClip> {
        Arc::new(DecodedClip::new((0..frames).map(|i| i as f32 / frames as f32).collect(), 1, 48000))
    }

    fn spec(buffer: Arc<DecodedClip>) -> SourceSpec {
        SourceSpec {
            buffer,
            start_at: 0,
            offset: 0,
            end: None,
            looping: None,
            gain: 1.0,
            pan: 0.0,
            speed: 1.0,
            attack_frames: 0,
        }
    }

    #[test]
    fn source_ends_at_buffer_end() {
        let mut mixer = SoftwareMixer::new(48000);
        let id = mixer.start(spec(ramp(1000)));
        mixer.advance(999);
        assert!(mixer.take_ended().is_empty());
        assert_eq!(mixer.position(id), Some(999));
        mixer.advance(10);
        let ended = mixer.take_ended();
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0].id, id);
        assert_eq!(mixer.active_sources(), 0);
        assert_eq!(mixer.current_frame(), 1009);
    }

    #[test]
    fn scheduled_source_waits_for_its_frame() {
        let mut mixer = SoftwareMixer::new(48000);
        let mut s = spec(ramp(1000));
        s.start_at = 500;
        let id = mixer.start(s);
        mixer.advance(400);
        assert_eq!(mixer.position(id), Some(0));
        mixer.advance(200);
        assert_eq!(mixer.position(id), Some(100));
    }

    #[test]
    fn end_frame_bounds_playback() {
        let mut mixer = SoftwareMixer::new(48000);
        let mut s = spec(ramp(1000));
        s.offset = 100;
        s.end = Some(200);
        mixer.start(s);
        mixer.advance(100);
        assert_eq!(mixer.take_ended().len(), 1);
    }

    #[test]
    fn forward_loop_wraps_until_passes_run_out() {
        let mut mixer = SoftwareMixer::new(48000);
        let mut s = spec(ramp(1000));
        s.looping = Some(LoopRegion { start: 0, end: 100, pingpong: false, passes: Some(2) });
        let id = mixer.start(s);
        mixer.advance(150);
        assert_eq!(mixer.position(id), Some(50));
        // two wraps, then straight through to the buffer end
        mixer.advance(100 + 1000);
        assert_eq!(mixer.take_ended().len(), 1);
    }

    #[test]
    fn sustained_loop_never_ends() {
        let mut mixer = SoftwareMixer::new(48000);
        let mut s = spec(ramp(1000));
        s.looping = Some(LoopRegion { start: 200, end: 300, pingpong: false, passes: None });
        let id = mixer.start(s);
        mixer.advance(48000);
        assert!(mixer.take_ended().is_empty());
        let pos = mixer.position(id).unwrap();
        assert!((200..300).contains(&pos));
    }

    #[test]
    fn pingpong_reverses_at_loop_end() {
        let mut mixer = SoftwareMixer::new(48000);
        let mut s = spec(ramp(1000));
        s.looping = Some(LoopRegion { start: 0, end: 100, pingpong: true, passes: None });
        let id = mixer.start(s);
        mixer.advance(130);
        assert_eq!(mixer.position(id), Some(70));
    }

    #[test]
    fn release_fades_then_drops_without_reporting_end() {
        let mut mixer = SoftwareMixer::new(48000);
        let id = mixer.start(spec(ramp(48000)));
        mixer.advance(10);
        assert!(mixer.release(id, 64));
        assert_eq!(mixer.position(id), None);
        mixer.advance(128);
        assert_eq!(mixer.active_sources(), 0);
        assert!(mixer.take_ended().is_empty());
        assert!(!mixer.release(id, 64));
    }

    #[test]
    fn attack_ramps_from_silence_and_pan_splits_channels() {
        let mut mixer = SoftwareMixer::new(48000);
        let buffer = Arc::new(DecodedClip::new(vec![1.0; 100], 1, 48000));
        let mut s = spec(buffer);
        s.attack_frames = 4;
        s.pan = -1.0;
        mixer.start(s);
        let mut out = vec![0.0; 16];
        mixer.render(&mut out);
        assert_eq!(out[0], 0.0);
        assert!(out[2] > 0.0 && out[2] < out[6]);
        assert!(out[7].abs() < 1e-6);
        assert!((out[14] - 1.0).abs() < 1e-6);
    }
}
