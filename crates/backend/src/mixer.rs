//! Per-speaker gain channels feeding one shared output sink.
//!
//! Each speaker gets a [`Channel`] the first time it plays or has its volume
//! set. A channel holds a smoothed [`GainControl`] and at most one buffer
//! being rendered. [`PlaybackMixer::mix_frame`] sums every rendering channel
//! into one mono frame.

use api::SpeakerId;
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

use crate::decoder::DecodedBuffer;

/// Lowest allowed channel gain.
pub const MIN_GAIN: f32 = 0.0;

/// Highest allowed channel gain.
pub const MAX_GAIN: f32 = 1.5;

/// Default time constant of the gain ramp, in seconds.
pub const DEFAULT_GAIN_TIME_CONSTANT: f32 = 0.01;

/// Below this distance from the target the gain snaps to it.
const GAIN_SNAP_EPSILON: f32 = 1e-4;

/// Destination for mixed mono samples.
///
/// Implemented by the cpal device output and by in-memory sinks in tests.
pub trait OutputSink {
    /// Append mixed samples to the sink.
    fn queue_samples(&self, samples: &[f32]);

    /// Samples queued but not yet played.
    fn buffered_samples(&self) -> usize;

    fn sample_rate(&self) -> u32;
}

/// Per-speaker volume, ramped towards its target one sample at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct GainControl {
    current: f32,
    target: f32,
    /// Fraction of the remaining distance covered per sample.
    coeff: f32,
}

impl GainControl {
    pub fn new(value: f32, time_constant_secs: f32, sample_rate: u32) -> Self {
        let value = clamp_gain(value);
        let samples = (time_constant_secs * sample_rate as f32).max(1.0);
        Self {
            current: value,
            target: value,
            coeff: 1.0 - (-1.0 / samples).exp(),
        }
    }

    /// Set the value to ramp towards.
    pub fn set_target(&mut self, value: f32) {
        self.target = clamp_gain(value);
    }

    /// Jump straight to `value` without ramping.
    pub fn reset(&mut self, value: f32) {
        let value = clamp_gain(value);
        self.current = value;
        self.target = value;
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }

    /// Advance one sample and return the gain to apply to it.
    fn next_sample(&mut self) -> f32 {
        if self.current != self.target {
            self.current += (self.target - self.current) * self.coeff;
            if (self.target - self.current).abs() < GAIN_SNAP_EPSILON {
                self.current = self.target;
            }
        }
        self.current
    }

    /// Finish the ramp. Used while the channel is silent.
    fn settle(&mut self) {
        self.current = self.target;
    }
}

fn clamp_gain(value: f32) -> f32 {
    if value.is_nan() {
        return 1.0;
    }
    value.clamp(MIN_GAIN, MAX_GAIN)
}

#[derive(Debug)]
struct Voice {
    buffer: DecodedBuffer,
    position: usize,
}

/// One speaker's path into the mix.
#[derive(Debug)]
struct Channel {
    gain: GainControl,
    voice: Option<Voice>,
}

/// Mixes per-speaker channels into the shared output sink.
pub struct PlaybackMixer {
    sink: Option<Box<dyn OutputSink>>,
    channels: BTreeMap<SpeakerId, Channel>,
    sample_rate: u32,
    time_constant: f32,
    default_volume: f32,
}

impl PlaybackMixer {
    pub fn new(sample_rate: u32, time_constant: f32, default_volume: f32) -> Self {
        Self {
            sink: None,
            channels: BTreeMap::new(),
            sample_rate,
            time_constant,
            default_volume: clamp_gain(default_volume),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The gain control for `speaker`, creating the channel on first use.
    pub fn get_or_create_channel(&mut self, speaker: SpeakerId) -> &mut GainControl {
        let (sample_rate, time_constant, volume) =
            (self.sample_rate, self.time_constant, self.default_volume);
        &mut self
            .channels
            .entry(speaker)
            .or_insert_with(|| {
                debug!(speaker = speaker.get(), volume, "mixer: created channel");
                Channel {
                    gain: GainControl::new(volume, time_constant, sample_rate),
                    voice: None,
                }
            })
            .gain
    }

    /// Change a speaker's volume.
    ///
    /// A channel that exists ramps smoothly; a new channel starts at `value`.
    pub fn set_volume(&mut self, speaker: SpeakerId, value: f32) -> f32 {
        let existed = self.channels.contains_key(&speaker);
        let gain = self.get_or_create_channel(speaker);
        if existed {
            gain.set_target(value);
        } else {
            gain.reset(value);
        }
        gain.target()
    }

    /// Target volume of a speaker, if it has a channel.
    pub fn volume(&self, speaker: SpeakerId) -> Option<f32> {
        self.channels.get(&speaker).map(|c| c.gain.target())
    }

    pub fn gain(&self, speaker: SpeakerId) -> Option<&GainControl> {
        self.channels.get(&speaker).map(|c| &c.gain)
    }

    /// Start rendering `buffer` on the speaker's channel, replacing whatever
    /// it was rendering.
    pub fn render(&mut self, speaker: SpeakerId, buffer: DecodedBuffer) {
        if buffer.sample_rate() != self.sample_rate {
            warn!(
                speaker = speaker.get(),
                buffer_rate = buffer.sample_rate(),
                mixer_rate = self.sample_rate,
                "mixer: buffer sample rate does not match output"
            );
        }
        self.get_or_create_channel(speaker);
        if let Some(channel) = self.channels.get_mut(&speaker) {
            channel.voice = Some(Voice { buffer, position: 0 });
        }
    }

    pub fn is_rendering(&self, speaker: SpeakerId) -> bool {
        self.channels.get(&speaker).is_some_and(|c| c.voice.is_some())
    }

    /// Whether any channel has audio left to render.
    pub fn is_active(&self) -> bool {
        self.channels.values().any(|c| c.voice.is_some())
    }

    /// Cut every channel's voice. Volumes are kept.
    pub fn stop_all(&mut self) {
        for channel in self.channels.values_mut() {
            channel.voice = None;
        }
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// Swap the output sink. Rendering channels continue on the new one.
    pub fn replace_sink(&mut self, sink: Option<Box<dyn OutputSink>>) {
        if let Some(sink) = &sink
            && sink.sample_rate() != self.sample_rate
        {
            warn!(
                sink_rate = sink.sample_rate(),
                mixer_rate = self.sample_rate,
                "mixer: output sink runs at a different rate"
            );
        }
        self.sink = sink;
    }

    /// Samples waiting in the sink, or `None` without a sink.
    pub fn buffered_samples(&self) -> Option<usize> {
        self.sink.as_ref().map(|s| s.buffered_samples())
    }

    /// Mix one frame from every rendering channel into `out`.
    ///
    /// When a channel's buffer runs out, `on_finished` is asked for that
    /// speaker's next buffer and rendering continues within the same frame.
    /// `None` leaves the channel silent. Returns whether any channel
    /// contributed samples.
    pub fn mix_frame<F>(&mut self, out: &mut [f32], mut on_finished: F) -> bool
    where
        F: FnMut(SpeakerId) -> Option<DecodedBuffer>,
    {
        out.fill(0.0);
        let mut any = false;

        for (&speaker, channel) in self.channels.iter_mut() {
            let mut i = 0;
            while i < out.len() {
                let Some(voice) = channel.voice.as_mut() else {
                    break;
                };
                let samples = &voice.buffer.samples()[voice.position..];
                let n = samples.len().min(out.len() - i);
                for (dst, src) in out[i..i + n].iter_mut().zip(samples) {
                    *dst += src * channel.gain.next_sample();
                }
                any |= n > 0;
                voice.position += n;
                i += n;

                if voice.position >= voice.buffer.len() {
                    channel.voice =
                        on_finished(speaker).map(|buffer| Voice { buffer, position: 0 });
                }
            }
            if channel.voice.is_none() {
                channel.gain.settle();
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
        trace!(active = any, "mixer: mixed frame");
        any
    }

    /// Mix one frame and queue it to the sink.
    ///
    /// Without a sink nothing is rendered and `false` is returned.
    pub fn mix_to_sink<F>(&mut self, frame: &mut [f32], on_finished: F) -> bool
    where
        F: FnMut(SpeakerId) -> Option<DecodedBuffer>,
    {
        if self.sink.is_none() {
            return false;
        }
        let any = self.mix_frame(frame, on_finished);
        if let Some(sink) = &self.sink {
            sink.queue_samples(frame);
        }
        any
    }

    /// Target volume of every speaker with a channel.
    pub fn volumes(&self) -> BTreeMap<SpeakerId, f32> {
        self.channels
            .iter()
            .map(|(&id, c)| (id, c.gain.target()))
            .collect()
    }
}
