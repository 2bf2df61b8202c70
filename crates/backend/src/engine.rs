//! Playback engine: speaker queues wired to the mixer.
//!
//! The engine is driven from the session loop. Arrivals reserve a ticket,
//! decode completions fill it, and [`PlaybackEngine::pump`] keeps the output
//! sink topped up. Speaking start/stop transitions are collected as
//! [`PlaybackEvent`]s for the presentation state.

use api::SpeakerId;
use std::collections::BTreeSet;
use tracing::{debug, trace};

use crate::{
    audio::{FRAME_SIZE, SAMPLE_RATE},
    decoder::{DecodeError, DecodedBuffer},
    mixer::{DEFAULT_GAIN_TIME_CONSTANT, GainControl, OutputSink, PlaybackMixer},
    playback_queue::{ChunkTicket, SpeakerQueues},
};

/// Samples kept queued in the sink ahead of the device (60ms).
pub const TARGET_BUFFERED_SAMPLES: usize = FRAME_SIZE * 3;

/// Upper bound on frames mixed in one pump, so a stalled sink cannot spin the
/// session loop.
const MAX_FRAMES_PER_PUMP: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started(SpeakerId),
    Stopped(SpeakerId),
}

pub struct PlaybackEngine {
    queues: SpeakerQueues,
    mixer: PlaybackMixer,
    frame: Vec<f32>,
    target_buffered: usize,
    speaking: BTreeSet<SpeakerId>,
    events: Vec<PlaybackEvent>,
}

impl Default for PlaybackEngine {
    fn default() -> Self {
        Self::new(DEFAULT_GAIN_TIME_CONSTANT, 1.0)
    }
}

impl PlaybackEngine {
    pub fn new(gain_time_constant: f32, default_volume: f32) -> Self {
        Self {
            queues: SpeakerQueues::new(),
            mixer: PlaybackMixer::new(SAMPLE_RATE, gain_time_constant, default_volume),
            frame: vec![0.0; FRAME_SIZE],
            target_buffered: TARGET_BUFFERED_SAMPLES,
            speaking: BTreeSet::new(),
            events: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.mixer.sample_rate()
    }

    pub fn has_sink(&self) -> bool {
        self.mixer.has_sink()
    }

    /// Swap the output sink.
    ///
    /// Switching devices keeps playback going on the new sink. Losing the
    /// sink stops everything: queued audio is discarded and every speaker
    /// reports that it stopped.
    pub fn replace_sink(&mut self, sink: Option<Box<dyn OutputSink>>) {
        let lost = sink.is_none();
        self.mixer.replace_sink(sink);
        if lost {
            self.stop_all();
        }
    }

    /// Cut all playback and drop everything queued or still decoding.
    pub fn stop_all(&mut self) {
        self.queues.clear();
        self.mixer.stop_all();
        for speaker in std::mem::take(&mut self.speaking) {
            debug!(speaker = speaker.get(), "playback: speaker stopped");
            self.events.push(PlaybackEvent::Stopped(speaker));
        }
    }

    /// Reserve the playback position of a chunk that is about to be decoded.
    pub fn reserve(&mut self, speaker: SpeakerId) -> ChunkTicket {
        self.queues.reserve(speaker)
    }

    /// Record the outcome of a decode.
    ///
    /// A failure frees the reserved slot so later chunks still play, and is
    /// handed back to the caller for reporting.
    pub fn complete(
        &mut self,
        ticket: ChunkTicket,
        result: Result<DecodedBuffer, DecodeError>,
    ) -> Result<(), DecodeError> {
        match result {
            Ok(buffer) => {
                if let Some(next) = self.queues.enqueue(ticket, buffer) {
                    self.start(ticket.speaker, next);
                }
                Ok(())
            }
            Err(e) => {
                if let Some(next) = self.queues.abandon(ticket) {
                    self.start(ticket.speaker, next);
                }
                Err(e)
            }
        }
    }

    /// Queue an already decoded buffer behind the speaker's earlier audio.
    pub fn enqueue(&mut self, buffer: DecodedBuffer) {
        let speaker = buffer.speaker();
        if let Some(next) = self.queues.push(speaker, buffer) {
            self.start(speaker, next);
        }
    }

    fn start(&mut self, speaker: SpeakerId, buffer: DecodedBuffer) {
        debug!(
            speaker = speaker.get(),
            samples = buffer.len(),
            duration_ms = buffer.duration().as_millis() as u64,
            "playback: speaker started"
        );
        self.mixer.render(speaker, buffer);
        if self.speaking.insert(speaker) {
            self.events.push(PlaybackEvent::Started(speaker));
        }
    }

    pub fn set_volume(&mut self, speaker: SpeakerId, volume: f32) -> f32 {
        self.mixer.set_volume(speaker, volume)
    }

    pub fn volume(&self, speaker: SpeakerId) -> Option<f32> {
        self.mixer.volume(speaker)
    }

    pub fn gain(&self, speaker: SpeakerId) -> Option<&GainControl> {
        self.mixer.gain(speaker)
    }

    /// Mix frames into the sink until it holds the target latency.
    ///
    /// Returns the number of frames mixed.
    pub fn pump(&mut self) -> usize {
        let mut frames = 0;
        while frames < MAX_FRAMES_PER_PUMP && self.mixer.is_active() {
            match self.mixer.buffered_samples() {
                Some(buffered) if buffered < self.target_buffered => {}
                _ => break,
            }

            let Self {
                queues,
                mixer,
                frame,
                speaking,
                events,
                ..
            } = self;
            mixer.mix_to_sink(frame, |speaker| {
                let next = queues.on_playback_finished(speaker);
                if next.is_none() && speaking.remove(&speaker) {
                    debug!(speaker = speaker.get(), "playback: speaker stopped");
                    events.push(PlaybackEvent::Stopped(speaker));
                }
                next
            });
            frames += 1;
        }
        if frames > 0 {
            trace!(frames, "playback: pumped frames");
        }
        frames
    }

    /// Take the speaking transitions since the last call.
    pub fn drain_events(&mut self) -> Vec<PlaybackEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn is_speaking(&self, speaker: SpeakerId) -> bool {
        self.speaking.contains(&speaker)
    }

    pub fn speaking(&self) -> &BTreeSet<SpeakerId> {
        &self.speaking
    }

    /// Slots for `speaker` not yet handed to the mixer.
    pub fn pending_len(&self, speaker: SpeakerId) -> usize {
        self.queues.pending_len(speaker)
    }
}
