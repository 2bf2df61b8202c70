//! Per-speaker playback ordering.
//!
//! Chunks for one speaker may finish decoding in any order, but must play in
//! the order they arrived. Each arrival reserves a slot keyed by a
//! per-speaker sequence number; the slot is filled when its decode finishes
//! (or marked failed). Playback always advances from the lowest outstanding
//! slot, so a late decode holds back everything behind it and a failed one is
//! skipped without stalling the speaker.

use api::SpeakerId;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

use crate::decoder::DecodedBuffer;

/// Position of one chunk in its speaker's playback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkTicket {
    pub speaker: SpeakerId,
    pub seq: u64,
}

#[derive(Debug)]
enum Slot {
    /// Still decoding; playback waits here.
    Decoding,
    Ready(DecodedBuffer),
    /// Decode failed; skipped when reached.
    Failed,
}

/// Ordered slots for one speaker.
#[derive(Debug, Default)]
struct SpeakerQueue {
    /// Slots by sequence number. BTreeMap keeps them in play order.
    slots: BTreeMap<u64, Slot>,
    /// Sequence number handed to the next arrival.
    next_seq: u64,
    /// Next sequence number to play.
    play_seq: u64,
    /// Whether a buffer from this speaker is rendering.
    playing: bool,
}

impl SpeakerQueue {
    fn reserve(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.insert(seq, Slot::Decoding);
        seq
    }

    /// Pop the next playable buffer, skipping failed slots.
    ///
    /// Returns `None` if the queue is empty or its head is still decoding.
    fn pop_ready(&mut self) -> Option<DecodedBuffer> {
        loop {
            match self.slots.get(&self.play_seq) {
                Some(Slot::Ready(_)) => {
                    let Some(Slot::Ready(buffer)) = self.slots.remove(&self.play_seq) else {
                        return None;
                    };
                    self.play_seq += 1;
                    return Some(buffer);
                }
                Some(Slot::Failed) => {
                    trace!(seq = self.play_seq, "playback: skipping failed chunk");
                    self.slots.remove(&self.play_seq);
                    self.play_seq += 1;
                }
                Some(Slot::Decoding) | None => return None,
            }
        }
    }
}

/// Registry of per-speaker queues.
#[derive(Debug, Default)]
pub struct SpeakerQueues {
    speakers: HashMap<SpeakerId, SpeakerQueue>,
}

impl SpeakerQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next playback position for a newly arrived chunk.
    pub fn reserve(&mut self, speaker: SpeakerId) -> ChunkTicket {
        let seq = self.speakers.entry(speaker).or_default().reserve();
        trace!(speaker = speaker.get(), seq, "playback: reserved slot");
        ChunkTicket { speaker, seq }
    }

    /// Fill a reserved slot with its decoded buffer.
    ///
    /// If the speaker is idle and this makes the head playable, the head
    /// buffer is returned and the speaker is marked playing; the caller must
    /// start rendering it.
    pub fn enqueue(&mut self, ticket: ChunkTicket, buffer: DecodedBuffer) -> Option<DecodedBuffer> {
        let queue = self.speakers.entry(ticket.speaker).or_default();
        if ticket.seq < queue.play_seq {
            debug!(
                speaker = ticket.speaker.get(),
                seq = ticket.seq,
                "playback: ignoring buffer for a slot already passed"
            );
            return None;
        }
        queue.slots.insert(ticket.seq, Slot::Ready(buffer));
        Self::start_if_idle(ticket.speaker, queue)
    }

    /// Mark a reserved slot as failed so playback skips over it.
    ///
    /// Like [`enqueue`](Self::enqueue), returns a buffer to start if the
    /// failure unblocked an idle speaker.
    pub fn abandon(&mut self, ticket: ChunkTicket) -> Option<DecodedBuffer> {
        let queue = self.speakers.entry(ticket.speaker).or_default();
        if ticket.seq < queue.play_seq {
            return None;
        }
        queue.slots.insert(ticket.seq, Slot::Failed);
        Self::start_if_idle(ticket.speaker, queue)
    }

    /// Reserve and fill in one step, for buffers that are already decoded.
    pub fn push(&mut self, speaker: SpeakerId, buffer: DecodedBuffer) -> Option<DecodedBuffer> {
        let ticket = self.reserve(speaker);
        self.enqueue(ticket, buffer)
    }

    /// The speaker's current buffer finished rendering.
    ///
    /// Returns the next buffer to render. `None` means the speaker is now
    /// idle (nothing playable yet), and the caller should report that it
    /// stopped speaking.
    pub fn on_playback_finished(&mut self, speaker: SpeakerId) -> Option<DecodedBuffer> {
        let queue = self.speakers.get_mut(&speaker)?;
        let next = queue.pop_ready();
        queue.playing = next.is_some();
        if next.is_none() {
            trace!(speaker = speaker.get(), "playback: speaker idle");
        }
        next
    }

    fn start_if_idle(speaker: SpeakerId, queue: &mut SpeakerQueue) -> Option<DecodedBuffer> {
        if queue.playing {
            return None;
        }
        let next = queue.pop_ready()?;
        queue.playing = true;
        trace!(speaker = speaker.get(), "playback: speaker started");
        Some(next)
    }

    /// Drop every queued buffer and mark all speakers idle.
    ///
    /// Tickets handed out before the call are treated as already passed, so
    /// decodes still in flight are discarded when they finish.
    pub fn clear(&mut self) {
        for (speaker, queue) in &mut self.speakers {
            if !queue.slots.is_empty() {
                debug!(
                    speaker = speaker.get(),
                    dropped = queue.slots.len(),
                    "playback: discarding queued chunks"
                );
            }
            queue.slots.clear();
            queue.play_seq = queue.next_seq;
            queue.playing = false;
        }
    }

    #[cfg(test)]
    pub fn is_playing(&self, speaker: SpeakerId) -> bool {
        self.speakers.get(&speaker).is_some_and(|q| q.playing)
    }

    /// Slots waiting behind the current buffer (decoding, ready or failed).
    pub fn pending_len(&self, speaker: SpeakerId) -> usize {
        self.speakers.get(&speaker).map_or(0, |q| q.slots.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(speaker: u32, marker: f32) -> DecodedBuffer {
        DecodedBuffer::new(SpeakerId(speaker), 48000, vec![marker; 4])
    }

    fn marker(buffer: &DecodedBuffer) -> f32 {
        buffer.samples()[0]
    }

    #[test]
    fn test_first_buffer_starts_immediately() {
        let mut queues = SpeakerQueues::new();
        let started = queues.push(SpeakerId(1), buf(1, 1.0));
        assert_eq!(started.map(|b| marker(&b)), Some(1.0));
        assert!(queues.is_playing(SpeakerId(1)));

        // Second one waits behind the first.
        assert!(queues.push(SpeakerId(1), buf(1, 2.0)).is_none());
        assert_eq!(queues.pending_len(SpeakerId(1)), 1);

        let next = queues.on_playback_finished(SpeakerId(1));
        assert_eq!(next.map(|b| marker(&b)), Some(2.0));
        assert!(queues.on_playback_finished(SpeakerId(1)).is_none());
        assert!(!queues.is_playing(SpeakerId(1)));
    }

    #[test]
    fn test_out_of_order_decode_keeps_arrival_order() {
        let mut queues = SpeakerQueues::new();
        let c1 = queues.reserve(SpeakerId(2));
        let c2 = queues.reserve(SpeakerId(2));

        // C2 finishes first but must not play before C1.
        assert!(queues.enqueue(c2, buf(2, 2.0)).is_none());
        assert!(!queues.is_playing(SpeakerId(2)));

        let started = queues.enqueue(c1, buf(2, 1.0));
        assert_eq!(started.map(|b| marker(&b)), Some(1.0));
        let next = queues.on_playback_finished(SpeakerId(2));
        assert_eq!(next.map(|b| marker(&b)), Some(2.0));
    }

    #[test]
    fn test_failed_decode_does_not_stall() {
        let mut queues = SpeakerQueues::new();
        let c1 = queues.reserve(SpeakerId(3));
        let c2 = queues.reserve(SpeakerId(3));
        let c3 = queues.reserve(SpeakerId(3));

        assert!(queues.enqueue(c3, buf(3, 3.0)).is_none());
        assert!(queues.enqueue(c2, buf(3, 2.0)).is_none());

        let started = queues.abandon(c1);
        assert_eq!(started.map(|b| marker(&b)), Some(2.0));
        assert_eq!(
            queues.on_playback_finished(SpeakerId(3)).map(|b| marker(&b)),
            Some(3.0)
        );
    }

    #[test]
    fn test_speakers_are_independent() {
        let mut queues = SpeakerQueues::new();
        assert!(queues.push(SpeakerId(1), buf(1, 1.0)).is_some());
        // Speaker 2 starts even though speaker 1 is mid-playback.
        assert!(queues.push(SpeakerId(2), buf(2, 1.0)).is_some());
        assert!(queues.is_playing(SpeakerId(1)));
        assert!(queues.is_playing(SpeakerId(2)));
    }

    #[test]
    fn test_finished_for_unknown_speaker_is_noop() {
        let mut queues = SpeakerQueues::new();
        assert!(queues.on_playback_finished(SpeakerId(9)).is_none());
        assert_eq!(queues.pending_len(SpeakerId(9)), 0);
    }

    #[test]
    fn test_long_run_of_failures_is_skipped_iteratively() {
        let mut queues = SpeakerQueues::new();
        let tickets: Vec<_> = (0..10_000).map(|_| queues.reserve(SpeakerId(4))).collect();
        let last = queues.reserve(SpeakerId(4));
        for t in &tickets[1..] {
            assert!(queues.abandon(*t).is_none());
        }
        assert!(queues.enqueue(last, buf(4, 7.0)).is_none());
        let started = queues.abandon(tickets[0]);
        assert_eq!(started.map(|b| marker(&b)), Some(7.0));
        assert_eq!(queues.pending_len(SpeakerId(4)), 0);
    }

    #[test]
    fn test_clear_discards_queued_and_in_flight_chunks() {
        let mut queues = SpeakerQueues::new();
        assert!(queues.push(SpeakerId(1), buf(1, 1.0)).is_some());
        let queued = queues.reserve(SpeakerId(1));
        assert!(queues.enqueue(queued, buf(1, 2.0)).is_none());
        let in_flight = queues.reserve(SpeakerId(1));

        queues.clear();
        assert!(!queues.is_playing(SpeakerId(1)));
        assert_eq!(queues.pending_len(SpeakerId(1)), 0);

        // The decode that was running when the queues were cleared is stale.
        assert!(queues.enqueue(in_flight, buf(1, 3.0)).is_none());
        assert_eq!(queues.pending_len(SpeakerId(1)), 0);

        // New arrivals start straight away.
        let started = queues.push(SpeakerId(1), buf(1, 4.0));
        assert_eq!(started.map(|b| marker(&b)), Some(4.0));
    }
}
