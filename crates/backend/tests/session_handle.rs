//! End-to-end tests of `SessionHandle`.
//!
//! The handle runs its own session thread. These tests stand in for the
//! transport through a `TransportPeer` and read results back from the shared
//! state and an in-memory sink.

use std::{
    io::Cursor,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use api::{
    AudioChunk, GameState, InboundEvent, OutboundEvent, PlayerInfo, SpeakerId, TransportEvent,
};
use backend::{
    Command, InputSurface, OutputSelection, OutputSink, SAMPLE_RATE, Screen, SessionConfig,
    SessionHandle, SinkFactory, StartLabel, State, TransportPeer, transport_pair,
};
use base64::{Engine as _, engine::general_purpose};

/// Sink shared with the test thread.
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<f32>>>);

impl OutputSink for SharedSink {
    fn queue_samples(&self, samples: &[f32]) {
        self.0.lock().unwrap().extend_from_slice(samples);
    }

    fn buffered_samples(&self) -> usize {
        0
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

struct Harness {
    handle: SessionHandle,
    peer: TransportPeer,
    sink: SharedSink,
    repainted: Arc<AtomicBool>,
}

impl Harness {
    fn new(config: SessionConfig) -> Self {
        let (link, peer) = transport_pair();
        let sink = SharedSink::default();
        let sink_for_session = sink.clone();
        let repainted = Arc::new(AtomicBool::new(false));
        let repainted_clone = repainted.clone();

        let handle = SessionHandle::new(
            link,
            config,
            OutputSelection::Custom(SinkFactory::new(move || {
                Box::new(sink_for_session) as Box<dyn OutputSink>
            })),
            move || repainted_clone.store(true, Ordering::SeqCst),
        );
        Self {
            handle,
            peer,
            sink,
            repainted,
        }
    }

    fn deliver(&self, event: TransportEvent) {
        self.peer.inbound.send(event).unwrap();
    }

    fn server(&self, event: InboundEvent) {
        self.deliver(TransportEvent::Event(event));
    }

    async fn next_outbound(&mut self) -> OutboundEvent {
        tokio::time::timeout(Duration::from_secs(5), self.peer.outbound.recv())
            .await
            .expect("timed out waiting for outbound event")
            .expect("session closed the transport")
    }

    /// Wait for a condition to become true, polling state periodically.
    async fn wait_for<F>(&self, condition: F) -> bool
    where
        F: Fn(&State) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            if condition(&self.handle.state()) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

fn roster() -> GameState {
    GameState {
        players: (1..=7)
            .map(|id| PlayerInfo {
                id: SpeakerId(id),
                nickname: format!("Player{}", id),
                is_alive: id != 5,
                is_human: id == 3,
                color: None,
            })
            .collect(),
        human_id: Some(SpeakerId(3)),
        discussion_time: Some(2),
        ..Default::default()
    }
}

fn wav_chunk(speaker: u32, frames: usize) -> AudioChunk {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for _ in 0..frames {
            writer.write_sample(12000i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    AudioChunk {
        speaker: SpeakerId(speaker),
        payload: general_purpose::STANDARD.encode(cursor.into_inner()),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_start_and_vote_round_trip() {
    let mut h = Harness::new(SessionConfig::default());

    h.deliver(TransportEvent::Connected);
    assert!(h.wait_for(|s| s.can_start()).await);
    assert!(h.repainted.load(Ordering::SeqCst));
    assert!(h.handle.is_connected());

    h.handle.send(Command::StartGame { voice_enabled: true });
    assert_eq!(
        h.next_outbound().await,
        OutboundEvent::StartGame { voice_enabled: true }
    );

    h.server(InboundEvent::GameStarted);
    h.server(InboundEvent::GameState(roster()));
    h.server(InboundEvent::StartVoting);
    assert!(h.wait_for(|s| s.surface == InputSurface::Vote).await);

    // Rejected locally, nothing is sent.
    h.handle.send(Command::Submit { input: "3".to_string() });
    h.handle.send(Command::Submit { input: " 4 ".to_string() });
    assert_eq!(
        h.next_outbound().await,
        OutboundEvent::SendVote { target: SpeakerId(4) }
    );
    assert!(h.wait_for(|s| s.surface == InputSurface::None).await);
}

#[tokio::test]
async fn test_audio_chunk_reaches_sink() {
    let h = Harness::new(SessionConfig::default());
    h.deliver(TransportEvent::Connected);
    assert!(h.wait_for(|s| s.audio_available).await);

    h.server(InboundEvent::PlayAudioChunk(wav_chunk(2, 2400)));
    assert!(h.wait_for(|s| s.speaking.contains(&SpeakerId(2))).await);
    assert!(h.wait_for(|s| s.speaking.is_empty()).await);

    let samples = h.sink.0.lock().unwrap();
    assert!(samples.len() >= 2400);
    assert!(samples[..2400].iter().all(|&s| s > 0.3));
}

#[tokio::test]
async fn test_discussion_countdown_and_clear() {
    let h = Harness::new(SessionConfig::default());
    h.deliver(TransportEvent::Connected);
    h.server(InboundEvent::GameState(roster()));
    h.server(InboundEvent::StartDiscussion);

    assert!(h.wait_for(|s| s.discussion_remaining == Some(2)).await);
    assert!(h.wait_for(|s| s.discussion_remaining == Some(1)).await);

    h.server(InboundEvent::DiscussionEnded);
    assert!(
        h.wait_for(|s| s.discussion_remaining.is_none() && s.surface == InputSurface::None)
            .await
    );
}

#[tokio::test]
async fn test_restart_window_returns_to_pregame() {
    let mut h = Harness::new(SessionConfig {
        restart_delay: Duration::from_millis(100),
        ..Default::default()
    });
    h.deliver(TransportEvent::Connected);
    assert!(h.wait_for(|s| s.can_start()).await);
    h.handle.send(Command::StartGame { voice_enabled: false });
    h.next_outbound().await;

    h.server(InboundEvent::GameStarted);
    h.server(InboundEvent::GameEnd {
        winner: "Villagers".to_string(),
    });
    assert!(h.wait_for(|s| s.alert.is_some()).await);
    assert!(
        h.wait_for(|s| s.screen == Screen::PreGame && s.start_label == StartLabel::PlayAgain)
            .await
    );

    h.handle.send(Command::DismissAlert);
    assert!(h.wait_for(|s| s.alert.is_none() && s.can_start()).await);
}

#[tokio::test]
async fn test_closed_transport_reports_disconnect() {
    let h = Harness::new(SessionConfig::default());
    h.deliver(TransportEvent::Connected);
    assert!(h.wait_for(|s| s.connection.is_connected()).await);

    let Harness { handle, peer, .. } = h;
    drop(peer);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while handle.is_connected() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!handle.is_connected());
    assert!(!handle.state().can_start());
}
