//! Session task: drives a [`SessionController`] on its own thread.
//!
//! The task owns everything that is not `Send` (the cpal output stream) and
//! everything time-based: the 20ms mix clock, the discussion countdown and
//! the post-game restart window. Decodes run on the blocking pool and come
//! back through a `JoinSet`. After every wakeup the controller's state is
//! published to the shared [`State`] and the UI is asked to repaint.

use api::OutboundEvent;
use std::{
    future::pending,
    pin::Pin,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};
use tokio::{
    sync::mpsc,
    task::JoinSet,
    time::{Instant, Interval, MissedTickBehavior, Sleep, interval, interval_at, sleep},
};
use tracing::{debug, error, info, warn};

use crate::{
    audio::AudioSystem,
    decoder::{AudioChunkDecoder, DecodeError, DecodedBuffer},
    events::{Command, State},
    handle::{OutputSelection, TransportLink},
    playback_queue::ChunkTicket,
    session::{Effect, SessionConfig, SessionController},
};

/// Mix clock period (one frame).
const MIX_INTERVAL: Duration = Duration::from_millis(20);

const DISCUSSION_TICK: Duration = Duration::from_secs(1);

type DecodeResult = (ChunkTicket, Result<DecodedBuffer, DecodeError>);

pub(crate) struct SessionTaskConfig {
    pub state: Arc<RwLock<State>>,
    pub repaint: Arc<dyn Fn() + Send + Sync>,
    pub session: SessionConfig,
    pub output: OutputSelection,
    pub transport: TransportLink,
}

/// Spawn the session task on a dedicated thread.
///
/// The task runs a current-thread runtime so the controller is only ever
/// touched from one thread.
pub(crate) fn spawn_session_task(
    command_rx: mpsc::UnboundedReceiver<Command>,
    config: SessionTaskConfig,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                error!("session: failed to create runtime: {}", e);
                return;
            }
        };
        rt.block_on(run_session_task(command_rx, config));
    })
}

/// Work in flight on behalf of the controller.
struct Pending {
    outbound: mpsc::UnboundedSender<OutboundEvent>,
    decoder: AudioChunkDecoder,
    decodes: JoinSet<DecodeResult>,
    discussion: Option<(u64, Interval)>,
    restart: Option<(u64, Pin<Box<Sleep>>)>,
}

impl Pending {
    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Emit(event) => {
                    debug!(event = event.name(), "session: emitting");
                    if self.outbound.send(event).is_err() {
                        warn!("session: transport closed, outbound event dropped");
                    }
                }
                Effect::Decode { ticket, chunk } => {
                    let decoder = self.decoder;
                    self.decodes
                        .spawn(async move { (ticket, decoder.decode(chunk).await) });
                }
                Effect::StartDiscussionTimer { generation } => {
                    let mut timer = interval_at(Instant::now() + DISCUSSION_TICK, DISCUSSION_TICK);
                    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.discussion = Some((generation, timer));
                }
                Effect::StopDiscussionTimer => self.discussion = None,
                Effect::ScheduleRestart { generation, delay } => {
                    self.restart = Some((generation, Box::pin(sleep(delay))));
                }
                Effect::CancelRestart => self.restart = None,
            }
        }
    }
}

async fn next_discussion_tick(timer: &mut Option<(u64, Interval)>) -> u64 {
    match timer {
        Some((generation, interval)) => {
            interval.tick().await;
            *generation
        }
        None => pending().await,
    }
}

async fn restart_elapsed(window: &mut Option<(u64, Pin<Box<Sleep>>)>) -> u64 {
    match window {
        Some((generation, sleep)) => {
            sleep.as_mut().await;
            *generation
        }
        None => pending().await,
    }
}

/// Main session loop.
async fn run_session_task(
    mut command_rx: mpsc::UnboundedReceiver<Command>,
    config: SessionTaskConfig,
) {
    let SessionTaskConfig {
        state,
        repaint,
        session,
        output,
        transport,
    } = config;
    let TransportLink {
        inbound: mut transport_rx,
        outbound,
    } = transport;

    let mut controller = SessionController::new(session);
    let mut pending_work = Pending {
        outbound,
        decoder: AudioChunkDecoder::new(controller.engine().sample_rate()),
        decodes: JoinSet::new(),
        discussion: None,
        restart: None,
    };

    // cpal handles are not Send, so the audio system lives on this thread.
    let mut audio_system: Option<AudioSystem> = None;
    let mut selected_output: Option<String> = None;
    match output {
        OutputSelection::Default => {
            open_output(&mut controller, &mut audio_system, None);
        }
        OutputSelection::Device(id) => {
            open_output(&mut controller, &mut audio_system, Some(&id));
            selected_output = Some(id);
        }
        OutputSelection::Custom(factory) => controller.replace_sink(Some(factory.create())),
        OutputSelection::Disabled => info!("session: audio output disabled"),
    }
    if let Some(system) = &audio_system {
        controller.set_output_devices(system.list_output_devices(), selected_output.clone());
    }

    let mut mix_interval = interval(MIX_INTERVAL);
    mix_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut transport_open = true;

    info!("session: task started");
    publish(&mut controller, &state, repaint.as_ref());

    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                None | Some(Command::Shutdown) => {
                    info!("session: shutting down");
                    break;
                }
                Some(Command::RefreshAudioDevices) => {
                    let system = audio_system.get_or_insert_with(AudioSystem::new);
                    let devices = system.list_output_devices();
                    controller.set_output_devices(devices, selected_output.clone());
                }
                Some(Command::SetOutputDevice { device_id }) => {
                    open_output(&mut controller, &mut audio_system, device_id.as_deref());
                    selected_output = device_id;
                    if let Some(system) = &audio_system {
                        let devices = system.list_output_devices();
                        controller.set_output_devices(devices, selected_output.clone());
                    }
                }
                Some(command) => {
                    let effects = controller.handle_command(command);
                    pending_work.apply(effects);
                }
            },

            event = transport_rx.recv(), if transport_open => match event {
                Some(event) => {
                    let effects = controller.handle_transport(event);
                    pending_work.apply(effects);
                }
                None => {
                    transport_open = false;
                    if controller.state().connection.is_connected() {
                        let effects =
                            controller.handle_transport(api::TransportEvent::Disconnected);
                        pending_work.apply(effects);
                    }
                    debug!("session: transport channel closed");
                }
            },

            Some(joined) = pending_work.decodes.join_next(),
                if !pending_work.decodes.is_empty() =>
            {
                match joined {
                    Ok((ticket, result)) => controller.handle_decoded(ticket, result),
                    Err(e) => error!("session: decode task failed: {}", e),
                }
            }

            _ = mix_interval.tick() => controller.pump_audio(),

            generation = next_discussion_tick(&mut pending_work.discussion) => {
                let effects = controller.discussion_tick(generation);
                pending_work.apply(effects);
            }

            generation = restart_elapsed(&mut pending_work.restart) => {
                pending_work.restart = None;
                controller.restart_window_elapsed(generation);
            }
        }

        publish(&mut controller, &state, repaint.as_ref());
    }

    pending_work.decodes.abort_all();
}

/// Open an output device and hand it to the controller.
fn open_output(
    controller: &mut SessionController,
    audio_system: &mut Option<AudioSystem>,
    device_id: Option<&str>,
) {
    let system = audio_system.get_or_insert_with(AudioSystem::new);
    match system.open_output(device_id) {
        Ok(output) => controller.replace_sink(Some(Box::new(output))),
        Err(e) => controller.audio_unavailable(&e),
    }
}

/// Copy the controller's state out if it changed.
fn publish(
    controller: &mut SessionController,
    state: &RwLock<State>,
    repaint: &(dyn Fn() + Send + Sync),
) {
    if !controller.take_dirty() {
        return;
    }
    {
        let mut shared = state.write().unwrap_or_else(PoisonError::into_inner);
        *shared = controller.state().clone();
    }
    repaint();
}
