use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::chat::ChatSequencer;
use crate::config::Config;
use crate::drift;
use crate::error::RoomError;
use crate::playback::{Applied, PlaybackCommand, PlaybackMachine};
use crate::presence::PresenceTracker;
use crate::protocol::{now_unix_ms, ClientEvent, ErrorKind, ServerEvent};

const COMMAND_QUEUE: usize = 256;

pub type OutboundSender = mpsc::Sender<ServerEvent>;

/// Commands routed to a room's actor. All commands for one room apply
/// strictly in arrival order; different rooms never wait on each other.
pub enum RoomCommand {
    Join {
        participant_id: Uuid,
        display_name: String,
        sender: OutboundSender,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Leave {
        participant_id: Uuid,
    },
    Client {
        participant_id: Uuid,
        event: ClientEvent,
    },
}

#[derive(Clone)]
pub struct RoomHandle {
    pub tx: mpsc::Sender<RoomCommand>,
}

/// Immutable room metadata fixed at creation. The movie is resolved against
/// the catalog exactly once, at creation time; the sync core treats the
/// resulting URL and duration as opaque.
pub struct RoomInfo {
    pub id: String,
    pub creator_id: Uuid,
    pub movie_ref: String,
    pub playable_url: String,
    pub duration_secs: Option<f64>,
    pub private: bool,
    pub created_at_ms: u64,
}

#[derive(PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Single-writer owner of one room's playback state, roster, and chat tail.
/// Runs as one tokio task; its timers die with it, so a destroyed room
/// leaves nothing behind.
struct RoomActor {
    info: RoomInfo,
    capacity: usize,
    playback: PlaybackMachine,
    presence: PresenceTracker,
    chat: ChatSequencer,
    senders: HashMap<Uuid, OutboundSender>,
    rooms: Arc<DashMap<String, RoomHandle>>,
    rx: mpsc::Receiver<RoomCommand>,
    config: Config,
    created_at: Instant,
    ever_joined: bool,
}

/// Spawns the actor for a freshly created room and registers its handle.
pub fn spawn(
    info: RoomInfo,
    config: &Config,
    rooms: Arc<DashMap<String, RoomHandle>>,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    let handle = RoomHandle { tx };
    rooms.insert(info.id.clone(), handle.clone());

    tracing::info!(
        "Room {} created by {} for movie {} (private: {})",
        info.id,
        info.creator_id,
        info.movie_ref,
        info.private
    );
    tracing::debug!(
        "Room {}: source {} (duration {:?}, created at {})",
        info.id,
        info.playable_url,
        info.duration_secs,
        info.created_at_ms
    );

    let now = Instant::now();
    let actor = RoomActor {
        capacity: config.room_capacity,
        playback: PlaybackMachine::new(info.duration_secs, config.coalesce_window, now_unix_ms()),
        presence: PresenceTracker::new(config.heartbeat_timeout),
        chat: ChatSequencer::new(info.id.clone(), config.chat_tail),
        senders: HashMap::new(),
        rooms,
        rx,
        config: config.clone(),
        created_at: now,
        ever_joined: false,
        info,
    };
    tokio::spawn(actor.run());
    handle
}

impl RoomActor {
    async fn run(mut self) {
        let mut resync = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.resync_interval,
            self.config.resync_interval,
        );
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.sweep_interval,
            self.config.sweep_interval,
        );
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let flow = tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => Flow::Stop,
                },
                _ = resync.tick() => self.broadcast_resync(),
                _ = sweep.tick() => self.sweep(),
            };
            if flow == Flow::Stop {
                break;
            }
        }

        self.rooms.remove(&self.info.id);
        tracing::info!("Room {} closed", self.info.id);
    }

    fn handle(&mut self, cmd: RoomCommand) -> Flow {
        match cmd {
            RoomCommand::Join {
                participant_id,
                display_name,
                sender,
                reply,
            } => self.handle_join(participant_id, display_name, sender, reply),
            RoomCommand::Leave { participant_id } => self.handle_leave(participant_id),
            RoomCommand::Client {
                participant_id,
                event,
            } => self.handle_client(participant_id, event),
        }
    }

    fn handle_join(
        &mut self,
        participant_id: Uuid,
        display_name: String,
        sender: OutboundSender,
        reply: oneshot::Sender<Result<(), RoomError>>,
    ) -> Flow {
        let now = Instant::now();

        if !self.presence.contains(participant_id) && self.presence.len() >= self.capacity {
            let _ = reply.send(Err(RoomError::RoomFull));
            return Flow::Continue;
        }

        // A rejoining participant (reconnect) replaces its queue and keeps
        // its roster slot.
        if self.presence.contains(participant_id) {
            self.presence.heartbeat(participant_id, now);
        } else {
            self.presence
                .add_participant(participant_id, display_name, now, now_unix_ms());
            self.ever_joined = true;
        }

        let snapshot = ServerEvent::RoomSnapshot {
            playback: self.playback.resync_state(now_unix_ms()),
            roster: self.presence.roster(),
            chat_tail: self.chat.tail(),
        };
        // The joiner's queue is fresh; a failed send means the connection is
        // already gone.
        if sender.try_send(snapshot).is_err() {
            self.presence.remove_participant(participant_id);
            let _ = reply.send(Ok(()));
            return self.teardown_if_empty();
        }
        self.senders.insert(participant_id, sender);
        let _ = reply.send(Ok(()));

        tracing::info!(
            "Participant {} joined room {} ({} members)",
            participant_id,
            self.info.id,
            self.presence.len()
        );
        self.broadcast_roster()
    }

    fn handle_leave(&mut self, participant_id: Uuid) -> Flow {
        self.senders.remove(&participant_id);
        let removal = self.presence.remove_participant(participant_id);
        if !removal.removed {
            return Flow::Continue;
        }
        if let Some(new_host) = removal.new_host {
            tracing::info!("Room {}: host moved to {}", self.info.id, new_host);
        }
        tracing::info!(
            "Participant {} left room {} ({} remain)",
            participant_id,
            self.info.id,
            self.presence.len()
        );
        if self.presence.is_empty() {
            return Flow::Stop;
        }
        self.broadcast_roster()
    }

    fn handle_client(&mut self, participant_id: Uuid, event: ClientEvent) -> Flow {
        // Membership is checked at apply time, not send time: a command from
        // a participant who has since left is dropped, never an error.
        if !self.presence.contains(participant_id) {
            tracing::debug!(
                "Room {}: dropping command from stale participant {}",
                self.info.id,
                participant_id
            );
            return Flow::Continue;
        }

        match event {
            ClientEvent::Play { position, .. } => {
                self.apply_playback(PlaybackCommand::Play { position }, participant_id)
            }
            ClientEvent::Pause { position, .. } => {
                self.apply_playback(PlaybackCommand::Pause { position }, participant_id)
            }
            ClientEvent::Seek { position, .. } => {
                self.apply_playback(PlaybackCommand::Seek { position }, participant_id)
            }
            ClientEvent::ChatSend { text } => self.append_chat(participant_id, text),
            ClientEvent::Heartbeat => {
                self.presence.heartbeat(participant_id, Instant::now());
                Flow::Continue
            }
            ClientEvent::JoinRoom { .. } | ClientEvent::LeaveRoom => {
                tracing::warn!(
                    "Room {}: unexpected routed event from {}",
                    self.info.id,
                    participant_id
                );
                Flow::Continue
            }
        }
    }

    fn apply_playback(&mut self, command: PlaybackCommand, sender: Uuid) -> Flow {
        let wall_ms = now_unix_ms();

        let reported = match command {
            PlaybackCommand::Play { position }
            | PlaybackCommand::Pause { position }
            | PlaybackCommand::Seek { position } => position,
        };
        let observed = drift::drift(reported, &self.playback.resync_state(wall_ms), wall_ms);
        if drift::should_snap(observed, drift::SNAP_THRESHOLD_SECS) {
            tracing::debug!(
                "Room {}: {} reports a position {:+.2}s off the authoritative estimate",
                self.info.id,
                sender,
                observed
            );
        }

        let is_host = self.presence.is_host(sender);
        match self
            .playback
            .apply(command, sender, is_host, Instant::now(), wall_ms)
        {
            Applied::Accepted(playback) => {
                tracing::debug!(
                    "Room {}: playback rev {} -> {:?} @ {:.2}s (from {})",
                    self.info.id,
                    playback.revision,
                    playback.phase,
                    playback.position,
                    sender
                );
                self.broadcast(ServerEvent::PlaybackUpdate { playback })
            }
            Applied::Stale => {
                tracing::debug!(
                    "Room {}: command from {} coalesced away (host priority)",
                    self.info.id,
                    sender
                );
                Flow::Continue
            }
        }
    }

    fn append_chat(&mut self, participant_id: Uuid, text: String) -> Flow {
        match self.chat.append(participant_id, text, now_unix_ms()) {
            Ok(message) => self.broadcast(ServerEvent::ChatMessage { message }),
            Err(fault) => {
                // Fatal to this room only: surface the termination to every
                // member rather than continuing inconsistent.
                tracing::error!("Room {}: {}", self.info.id, fault);
                self.broadcast(ServerEvent::Error {
                    kind: ErrorKind::RoomTerminated,
                });
                Flow::Stop
            }
        }
    }

    fn broadcast_resync(&mut self) -> Flow {
        if self.presence.is_empty() {
            return Flow::Continue;
        }
        let playback = self.playback.resync_state(now_unix_ms());
        self.broadcast(ServerEvent::PlaybackResync { playback })
    }

    fn sweep(&mut self) -> Flow {
        // A room nobody ever claimed expires after the join grace period.
        if !self.ever_joined {
            if self.created_at.elapsed() > self.config.heartbeat_timeout {
                tracing::info!("Room {} expired unclaimed", self.info.id);
                return Flow::Stop;
            }
            return Flow::Continue;
        }

        let removed = self.presence.sweep_timeouts(Instant::now());
        if removed.is_empty() {
            return Flow::Continue;
        }
        for id in &removed {
            // Dropping the sender severs the participant's connection.
            self.senders.remove(id);
            tracing::info!("Participant {} timed out of room {}", id, self.info.id);
        }
        if self.presence.is_empty() {
            return Flow::Stop;
        }
        self.broadcast_roster()
    }

    fn broadcast_roster(&mut self) -> Flow {
        self.broadcast(ServerEvent::RosterUpdate {
            roster: self.presence.roster(),
        })
    }

    /// Pushes an event to every member's bounded queue in apply order. A full
    /// queue means a client too slow to keep up; it is dropped like a
    /// disconnect rather than ever stalling the room, and the resulting
    /// roster change is itself broadcast.
    fn broadcast(&mut self, event: ServerEvent) -> Flow {
        let mut event = event;
        loop {
            let mut dropped: Vec<Uuid> = Vec::new();
            for (id, sender) in &self.senders {
                if sender.try_send(event.clone()).is_err() {
                    dropped.push(*id);
                }
            }
            if dropped.is_empty() {
                return Flow::Continue;
            }
            for id in &dropped {
                tracing::warn!(
                    "Room {}: outbound queue overflow, dropping participant {}",
                    self.info.id,
                    id
                );
                self.senders.remove(id);
                self.presence.remove_participant(*id);
            }
            if self.presence.is_empty() {
                return Flow::Stop;
            }
            event = ServerEvent::RosterUpdate {
                roster: self.presence.roster(),
            };
        }
    }

    fn teardown_if_empty(&self) -> Flow {
        if self.ever_joined && self.presence.is_empty() {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }
}
