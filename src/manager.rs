use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::config::Config;
use crate::error::RoomError;
use crate::protocol::{now_unix_ms, ClientEvent};
use crate::room::{self, OutboundSender, RoomCommand, RoomHandle, RoomInfo};

/// What the catalog resolves a movie reference into, once, at room creation.
#[derive(Debug, Clone)]
pub struct MovieSource {
    pub url: String,
    pub duration_secs: Option<f64>,
}

/// Catalog collaborator. Consulted only at room creation; the sync core never
/// calls back into it for an active room.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn resolve(&self, movie_ref: &str) -> anyhow::Result<MovieSource>;
}

/// Default when no catalog service is wired in: the movie ref is taken to be
/// a playable URL already, with unknown duration.
pub struct PassthroughCatalog;

#[async_trait]
impl Catalog for PassthroughCatalog {
    async fn resolve(&self, movie_ref: &str) -> anyhow::Result<MovieSource> {
        Ok(MovieSource {
            url: movie_ref.to_string(),
            duration_secs: None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CreatedRoom {
    pub room_id: String,
    pub playable_url: String,
    pub duration_secs: Option<f64>,
}

/// Owns the top-level room map and routes inbound traffic to each room's
/// actor. The map is the only structure shared across rooms; everything
/// behind a [`RoomHandle`] is single-writer.
#[derive(Clone)]
pub struct RoomManager {
    rooms: Arc<DashMap<String, RoomHandle>>,
    catalog: Arc<dyn Catalog>,
    config: Config,
}

impl RoomManager {
    pub fn new(config: Config, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            catalog,
            config,
        }
    }

    /// Resolves the movie, spawns the room actor, and registers it. The
    /// creator is expected to join as the first participant and thereby take
    /// the host role.
    pub async fn create_room(
        &self,
        creator_id: Uuid,
        movie_ref: &str,
        private: bool,
    ) -> anyhow::Result<CreatedRoom> {
        let source = self.catalog.resolve(movie_ref).await?;
        let room_id = self.generate_room_code();
        let info = RoomInfo {
            id: room_id.clone(),
            creator_id,
            movie_ref: movie_ref.to_string(),
            playable_url: source.url.clone(),
            duration_secs: source.duration_secs,
            private,
            created_at_ms: now_unix_ms(),
        };
        room::spawn(info, &self.config, Arc::clone(&self.rooms));
        Ok(CreatedRoom {
            room_id,
            playable_url: source.url,
            duration_secs: source.duration_secs,
        })
    }

    /// Adds a participant to a room, handing its bounded outbound queue to
    /// the room actor. The snapshot is delivered through that queue, ahead of
    /// any subsequent broadcast.
    pub async fn join(
        &self,
        room_id: &str,
        participant_id: Uuid,
        display_name: String,
        sender: OutboundSender,
    ) -> Result<(), RoomError> {
        let handle = self.handle_for(room_id)?;
        let (reply, outcome) = oneshot::channel();
        handle
            .tx
            .send(RoomCommand::Join {
                participant_id,
                display_name,
                sender,
                reply,
            })
            .await
            .map_err(|_| RoomError::RoomNotFound)?;
        outcome.await.map_err(|_| RoomError::RoomNotFound)?
    }

    pub async fn leave(&self, room_id: &str, participant_id: Uuid) {
        if let Ok(handle) = self.handle_for(room_id) {
            let _ = handle
                .tx
                .send(RoomCommand::Leave { participant_id })
                .await;
        }
    }

    /// Routes a client event to its room. Rejections inside the room (stale
    /// senders, coalesced commands) are dropped there, not surfaced here.
    pub async fn dispatch(
        &self,
        room_id: &str,
        participant_id: Uuid,
        event: ClientEvent,
    ) -> Result<(), RoomError> {
        let handle = self.handle_for(room_id)?;
        handle
            .tx
            .send(RoomCommand::Client {
                participant_id,
                event,
            })
            .await
            .map_err(|_| RoomError::RoomNotFound)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn handle_for(&self, room_id: &str) -> Result<RoomHandle, RoomError> {
        self.rooms
            .get(room_id)
            .map(|entry| entry.value().clone())
            .ok_or(RoomError::RoomNotFound)
    }

    fn generate_room_code(&self) -> String {
        loop {
            let raw = (Uuid::new_v4().as_u128() % 1_000_000) as u32;
            let code = format!("{:03}-{:03}", raw / 1000, raw % 1000);
            if !self.rooms.contains_key(&code) {
                break code;
            }
        }
    }
}
