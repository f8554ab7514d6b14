use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::protocol::MemberSummary;

const MAX_NAME_LEN: usize = 32;

/// A connected viewer as the room sees them. The socket itself lives in the
/// gateway; the room only holds this record plus the outbound queue sender.
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: Uuid,
    pub display_name: String,
    pub joined_at: Instant,
    pub joined_at_ms: u64,
    pub last_heartbeat: Instant,
}

/// What changed as a result of a removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub removed: bool,
    /// Set when the host role moved to a remaining participant.
    pub new_host: Option<Uuid>,
}

/// Per-room roster with heartbeat-based disconnect detection.
///
/// The first participant to join holds the host role; when the host leaves or
/// times out it transfers deterministically to the remaining participant with
/// the earliest join time.
pub struct PresenceTracker {
    participants: HashMap<Uuid, Participant>,
    host_id: Option<Uuid>,
    heartbeat_timeout: Duration,
}

impl PresenceTracker {
    pub fn new(heartbeat_timeout: Duration) -> Self {
        Self {
            participants: HashMap::new(),
            host_id: None,
            heartbeat_timeout,
        }
    }

    pub fn add_participant(&mut self, id: Uuid, display_name: String, now: Instant, wall_ms: u64) {
        self.participants.insert(
            id,
            Participant {
                id,
                display_name,
                joined_at: now,
                joined_at_ms: wall_ms,
                last_heartbeat: now,
            },
        );
        if self.host_id.is_none() {
            self.host_id = Some(id);
        }
    }

    pub fn remove_participant(&mut self, id: Uuid) -> Removal {
        if self.participants.remove(&id).is_none() {
            return Removal {
                removed: false,
                new_host: None,
            };
        }

        let mut new_host = None;
        if self.host_id == Some(id) {
            self.host_id = self.earliest_joined();
            new_host = self.host_id;
        }
        Removal {
            removed: true,
            new_host,
        }
    }

    pub fn heartbeat(&mut self, id: Uuid, now: Instant) {
        if let Some(p) = self.participants.get_mut(&id) {
            p.last_heartbeat = now;
        }
    }

    /// Removes every participant whose heartbeat age exceeds the timeout,
    /// reassigning the host role as needed. Identical in effect to each of
    /// them issuing an explicit leave.
    pub fn sweep_timeouts(&mut self, now: Instant) -> Vec<Uuid> {
        let expired: Vec<Uuid> = self
            .participants
            .values()
            .filter(|p| now.duration_since(p.last_heartbeat) > self.heartbeat_timeout)
            .map(|p| p.id)
            .collect();
        for id in &expired {
            self.remove_participant(*id);
        }
        expired
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.participants.contains_key(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn host_id(&self) -> Option<Uuid> {
        self.host_id
    }

    pub fn is_host(&self, id: Uuid) -> bool {
        self.host_id == Some(id)
    }

    /// Roster ordered by join time so every observer sees the same list.
    pub fn roster(&self) -> Vec<MemberSummary> {
        let mut members: Vec<&Participant> = self.participants.values().collect();
        members.sort_by_key(|p| (p.joined_at, p.id));
        members
            .into_iter()
            .map(|p| MemberSummary {
                id: p.id,
                display_name: p.display_name.clone(),
                is_host: self.host_id == Some(p.id),
                joined_at_ms: p.joined_at_ms,
            })
            .collect()
    }

    fn earliest_joined(&self) -> Option<Uuid> {
        self.participants
            .values()
            .min_by_key(|p| (p.joined_at, p.id))
            .map(|p| p.id)
    }
}

/// Strips control characters and truncates to a displayable length.
pub fn sanitize_display_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let cleaned: String = trimmed
        .chars()
        .filter(|ch| !ch.is_control())
        .take(MAX_NAME_LEN)
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

pub fn default_display_name(id: Uuid) -> String {
    let short = &id.to_string()[..8];
    format!("Guest {short}")
}
