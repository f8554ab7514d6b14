use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::drift;
use crate::protocol::{PlaybackPhase, PlaybackState};

/// Playback commands as applied by the room, stamped with server receipt time
/// by the caller.
#[derive(Debug, Clone, Copy)]
pub enum PlaybackCommand {
    Play { position: f64 },
    Pause { position: f64 },
    Seek { position: f64 },
}

/// Outcome of applying a command. `Stale` commands are dropped silently; the
/// client resubmits based on the next authoritative broadcast if it still
/// cares.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Accepted(PlaybackState),
    Stale,
}

/// Per-room authoritative playback state machine.
///
/// Conflict policy is last-accepted-wins with host priority: within the
/// coalescing window a host-accepted command cannot be displaced by a
/// non-host command, while a host command always displaces. Every accepted
/// mutation increments `revision`; no two accepted mutations share one.
pub struct PlaybackMachine {
    phase: PlaybackPhase,
    position: f64,
    updated_wall_ms: u64,
    origin: Option<Uuid>,
    revision: u64,
    duration: Option<f64>,
    coalesce_window: Duration,
    last_accepted_at: Option<Instant>,
    last_from_host: bool,
}

impl PlaybackMachine {
    pub fn new(duration: Option<f64>, coalesce_window: Duration, wall_ms: u64) -> Self {
        Self {
            phase: PlaybackPhase::Paused,
            position: 0.0,
            updated_wall_ms: wall_ms,
            origin: None,
            revision: 0,
            duration,
            coalesce_window,
            last_accepted_at: None,
            last_from_host: false,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.phase
    }

    /// Applies a command received from `sender` at server time
    /// (`received`, `wall_ms`). Roster membership of the sender is the
    /// caller's responsibility; a sender gone from the roster never reaches
    /// this point.
    pub fn apply(
        &mut self,
        command: PlaybackCommand,
        sender: Uuid,
        sender_is_host: bool,
        received: Instant,
        wall_ms: u64,
    ) -> Applied {
        if let Some(last) = self.last_accepted_at {
            let within_window = received.duration_since(last) < self.coalesce_window;
            if within_window && self.last_from_host && !sender_is_host {
                return Applied::Stale;
            }
        }

        let (phase, position) = match command {
            PlaybackCommand::Play { position } => (PlaybackPhase::Playing, position),
            PlaybackCommand::Pause { position } => (PlaybackPhase::Paused, position),
            PlaybackCommand::Seek { position } => (self.phase, self.clamp_seek(position)),
        };

        self.phase = phase;
        self.position = position;
        self.updated_wall_ms = wall_ms;
        self.origin = Some(sender);
        self.revision += 1;
        self.last_accepted_at = Some(received);
        self.last_from_host = sender_is_host;

        Applied::Accepted(self.wire_state(self.position, self.updated_wall_ms))
    }

    /// Authoritative state with position recomputed at `wall_ms` through the
    /// drift estimator. Carries the current revision unchanged, so clients
    /// already at that revision treat the broadcast as a no-op.
    pub fn resync_state(&self, wall_ms: u64) -> PlaybackState {
        let stored = self.wire_state(self.position, self.updated_wall_ms);
        self.wire_state(drift::estimated_position(&stored, wall_ms), wall_ms)
    }

    /// Seeks clamp to [0, duration] when the duration is known, otherwise the
    /// reported position passes through unchanged.
    fn clamp_seek(&self, position: f64) -> f64 {
        match self.duration {
            Some(duration) => position.clamp(0.0, duration),
            None => position,
        }
    }

    fn wire_state(&self, position: f64, updated_at_ms: u64) -> PlaybackState {
        PlaybackState {
            phase: self.phase,
            position,
            revision: self.revision,
            updated_at_ms,
            origin: self.origin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(250);

    fn machine(duration: Option<f64>) -> (PlaybackMachine, Instant) {
        (PlaybackMachine::new(duration, WINDOW, 0), Instant::now())
    }

    fn accepted(applied: Applied) -> PlaybackState {
        match applied {
            Applied::Accepted(state) => state,
            Applied::Stale => panic!("command unexpectedly coalesced away"),
        }
    }

    #[test]
    fn revisions_strictly_increase_across_accepted_commands() {
        let (mut m, t0) = machine(None);
        let host = Uuid::new_v4();
        let mut last = 0;
        let commands = [
            PlaybackCommand::Play { position: 0.0 },
            PlaybackCommand::Seek { position: 30.0 },
            PlaybackCommand::Pause { position: 31.0 },
            PlaybackCommand::Play { position: 31.0 },
        ];
        for (i, cmd) in commands.into_iter().enumerate() {
            let at = t0 + Duration::from_secs(i as u64 + 1);
            let state = accepted(m.apply(cmd, host, true, at, 1_000 * (i as u64 + 1)));
            assert!(state.revision > last, "revision must strictly increase");
            last = state.revision;
        }
        assert_eq!(last, 4);
    }

    #[test]
    fn host_command_displaces_non_host_within_window() {
        let (mut m, t0) = machine(None);
        let host = Uuid::new_v4();
        let member = Uuid::new_v4();

        let t1 = t0 + Duration::from_secs(1);
        accepted(m.apply(PlaybackCommand::Play { position: 5.0 }, member, false, t1, 1_000));
        let t2 = t1 + Duration::from_millis(100);
        let state = accepted(m.apply(
            PlaybackCommand::Pause { position: 4.0 },
            host,
            true,
            t2,
            1_100,
        ));
        assert_eq!(state.phase, PlaybackPhase::Paused);
        assert_eq!(state.position, 4.0);
        assert_eq!(state.origin, Some(host));
    }

    #[test]
    fn non_host_command_coalesced_away_after_host_within_window() {
        let (mut m, t0) = machine(None);
        let host = Uuid::new_v4();
        let member = Uuid::new_v4();

        let t1 = t0 + Duration::from_secs(1);
        let host_state = accepted(m.apply(
            PlaybackCommand::Pause { position: 4.0 },
            host,
            true,
            t1,
            1_000,
        ));
        let t2 = t1 + Duration::from_millis(100);
        let applied = m.apply(PlaybackCommand::Play { position: 5.0 }, member, false, t2, 1_100);
        assert_eq!(applied, Applied::Stale);
        // Canonical state still the host's, same revision.
        assert_eq!(m.revision(), host_state.revision);
        assert_eq!(m.phase(), PlaybackPhase::Paused);
    }

    #[test]
    fn non_host_command_accepted_once_window_passes() {
        let (mut m, t0) = machine(None);
        let host = Uuid::new_v4();
        let member = Uuid::new_v4();

        let t1 = t0 + Duration::from_secs(1);
        accepted(m.apply(PlaybackCommand::Pause { position: 4.0 }, host, true, t1, 1_000));
        let t2 = t1 + Duration::from_millis(300);
        let state = accepted(m.apply(
            PlaybackCommand::Play { position: 5.0 },
            member,
            false,
            t2,
            1_300,
        ));
        assert_eq!(state.phase, PlaybackPhase::Playing);
        assert_eq!(state.revision, 2);
    }

    #[test]
    fn latest_of_two_member_commands_wins_within_window() {
        let (mut m, t0) = machine(None);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let t1 = t0 + Duration::from_secs(1);
        accepted(m.apply(PlaybackCommand::Play { position: 1.0 }, a, false, t1, 1_000));
        let t2 = t1 + Duration::from_millis(50);
        let state = accepted(m.apply(PlaybackCommand::Pause { position: 2.0 }, b, false, t2, 1_050));
        assert_eq!(state.phase, PlaybackPhase::Paused);
        assert_eq!(state.origin, Some(b));
    }

    #[test]
    fn host_commands_in_quick_succession_all_accepted() {
        let (mut m, t0) = machine(None);
        let host = Uuid::new_v4();
        let t1 = t0 + Duration::from_secs(1);
        accepted(m.apply(PlaybackCommand::Play { position: 1.0 }, host, true, t1, 1_000));
        let t2 = t1 + Duration::from_millis(10);
        let state = accepted(m.apply(PlaybackCommand::Pause { position: 1.1 }, host, true, t2, 1_010));
        assert_eq!(state.revision, 2);
    }

    #[test]
    fn seek_clamps_to_known_duration() {
        let (mut m, t0) = machine(Some(120.0));
        let host = Uuid::new_v4();
        let t1 = t0 + Duration::from_secs(1);
        let state = accepted(m.apply(PlaybackCommand::Seek { position: 500.0 }, host, true, t1, 1_000));
        assert_eq!(state.position, 120.0);

        let t2 = t1 + Duration::from_secs(1);
        let state = accepted(m.apply(PlaybackCommand::Seek { position: -3.0 }, host, true, t2, 2_000));
        assert_eq!(state.position, 0.0);
    }

    #[test]
    fn seek_passes_through_without_known_duration() {
        let (mut m, t0) = machine(None);
        let host = Uuid::new_v4();
        let t1 = t0 + Duration::from_secs(1);
        let state = accepted(m.apply(PlaybackCommand::Seek { position: 500.0 }, host, true, t1, 1_000));
        assert_eq!(state.position, 500.0);
    }

    #[test]
    fn seek_preserves_phase() {
        let (mut m, t0) = machine(None);
        let host = Uuid::new_v4();
        let t1 = t0 + Duration::from_secs(1);
        accepted(m.apply(PlaybackCommand::Play { position: 0.0 }, host, true, t1, 1_000));
        let t2 = t1 + Duration::from_secs(1);
        let state = accepted(m.apply(PlaybackCommand::Seek { position: 40.0 }, host, true, t2, 2_000));
        assert_eq!(state.phase, PlaybackPhase::Playing);
    }

    #[test]
    fn resync_recomputes_playing_position_at_same_revision() {
        let (mut m, t0) = machine(None);
        let host = Uuid::new_v4();
        let t1 = t0 + Duration::from_secs(1);
        let update = accepted(m.apply(PlaybackCommand::Play { position: 10.0 }, host, true, t1, 1_000));

        let resync = m.resync_state(4_000);
        assert_eq!(resync.revision, update.revision);
        assert!((resync.position - 13.0).abs() < 1e-9);
        assert_eq!(resync.updated_at_ms, 4_000);

        // Identical at a frozen clock: idempotent for a client already at
        // this revision.
        assert_eq!(m.resync_state(4_000), resync);
    }

    #[test]
    fn resync_keeps_paused_position_exact() {
        let (mut m, t0) = machine(None);
        let host = Uuid::new_v4();
        let t1 = t0 + Duration::from_secs(1);
        accepted(m.apply(PlaybackCommand::Pause { position: 10.0 }, host, true, t1, 1_000));
        let resync = m.resync_state(61_000);
        assert_eq!(resync.position, 10.0);
    }
}
