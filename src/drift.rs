//! Clock/drift estimation shared by the server's resync broadcasts and by
//! clients deciding whether to snap their local player.
//!
//! Pure functions over wire-level [`PlaybackState`]; no shared state.

use crate::protocol::{PlaybackPhase, PlaybackState};

/// Divergence (seconds) beyond which a client should seek to the estimate
/// instead of letting its player free-run. Snapping on every tick causes
/// visible jitter, so small drift is left alone.
pub const SNAP_THRESHOLD_SECS: f64 = 1.5;

/// Estimated true position at `now_ms` given the last authoritative state.
/// While Playing the stored position advances with wall time; while Paused it
/// is exact as stored.
pub fn estimated_position(playback: &PlaybackState, now_ms: u64) -> f64 {
    match playback.phase {
        PlaybackPhase::Paused => playback.position,
        PlaybackPhase::Playing => {
            let elapsed_ms = now_ms.saturating_sub(playback.updated_at_ms);
            playback.position + elapsed_ms as f64 / 1000.0
        }
    }
}

/// Signed drift: locally observed position minus the authoritative estimate.
pub fn drift(local_played: f64, playback: &PlaybackState, now_ms: u64) -> f64 {
    local_played - estimated_position(playback, now_ms)
}

pub fn should_snap(drift: f64, threshold: f64) -> bool {
    drift.abs() > threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(phase: PlaybackPhase, position: f64, updated_at_ms: u64) -> PlaybackState {
        PlaybackState {
            phase,
            position,
            revision: 1,
            updated_at_ms,
            origin: None,
        }
    }

    #[test]
    fn paused_position_does_not_advance() {
        let s = state(PlaybackPhase::Paused, 42.0, 1_000);
        assert_eq!(estimated_position(&s, 100_000), 42.0);
    }

    #[test]
    fn playing_position_advances_with_wall_time() {
        let s = state(PlaybackPhase::Playing, 10.0, 5_000);
        assert_eq!(estimated_position(&s, 8_500), 13.5);
    }

    #[test]
    fn clock_skew_before_update_is_clamped() {
        // A client clock behind the server's update stamp must not rewind
        // the estimate.
        let s = state(PlaybackPhase::Playing, 10.0, 5_000);
        assert_eq!(estimated_position(&s, 4_000), 10.0);
    }

    #[test]
    fn drift_is_signed_local_minus_estimate() {
        let s = state(PlaybackPhase::Playing, 10.0, 5_000);
        assert_eq!(drift(12.0, &s, 6_000), 1.0);
        assert_eq!(drift(9.0, &s, 6_000), -2.0);
    }

    #[test]
    fn snap_only_beyond_threshold() {
        assert!(!should_snap(1.4, SNAP_THRESHOLD_SECS));
        assert!(!should_snap(-1.5, SNAP_THRESHOLD_SECS));
        assert!(should_snap(1.6, SNAP_THRESHOLD_SECS));
        assert!(should_snap(-2.0, SNAP_THRESHOLD_SECS));
    }
}
