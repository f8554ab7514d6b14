use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_PORT: u16 = 3005;
const DEFAULT_ROOM_CAPACITY: usize = 12;
const MIN_ROOM_CAPACITY: usize = 2;
const MAX_ROOM_CAPACITY: usize = 32;
const DEFAULT_COALESCE_WINDOW_MS: u64 = 250;
const DEFAULT_RESYNC_INTERVAL_MS: u64 = 5_000;
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 10_000;
const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_CHAT_TAIL: usize = 200;
const DEFAULT_OUTBOUND_QUEUE: usize = 64;

/// Server tunables, resolved once at startup from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Default per-room participant cap backing `RoomFull`.
    pub room_capacity: usize,
    /// Window within which competing playback commands are compared before
    /// one is chosen as canonical.
    pub coalesce_window: Duration,
    /// How often each room rebroadcasts recomputed authoritative playback.
    pub resync_interval: Duration,
    /// How often each room sweeps for heartbeat timeouts.
    pub sweep_interval: Duration,
    /// Heartbeat age beyond which a participant is treated as disconnected.
    pub heartbeat_timeout: Duration,
    /// Recent chat messages retained in memory for snapshots.
    pub chat_tail: usize,
    /// Bounded per-connection outbound queue depth; overflow drops the
    /// connection rather than stalling the room.
    pub outbound_queue: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_or("PORT", DEFAULT_PORT),
            room_capacity: env_or("ROOM_CAPACITY", DEFAULT_ROOM_CAPACITY)
                .clamp(MIN_ROOM_CAPACITY, MAX_ROOM_CAPACITY),
            coalesce_window: Duration::from_millis(env_or(
                "COALESCE_WINDOW_MS",
                DEFAULT_COALESCE_WINDOW_MS,
            )),
            resync_interval: Duration::from_millis(env_or(
                "RESYNC_INTERVAL_MS",
                DEFAULT_RESYNC_INTERVAL_MS,
            )),
            sweep_interval: Duration::from_millis(env_or(
                "SWEEP_INTERVAL_MS",
                DEFAULT_SWEEP_INTERVAL_MS,
            )),
            heartbeat_timeout: Duration::from_millis(env_or(
                "HEARTBEAT_TIMEOUT_MS",
                DEFAULT_HEARTBEAT_TIMEOUT_MS,
            )),
            chat_tail: env_or("CHAT_TAIL", DEFAULT_CHAT_TAIL),
            outbound_queue: env_or("OUTBOUND_QUEUE", DEFAULT_OUTBOUND_QUEUE).max(1),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            room_capacity: DEFAULT_ROOM_CAPACITY,
            coalesce_window: Duration::from_millis(DEFAULT_COALESCE_WINDOW_MS),
            resync_interval: Duration::from_millis(DEFAULT_RESYNC_INTERVAL_MS),
            sweep_interval: Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS),
            heartbeat_timeout: Duration::from_millis(DEFAULT_HEARTBEAT_TIMEOUT_MS),
            chat_tail: DEFAULT_CHAT_TAIL,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}
