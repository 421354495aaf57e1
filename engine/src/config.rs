use std::time::Duration;

use rand::Rng;

/// Default per-actor daily provisioning ceiling, used to seed the
/// runtime-editable scalar on first boot.
pub const DEFAULT_DAILY_CEILING: u32 = 10;

/// Millisecond jitter windows for the orchestrator's rate shaping.
///
/// None of these carry correctness meaning; they exist to keep the remote
/// API from seeing request bursts. Tests collapse them to zero.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    /// Delay before each unit starts.
    pub stagger_ms: (u64, u64),
    /// Delay after each conversation turn's response.
    pub settle_ms: (u64, u64),
    /// Delay between conversation turns.
    pub turn_gap_ms: (u64, u64),
}

impl Pacing {
    pub fn instant() -> Self {
        Self {
            stagger_ms: (0, 0),
            settle_ms: (0, 0),
            turn_gap_ms: (0, 0),
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            stagger_ms: (1_000, 4_000),
            settle_ms: (1_000, 3_000),
            turn_gap_ms: (2_000, 5_000),
        }
    }
}

/// Sleep for a uniformly random duration inside `window`.
pub async fn sleep_jitter(window: (u64, u64)) {
    let ms = rand::thread_rng().gen_range(window.0..=window.1);
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the engine SQLite database ("sqlite:..." prefix optional)
    pub database_url: String,
    /// Base URL of the remote Quack AI program API
    pub api_base_url: String,
    /// Actor id allowed to issue control-plane actions
    pub admin_actor_id: String,
    /// Actor id charged for command-line batch runs
    pub batch_actor_id: String,
    /// Outbound proxy URLs; identities are stamped round-robin from this pool
    pub proxies: Vec<String>,
    /// Jitter windows for the job loop
    pub pacing: Pacing,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: env_str("FLOCK_DATABASE_URL", "sqlite:./data/flock.db"),
            api_base_url: env_str("FLOCK_API_BASE_URL", "https://api.quackai.example"),
            admin_actor_id: env_str("FLOCK_ADMIN_ACTOR", "admin"),
            batch_actor_id: env_str("FLOCK_BATCH_ACTOR", "batch"),
            proxies: env_csv("FLOCK_PROXIES", &[]),
            pacing: Pacing {
                stagger_ms: env_range("FLOCK_STAGGER_MS", (1_000, 4_000))?,
                settle_ms: env_range("FLOCK_SETTLE_MS", (1_000, 3_000))?,
                turn_gap_ms: env_range("FLOCK_TURN_GAP_MS", (2_000, 5_000))?,
            },
        })
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_csv(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        Err(_) => default.iter().map(|s| (*s).to_string()).collect(),
    }
}

/// Parse a "lo-hi" millisecond window, e.g. `FLOCK_STAGGER_MS=500-2000`.
fn env_range(key: &str, default: (u64, u64)) -> anyhow::Result<(u64, u64)> {
    let raw = match std::env::var(key) {
        Ok(raw) => raw,
        Err(_) => return Ok(default),
    };
    let (lo, hi) = raw
        .split_once('-')
        .ok_or_else(|| anyhow::anyhow!("Expected 'lo-hi' for env var {key}, got '{raw}'"))?;
    let lo: u64 = lo
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={raw}: {e}"))?;
    let hi: u64 = hi
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={raw}: {e}"))?;
    if lo > hi {
        anyhow::bail!("Env var {key}={raw} has lo > hi");
    }
    Ok((lo, hi))
}
