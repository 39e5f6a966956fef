//! # Configuration
//!
//! Layered configuration: built-in defaults, then an optional TOML file,
//! then `HIVE_`-prefixed environment variables (`HIVE_BUS__BACKEND=memory`
//! overrides `[bus] backend`). Loaded once at boot and passed down as an
//! explicit collaborator; nothing reads the environment after startup.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{HiveError, HiveResult};

/// Which messaging backend the bus runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BusBackend {
    /// External redis-compatible store. Falls back to `Memory` (with a
    /// health degradation) when unreachable.
    #[default]
    Durable,
    /// Process-local queues with identical semantics.
    Memory,
}

/// Supported LLM provider families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LlmProviderKind {
    #[default]
    Gemini,
    Openai,
    Anthropic,
    Grok,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub backend: BusBackend,
    pub url: String,
    /// Per-queue depth above which `send` fails with `QueueFull`.
    pub high_water_mark: usize,
    /// Connection attempts before falling back to the in-memory provider.
    pub connect_attempts: u32,
    /// Messages kept in the audit history.
    pub history_limit: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: BusBackend::Durable,
            url: "redis://127.0.0.1:6379".to_string(),
            high_water_mark: 10_000,
            connect_attempts: 3,
            history_limit: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub default_provider: LlmProviderKind,
    /// Ceiling on concurrent in-flight requests per provider.
    pub max_concurrent_requests: usize,
    /// Deadline applied to a single generation call, seconds.
    pub request_timeout_s: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_provider: LlmProviderKind::Gemini,
            max_concurrent_requests: 8,
            request_timeout_s: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub bind_addr: String,
    /// Floor for topic polling cadence, seconds.
    pub poll_interval_floor_s: u64,
    /// Hard cap before connections are closed with 1008.
    pub max_connections_per_topic: usize,
    pub heartbeat_interval_s: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8420".to_string(),
            poll_interval_floor_s: 1,
            max_connections_per_topic: 100,
            heartbeat_interval_s: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposalConfig {
    /// Auto-fix loop budget, [1, 10].
    pub max_fix_attempts: u32,
    /// Root under which every proposal gets its own sandbox workspace.
    pub sandbox_root: String,
}

impl Default for ProposalConfig {
    fn default() -> Self {
        Self {
            max_fix_attempts: 5,
            sandbox_root: "sandbox".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Gate-3 block threshold on critical / code-generating endpoints.
    pub critical_block_threshold: u32,
    /// Gate-3 quarantine threshold on critical / code-generating endpoints.
    pub critical_quarantine_threshold: u32,
    /// Gate-3 block threshold on standard endpoints.
    pub standard_block_threshold: u32,
    /// Gate-3 quarantine threshold on standard endpoints.
    pub standard_quarantine_threshold: u32,
    /// Image sub-gate size ceiling in bytes.
    pub image_max_bytes: usize,
    /// Idle security contexts are purged after this many hours.
    pub context_idle_purge_hours: i64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            critical_block_threshold: 30,
            critical_quarantine_threshold: 20,
            standard_block_threshold: 70,
            standard_quarantine_threshold: 50,
            image_max_bytes: 100 * 1024 * 1024,
            context_idle_purge_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Default per-worker-call deadline when the task carries none, seconds.
    pub default_timeout_s: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_timeout_s: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Default post TTL, hours. Posts may opt out with an explicit `None`.
    pub default_ttl_hours: i64,
    /// Background sweep cadence, seconds. 0 disables the sweeper (lazy
    /// expiry on query still applies).
    pub sweep_interval_s: u64,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            default_ttl_hours: 24,
            sweep_interval_s: 300,
        }
    }
}

/// Top-level configuration for the whole system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HiveConfig {
    pub bus: BusConfig,
    pub llm: LlmConfig,
    pub realtime: RealtimeConfig,
    pub proposals: ProposalConfig,
    pub security: SecurityConfig,
    pub dispatcher: DispatcherConfig,
    pub board: BoardConfig,
}

impl HiveConfig {
    /// Load configuration: defaults <- optional `hive.toml` <- environment.
    ///
    /// `HIVE_` prefix with `__` section separators, e.g.
    /// `HIVE_REALTIME__MAX_CONNECTIONS_PER_TOPIC=50`.
    pub fn load() -> HiveResult<Self> {
        dotenvy::dotenv().ok();
        Self::load_from(None)
    }

    /// Load with an explicit file path (tests and tooling).
    pub fn load_from(path: Option<&str>) -> HiveResult<Self> {
        let mut builder = Config::builder();

        let file = path.unwrap_or("hive.toml");
        builder = builder.add_source(File::with_name(file).required(path.is_some()));

        let config = builder
            .add_source(Environment::with_prefix("HIVE").separator("__"))
            .build()
            .map_err(|e| HiveError::InvalidInput(format!("config load failed: {e}")))?;

        let parsed: Self = config
            .try_deserialize()
            .map_err(|e| HiveError::InvalidInput(format!("config parse failed: {e}")))?;

        parsed.validate()?;
        Ok(parsed)
    }

    /// Range checks on every knob an operator can set.
    pub fn validate(&self) -> HiveResult<()> {
        if !(1..=10).contains(&self.proposals.max_fix_attempts) {
            return Err(HiveError::InvalidInput(format!(
                "proposals.max_fix_attempts must be in [1, 10], got {}",
                self.proposals.max_fix_attempts
            )));
        }
        if self.realtime.max_connections_per_topic > 100 {
            return Err(HiveError::InvalidInput(format!(
                "realtime.max_connections_per_topic must be <= 100, got {}",
                self.realtime.max_connections_per_topic
            )));
        }
        if self.realtime.poll_interval_floor_s < 1 {
            return Err(HiveError::InvalidInput(
                "realtime.poll_interval_floor_s must be >= 1".to_string(),
            ));
        }
        if self.llm.max_concurrent_requests == 0 {
            return Err(HiveError::InvalidInput(
                "llm.max_concurrent_requests must be > 0".to_string(),
            ));
        }
        if self.bus.high_water_mark == 0 {
            return Err(HiveError::InvalidInput(
                "bus.high_water_mark must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
