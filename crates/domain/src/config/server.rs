use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `environment ∈ {development, staging, production}` — gates dev auth
/// bypass (spec.md §6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_3210")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// `ws_ping_interval` (seconds).
    #[serde(default = "d_ping_interval")]
    pub ws_ping_interval_seconds: u64,
    /// `ws_ping_timeout` (seconds).
    #[serde(default = "d_ping_timeout")]
    pub ws_ping_timeout_seconds: u64,
    /// `pipeline_mode ∈ {fast, accurate, accurate_filler}` — default server
    /// pipeline choice absent a per-connection `settings.setPipelineMode`.
    #[serde(default)]
    pub default_pipeline_mode: PipelineMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3210,
            host: "127.0.0.1".into(),
            environment: Environment::Development,
            cors: CorsConfig::default(),
            rate_limit: None,
            ws_ping_interval_seconds: d_ping_interval(),
            ws_ping_timeout_seconds: d_ping_timeout(),
            default_pipeline_mode: PipelineMode::Fast,
        }
    }
}

/// `settings.setPipelineMode {mode}` (spec.md §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    #[default]
    Fast,
    Accurate,
    AccurateFiller,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// `cors_allow_origins`. Use `["*"]` for permissive (NOT recommended).
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
    /// `cors_allow_origin_regex`.
    #[serde(default)]
    pub allow_origin_regex: Option<String>,
    /// `mobile_enterprise_origin`.
    #[serde(default)]
    pub mobile_enterprise_origin: Option<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
            allow_origin_regex: None,
            mobile_enterprise_origin: None,
        }
    }
}

/// Per-connection / per-IP rate limiting (fed to `tower_governor`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst_size: u32,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_3210() -> u16 {
    3210
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}
fn d_ping_interval() -> u64 {
    30
}
fn d_ping_timeout() -> u64 {
    10
}
