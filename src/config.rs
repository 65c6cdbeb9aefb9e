//! Tuning configuration, loaded the same way the teacher's `Config` is: a
//! TOML file overlaying compiled defaults via `#[serde(default = "...")]`.
//!
//! ```toml
//! [at]
//! send_delay_us = 0
//! remove_echo = true
//! send_lf = false
//! open_retry_delay_secs = 1
//! max_open_attempts = 4
//! command_timeout_secs = 3
//! icera_retry_delay_secs = 2
//! flash_duration_ms = 100
//!
//! [qcdm]
//! command_timeout_secs = 3
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;

/// Top-level tuning configuration for the probing engine.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub at: AtTuning,
    #[serde(default)]
    pub qcdm: QcdmTuning,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            at: AtTuning::default(),
            qcdm: QcdmTuning::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// AT-phase timing knobs (§4.3, §6 "AT command timings").
#[derive(Debug, Clone, Deserialize)]
pub struct AtTuning {
    /// Per-send delay in microseconds. Caller-supplied; a USB bus transport
    /// always overrides this to zero (§4.3 "Open").
    #[serde(default = "default_send_delay_us")]
    pub send_delay_us: u64,
    /// Strip local echo from responses.
    #[serde(default = "default_remove_echo")]
    pub remove_echo: bool,
    /// Append a line feed after the carriage-return terminator.
    #[serde(default = "default_send_lf")]
    pub send_lf: bool,
    /// Delay between open retries (§4.3: 1 second).
    #[serde(default = "default_open_retry_delay_secs")]
    pub open_retry_delay_secs: u64,
    /// Total open attempts before terminal failure (§4.3: 4).
    #[serde(default = "default_max_open_attempts")]
    pub max_open_attempts: u32,
    /// Per-command timeout (§6: 3 seconds).
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Wait between Icera retries (§6: 2 seconds).
    #[serde(default = "default_icera_retry_delay_secs")]
    pub icera_retry_delay_secs: u64,
    /// Serial flash duration (§6: 100 ms).
    #[serde(default = "default_flash_duration_ms")]
    pub flash_duration_ms: u64,
}

impl Default for AtTuning {
    fn default() -> Self {
        Self {
            send_delay_us: default_send_delay_us(),
            remove_echo: default_remove_echo(),
            send_lf: default_send_lf(),
            open_retry_delay_secs: default_open_retry_delay_secs(),
            max_open_attempts: default_max_open_attempts(),
            command_timeout_secs: default_command_timeout_secs(),
            icera_retry_delay_secs: default_icera_retry_delay_secs(),
            flash_duration_ms: default_flash_duration_ms(),
        }
    }
}

/// QCDM-phase timing knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct QcdmTuning {
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for QcdmTuning {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_send_delay_us() -> u64 {
    0
}
fn default_remove_echo() -> bool {
    true
}
fn default_send_lf() -> bool {
    false
}
fn default_open_retry_delay_secs() -> u64 {
    1
}
fn default_max_open_attempts() -> u32 {
    4
}
fn default_command_timeout_secs() -> u64 {
    3
}
fn default_icera_retry_delay_secs() -> u64 {
    2
}
fn default_flash_duration_ms() -> u64 {
    100
}
fn default_log_level() -> String {
    "info".to_string()
}

impl ProbeConfig {
    /// Load configuration: the file at `path` overlaying compiled defaults,
    /// or compiled defaults alone when `path` is `None`. A present-but-
    /// unreadable or malformed file is a startup-time operator error, so
    /// this panics rather than falling back silently, matching the
    /// teacher's `Config::load`.
    #[must_use]
    pub fn load(path: Option<&str>) -> Self {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .unwrap_or_else(|e| panic!("failed to read config file {p}: {e}"));
                toml::from_str(&content)
                    .unwrap_or_else(|e| panic!("failed to parse config file {p}: {e}"))
            }
            None => ProbeConfig::default(),
        }
    }
}
