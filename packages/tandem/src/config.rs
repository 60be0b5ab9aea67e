//! Configuration: figment-layered defaults → config.toml → TANDEM_* env vars.
//!
//! Two equivalent ways to override a default:
//!
//!   config.toml:     [session]
//!                    advance_delay_ms = 1000
//!
//!   env var:         TANDEM_SESSION__ADVANCE_DELAY_MS=1000
//!                    (double underscore = nesting into a section)

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub matchmaking: MatchmakingFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
    #[serde(default)]
    pub cursor: CursorFileConfig,
}

/// Matchmaking tunables (lives under `[matchmaking]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchmakingFileConfig {
    /// How long a responder waits to be claimed before giving up.
    #[serde(default = "default_pairing_timeout_ms")]
    pub pairing_timeout_ms: u64,
}

impl Default for MatchmakingFileConfig {
    fn default() -> Self {
        Self {
            pairing_timeout_ms: default_pairing_timeout_ms(),
        }
    }
}

/// Session tunables (lives under `[session]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    /// Display delay between a stage completing and the next one starting.
    #[serde(default = "default_advance_delay_ms")]
    pub advance_delay_ms: u64,
    /// Progress added per qualifying pointer-move while both members hold.
    #[serde(default = "default_tissue_step")]
    pub tissue_step: f64,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            advance_delay_ms: default_advance_delay_ms(),
            tissue_step: default_tissue_step(),
        }
    }
}

/// Cursor relay tunables (lives under `[cursor]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CursorFileConfig {
    /// Minimum gap between published cursor positions.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Initial surface bounding box, until the renderer reports its own.
    #[serde(default = "default_surface_width")]
    pub surface_width: f64,
    #[serde(default = "default_surface_height")]
    pub surface_height: f64,
}

impl Default for CursorFileConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            surface_width: default_surface_width(),
            surface_height: default_surface_height(),
        }
    }
}

fn default_pairing_timeout_ms() -> u64 {
    300_000
}
fn default_advance_delay_ms() -> u64 {
    3_000
}
fn default_tissue_step() -> f64 {
    0.5
}
fn default_min_interval_ms() -> u64 {
    50
}
fn default_surface_width() -> f64 {
    1920.0
}
fn default_surface_height() -> f64 {
    1080.0
}

/// Build a figment that layers: struct defaults → config.toml → TANDEM_* env.
pub fn load_config(dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(dir.join("config.toml")))
        .merge(Env::prefixed("TANDEM_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the engine)
// =============================================================================

#[derive(Clone, Debug)]
pub struct Config {
    pub matchmaking: MatchmakingConfig,
    pub session: SessionConfig,
}

#[derive(Clone, Debug)]
pub struct MatchmakingConfig {
    pub pairing_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub advance_delay: Duration,
    pub tissue_step: f64,
    pub cursor: CursorConfig,
}

#[derive(Clone, Debug)]
pub struct CursorConfig {
    pub min_interval: Duration,
    pub surface: SurfaceSize,
}

#[derive(Clone, Copy, Debug)]
pub struct SurfaceSize {
    pub width: f64,
    pub height: f64,
}

impl Config {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            matchmaking: MatchmakingConfig {
                pairing_timeout: Duration::from_millis(fc.matchmaking.pairing_timeout_ms),
            },
            session: SessionConfig {
                advance_delay: Duration::from_millis(fc.session.advance_delay_ms),
                tissue_step: fc.session.tissue_step,
                cursor: CursorConfig {
                    min_interval: Duration::from_millis(fc.cursor.min_interval_ms),
                    surface: SurfaceSize {
                        width: fc.cursor.surface_width,
                        height: fc.cursor.surface_height,
                    },
                },
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::from_file(&FileConfig::default())
    }
}
