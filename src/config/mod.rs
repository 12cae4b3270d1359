pub mod runtime;
pub use runtime::apply_env_overrides;

use serde::Deserialize;
use std::f32::consts::FRAC_PI_2;

/// Complete metaBox configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetaBoxConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub sesame: SesameConfig,
    #[serde(default)]
    pub treasure: TreasureConfig,
    #[serde(default)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub skin: SkinConfig,
}

/// Lock device endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_url")]
    pub url: String,
    #[serde(default = "default_open_path")]
    pub open_path: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_device_url() -> String {
    "http://192.168.100.150".to_string()
}

fn default_open_path() -> String {
    "/open".to_string()
}

fn default_timeout_ms() -> u64 {
    3000
}

impl DeviceConfig {
    /// Full URL of the unlock endpoint.
    pub fn open_url(&self) -> String {
        format!(
            "{}/{}",
            self.url.trim_end_matches('/'),
            self.open_path.trim_start_matches('/')
        )
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            url: default_device_url(),
            open_path: default_open_path(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Session engine tuning
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Gesture polling period (milliseconds)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Capacity of the command channel into the session
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
    /// Capacity of the session event broadcast channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_tick_interval_ms() -> u64 {
    5
}

fn default_command_buffer() -> usize {
    1024
}

fn default_event_buffer() -> usize {
    256
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            command_buffer: default_command_buffer(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Passphrase box
#[derive(Debug, Clone, Deserialize)]
pub struct SesameConfig {
    #[serde(default = "default_passphrase")]
    pub passphrase: String,
    #[serde(default = "default_knocks_required")]
    pub knocks_required: u32,
    /// Joint whose contact with the skin counts as a knock
    #[serde(default = "default_knock_joint")]
    pub knock_joint: String,
}

fn default_passphrase() -> String {
    "開閉".to_string()
}

fn default_knocks_required() -> u32 {
    2
}

fn default_knock_joint() -> String {
    "HandJoint:Right_indexFingerTip".to_string()
}

impl Default for SesameConfig {
    fn default() -> Self {
        Self {
            passphrase: default_passphrase(),
            knocks_required: default_knocks_required(),
            knock_joint: default_knock_joint(),
        }
    }
}

/// Treasure box key-turn lock
#[derive(Debug, Clone, Deserialize)]
pub struct TreasureConfig {
    /// Thumb-tip to index-intermediate distance below which the hand is pinching
    #[serde(default = "default_pinch_threshold")]
    pub pinch_threshold: f32,
    /// Wrist roll (relative to the hit zone) at or below which the box opens
    #[serde(default = "default_unlock_roll")]
    pub unlock_roll: f32,
    /// Hit zone offset from the box anchor
    #[serde(default = "default_hit_zone_offset")]
    pub hit_zone_offset: [f32; 3],
    #[serde(default = "default_hit_zone_size")]
    pub hit_zone_size: f32,
    /// Where the key appears in the world when the module starts
    #[serde(default = "default_key_spawn_position")]
    pub key_spawn_position: [f32; 3],
}

fn default_pinch_threshold() -> f32 {
    0.1
}

fn default_unlock_roll() -> f32 {
    -FRAC_PI_2
}

fn default_hit_zone_offset() -> [f32; 3] {
    [0.16, 0.18, 0.0]
}

fn default_hit_zone_size() -> f32 {
    0.1
}

fn default_key_spawn_position() -> [f32; 3] {
    [0.0, 1.4, -0.4]
}

impl Default for TreasureConfig {
    fn default() -> Self {
        Self {
            pinch_threshold: default_pinch_threshold(),
            unlock_roll: default_unlock_roll(),
            hit_zone_offset: default_hit_zone_offset(),
            hit_zone_size: default_hit_zone_size(),
            key_spawn_position: default_key_spawn_position(),
        }
    }
}

/// Timer box picker limits
#[derive(Debug, Clone, Deserialize)]
pub struct TimerConfig {
    #[serde(default = "default_max_field")]
    pub max_minutes: u32,
    #[serde(default = "default_max_field")]
    pub max_seconds: u32,
}

fn default_max_field() -> u32 {
    59
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            max_minutes: default_max_field(),
            max_seconds: default_max_field(),
        }
    }
}

/// Collision skin laid over the physical box
#[derive(Debug, Clone, Deserialize)]
pub struct SkinConfig {
    /// Uniform scale so the skin sits just outside the real surface
    #[serde(default = "default_skin_scale")]
    pub scale: f32,
}

fn default_skin_scale() -> f32 {
    1.05
}

impl Default for SkinConfig {
    fn default() -> Self {
        Self {
            scale: default_skin_scale(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<MetaBoxConfig> {
    use anyhow::Context;

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path))?;
    let config: MetaBoxConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file '{}'", path))?;
    Ok(config)
}
