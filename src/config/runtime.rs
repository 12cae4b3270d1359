use super::MetaBoxConfig;
use tracing::warn;

/// Apply environment overrides on top of a loaded config.
///
/// - `METABOX_DEVICE_URL`: lock device base URL
/// - `METABOX_TICK_INTERVAL_MS`: gesture polling period
/// - `METABOX_PASSPHRASE`: passphrase box phrase
pub fn apply_env_overrides(config: &mut MetaBoxConfig) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

/// Same as [`apply_env_overrides`] but reading from an arbitrary lookup.
pub(crate) fn apply_overrides<F>(config: &mut MetaBoxConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("METABOX_DEVICE_URL") {
        config.device.url = url;
    }
    if let Some(v) = lookup("METABOX_TICK_INTERVAL_MS") {
        match v.parse::<u64>() {
            Ok(ms) if ms > 0 => config.session.tick_interval_ms = ms,
            _ => warn!(value = %v, "Ignoring invalid METABOX_TICK_INTERVAL_MS"),
        }
    }
    if let Some(phrase) = lookup("METABOX_PASSPHRASE") {
        config.sesame.passphrase = phrase;
    }
}
