use crate::config::Config;
use crate::error::ConfigError;

/// Layer a TOML fragment over `base`.
///
/// Both sides are lowered to [`toml::Value`] tables and deep-merged, so an
/// overlay that sets only `[gdb] port` leaves every other key of `base`
/// untouched.
pub fn merge_configs(base: &Config, overlay_toml: &str) -> Result<Config, ConfigError> {
    let mut base_val =
        toml::Value::try_from(base).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let overlay_val: toml::Value =
        toml::from_str(overlay_toml).map_err(|e| ConfigError::Parse(e.to_string()))?;

    merge_values(&mut base_val, &overlay_val);

    base_val
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))
}

/// Tables merge key-by-key; any other value is replaced outright, so arrays
/// such as `session.library_paths` are overridden rather than concatenated.
fn merge_values(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, val) in overlay_table {
                match base_table.get_mut(key) {
                    Some(existing) => merge_values(existing, val),
                    None => {
                        base_table.insert(key.clone(), val.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}
