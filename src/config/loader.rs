//! TOML configuration loading with environment variable overrides.
//!
//! # Loading order
//! 1. Parse the file at the given path (or the path in `NEXUS_CONFIG`)
//! 2. Apply `NEXUS_*` environment variable overrides
//! 3. Fall back to [`RuntimeSettings::default()`] if the file is missing

use std::{env, fs, path::Path};

use crate::error::{NexusError, NexusResult};

use super::schema::RuntimeSettings;

/// Load [`RuntimeSettings`] from the given path, falling back to defaults if
/// the file does not exist, then applying environment variable overrides.
pub fn load_settings(path: &Path) -> NexusResult<RuntimeSettings> {
    let mut settings = match fs::read_to_string(path) {
        Ok(content) => toml::from_str::<RuntimeSettings>(&content).map_err(|e| {
            NexusError::validation(format!("failed to parse config at {path:?}: {e}"))
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => RuntimeSettings::default(),
        Err(e) => {
            return Err(NexusError::internal(format!(
                "failed to read config at {path:?}: {e}"
            )));
        }
    };

    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Load settings from `NEXUS_CONFIG` or `./nexus.toml`.
pub fn load_default_settings() -> NexusResult<RuntimeSettings> {
    let path = env::var("NEXUS_CONFIG").unwrap_or_else(|_| "nexus.toml".to_owned());
    load_settings(Path::new(&path))
}

/// Apply `NEXUS_*` environment variable overrides.
///
/// Supported overrides:
/// - `NEXUS_BIND`     → `gateway.bind_addr`
/// - `NEXUS_DB`       → `database.path`
/// - `NEXUS_TICK`     → `scheduler.tick_secs`
fn apply_env_overrides(settings: &mut RuntimeSettings) {
    if let Ok(bind) = env::var("NEXUS_BIND") {
        settings.gateway.bind_addr = bind;
    }
    if let Ok(db) = env::var("NEXUS_DB") {
        settings.database.path = db;
    }
    if let Ok(tick) = env::var("NEXUS_TICK")
        && let Ok(secs) = tick.parse::<u64>()
    {
        settings.scheduler.tick_secs = secs;
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_settings(Path::new("/definitely/not/here/nexus.toml")).unwrap();
        assert_eq!(settings.database.path, "nexus.db");
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nexus.toml");
        fs::write(
            &path,
            "[gateway]\nbind_addr = \"0.0.0.0:9000\"\n\n[database]\npath = \"/tmp/x.db\"\n",
        )
        .unwrap();

        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.gateway.bind_addr, "0.0.0.0:9000");
        assert_eq!(settings.database.path, "/tmp/x.db");
        // Untouched sections keep their defaults.
        assert_eq!(settings.timeouts.provider_secs, 30);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nexus.toml");
        fs::write(&path, "gateway = 7").unwrap();
        assert!(load_settings(&path).is_err());
    }
}
