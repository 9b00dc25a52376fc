use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::auth::{Account, Directory};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::model::{Building, Room};

/// Server settings, read from `ROOMBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub seed: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub completer_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            seed: None,
            metrics_port: None,
            compact_threshold: 1000,
            completer_interval: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to
    /// the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind: lookup("ROOMBOOK_BIND").unwrap_or(defaults.bind),
            port: parsed(&lookup, "ROOMBOOK_PORT").unwrap_or(defaults.port),
            data_dir: lookup("ROOMBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            seed: lookup("ROOMBOOK_SEED")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            metrics_port: parsed(&lookup, "ROOMBOOK_METRICS_PORT"),
            compact_threshold: parsed(&lookup, "ROOMBOOK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            completer_interval: parsed::<u64>(&lookup, "ROOMBOOK_COMPLETER_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.completer_interval),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roombook.wal")
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

/// Initial catalog and accounts, loaded from a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub buildings: Vec<Building>,
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub accounts: Vec<Account>,
}

/// What a seed run actually added.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub buildings: usize,
    pub rooms: usize,
    pub accounts: usize,
}

impl Seed {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::Validation(format!("invalid seed file: {e}")))
    }

    /// Apply to a live engine and directory. Rooms and accounts that already
    /// exist are skipped, so seeding is safe on every restart.
    pub async fn apply(&self, engine: &Engine, directory: &Directory) -> Result<SeedReport> {
        let mut report = SeedReport::default();
        let known = engine.list_buildings();
        for building in &self.buildings {
            if known.contains(building) {
                continue;
            }
            engine.upsert_building(building.clone()).await?;
            report.buildings += 1;
        }
        for room in &self.rooms {
            match engine.create_room(room.clone()).await {
                Ok(()) => report.rooms += 1,
                Err(Error::AlreadyExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        for account in &self.accounts {
            match directory.add_account(account.clone()) {
                Ok(()) => report.accounts += 1,
                Err(Error::AlreadyExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        tracing::info!(
            buildings = report.buildings,
            rooms = report.rooms,
            accounts = report.accounts,
            "seed applied"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SEED: &str = r#"{
        "buildings": [
            {"id": "A", "name": "Gedung A", "zones": ["Utara", "Selatan"]}
        ],
        "rooms": [
            {"id": "A-101", "name": "Ruang 101", "building": "Gedung A", "zone": "Utara",
             "floor": 1, "capacity": 40, "amenities": ["proyektor"], "status": "tersedia"},
            {"id": "A-201", "name": "Ruang 201", "building": "Gedung A", "zone": "Selatan",
             "floor": 2, "capacity": 30, "status": "perbaikan"}
        ],
        "accounts": [
            {"username": "budi", "secret": "rahasia",
             "identity": {"id": "u1", "name": "Budi", "class": "mahasiswa"}}
        ]
    }"#;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config, Config::default());
        assert_eq!(config.addr(), "0.0.0.0:8080");
        assert_eq!(config.wal_path(), PathBuf::from("./data/roombook.wal"));
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("ROOMBOOK_BIND", "127.0.0.1"),
            ("ROOMBOOK_PORT", "9000"),
            ("ROOMBOOK_DATA_DIR", "/var/lib/roombook"),
            ("ROOMBOOK_SEED", "/etc/roombook/seed.json"),
            ("ROOMBOOK_METRICS_PORT", "9100"),
            ("ROOMBOOK_COMPACT_THRESHOLD", "50"),
            ("ROOMBOOK_COMPLETER_INTERVAL_SECS", "5"),
        ]));
        assert_eq!(config.addr(), "127.0.0.1:9000");
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/roombook/roombook.wal"));
        assert_eq!(config.seed, Some(PathBuf::from("/etc/roombook/seed.json")));
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.completer_interval, Duration::from_secs(5));
    }

    #[test]
    fn bad_values_fall_back() {
        let config = Config::from_lookup(lookup(&[
            ("ROOMBOOK_PORT", "eighty"),
            ("ROOMBOOK_METRICS_PORT", "-1"),
            ("ROOMBOOK_COMPLETER_INTERVAL_SECS", "0"),
            ("ROOMBOOK_SEED", ""),
        ]));
        assert_eq!(config.port, 8080);
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.completer_interval, Duration::from_secs(60));
        assert_eq!(config.seed, None);
    }

    #[test]
    fn numeric_fields_parse_at_their_own_width() {
        // 70000 overflows a port but is a fine threshold.
        let config = Config::from_lookup(lookup(&[
            ("ROOMBOOK_PORT", "70000"),
            ("ROOMBOOK_COMPACT_THRESHOLD", " 70000 "),
            ("ROOMBOOK_COMPLETER_INTERVAL_SECS", "86400"),
        ]));
        assert_eq!(config.port, 8080);
        assert_eq!(config.compact_threshold, 70_000);
        assert_eq!(config.completer_interval, Duration::from_secs(86_400));
    }

    #[test]
    fn invalid_seed_is_validation_error() {
        assert!(matches!(Seed::parse("{\"rooms\": 3}"), Err(Error::Validation(_))));
        assert_eq!(Seed::parse("{}").unwrap(), Seed::default());
    }

    #[tokio::test]
    async fn seed_applies_once() {
        let dir = std::env::temp_dir().join("roombook_test_config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("seed_once.wal");
        let _ = std::fs::remove_file(&path);

        let seed = Seed::parse(SEED).unwrap();
        let engine = Engine::new(path.clone()).unwrap();
        let directory = Directory::new();
        let first = seed.apply(&engine, &directory).await.unwrap();
        assert_eq!(
            first,
            SeedReport {
                buildings: 1,
                rooms: 2,
                accounts: 1
            }
        );
        assert_eq!(engine.list_rooms(&Default::default()).await.len(), 2);
        assert!(directory.login("budi", "rahasia").is_ok());

        // Restart: catalog comes back from the WAL, accounts from the seed.
        drop(engine);
        let engine = Engine::new(path).unwrap();
        let directory = Directory::new();
        let second = seed.apply(&engine, &directory).await.unwrap();
        assert_eq!(
            second,
            SeedReport {
                buildings: 0,
                rooms: 0,
                accounts: 1
            }
        );
    }

    #[tokio::test]
    async fn seed_with_foreign_zone_fails() {
        let dir = std::env::temp_dir().join("roombook_test_config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("seed_foreign.wal");
        let _ = std::fs::remove_file(&path);

        let mut seed = Seed::parse(SEED).unwrap();
        seed.rooms[0].zone = "Timur".into();
        let engine = Engine::new(path).unwrap();
        let err = seed.apply(&engine, &Directory::new()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
