use std::path::PathBuf;
use std::str::FromStr;

use crate::engine::EngineError;
use crate::segment::{DEFAULT_SEGMENT_MINUTES, SegmentUnit};

/// Runtime settings, read from `SLOTWISE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub segment: SegmentUnit,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            segment: SegmentUnit::default_segment(),
            metrics_port: None,
            compact_threshold: 1000,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, EngineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EngineError> {
        let defaults = Self::default();
        let data_dir = lookup("SLOTWISE_DATA_DIR").map_or(defaults.data_dir, PathBuf::from);
        let minutes = parse(&lookup, "SLOTWISE_SEGMENT_MINUTES")?.unwrap_or(DEFAULT_SEGMENT_MINUTES);
        let metrics_port = parse(&lookup, "SLOTWISE_METRICS_PORT")?;
        let compact_threshold =
            parse(&lookup, "SLOTWISE_COMPACT_THRESHOLD")?.unwrap_or(defaults.compact_threshold);

        Ok(Self {
            data_dir,
            segment: SegmentUnit::new(minutes)?,
            metrics_port,
            compact_threshold,
        })
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("availability.wal")
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, EngineError>
where
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| EngineError::Config(format!("{key}={raw:?}: {e}")))
        })
        .transpose()
}
