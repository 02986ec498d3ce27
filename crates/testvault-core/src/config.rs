use crate::errors::{ArchiveError, ArchiveResult};
use crate::timestamps::TimeAdjust;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use testvault_store::SchemaPolicy;

pub const DEFAULT_DATABASE: &str = "test_archive.db";
pub const DEFAULT_REPOSITORY: &str = "default repo";
pub const DEFAULT_MAX_LOG_MESSAGE_LENGTH: i64 = 2000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbEngine {
    #[default]
    Sqlite,
    Memory,
}

impl std::str::FromStr for DbEngine {
    type Err = ArchiveError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(ArchiveError::Config(format!(
                "unsupported database engine '{other}' (expected sqlite or memory)"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub database: PathBuf,
    pub db_engine: DbEngine,
    pub repository: String,
    pub team: Option<String>,
    pub series: Vec<String>,
    #[serde(deserialize_with = "deserialize_metadata")]
    pub metadata: BTreeMap<String, String>,
    pub archive_keywords: bool,
    pub archive_keyword_statistics: bool,
    pub ignore_logs: bool,
    pub ignore_logs_below: Option<String>,
    /// `0` keeps messages whole; a negative value drops that many trailing characters.
    #[serde(deserialize_with = "deserialize_log_length")]
    pub max_log_message_length: i64,
    pub time_adjust_secs: i64,
    pub time_adjust_with_system_timezone: bool,
    pub allow_minor_schema_updates: bool,
    pub allow_major_schema_updates: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from(DEFAULT_DATABASE),
            db_engine: DbEngine::Sqlite,
            repository: DEFAULT_REPOSITORY.to_string(),
            team: None,
            series: Vec::new(),
            metadata: BTreeMap::new(),
            archive_keywords: true,
            archive_keyword_statistics: true,
            ignore_logs: false,
            ignore_logs_below: None,
            max_log_message_length: DEFAULT_MAX_LOG_MESSAGE_LENGTH,
            time_adjust_secs: 0,
            time_adjust_with_system_timezone: false,
            allow_minor_schema_updates: false,
            allow_major_schema_updates: false,
        }
    }
}

impl ArchiveConfig {
    pub fn from_json_str(raw: &str) -> ArchiveResult<Self> {
        serde_json::from_str(raw)
            .map_err(|error| ArchiveError::Config(format!("invalid config: {error}")))
    }

    pub fn from_json_file(path: &Path) -> ArchiveResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            ArchiveError::Config(format!(
                "failed to read config file {}: {error}",
                path.display()
            ))
        })?;
        Self::from_json_str(&raw)
    }

    /// Applies command-line values over this config. Scalars replace, lists extend and
    /// maps merge.
    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(database) = overrides.database {
            self.database = database;
        }
        if let Some(engine) = overrides.db_engine {
            self.db_engine = engine;
        }
        if let Some(repository) = overrides.repository {
            self.repository = repository;
        }
        if overrides.team.is_some() {
            self.team = overrides.team;
        }
        self.series.extend(overrides.series);
        self.metadata.extend(overrides.metadata);
        if overrides.no_keywords {
            self.archive_keywords = false;
        }
        if overrides.no_keyword_stats {
            self.archive_keyword_statistics = false;
        }
        if overrides.ignore_logs {
            self.ignore_logs = true;
        }
        if overrides.ignore_logs_below.is_some() {
            self.ignore_logs_below = overrides.ignore_logs_below;
        }
        if let Some(length) = overrides.max_log_message_length {
            self.max_log_message_length = length;
        }
        if let Some(secs) = overrides.time_adjust_secs {
            self.time_adjust_secs = secs;
        }
        if overrides.time_adjust_with_system_timezone {
            self.time_adjust_with_system_timezone = true;
        }
        if overrides.allow_minor_schema_updates {
            self.allow_minor_schema_updates = true;
        }
        if overrides.allow_major_schema_updates {
            self.allow_major_schema_updates = true;
        }
    }

    pub fn schema_policy(&self) -> SchemaPolicy {
        SchemaPolicy {
            allow_minor_updates: self.allow_minor_schema_updates || self.allow_major_schema_updates,
            allow_major_updates: self.allow_major_schema_updates,
        }
    }

    pub fn time_adjust(&self) -> TimeAdjust {
        TimeAdjust::new(self.time_adjust_secs, self.time_adjust_with_system_timezone)
    }

    /// True when messages of `level` fall below the configured cutoff.
    pub fn log_level_ignored(&self, level: &str) -> bool {
        let Some(cutoff) = self.ignore_logs_below.as_deref().and_then(log_level_rank) else {
            return false;
        };
        log_level_rank(level).is_some_and(|rank| rank < cutoff)
    }

    pub fn truncate_log_message(&self, content: &str) -> String {
        match self.max_log_message_length {
            0 => content.to_string(),
            length if length > 0 => content.chars().take(length as usize).collect(),
            length => {
                let keep = content
                    .chars()
                    .count()
                    .saturating_sub(length.unsigned_abs() as usize);
                content.chars().take(keep).collect()
            }
        }
    }
}

/// Command-line values layered over the file config.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database: Option<PathBuf>,
    pub db_engine: Option<DbEngine>,
    pub repository: Option<String>,
    pub team: Option<String>,
    pub series: Vec<String>,
    pub metadata: Vec<(String, String)>,
    pub no_keywords: bool,
    pub no_keyword_stats: bool,
    pub ignore_logs: bool,
    pub ignore_logs_below: Option<String>,
    pub max_log_message_length: Option<i64>,
    pub time_adjust_secs: Option<i64>,
    pub time_adjust_with_system_timezone: bool,
    pub allow_minor_schema_updates: bool,
    pub allow_major_schema_updates: bool,
}

/// Severity rank of a log level; `None` for levels outside the known vocabulary.
pub fn log_level_rank(level: &str) -> Option<u8> {
    match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Some(0),
        "DEBUG" => Some(1),
        "INFO" => Some(2),
        "WARN" => Some(3),
        "ERROR" => Some(4),
        "FAIL" => Some(5),
        _ => None,
    }
}

/// Splits `NAME:VALUE` at the first colon.
pub fn parse_metadata_pair(raw: &str) -> ArchiveResult<(String, String)> {
    raw.split_once(':')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| {
            ArchiveError::Config(format!(
                "unsupported format for key-value pair '{raw}', use NAME:VALUE"
            ))
        })
}

/// `full` means unlimited; otherwise a signed integer.
pub fn parse_log_length(raw: &str) -> ArchiveResult<i64> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("full") {
        return Ok(0);
    }
    raw.parse().map_err(|_| {
        ArchiveError::Config(format!(
            "invalid max log message length '{raw}' (expected an integer or 'full')"
        ))
    })
}

fn deserialize_log_length<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(length) => Ok(length),
        Raw::Text(text) => parse_log_length(&text).map_err(serde::de::Error::custom),
    }
}

fn deserialize_metadata<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Map(BTreeMap<String, String>),
        Pairs(Vec<String>),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Map(map) => Ok(map),
        Raw::Pairs(pairs) => pairs
            .iter()
            .map(|pair| parse_metadata_pair(pair).map_err(serde::de::Error::custom))
            .collect(),
    }
}
