//! Build/series numbering.

use crate::errors::ArchiveResult;
use serde::Serialize;
use std::collections::BTreeMap;
use testvault_store::schema::{TEST_SERIES, TEST_SERIES_MAPPING};
use testvault_store::{ArchiveStore, Record, RowId, SqlValue};

pub const DEFAULT_SERIES: &str = "default series";
pub const ALL_BUILDS_SERIES: &str = "All builds";
pub const NO_TEAM: &str = "No team";

/// Series id → build number assigned during this invocation. Shared by every document
/// archived in one invocation so they land on the same build.
pub type BuildNumberCache = BTreeMap<RowId, i64>;

/// Splits `NAME#BUILD` at the first `#`. An empty build part counts as absent.
pub fn parse_series(content: &str) -> (String, Option<String>) {
    match content.split_once('#') {
        Some((name, build)) if !build.is_empty() => (name.to_string(), Some(build.to_string())),
        Some((name, _)) => (name.to_string(), None),
        None => (content.to_string(), None),
    }
}

/// Series registered for the current run, in registration order, plus the owning team.
#[derive(Clone, Debug, Default)]
pub struct SeriesRegistry {
    entries: Vec<(String, Option<String>)>,
    team: Option<String>,
}

impl SeriesRegistry {
    pub fn new(team: Option<String>) -> Self {
        Self {
            entries: Vec::new(),
            team,
        }
    }

    /// Registers `NAME` or `NAME#BUILD`; a later registration of the same name wins.
    pub fn register(&mut self, content: &str) {
        let (name, build) = parse_series(content);
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = build,
            None => self.entries.push((name, build)),
        }
    }

    pub fn set_team(&mut self, team: &str) {
        self.team = Some(team.to_string());
    }

    pub fn team(&self) -> Option<&str> {
        self.team.as_deref()
    }

    pub fn entries(&self) -> &[(String, Option<String>)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SeriesBuild {
    pub series_id: RowId,
    pub team: String,
    pub name: String,
    pub build_number: i64,
    pub build_id: Option<String>,
}

/// Maps `run_id` into the named series and returns the build it landed on.
///
/// A numeric build id is used directly. An opaque id reuses the number already mapped to it,
/// or takes the next free number. Without an id the in-session cache decides, falling back to
/// the next free number and remembering it.
pub fn report_series(
    store: &dyn ArchiveStore,
    cache: &mut BuildNumberCache,
    run_id: RowId,
    team: Option<&str>,
    name: &str,
    build_id: Option<&str>,
) -> ArchiveResult<SeriesBuild> {
    let team = team.filter(|team| !team.is_empty()).unwrap_or(NO_TEAM);
    let series_id = store.return_id_or_insert_and_return_id(
        TEST_SERIES,
        &Record::new().with("team", team).with("name", name),
        &["team", "name"],
    )?;
    let build_id = build_id.filter(|build| !build.is_empty());

    let build_number = match build_id {
        Some(build) => match build.trim().parse::<i64>() {
            Ok(number) => number,
            Err(_) => build_number_by_id(store, series_id, build)?,
        },
        None => match cache.get(&series_id) {
            Some(number) => *number,
            None => {
                let number = next_build_number(store, series_id)?;
                cache.insert(series_id, number);
                number
            }
        },
    };

    store.insert(
        TEST_SERIES_MAPPING,
        &Record::new()
            .with("series", series_id)
            .with("test_run_id", run_id)
            .with("build_number", build_number)
            .with("build_id", build_id),
    )?;
    tracing::info!(series = name, team, build_number, "run mapped into series");

    Ok(SeriesBuild {
        series_id,
        team: team.to_string(),
        name: name.to_string(),
        build_number,
        build_id: build_id.map(str::to_string),
    })
}

fn build_number_by_id(store: &dyn ArchiveStore, series_id: RowId, build_id: &str) -> ArchiveResult<i64> {
    let existing = store
        .fetch_one_value(
            TEST_SERIES_MAPPING,
            "build_number",
            &Record::new()
                .with("build_id", build_id)
                .with("series", series_id),
        )?
        .as_ref()
        .and_then(SqlValue::as_i64);
    match existing {
        Some(number) => Ok(number),
        None => next_build_number(store, series_id),
    }
}

fn next_build_number(store: &dyn ArchiveStore, series_id: RowId) -> ArchiveResult<i64> {
    let previous = store.max_value(
        TEST_SERIES_MAPPING,
        "build_number",
        &Record::new().with("series", series_id),
    )?;
    Ok(previous.map_or(1, |max| max + 1))
}
