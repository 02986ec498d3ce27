//! XML report adapters.
//!
//! Each adapter translates one report dialect into [`Tracker`] begin/end calls. A document is
//! archived as one test run: it is committed when the document is fully consumed and rolled
//! back if anything fails on the way.

pub mod driver;
pub mod errors;
pub mod format;
pub mod junit;
pub mod mocha;
pub mod mstest;
pub mod phpunit;
pub mod pytest;
pub mod robot;

pub use driver::{DEFAULT_SUITE_NAME, ReportHandler, XmlAttributes, drive};
pub use errors::{ParseError, ParseResult};
pub use format::ReportFormat;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use testvault_core::{BuildNumberCache, Tracker};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Archives one report file as a test run.
///
/// Returns the build-number cache to hand to the tracker of the next file.
pub fn archive_report(
    path: &Path,
    format: ReportFormat,
    tracker: &mut Tracker,
) -> ParseResult<BuildNumberCache> {
    if !path.exists() {
        return Err(ParseError::MissingFile(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), %format, "archiving report");
    archive_reader(BufReader::with_capacity(READ_BUFFER_SIZE, file), format, tracker)
}

/// Archives an in-memory report.
pub fn archive_str(
    document: &str,
    format: ReportFormat,
    tracker: &mut Tracker,
) -> ParseResult<BuildNumberCache> {
    archive_reader(document.as_bytes(), format, tracker)
}

fn archive_reader<R: BufRead>(
    source: R,
    format: ReportFormat,
    tracker: &mut Tracker,
) -> ParseResult<BuildNumberCache> {
    let mut handler = format.handler();
    let outcome = drive(source, handler.as_mut(), tracker)
        .and_then(|()| tracker.ensure_balanced().map_err(ParseError::from))
        .and_then(|()| tracker.end_test_run().map_err(ParseError::from));
    if outcome.is_err() {
        if let Err(error) = tracker.abort() {
            tracing::warn!(%error, "rollback after failed report failed");
        }
    }
    outcome
}
