use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Pass,
    Fail,
    Skipped,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Skipped => "SKIPPED",
        }
    }

    /// Maps a vendor status word onto the archive vocabulary. Unknown words yield `None`.
    pub fn from_vendor(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PASS" | "PASSED" | "SUCCESS" | "OK" => Some(Self::Pass),
            "FAIL" | "FAILED" | "FAILURE" | "ERROR" => Some(Self::Fail),
            "SKIP" | "SKIPPED" | "NOT RUN" | "NOT_RUN" | "NOTRUN" | "NOTEXECUTED" => {
                Some(Self::Skipped)
            }
            _ => None,
        }
    }

    /// Aggregates direct child statuses: any failure fails, then any pass passes.
    pub fn aggregate(statuses: &[Status]) -> Option<Self> {
        if statuses.is_empty() {
            None
        } else if statuses.contains(&Self::Fail) {
            Some(Self::Fail)
        } else if statuses.contains(&Self::Pass) {
            Some(Self::Pass)
        } else {
            Some(Self::Skipped)
        }
    }
}

/// True for the status words a runner emits for steps it never executed (dry runs).
pub fn is_not_run(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_uppercase().as_str(),
        "NOT_RUN" | "NOT RUN"
    )
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_vendor(value).ok_or_else(|| format!("unknown status '{value}'"))
    }
}
