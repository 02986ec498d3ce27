use crate::driver::ReportHandler;
use crate::errors::ParseError;
use crate::junit::JUnitHandler;
use crate::mocha::MochaHandler;
use crate::mstest::MsTestHandler;
use crate::phpunit::PhpUnitHandler;
use crate::pytest::PytestHandler;
use crate::robot::RobotHandler;
use std::fmt;
use std::str::FromStr;

/// Report dialects understood by the archiver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReportFormat {
    Robot,
    XUnit,
    JUnit,
    MochaJUnit,
    PytestJUnit,
    MsTest,
    PhpJUnit,
}

impl ReportFormat {
    pub const ALL: [ReportFormat; 7] = [
        Self::Robot,
        Self::XUnit,
        Self::JUnit,
        Self::MochaJUnit,
        Self::PytestJUnit,
        Self::MsTest,
        Self::PhpJUnit,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Robot => "robot",
            Self::XUnit => "xunit",
            Self::JUnit => "junit",
            Self::MochaJUnit => "mocha-junit",
            Self::PytestJUnit => "pytest-junit",
            Self::MsTest => "mstest",
            Self::PhpJUnit => "php-junit",
        }
    }

    /// A fresh adapter; adapters keep per-document state and are not reused.
    pub fn handler(self) -> Box<dyn ReportHandler> {
        match self {
            Self::Robot => Box::new(RobotHandler::new()),
            Self::XUnit => Box::new(JUnitHandler::xunit()),
            Self::JUnit => Box::new(JUnitHandler::junit()),
            Self::MochaJUnit => Box::new(MochaHandler::new()),
            Self::PytestJUnit => Box::new(PytestHandler::new()),
            Self::MsTest => Box::new(MsTestHandler::new()),
            Self::PhpJUnit => Box::new(PhpUnitHandler::new()),
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportFormat {
    type Err = ParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "robot" | "robotframework" => Ok(Self::Robot),
            "xunit" => Ok(Self::XUnit),
            "junit" => Ok(Self::JUnit),
            "mocha-junit" => Ok(Self::MochaJUnit),
            "pytest-junit" => Ok(Self::PytestJUnit),
            "mstest" => Ok(Self::MsTest),
            "php-junit" => Ok(Self::PhpJUnit),
            _ => Err(ParseError::UnsupportedFormat(raw.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_str_aliases_and_case_expected_format() {
        assert_eq!("RobotFramework".parse::<ReportFormat>().expect("alias"), ReportFormat::Robot);
        assert_eq!("PHP-JUNIT".parse::<ReportFormat>().expect("upper"), ReportFormat::PhpJUnit);
    }

    #[test]
    fn from_str_unknown_expected_unsupported_format() {
        assert!(matches!(
            "nunit".parse::<ReportFormat>(),
            Err(ParseError::UnsupportedFormat(raw)) if raw == "nunit"
        ));
    }

    #[test]
    fn as_str_expected_parseable_for_every_format() {
        for format in ReportFormat::ALL {
            assert_eq!(format.as_str().parse::<ReportFormat>().expect("parse"), format);
        }
    }
}
