use std::path::PathBuf;
use testvault_core::ArchiveError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("could not find input file: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("unsupported report format '{0}'")]
    UnsupportedFormat(String),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid XML at byte {position}: {message}")]
    Xml { position: u64, message: String },
    #[error("element '{element}' is missing attribute '{attribute}'")]
    MissingAttribute { element: String, attribute: String },
    #[error("attribute '{attribute}' has invalid value '{value}'")]
    InvalidAttribute { attribute: String, value: String },
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl ParseError {
    pub(crate) fn missing(element: &str, attribute: &str) -> Self {
        Self::MissingAttribute {
            element: element.to_string(),
            attribute: attribute.to_string(),
        }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;
