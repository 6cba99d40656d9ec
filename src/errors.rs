use thiserror;

use std::fmt;
use std::time::Duration;

use crate::read::Origin;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error reading or writing \"{file}\": {source}")]
    FileIo {
        file: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Error reading or writing bytes: {0}")]
    BytesIo(Box<dyn std::error::Error + Send + Sync>),

    #[error("Unpaired read in {0}")]
    UnpairedRead(String),

    #[error("Error parsing record {idx} in {origin}: {source}")]
    ParseRecord {
        origin: Origin,
        idx: usize,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Error parsing YAML \"{file}\": {source}")]
    Manifest {
        file: String,
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Could not decode read identifier \"{id}\" on line {line}: {reason}")]
    Decode {
        line: usize,
        id: String,
        reason: &'static str,
    },

    #[error("External tool \"{tool}\" failed: {reason}")]
    ExternalTool { tool: String, reason: String },

    #[error("External tool \"{tool}\" did not finish within {timeout:?}")]
    ExternalToolTimeout { tool: String, timeout: Duration },

    #[error("Stage \"{stage}\" failed for {unit}: {source}")]
    StageFailed {
        stage: &'static str,
        unit: String,
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn file_io(file: impl fmt::Display, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::FileIo {
            file: file.to_string(),
            source: Box::new(source),
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// Whether this error was raised before any read was processed.
    pub fn is_configuration(&self) -> bool {
        match self {
            Error::Configuration(_) | Error::Manifest { .. } => true,
            Error::StageFailed { source, .. } => source.is_configuration(),
            _ => false,
        }
    }
}

/// Conditions that skip work without failing the run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum Warning {
    EmptyInput { stage: &'static str, unit: String },
    UndersizedSubsample { requested: usize, available: usize },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Warning::*;
        match self {
            EmptyInput { stage, unit } => write!(f, "{stage}: no input for {unit}, skipped"),
            UndersizedSubsample {
                requested,
                available,
            } => write!(
                f,
                "requested a subsample of {requested} but only {available} reads are available"
            ),
        }
    }
}

pub fn utf8(b: &[u8]) -> String {
    String::from_utf8_lossy(b).into_owned()
}
