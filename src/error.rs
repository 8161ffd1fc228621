use thiserror::Error;

#[derive(Error, Debug)]
pub enum HomewatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Encoder already active on stream '{stream}'")]
    AlreadyActive { stream: String },

    #[error("Conflicting operation: {details}")]
    Conflict { details: String },

    #[error("Invalid argument: {details}")]
    InvalidArgument { details: String },

    #[error("Hardware error in {component}: {details}")]
    Hardware { component: String, details: String },

    #[error("Persistence error: {details}")]
    Persistence { details: String },
}

impl HomewatchError {
    pub fn already_active<S: Into<String>>(stream: S) -> Self {
        Self::AlreadyActive {
            stream: stream.into(),
        }
    }

    pub fn conflict<S: Into<String>>(details: S) -> Self {
        Self::Conflict {
            details: details.into(),
        }
    }

    pub fn invalid_argument<S: Into<String>>(details: S) -> Self {
        Self::InvalidArgument {
            details: details.into(),
        }
    }

    pub fn hardware<S: Into<String>>(component: S, details: S) -> Self {
        Self::Hardware {
            component: component.into(),
            details: details.into(),
        }
    }

    pub fn persistence<S: Into<String>>(details: S) -> Self {
        Self::Persistence {
            details: details.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HomewatchError>;
