use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum RelayError {
    #[error("Invalid sensor URL '{0}': expected kind://name[!][@topic][?gap=N]")]
    InvalidSensorUrl(String),

    #[error("Unknown sensor kind: {0}")]
    UnknownSensorKind(String),

    #[error("Duplicate sensor name: {0}")]
    DuplicateSensor(String),

    #[error("Sensor {sensor} cannot decode payload: {reason}")]
    Decode { sensor: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chat API error: {0}")]
    Chat(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Mqtt(#[from] rumqttc::ClientError),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
