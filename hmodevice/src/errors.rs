use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Unknown device type '{0}'")]
    UnknownType(String),
    #[error("Device {0} has no usable address")]
    MissingAddress(String),
    #[error("Operation '{0}' is not supported by {1} devices")]
    NotSupported(String, String),
    #[error("HTTP error talking to {0}: {1}")]
    Http(String, String),
    #[error("{0} returned HTTP status {1}: {2}")]
    Soap(String, u16, String),
    #[error("Missing {0} element in SOAP body")]
    SoapMissingValue(String),
    #[error("Invalid response from device: {0}")]
    Parsing(String),
    #[error("Invalid time format: {0}")]
    InvalidTimeFormat(String),
    /// The device answered but refused the command; the message is the
    /// device's own.
    #[error("{message}")]
    Rejected { code: i32, message: String },
}

impl DeviceError {
    pub fn http(target: &str, err: impl std::fmt::Display) -> Self {
        DeviceError::Http(target.to_string(), err.to_string())
    }

    pub fn not_supported(operation: &str, kind: &str) -> Self {
        DeviceError::NotSupported(operation.to_string(), kind.to_string())
    }
}
