use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
}

#[derive(Debug, Display, Error)]
pub enum FeedError {
    #[display("failed to connect to {endpoint}")]
    Connection { endpoint: String },
    #[display("request to {endpoint} failed")]
    Request { endpoint: String },
    #[display("failed to parse payload from {endpoint}")]
    ResponseParse { endpoint: String },
    #[display("failed to send to {endpoint}")]
    Send { endpoint: String },
}

#[derive(Debug, Display, Error)]
pub enum IndicatorError {
    #[display("invalid parameter: {name}")]
    InvalidParameter { name: String },
    #[display("unknown indicator kind: {kind}")]
    UnknownKind { kind: String },
}

#[derive(Debug, Display, Error)]
pub enum SessionError {
    #[display("chart session has shut down")]
    Closed,
}
