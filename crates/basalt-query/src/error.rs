use std::fmt;

#[derive(Debug, Clone)]
pub enum QueryError {
    BadValue(String),
    FailedToParse(String),
    TypeMismatch(String),
    ImmutableField(String),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::BadValue(msg) => write!(f, "bad value: {msg}"),
            QueryError::FailedToParse(msg) => write!(f, "failed to parse: {msg}"),
            QueryError::TypeMismatch(msg) => write!(f, "type mismatch: {msg}"),
            QueryError::ImmutableField(msg) => write!(f, "immutable field: {msg}"),
        }
    }
}

impl std::error::Error for QueryError {}
