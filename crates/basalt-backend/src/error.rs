use std::fmt;

use basalt_query::QueryError;
use bson::Document;

/// A failure that crosses the wire as `{ok: 0, errmsg, code?, codeName?}`.
#[derive(Debug, Clone)]
pub enum ServerError {
    /// Coded failure; the numeric code is part of the client contract.
    Coded {
        code: i32,
        code_name: Option<&'static str>,
        message: String,
    },
    /// Failure without a wire code. Silent failures are expected client
    /// mistakes and skip server-side logging.
    Failed { message: String, silent: bool },
    /// Router fallback for an unknown command name.
    NoSuchCommand(String),
    /// A handler demanded a collection that does not exist.
    NoSuchCollection(String),
}

impl ServerError {
    pub fn coded(code: i32, message: impl Into<String>) -> Self {
        ServerError::Coded {
            code,
            code_name: None,
            message: message.into(),
        }
    }

    pub fn named(code: i32, code_name: &'static str, message: impl Into<String>) -> Self {
        ServerError::Coded {
            code,
            code_name: Some(code_name),
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        ServerError::Failed {
            message: message.into(),
            silent: false,
        }
    }

    pub fn silent(message: impl Into<String>) -> Self {
        ServerError::Failed {
            message: message.into(),
            silent: true,
        }
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ServerError::Coded { code, .. } => Some(*code),
            ServerError::NoSuchCommand(_) => Some(59),
            ServerError::Failed { .. } | ServerError::NoSuchCollection(_) => None,
        }
    }

    pub fn code_name(&self) -> Option<&str> {
        match self {
            ServerError::Coded { code_name, .. } => *code_name,
            ServerError::NoSuchCommand(_) => Some("CommandNotFound"),
            ServerError::Failed { .. } | ServerError::NoSuchCollection(_) => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ServerError::Coded { message, .. } | ServerError::Failed { message, .. } => {
                message.clone()
            }
            ServerError::NoSuchCommand(name) => format!("no such cmd: {name}"),
            ServerError::NoSuchCollection(name) => {
                format!("collection [{name}] does not exist")
            }
        }
    }

    pub fn is_silent(&self) -> bool {
        matches!(self, ServerError::Failed { silent: true, .. })
    }

    /// The command-path response document.
    pub fn to_response(&self) -> Document {
        let mut response = Document::new();
        response.insert("ok", 0);
        response.insert("errmsg", self.message());
        if let Some(code) = self.code() {
            response.insert("code", code);
        }
        if let Some(code_name) = self.code_name() {
            response.insert("codeName", code_name);
        }
        response
    }

    /// The document recorded in a channel's error history.
    pub fn to_error_document(&self, channel: i32) -> Document {
        let mut error = Document::new();
        error.insert("err", self.message());
        if let Some(code) = self.code() {
            error.insert("code", code);
        }
        if let Some(code_name) = self.code_name() {
            error.insert("codeName", code_name);
        }
        error.insert("connectionId", channel);
        error
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code() {
            Some(code) => write!(f, "[error {code}] {}", self.message()),
            None => write!(f, "{}", self.message()),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<QueryError> for ServerError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::BadValue(_) => ServerError::named(2, "BadValue", e.to_string()),
            QueryError::FailedToParse(_) => ServerError::named(9, "FailedToParse", e.to_string()),
            QueryError::TypeMismatch(_) => ServerError::named(14, "TypeMismatch", e.to_string()),
            QueryError::ImmutableField(_) => {
                ServerError::named(66, "ImmutableField", e.to_string())
            }
        }
    }
}

/// The canonical duplicate-key failure (code 11000).
#[cfg(feature = "memory")]
pub(crate) fn duplicate_key(ns: &str, index: &str, key: &[bson::Bson]) -> ServerError {
    let rendered: Vec<String> = key.iter().map(|v| format!(" : {v}")).collect();
    ServerError::named(
        11000,
        "DuplicateKey",
        format!(
            "E11000 duplicate key error collection: {ns} index: {index} dup key: {{{} }}",
            rendered.join(",")
        ),
    )
}
