use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    Schema,
    Predicate,
    Encode,
    Decode,
    Conflict,
    Closed,
    Backend,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotFound => "not_found",
            ErrorCode::Schema => "schema",
            ErrorCode::Predicate => "predicate",
            ErrorCode::Encode => "encode",
            ErrorCode::Decode => "decode",
            ErrorCode::Conflict => "conflict",
            ErrorCode::Closed => "closed",
            ErrorCode::Backend => "backend",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("schema error: {0}")]
    Schema(String),
    #[error("predicate error: {0}")]
    Predicate(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("store is closed")]
    Closed,
    #[error("backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: rusqlite::Error,
    },
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::NotFound => ErrorCode::NotFound,
            StoreError::Schema(_) => ErrorCode::Schema,
            StoreError::Predicate(_) => ErrorCode::Predicate,
            StoreError::Encode(_) => ErrorCode::Encode,
            StoreError::Decode(_) => ErrorCode::Decode,
            StoreError::Conflict(_) => ErrorCode::Conflict,
            StoreError::Closed => ErrorCode::Closed,
            StoreError::Backend { .. } => ErrorCode::Backend,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    /// Wraps a backend failure, translating contention the backend declines
    /// to serialise into the `Conflict` kind.
    pub(crate) fn backend(context: impl Into<String>, source: rusqlite::Error) -> Self {
        let context = context.into();
        if let rusqlite::Error::SqliteFailure(failure, _) = &source {
            if matches!(
                failure.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) {
                return StoreError::Conflict(context);
            }
        }
        StoreError::Backend { context, source }
    }
}
