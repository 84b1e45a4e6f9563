use std::fmt;

/// Classification of database failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    /// Row lookup came back empty
    NotFound { entity: String, id: String },
    /// A unique constraint rejected the write
    UniqueViolation { constraint: Option<String> },
    /// Pool exhausted, connection dropped, I/O failure
    Connection,
    /// Serialization failure or deadlock; the transaction may be retried
    TransactionConflict,
    /// Anything else reported by Postgres or sqlx
    Query,
}

#[derive(Debug, Clone)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
    pub message: String,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        let entity = entity.into();
        let id = id.to_string();
        Self::new(
            DatabaseErrorKind::NotFound {
                entity: entity.clone(),
                id: id.clone(),
            },
            format!("{} '{}' not found", entity, id),
        )
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::new(
                DatabaseErrorKind::NotFound {
                    entity: "row".to_string(),
                    id: String::new(),
                },
                err.to_string(),
            ),
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // unique_violation
                Some("23505") => Self::new(
                    DatabaseErrorKind::UniqueViolation {
                        constraint: db_err.constraint().map(str::to_string),
                    },
                    db_err.message(),
                ),
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => {
                    Self::new(DatabaseErrorKind::TransactionConflict, db_err.message())
                }
                _ => Self::new(DatabaseErrorKind::Query, db_err.message()),
            },
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => Self::new(DatabaseErrorKind::Connection, err.to_string()),
            _ => Self::new(DatabaseErrorKind::Query, err.to_string()),
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::Connection | DatabaseErrorKind::TransactionConflict
        )
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Database error ({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for DatabaseError {}

impl From<DatabaseError> for crate::error::AppError {
    fn from(err: DatabaseError) -> Self {
        use crate::error::{AppErrorKind, InfrastructureError};

        let is_retryable = err.is_retryable();
        crate::error::AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: err.message,
            is_retryable,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err = DatabaseError::from_sqlx(sqlx::Error::RowNotFound);
        assert!(matches!(err.kind, DatabaseErrorKind::NotFound { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_pool_timeout_is_retryable() {
        let err = DatabaseError::from_sqlx(sqlx::Error::PoolTimedOut);
        assert_eq!(err.kind, DatabaseErrorKind::Connection);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_not_found_message() {
        let err = DatabaseError::not_found("user", 42);
        assert_eq!(err.message, "user '42' not found");
    }
}
