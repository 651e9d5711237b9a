use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

// Implement conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

// Implement conversion from sqlx::Error
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.into())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Record not found")]
    NotFound,

    #[error("Duplicate record")]
    Duplicate,

    #[error("Invalid stored value in column {column}: {value}")]
    Decode { column: String, value: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Media error: {0}")]
    Media(String),
}

/// SQLSTATE for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound,
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
                DatabaseError::ConnectionError(err.to_string())
            }
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) => DatabaseError::ConnectionError(err.to_string()),
            sqlx::Error::Database(ref db_err)
                if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                DatabaseError::Duplicate
            }
            _ => DatabaseError::QueryError(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::InternalError(_)));

        let config_err = config::ConfigError::NotFound(String::from("key not found"));
        let app_err: AppError = config_err.into();
        assert!(matches!(app_err, AppError::ConfigError(_)));

        let app_err: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(app_err, AppError::DatabaseError(DatabaseError::NotFound)));
    }

    #[test]
    fn test_pool_errors_are_connection_errors() {
        let err: DatabaseError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, DatabaseError::ConnectionError(_)));

        let err: DatabaseError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, DatabaseError::ConnectionError(_)));

        let err: DatabaseError = sqlx::Error::Protocol("bad frame".into()).into();
        assert!(matches!(err, DatabaseError::QueryError(_)));
    }

    #[test]
    fn test_error_display() {
        let err = AppError::DatabaseError(DatabaseError::NotFound);
        assert_eq!(err.to_string(), "Database error: Record not found");

        let err = DatabaseError::Decode {
            column: "gender".to_string(),
            value: "robot".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid stored value in column gender: robot");

        let err = DatabaseError::Validation("age out of range".to_string());
        assert_eq!(err.to_string(), "Validation error: age out of range");
    }
}
