use sea_orm::error::DbErr;
use serde::Serialize;

/// Errors raised by the allocation engine and its services.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Measurement master data that cannot be resolved (cycle, dangling parent, missing base).
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Incompatible units: measurement {from} cannot be converted to measurement {to}")]
    IncompatibleUnits { from: i64, to: i64 },

    #[error("Unknown measurement: {0}")]
    UnknownMeasurement(i64),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// Whether the error comes from broken measurement master data rather than the caller.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ServiceError::ConfigurationError(_) | ServiceError::UnknownMeasurement(_)
        )
    }
}

/// Startup errors: configuration, connection and migrations.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::config::AppConfigError),

    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incompatible_units_message_names_both_units() {
        let err = ServiceError::IncompatibleUnits { from: 3, to: 7 };
        assert_eq!(
            err.to_string(),
            "Incompatible units: measurement 3 cannot be converted to measurement 7"
        );
    }

    #[test]
    fn configuration_errors_are_classified() {
        assert!(ServiceError::ConfigurationError("cycle".into()).is_configuration());
        assert!(ServiceError::UnknownMeasurement(1).is_configuration());
        assert!(!ServiceError::NotFound("x".into()).is_configuration());
    }

    #[test]
    fn db_error_wraps_strings() {
        let err = ServiceError::db_error("boom");
        assert!(matches!(err, ServiceError::DatabaseError(DbErr::Custom(ref m)) if m == "boom"));
    }
}
