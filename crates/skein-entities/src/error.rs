//! Error types for the entity cache.

use thiserror::Error;

use crate::EntityType;

/// Errors reported by the network layer.
///
/// Cloneable so one failed request can be handed to every caller that was
/// waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Rate limited.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited {
        /// Seconds to wait before retrying (from Retry-After header, optional).
        retry_after_secs: Option<u64>,
    },

    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// The response body could not be read or decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// HTTP status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::RateLimited { .. } => Some(429),
            ApiError::Network(_) | ApiError::InvalidResponse(_) => None,
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::InvalidResponse(e.to_string())
    }
}

/// Errors surfaced through hook state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityError {
    /// The payload failed schema validation and was not admitted.
    #[error("invalid {entity_type} payload: {message}")]
    Validation {
        entity_type: EntityType,
        message: String,
    },

    /// The request was rejected with 401 or 403.
    #[error("unauthorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    /// Any other request failure.
    #[error(transparent)]
    Api(ApiError),

    /// An action was attempted without the endpoint it needs.
    #[error("no {action} endpoint configured for {entity_type}")]
    MissingEndpoint {
        entity_type: EntityType,
        action: &'static str,
    },
}

impl EntityError {
    /// HTTP status behind this error, if it came from the network.
    pub fn status(&self) -> Option<u16> {
        match self {
            EntityError::Unauthorized { status, .. } => Some(*status),
            EntityError::Api(e) => e.status(),
            EntityError::Validation { .. } | EntityError::MissingEndpoint { .. } => None,
        }
    }

    /// True for 401 and 403 responses; callers redirect instead of rendering an error.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, EntityError::Unauthorized { .. })
    }

    /// True only for 403.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, EntityError::Unauthorized { status: 403, .. })
    }

    /// True when the payload was rejected by the schema.
    pub fn is_validation(&self) -> bool {
        matches!(self, EntityError::Validation { .. })
    }
}

impl From<ApiError> for EntityError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Http { status, message } if status == 401 || status == 403 => {
                EntityError::Unauthorized { status, message }
            }
            other => EntityError::Api(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_statuses() {
        let err = EntityError::from(ApiError::Http {
            status: 401,
            message: "The access token is invalid".to_string(),
        });
        assert!(err.is_unauthorized());
        assert!(!err.is_forbidden());
        assert_eq!(err.status(), Some(401));

        let err = EntityError::from(ApiError::Http {
            status: 403,
            message: "This action is not allowed".to_string(),
        });
        assert!(err.is_unauthorized());
        assert!(err.is_forbidden());
    }

    #[test]
    fn test_other_statuses_stay_api_errors() {
        let err = EntityError::from(ApiError::Http {
            status: 404,
            message: "Record not found".to_string(),
        });
        assert!(!err.is_unauthorized());
        assert!(matches!(err, EntityError::Api(ApiError::Http { status: 404, .. })));

        let err = EntityError::from(ApiError::RateLimited {
            retry_after_secs: Some(30),
        });
        assert_eq!(err.status(), Some(429));
        assert_eq!(err.to_string(), "rate limited (retry after 30s)");
    }

    #[test]
    fn test_validation_display() {
        let err = EntityError::Validation {
            entity_type: EntityType::Accounts,
            message: "missing field `id`".to_string(),
        };
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "invalid Accounts payload: missing field `id`");
    }
}
