//! Error types for verdant-bl
//!
//! One enum covers the lifecycle taxonomy. Validation and invariant
//! violations are returned synchronously; regulator failures are retried by
//! the sync worker and never reach the caller of the originating transition.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{BatchStatus, Domain, Stage};

/// Lifecycle error type
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Referenced entity does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Stage name not part of the domain's graph
    #[error("Unknown stage '{stage}' for {domain} domain")]
    UnknownStage { domain: Domain, stage: String },

    /// Target stage not reachable from the current stage
    #[error("Invalid transition {from} -> {to} for {domain} batch")]
    InvalidTransition {
        domain: Domain,
        from: Stage,
        to: Stage,
    },

    /// Target stage equals the current stage
    #[error("Batch is already in stage {0}")]
    NoOpTransition(Stage),

    /// Batch is quarantined
    #[error("Batch {0} is quarantined")]
    QuarantineBlocked(Uuid),

    /// Destroying a quarantined batch needs an explicit override
    #[error("Batch {0} is quarantined; destroy requires quarantine override")]
    QuarantineOverrideRequired(Uuid),

    /// Batch is completed or destroyed
    #[error("Batch {batch_id} is {status} and cannot be modified")]
    Terminal { batch_id: Uuid, status: BatchStatus },

    #[error("Batch {0} is already quarantined")]
    AlreadyQuarantined(Uuid),

    #[error("Batch {0} is not quarantined")]
    NotQuarantined(Uuid),

    /// Active pod assignments would exceed pod capacity
    #[error("Pod {pod_id} capacity exceeded: {requested} requested, {available} of {capacity} available")]
    CapacityExceeded {
        pod_id: Uuid,
        capacity: i64,
        available: i64,
        requested: i64,
    },

    /// Batch already has an active recipe activation
    #[error("Batch {batch_id} already has active recipe activation {activation_id}")]
    DuplicateRecipeActive { batch_id: Uuid, activation_id: Uuid },

    #[error("Recipe activation {0} is already inactive")]
    RecipeAlreadyInactive(Uuid),

    /// Jurisdiction requires a waste manifest acknowledgement for this destroy
    #[error("Destroying batch {batch_id} with {plant_count} plants requires a waste manifest acknowledgement")]
    ManifestAcknowledgementRequired { batch_id: Uuid, plant_count: i64 },

    /// Invalid input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Regulator call failed (retried by the sync worker)
    #[error("External sync failure: {0}")]
    ExternalSyncFailure(String),

    /// First effect committed, second failed; retry the second independently
    #[error("Partial success: {completed} recorded, {failed_step} failed: {reason}")]
    PartialSuccess {
        completed: String,
        failed_step: &'static str,
        reason: String,
    },

    /// Optimistic concurrency retries exhausted
    #[error("Concurrent modification of {entity} {id}; retry the request")]
    ConcurrentModification { entity: &'static str, id: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Common error: {0}")]
    Common(#[from] verdant_common::Error),
}

/// Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;

impl LifecycleError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        LifecycleError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// True when the operation should be re-read and re-validated
    pub fn is_retryable_conflict(&self) -> bool {
        match self {
            LifecycleError::ConcurrentModification { .. } => true,
            LifecycleError::Database(db_err) => {
                db_err.to_string().contains("database is locked")
            }
            LifecycleError::Common(err) => err.is_lock_contention(),
            _ => false,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            LifecycleError::NotFound { .. } => "NOT_FOUND",
            LifecycleError::UnknownStage { .. } => "UNKNOWN_STAGE",
            LifecycleError::InvalidTransition { .. } => "INVALID_TRANSITION",
            LifecycleError::NoOpTransition(_) => "NO_OP_TRANSITION",
            LifecycleError::QuarantineBlocked(_) => "QUARANTINE_BLOCKED",
            LifecycleError::QuarantineOverrideRequired(_) => "QUARANTINE_OVERRIDE_REQUIRED",
            LifecycleError::Terminal { .. } => "TERMINAL",
            LifecycleError::AlreadyQuarantined(_) => "ALREADY_QUARANTINED",
            LifecycleError::NotQuarantined(_) => "NOT_QUARANTINED",
            LifecycleError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            LifecycleError::DuplicateRecipeActive { .. } => "DUPLICATE_RECIPE_ACTIVE",
            LifecycleError::RecipeAlreadyInactive(_) => "RECIPE_ALREADY_INACTIVE",
            LifecycleError::ManifestAcknowledgementRequired { .. } => "MANIFEST_ACK_REQUIRED",
            LifecycleError::Validation(_) => "VALIDATION_ERROR",
            LifecycleError::ExternalSyncFailure(_) => "EXTERNAL_SYNC_FAILURE",
            LifecycleError::PartialSuccess { .. } => "PARTIAL_SUCCESS",
            LifecycleError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            LifecycleError::Database(_) => "DATABASE_ERROR",
            LifecycleError::Common(_) => "COMMON_ERROR",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            LifecycleError::NotFound { .. } => StatusCode::NOT_FOUND,
            LifecycleError::UnknownStage { .. } | LifecycleError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            LifecycleError::InvalidTransition { .. }
            | LifecycleError::NoOpTransition(_)
            | LifecycleError::QuarantineBlocked(_)
            | LifecycleError::QuarantineOverrideRequired(_)
            | LifecycleError::Terminal { .. }
            | LifecycleError::AlreadyQuarantined(_)
            | LifecycleError::NotQuarantined(_)
            | LifecycleError::CapacityExceeded { .. }
            | LifecycleError::DuplicateRecipeActive { .. }
            | LifecycleError::RecipeAlreadyInactive(_)
            | LifecycleError::ManifestAcknowledgementRequired { .. }
            | LifecycleError::ConcurrentModification { .. } => StatusCode::CONFLICT,
            LifecycleError::PartialSuccess { .. } => StatusCode::MULTI_STATUS,
            LifecycleError::ExternalSyncFailure(_) => StatusCode::BAD_GATEWAY,
            LifecycleError::Database(_) | LifecycleError::Common(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for LifecycleError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_errors_are_retryable() {
        let err = LifecycleError::ConcurrentModification {
            entity: "batch",
            id: Uuid::nil(),
        };
        assert!(err.is_retryable_conflict());
        assert!(!LifecycleError::Validation("x".into()).is_retryable_conflict());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            LifecycleError::not_found("batch", "x").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            LifecycleError::NoOpTransition(Stage::Vegetative).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            LifecycleError::Validation("bad".into()).code(),
            "VALIDATION_ERROR"
        );
    }
}
