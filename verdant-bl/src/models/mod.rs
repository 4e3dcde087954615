//! Data models for verdant-bl

pub mod batch;
pub mod destruction;
pub mod harvest;
pub mod pod;
pub mod recipe;
pub mod stage;
pub mod sync;
pub mod tags;

pub use batch::{Batch, BatchEvent, BatchStatus, EventType, NewBatch, StageHistoryEntry, TransitionOutcome};
pub use destruction::{DestroyOptions, DestroyOutcome, WasteLog};
pub use harvest::{
    HarvestInput, HarvestOutcome, HarvestRecord, InventoryPostingRequest, InventoryPostingStatus,
    InventoryUsageEntry, MovementType, PlantWeight,
};
pub use pod::{Pod, PodAssignment};
pub use recipe::{
    NewRecipeStage, NewSetpoint, ParameterEvaluation, ParameterType, Recipe, RecipeActivation,
    RecipeDefinition, RecipeStage, RecipeVersion, Setpoint, SetpointEvaluation, SetpointStatus,
    TelemetryReading,
};
pub use stage::{Domain, RegulatoryPhase, Stage};
pub use sync::{PhaseChangeJob, SyncJob, SyncStatus};
pub use tags::{InvalidTag, TagAssignmentResult, TagCompletion};
