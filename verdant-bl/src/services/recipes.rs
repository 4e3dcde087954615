//! Recipe activation tracker

use std::collections::HashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;
use verdant_common::events::LifecycleEvent;
use verdant_common::time;

use super::{event_notes, require_text, LifecycleService};
use crate::db;
use crate::error::{LifecycleError, Result};
use crate::models::recipe::evaluate_parameters;
use crate::models::{
    EventType, NewRecipeStage, Recipe, RecipeActivation, RecipeDefinition, RecipeStage,
    RecipeVersion, Setpoint, SetpointEvaluation, SetpointStatus, TelemetryReading,
};
use crate::utils::retry_on_conflict;

impl LifecycleService {
    /// Create a recipe with its first version
    pub async fn define_recipe(&self, name: &str, stages: &[NewRecipeStage]) -> Result<RecipeDefinition> {
        let name = require_text("recipe name", name)?;
        validate_stages(stages)?;

        let recipe = Recipe {
            id: Uuid::new_v4(),
            name,
        };

        let mut tx = self.pool.begin().await?;
        db::recipes::insert_recipe(&mut tx, &recipe).await?;
        let definition = insert_version(&mut tx, recipe, 1, stages).await?;
        tx.commit().await?;

        info!(
            recipe_id = %definition.recipe.id,
            version = definition.version.version,
            stages = definition.stages.len(),
            "Recipe defined"
        );
        Ok(definition)
    }

    /// Add the next version of an existing recipe
    pub async fn add_recipe_version(
        &self,
        recipe_id: Uuid,
        stages: &[NewRecipeStage],
    ) -> Result<RecipeDefinition> {
        validate_stages(stages)?;

        let definition = retry_on_conflict("add_recipe_version", || async {
            let mut tx = self.pool.begin().await?;
            let recipe = db::recipes::load_recipe(&mut tx, recipe_id).await?;
            let next = db::recipes::latest_version_number(&mut tx, recipe_id)
                .await?
                .unwrap_or(0)
                + 1;
            let definition = insert_version(&mut tx, recipe, next, stages).await?;
            tx.commit().await?;
            Ok(definition)
        })
        .await?;

        info!(
            recipe_id = %recipe_id,
            version = definition.version.version,
            "Recipe version added"
        );
        Ok(definition)
    }

    /// Bind a recipe version to a batch, starting at its first stage on day 1
    pub async fn activate_recipe(
        &self,
        batch_id: Uuid,
        recipe_id: Uuid,
        recipe_version_id: Uuid,
        actor: &str,
    ) -> Result<RecipeActivation> {
        let activation = retry_on_conflict("activate_recipe", || async {
            let mut tx = self.pool.begin().await?;
            let mut batch = db::batches::load_batch(&mut tx, batch_id).await?;
            batch.ensure_mutable()?;

            if let Some(active) = db::recipes::active_activation_for_batch(&mut tx, batch_id).await? {
                return Err(LifecycleError::DuplicateRecipeActive {
                    batch_id,
                    activation_id: active.id,
                });
            }

            let version = db::recipes::load_version(&mut tx, recipe_version_id).await?;
            if version.recipe_id != recipe_id {
                return Err(LifecycleError::Validation(format!(
                    "recipe version {} does not belong to recipe {}",
                    recipe_version_id, recipe_id
                )));
            }
            let stages = db::recipes::list_stages(&mut tx, recipe_version_id).await?;
            let first_stage = stages.first().ok_or_else(|| {
                LifecycleError::Validation(format!(
                    "recipe version {} has no stages",
                    recipe_version_id
                ))
            })?;

            let now = time::now();
            let activation = RecipeActivation {
                id: Uuid::new_v4(),
                batch_id,
                recipe_id,
                recipe_version_id,
                current_stage_id: first_stage.id,
                current_stage_day: 1,
                active: true,
                activated_at: now,
                activated_by: actor.to_string(),
                deactivated_at: None,
                deactivated_by: None,
                deactivation_reason: None,
            };
            db::recipes::insert_activation(&mut tx, &activation).await?;

            batch.active_activation_id = Some(activation.id);
            db::batches::save_batch(&mut tx, &mut batch).await?;
            db::history::append_event(
                &mut tx,
                batch_id,
                EventType::RecipeActivated,
                actor,
                Some(&format!(
                    "recipe {} v{}, stage {}",
                    recipe_id, version.version, first_stage.name
                )),
                now,
            )
            .await?;

            tx.commit().await?;
            Ok(activation)
        })
        .await?;

        info!(
            batch_id = %batch_id,
            activation_id = %activation.id,
            recipe_version_id = %recipe_version_id,
            "Recipe activated"
        );
        self.emit(LifecycleEvent::RecipeActivated {
            batch_id,
            activation_id: activation.id,
            recipe_version_id,
            timestamp: activation.activated_at,
        });

        Ok(activation)
    }

    /// End an activation; `RecipeAlreadyInactive` if it already ended
    pub async fn deactivate_recipe(
        &self,
        activation_id: Uuid,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<RecipeActivation> {
        let activation = retry_on_conflict("deactivate_recipe", || async {
            let mut tx = self.pool.begin().await?;
            let activation = db::recipes::load_activation(&mut tx, activation_id).await?;
            if !activation.active {
                return Err(LifecycleError::RecipeAlreadyInactive(activation_id));
            }

            let mut batch = db::batches::load_batch(&mut tx, activation.batch_id).await?;
            batch.ensure_mutable()?;

            let now = time::now();
            if !db::recipes::deactivate(&mut tx, activation_id, now, actor, reason).await? {
                return Err(LifecycleError::ConcurrentModification {
                    entity: "recipe activation",
                    id: activation_id,
                });
            }
            if batch.active_activation_id == Some(activation_id) {
                batch.active_activation_id = None;
            }
            db::batches::save_batch(&mut tx, &mut batch).await?;
            db::history::append_event(
                &mut tx,
                batch.id,
                EventType::RecipeDeactivated,
                actor,
                Some(&event_notes(format!("activation {}", activation_id), reason)),
                now,
            )
            .await?;

            let activation = db::recipes::load_activation(&mut tx, activation_id).await?;
            tx.commit().await?;
            Ok(activation)
        })
        .await?;

        info!(
            batch_id = %activation.batch_id,
            activation_id = %activation_id,
            actor,
            "Recipe deactivated"
        );
        self.emit(LifecycleEvent::RecipeDeactivated {
            batch_id: activation.batch_id,
            activation_id,
            timestamp: activation.deactivated_at.unwrap_or_else(time::now),
        });

        Ok(activation)
    }

    pub async fn active_recipe(&self, batch_id: Uuid) -> Result<Option<RecipeActivation>> {
        let mut conn = self.pool.acquire().await?;
        db::batches::load_batch(&mut conn, batch_id).await?;
        db::recipes::active_activation_for_batch(&mut conn, batch_id).await
    }

    /// Compare a reading against the batch's current recipe stage
    ///
    /// Recomputed on every call and never stored. Without an active recipe
    /// every parameter is `no-target`.
    pub async fn evaluate(&self, batch_id: Uuid, reading: &TelemetryReading) -> Result<SetpointEvaluation> {
        let mut conn = self.pool.acquire().await?;
        db::batches::load_batch(&mut conn, batch_id).await?;

        let activation = db::recipes::active_activation_for_batch(&mut conn, batch_id).await?;
        let setpoints: Vec<Setpoint> = match &activation {
            Some(a) => {
                db::recipes::list_setpoints(&mut conn, a.recipe_version_id, a.current_stage_id).await?
            }
            None => Vec::new(),
        };

        let parameters = evaluate_parameters(&setpoints, reading);
        let out_of_range = parameters
            .iter()
            .filter(|p| p.status == SetpointStatus::OutOfRange)
            .map(|p| p.parameter.as_str())
            .collect::<Vec<_>>();
        if !out_of_range.is_empty() {
            debug!(
                batch_id = %batch_id,
                pod_id = %reading.pod_id,
                parameters = ?out_of_range,
                "Telemetry outside recipe setpoints"
            );
        }

        Ok(SetpointEvaluation {
            batch_id,
            pod_id: reading.pod_id,
            activation_id: activation.as_ref().map(|a| a.id),
            stage_id: activation.as_ref().map(|a| a.current_stage_id),
            reading_timestamp: reading.timestamp,
            parameters,
        })
    }

    /// Evaluate the latest reading of every pod the batch occupies
    ///
    /// Pods that never reported are left out.
    pub async fn evaluate_latest(&self, batch_id: Uuid) -> Result<Vec<SetpointEvaluation>> {
        let assignments = self.pod_assignments(batch_id, true).await?;

        let mut pods = HashSet::new();
        let mut evaluations = Vec::new();
        for assignment in assignments {
            if !pods.insert(assignment.pod_id) {
                continue;
            }
            match self.telemetry.latest_reading(assignment.pod_id).await? {
                Some(reading) => evaluations.push(self.evaluate(batch_id, &reading).await?),
                None => debug!(
                    batch_id = %batch_id,
                    pod_id = %assignment.pod_id,
                    "No telemetry for pod"
                ),
            }
        }

        Ok(evaluations)
    }

    /// Count one more day on an activation
    ///
    /// Past the stage's `duration_days` the activation moves to the next
    /// recipe stage at day 1; the final stage keeps counting.
    pub async fn advance_recipe_day(&self, activation_id: Uuid) -> Result<RecipeActivation> {
        let (activation, advanced_to) = retry_on_conflict("advance_recipe_day", || async {
            let mut tx = self.pool.begin().await?;
            let current = db::recipes::load_activation(&mut tx, activation_id).await?;
            if !current.active {
                return Err(LifecycleError::RecipeAlreadyInactive(activation_id));
            }

            let stages = db::recipes::list_stages(&mut tx, current.recipe_version_id).await?;
            let index = stages
                .iter()
                .position(|s| s.id == current.current_stage_id)
                .ok_or_else(|| {
                    LifecycleError::Common(verdant_common::Error::Internal(format!(
                        "activation {} points at unknown recipe stage {}",
                        activation_id, current.current_stage_id
                    )))
                })?;

            let day = current.current_stage_day + 1;
            let (stage_id, stage_day, advanced_to) = match stages.get(index + 1) {
                Some(next) if day > stages[index].duration_days => (next.id, 1, Some(next.name.clone())),
                _ => (current.current_stage_id, day, None),
            };

            db::recipes::update_progress(&mut tx, &current, stage_id, stage_day).await?;
            if let Some(name) = &advanced_to {
                db::history::append_event(
                    &mut tx,
                    current.batch_id,
                    EventType::RecipeStageAdvanced,
                    "cadence",
                    Some(&format!("recipe stage {}", name)),
                    time::now(),
                )
                .await?;
            }

            tx.commit().await?;
            Ok((
                RecipeActivation {
                    current_stage_id: stage_id,
                    current_stage_day: stage_day,
                    ..current
                },
                advanced_to,
            ))
        })
        .await?;

        match advanced_to {
            Some(stage) => info!(
                activation_id = %activation_id,
                batch_id = %activation.batch_id,
                recipe_stage = %stage,
                "Recipe advanced to next stage"
            ),
            None => debug!(
                activation_id = %activation_id,
                day = activation.current_stage_day,
                "Recipe day advanced"
            ),
        }

        Ok(activation)
    }

    /// Advance every active activation by one day; returns how many advanced
    pub async fn advance_all_recipe_days(&self) -> Result<usize> {
        let active = {
            let mut conn = self.pool.acquire().await?;
            db::recipes::list_active_activations(&mut conn).await?
        };

        let mut advanced = 0;
        for activation in active {
            match self.advance_recipe_day(activation.id).await {
                Ok(_) => advanced += 1,
                Err(LifecycleError::RecipeAlreadyInactive(_)) => {}
                Err(e) => warn!(
                    activation_id = %activation.id,
                    error = %e,
                    "Failed to advance recipe day"
                ),
            }
        }

        Ok(advanced)
    }
}

fn validate_stages(stages: &[NewRecipeStage]) -> Result<()> {
    if stages.is_empty() {
        return Err(LifecycleError::Validation(
            "a recipe version needs at least one stage".to_string(),
        ));
    }

    for stage in stages {
        require_text("recipe stage name", &stage.name)?;
        if stage.duration_days <= 0 {
            return Err(LifecycleError::Validation(format!(
                "recipe stage '{}' duration must be positive",
                stage.name
            )));
        }

        let mut parameters = HashSet::new();
        for sp in &stage.setpoints {
            if !sp.min_value.is_finite() || !sp.max_value.is_finite() || sp.min_value > sp.max_value {
                return Err(LifecycleError::Validation(format!(
                    "setpoint {} in stage '{}' needs finite min <= max",
                    sp.parameter_type, stage.name
                )));
            }
            if !parameters.insert(sp.parameter_type) {
                return Err(LifecycleError::Validation(format!(
                    "stage '{}' sets {} twice",
                    stage.name, sp.parameter_type
                )));
            }
        }
    }

    Ok(())
}

async fn insert_version(
    conn: &mut sqlx::SqliteConnection,
    recipe: Recipe,
    number: i64,
    stages: &[NewRecipeStage],
) -> Result<RecipeDefinition> {
    let version = RecipeVersion {
        id: Uuid::new_v4(),
        recipe_id: recipe.id,
        version: number,
    };
    db::recipes::insert_version(conn, &version).await?;

    let mut stored_stages = Vec::with_capacity(stages.len());
    let mut setpoints = Vec::new();
    for (order, stage) in stages.iter().enumerate() {
        let stored = RecipeStage {
            id: Uuid::new_v4(),
            recipe_version_id: version.id,
            stage_order: order as i64 + 1,
            name: stage.name.trim().to_string(),
            duration_days: stage.duration_days,
        };
        db::recipes::insert_stage(conn, &stored).await?;

        for sp in &stage.setpoints {
            let setpoint = Setpoint {
                recipe_version_id: version.id,
                stage_id: stored.id,
                parameter_type: sp.parameter_type,
                min_value: sp.min_value,
                max_value: sp.max_value,
            };
            db::recipes::insert_setpoint(conn, &setpoint).await?;
            setpoints.push(setpoint);
        }
        stored_stages.push(stored);
    }

    Ok(RecipeDefinition {
        recipe,
        version,
        stages: stored_stages,
        setpoints,
    })
}
