//! Recipe catalog and activations

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use uuid::Uuid;
use verdant_common::time;

use super::{is_unique_violation, parse_column, parse_uuid};
use crate::error::{LifecycleError, Result};
use crate::models::{Recipe, RecipeActivation, RecipeStage, RecipeVersion, Setpoint};

const ACTIVATION_COLUMNS: &str = r#"
    id, batch_id, recipe_id, recipe_version_id, current_stage_id, current_stage_day,
    active, activated_at, activated_by, deactivated_at, deactivated_by, deactivation_reason
"#;

pub async fn insert_recipe(conn: &mut SqliteConnection, recipe: &Recipe) -> Result<()> {
    sqlx::query("INSERT INTO recipes (id, name) VALUES (?, ?)")
        .bind(recipe.id.to_string())
        .bind(&recipe.name)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn load_recipe(conn: &mut SqliteConnection, recipe_id: Uuid) -> Result<Recipe> {
    let row = sqlx::query("SELECT id, name FROM recipes WHERE id = ?")
        .bind(recipe_id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LifecycleError::not_found("recipe", recipe_id))?;

    Ok(Recipe {
        id: parse_uuid("id", row.get("id"))?,
        name: row.get("name"),
    })
}

pub async fn insert_version(conn: &mut SqliteConnection, version: &RecipeVersion) -> Result<()> {
    let result = sqlx::query("INSERT INTO recipe_versions (id, recipe_id, version) VALUES (?, ?, ?)")
        .bind(version.id.to_string())
        .bind(version.recipe_id.to_string())
        .bind(version.version)
        .execute(&mut *conn)
        .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(LifecycleError::Validation(format!(
            "recipe {} already has version {}",
            version.recipe_id, version.version
        ))),
        Err(e) => Err(e.into()),
    }
}

pub async fn load_version(conn: &mut SqliteConnection, version_id: Uuid) -> Result<RecipeVersion> {
    let row = sqlx::query("SELECT id, recipe_id, version FROM recipe_versions WHERE id = ?")
        .bind(version_id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LifecycleError::not_found("recipe version", version_id))?;

    Ok(RecipeVersion {
        id: parse_uuid("id", row.get("id"))?,
        recipe_id: parse_uuid("recipe_id", row.get("recipe_id"))?,
        version: row.get("version"),
    })
}

/// Highest version number of a recipe, `None` before the first version
pub async fn latest_version_number(conn: &mut SqliteConnection, recipe_id: Uuid) -> Result<Option<i64>> {
    let latest: Option<i64> =
        sqlx::query_scalar("SELECT MAX(version) FROM recipe_versions WHERE recipe_id = ?")
            .bind(recipe_id.to_string())
            .fetch_one(&mut *conn)
            .await?;
    Ok(latest)
}

pub async fn insert_stage(conn: &mut SqliteConnection, stage: &RecipeStage) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO recipe_stages (id, recipe_version_id, stage_order, name, duration_days)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(stage.id.to_string())
    .bind(stage.recipe_version_id.to_string())
    .bind(stage.stage_order)
    .bind(&stage.name)
    .bind(stage.duration_days)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Stages of a version in `stage_order`
pub async fn list_stages(conn: &mut SqliteConnection, version_id: Uuid) -> Result<Vec<RecipeStage>> {
    let rows = sqlx::query(
        r#"
        SELECT id, recipe_version_id, stage_order, name, duration_days
        FROM recipe_stages WHERE recipe_version_id = ? ORDER BY stage_order
        "#,
    )
    .bind(version_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<RecipeStage> {
            Ok(RecipeStage {
                id: parse_uuid("id", row.get("id"))?,
                recipe_version_id: parse_uuid("recipe_version_id", row.get("recipe_version_id"))?,
                stage_order: row.get("stage_order"),
                name: row.get("name"),
                duration_days: row.get("duration_days"),
            })
        })
        .collect()
}

pub async fn insert_setpoint(conn: &mut SqliteConnection, setpoint: &Setpoint) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO setpoints (recipe_version_id, stage_id, parameter_type, min_value, max_value)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(setpoint.recipe_version_id.to_string())
    .bind(setpoint.stage_id.to_string())
    .bind(setpoint.parameter_type.as_str())
    .bind(setpoint.min_value)
    .bind(setpoint.max_value)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn list_setpoints(
    conn: &mut SqliteConnection,
    version_id: Uuid,
    stage_id: Uuid,
) -> Result<Vec<Setpoint>> {
    let rows = sqlx::query(
        r#"
        SELECT recipe_version_id, stage_id, parameter_type, min_value, max_value
        FROM setpoints WHERE recipe_version_id = ? AND stage_id = ?
        "#,
    )
    .bind(version_id.to_string())
    .bind(stage_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<Setpoint> {
            Ok(Setpoint {
                recipe_version_id: parse_uuid("recipe_version_id", row.get("recipe_version_id"))?,
                stage_id: parse_uuid("stage_id", row.get("stage_id"))?,
                parameter_type: parse_column("parameter_type", row.get("parameter_type"))?,
                min_value: row.get("min_value"),
                max_value: row.get("max_value"),
            })
        })
        .collect()
}

pub async fn insert_activation(
    conn: &mut SqliteConnection,
    activation: &RecipeActivation,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO recipe_activations (
            id, batch_id, recipe_id, recipe_version_id, current_stage_id,
            current_stage_day, active, activated_at, activated_by
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(activation.id.to_string())
    .bind(activation.batch_id.to_string())
    .bind(activation.recipe_id.to_string())
    .bind(activation.recipe_version_id.to_string())
    .bind(activation.current_stage_id.to_string())
    .bind(activation.current_stage_day)
    .bind(activation.active)
    .bind(time::to_db(activation.activated_at))
    .bind(&activation.activated_by)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn load_activation(
    conn: &mut SqliteConnection,
    activation_id: Uuid,
) -> Result<RecipeActivation> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM recipe_activations WHERE id = ?",
        ACTIVATION_COLUMNS
    ))
    .bind(activation_id.to_string())
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| LifecycleError::not_found("recipe activation", activation_id))?;

    activation_from_row(&row)
}

pub async fn active_activation_for_batch(
    conn: &mut SqliteConnection,
    batch_id: Uuid,
) -> Result<Option<RecipeActivation>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM recipe_activations WHERE batch_id = ? AND active = 1",
        ACTIVATION_COLUMNS
    ))
    .bind(batch_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(activation_from_row).transpose()
}

pub async fn list_active_activations(conn: &mut SqliteConnection) -> Result<Vec<RecipeActivation>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM recipe_activations WHERE active = 1 ORDER BY activated_at",
        ACTIVATION_COLUMNS
    ))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(activation_from_row).collect()
}

/// Mark inactive; false if it already was
pub async fn deactivate(
    conn: &mut SqliteConnection,
    activation_id: Uuid,
    at: DateTime<Utc>,
    actor: &str,
    reason: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE recipe_activations
        SET active = 0, deactivated_at = ?, deactivated_by = ?, deactivation_reason = ?
        WHERE id = ? AND active = 1
        "#,
    )
    .bind(time::to_db(at))
    .bind(actor)
    .bind(reason)
    .bind(activation_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Store day/stage progress if the activation is unchanged since it was read
pub async fn update_progress(
    conn: &mut SqliteConnection,
    before: &RecipeActivation,
    stage_id: Uuid,
    stage_day: i64,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE recipe_activations SET current_stage_id = ?, current_stage_day = ?
        WHERE id = ? AND active = 1 AND current_stage_id = ? AND current_stage_day = ?
        "#,
    )
    .bind(stage_id.to_string())
    .bind(stage_day)
    .bind(before.id.to_string())
    .bind(before.current_stage_id.to_string())
    .bind(before.current_stage_day)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(LifecycleError::ConcurrentModification {
            entity: "recipe activation",
            id: before.id,
        });
    }
    Ok(())
}

fn activation_from_row(row: &SqliteRow) -> Result<RecipeActivation> {
    Ok(RecipeActivation {
        id: parse_uuid("id", row.get("id"))?,
        batch_id: parse_uuid("batch_id", row.get("batch_id"))?,
        recipe_id: parse_uuid("recipe_id", row.get("recipe_id"))?,
        recipe_version_id: parse_uuid("recipe_version_id", row.get("recipe_version_id"))?,
        current_stage_id: parse_uuid("current_stage_id", row.get("current_stage_id"))?,
        current_stage_day: row.get("current_stage_day"),
        active: row.get("active"),
        activated_at: time::from_db("activated_at", row.get("activated_at"))?,
        activated_by: row.get("activated_by"),
        deactivated_at: time::from_db_opt("deactivated_at", row.get("deactivated_at"))?,
        deactivated_by: row.get("deactivated_by"),
        deactivation_reason: row.get("deactivation_reason"),
    })
}
