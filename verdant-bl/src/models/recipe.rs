//! Environmental recipes, activations and setpoint evaluation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{LifecycleError, Result};

/// Environmental parameter tracked by setpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    /// Air temperature (°C)
    Temperature,
    /// Relative humidity (%)
    Humidity,
    /// CO2 concentration (ppm)
    Co2,
    /// Lights on (1) / off (0)
    Light,
}

impl ParameterType {
    pub const ALL: [ParameterType; 4] = [
        ParameterType::Temperature,
        ParameterType::Humidity,
        ParameterType::Co2,
        ParameterType::Light,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ParameterType::Temperature => "temperature",
            ParameterType::Humidity => "humidity",
            ParameterType::Co2 => "co2",
            ParameterType::Light => "light",
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParameterType {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "temperature" => Ok(ParameterType::Temperature),
            "humidity" => Ok(ParameterType::Humidity),
            "co2" => Ok(ParameterType::Co2),
            "light" => Ok(ParameterType::Light),
            other => Err(LifecycleError::Validation(format!(
                "unknown parameter type '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeVersion {
    pub id: Uuid,
    pub recipe_id: Uuid,
    pub version: i64,
}

/// Ordered stage of a recipe version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeStage {
    pub id: Uuid,
    pub recipe_version_id: Uuid,
    pub stage_order: i64,
    pub name: String,
    pub duration_days: i64,
}

/// Target range for one parameter in one recipe stage
///
/// A single-value target is stored with `min_value == max_value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setpoint {
    pub recipe_version_id: Uuid,
    pub stage_id: Uuid,
    pub parameter_type: ParameterType,
    pub min_value: f64,
    pub max_value: f64,
}

impl Setpoint {
    /// Inclusive range check
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min_value && value <= self.max_value
    }
}

/// Stage of a recipe version being defined
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecipeStage {
    pub name: String,
    pub duration_days: i64,
    #[serde(default)]
    pub setpoints: Vec<NewSetpoint>,
}

/// Target for one parameter; use `min_value == max_value` for a single value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSetpoint {
    pub parameter_type: ParameterType,
    pub min_value: f64,
    pub max_value: f64,
}

/// A stored recipe version with its stages and setpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeDefinition {
    pub recipe: Recipe,
    pub version: RecipeVersion,
    pub stages: Vec<RecipeStage>,
    pub setpoints: Vec<Setpoint>,
}

/// Binding of a recipe version to a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeActivation {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub recipe_id: Uuid,
    pub recipe_version_id: Uuid,
    pub current_stage_id: Uuid,
    /// 1-based day within the current recipe stage
    pub current_stage_day: i64,
    pub active: bool,
    pub activated_at: DateTime<Utc>,
    pub activated_by: String,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub deactivated_by: Option<String>,
    pub deactivation_reason: Option<String>,
}

/// Latest reading of a pod (from the telemetry feed)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryReading {
    pub pod_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub co2: Option<f64>,
    #[serde(default)]
    pub lights_on: Option<bool>,
}

impl TelemetryReading {
    pub fn value(&self, parameter: ParameterType) -> Option<f64> {
        match parameter {
            ParameterType::Temperature => self.temperature,
            ParameterType::Humidity => self.humidity,
            ParameterType::Co2 => self.co2,
            ParameterType::Light => self.lights_on.map(|on| if on { 1.0 } else { 0.0 }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SetpointStatus {
    InRange,
    OutOfRange,
    /// No setpoint for this parameter in the current recipe stage
    NoTarget,
    /// Setpoint exists but the reading has no value for it
    NoReading,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterEvaluation {
    pub parameter: ParameterType,
    pub actual: Option<f64>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub status: SetpointStatus,
}

/// Evaluation of one reading against the active recipe stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetpointEvaluation {
    pub batch_id: Uuid,
    pub pod_id: Uuid,
    pub activation_id: Option<Uuid>,
    pub stage_id: Option<Uuid>,
    pub reading_timestamp: DateTime<Utc>,
    pub parameters: Vec<ParameterEvaluation>,
}

impl SetpointEvaluation {
    pub fn status_of(&self, parameter: ParameterType) -> Option<SetpointStatus> {
        self.parameters
            .iter()
            .find(|p| p.parameter == parameter)
            .map(|p| p.status)
    }
}

/// Compare a reading against stage setpoints
///
/// Pure projection: recomputed on every read, never persisted.
pub fn evaluate_parameters(
    setpoints: &[Setpoint],
    reading: &TelemetryReading,
) -> Vec<ParameterEvaluation> {
    ParameterType::ALL
        .iter()
        .map(|&parameter| {
            let actual = reading.value(parameter);
            let target = setpoints.iter().find(|s| s.parameter_type == parameter);

            let status = match (target, actual) {
                (None, _) => SetpointStatus::NoTarget,
                (Some(_), None) => SetpointStatus::NoReading,
                (Some(sp), Some(value)) if sp.contains(value) => SetpointStatus::InRange,
                (Some(_), Some(_)) => SetpointStatus::OutOfRange,
            };

            ParameterEvaluation {
                parameter,
                actual,
                min_value: target.map(|s| s.min_value),
                max_value: target.map(|s| s.max_value),
                status,
            }
        })
        .collect()
}
