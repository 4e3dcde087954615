//! Stage graphs and regulatory phase map
//!
//! Cannabis:
//! GERMINATION → SEEDLING → VEGETATIVE → FLOWERING → HARVEST → DRYING → CURING → COMPLETED
//! CLONE → VEGETATIVE
//!
//! Produce:
//! SEEDING → GERMINATION → GROWING → HARVEST → PACKAGING → COMPLETED
//! HARVEST → COMPLETED
//!
//! DESTROYED is terminal and reached only through the destruction workflow.
//! Every lookup here is pure and matches exhaustively on (domain, stage), so a
//! stage added to the enum must be placed in both graphs before it compiles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{LifecycleError, Result};

/// Production domain of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Cannabis,
    Produce,
}

impl Domain {
    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Cannabis => "cannabis",
            Domain::Produce => "produce",
        }
    }

    /// Stages that belong to this domain, in lifecycle order
    pub fn stages(self) -> &'static [Stage] {
        use Stage::*;
        match self {
            Domain::Cannabis => &[
                Germination,
                Seedling,
                Clone,
                Vegetative,
                Flowering,
                Harvest,
                Drying,
                Curing,
                Completed,
                Destroyed,
            ],
            Domain::Produce => &[
                Seeding,
                Germination,
                Growing,
                Harvest,
                Packaging,
                Completed,
                Destroyed,
            ],
        }
    }

    /// Parse a stage name and check it belongs to this domain
    pub fn parse_stage(self, name: &str) -> Result<Stage> {
        let stage: Stage = name.parse().map_err(|_| LifecycleError::UnknownStage {
            domain: self,
            stage: name.to_string(),
        })?;
        if !self.stages().contains(&stage) {
            return Err(LifecycleError::UnknownStage {
                domain: self,
                stage: name.to_string(),
            });
        }
        Ok(stage)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cannabis" => Ok(Domain::Cannabis),
            "produce" => Ok(Domain::Produce),
            other => Err(LifecycleError::Validation(format!(
                "unknown domain type '{}'",
                other
            ))),
        }
    }
}

/// Lifecycle stage (union of both domains)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Seeding,
    Germination,
    Seedling,
    Clone,
    Vegetative,
    Flowering,
    Growing,
    Harvest,
    Drying,
    Curing,
    Packaging,
    Completed,
    Destroyed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Seeding => "seeding",
            Stage::Germination => "germination",
            Stage::Seedling => "seedling",
            Stage::Clone => "clone",
            Stage::Vegetative => "vegetative",
            Stage::Flowering => "flowering",
            Stage::Growing => "growing",
            Stage::Harvest => "harvest",
            Stage::Drying => "drying",
            Stage::Curing => "curing",
            Stage::Packaging => "packaging",
            Stage::Completed => "completed",
            Stage::Destroyed => "destroyed",
        }
    }

    /// Terminal stages have no outgoing edges in any domain
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Destroyed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse error for a stage name outside every domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStageError(pub String);

impl fmt::Display for ParseStageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown stage '{}'", self.0)
    }
}

impl std::error::Error for ParseStageError {}

impl FromStr for Stage {
    type Err = ParseStageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let stage = match s {
            "seeding" => Stage::Seeding,
            "germination" => Stage::Germination,
            "seedling" => Stage::Seedling,
            "clone" => Stage::Clone,
            "vegetative" => Stage::Vegetative,
            "flowering" => Stage::Flowering,
            "growing" => Stage::Growing,
            "harvest" => Stage::Harvest,
            "drying" => Stage::Drying,
            "curing" => Stage::Curing,
            "packaging" => Stage::Packaging,
            "completed" => Stage::Completed,
            "destroyed" => Stage::Destroyed,
            other => return Err(ParseStageError(other.to_string())),
        };
        Ok(stage)
    }
}

/// Allowed next stages, in preference order
///
/// `UnknownStage` if `from` is not part of the domain.
pub fn next_stages(domain: Domain, from: Stage) -> Result<&'static [Stage]> {
    use Stage::*;

    let next: Option<&'static [Stage]> = match domain {
        Domain::Cannabis => match from {
            Germination => Some(&[Seedling]),
            Seedling => Some(&[Vegetative]),
            Clone => Some(&[Vegetative]),
            Vegetative => Some(&[Flowering]),
            Flowering => Some(&[Harvest]),
            Harvest => Some(&[Drying]),
            Drying => Some(&[Curing]),
            Curing => Some(&[Completed]),
            Completed | Destroyed => Some(&[]),
            Seeding | Growing | Packaging => None,
        },
        Domain::Produce => match from {
            Seeding => Some(&[Germination]),
            Germination => Some(&[Growing]),
            Growing => Some(&[Harvest]),
            Harvest => Some(&[Packaging, Completed]),
            Packaging => Some(&[Completed]),
            Completed | Destroyed => Some(&[]),
            Seedling | Clone | Vegetative | Flowering | Drying | Curing => None,
        },
    };

    next.ok_or_else(|| LifecycleError::UnknownStage {
        domain,
        stage: from.to_string(),
    })
}

/// Whether `from → to` is an edge of the domain graph
///
/// `UnknownStage` if either stage is not part of the domain.
pub fn is_allowed(domain: Domain, from: Stage, to: Stage) -> Result<bool> {
    let next = next_stages(domain, from)?;
    if !domain.stages().contains(&to) {
        return Err(LifecycleError::UnknownStage {
            domain,
            stage: to.to_string(),
        });
    }
    Ok(next.contains(&to))
}

/// Growth phase as tracked by the external regulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegulatoryPhase {
    Immature,
    Vegetative,
    Flowering,
    Harvested,
}

impl RegulatoryPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RegulatoryPhase::Immature => "immature",
            RegulatoryPhase::Vegetative => "vegetative",
            RegulatoryPhase::Flowering => "flowering",
            RegulatoryPhase::Harvested => "harvested",
        }
    }
}

impl fmt::Display for RegulatoryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegulatoryPhase {
    type Err = ParseStageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "immature" => Ok(RegulatoryPhase::Immature),
            "vegetative" => Ok(RegulatoryPhase::Vegetative),
            "flowering" => Ok(RegulatoryPhase::Flowering),
            "harvested" => Ok(RegulatoryPhase::Harvested),
            other => Err(ParseStageError(other.to_string())),
        }
    }
}

/// Regulator phase for a stage; `None` for stages the regulator does not track
pub fn regulatory_phase(domain: Domain, stage: Stage) -> Option<RegulatoryPhase> {
    use Stage::*;

    match domain {
        Domain::Cannabis => match stage {
            Germination | Seedling | Clone => Some(RegulatoryPhase::Immature),
            Vegetative => Some(RegulatoryPhase::Vegetative),
            Flowering => Some(RegulatoryPhase::Flowering),
            Harvest => Some(RegulatoryPhase::Harvested),
            Drying | Curing | Completed | Destroyed => None,
            Seeding | Growing | Packaging => None,
        },
        Domain::Produce => None,
    }
}

/// Phase change to report for `from → to`, if both are mapped and differ
pub fn phase_change(
    domain: Domain,
    from: Stage,
    to: Stage,
) -> Option<(RegulatoryPhase, RegulatoryPhase)> {
    match (regulatory_phase(domain, from), regulatory_phase(domain, to)) {
        (Some(a), Some(b)) if a != b => Some((a, b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAINS: [Domain; 2] = [Domain::Cannabis, Domain::Produce];

    #[test]
    fn test_terminal_stages_have_no_edges() {
        for domain in DOMAINS {
            for stage in [Stage::Completed, Stage::Destroyed] {
                assert!(next_stages(domain, stage).unwrap().is_empty());
            }
        }
    }

    #[test]
    fn test_every_domain_stage_has_a_lookup() {
        for domain in DOMAINS {
            for &stage in domain.stages() {
                assert!(next_stages(domain, stage).is_ok(), "{domain} {stage}");
            }
        }
    }

    #[test]
    fn test_edges_stay_inside_domain() {
        for domain in DOMAINS {
            for &stage in domain.stages() {
                for next in next_stages(domain, stage).unwrap() {
                    assert!(domain.stages().contains(next), "{domain}: {stage} -> {next}");
                    assert_ne!(*next, Stage::Destroyed);
                }
            }
        }
    }

    #[test]
    fn test_flowering_only_goes_to_harvest() {
        assert_eq!(
            next_stages(Domain::Cannabis, Stage::Flowering).unwrap(),
            &[Stage::Harvest]
        );
        assert!(!is_allowed(Domain::Cannabis, Stage::Flowering, Stage::Vegetative).unwrap());
    }

    #[test]
    fn test_produce_harvest_branches() {
        assert_eq!(
            next_stages(Domain::Produce, Stage::Harvest).unwrap(),
            &[Stage::Packaging, Stage::Completed]
        );
    }

    #[test]
    fn test_foreign_stage_is_unknown() {
        let err = next_stages(Domain::Produce, Stage::Flowering).unwrap_err();
        assert!(matches!(err, LifecycleError::UnknownStage { .. }));

        let err = is_allowed(Domain::Cannabis, Stage::Vegetative, Stage::Growing).unwrap_err();
        assert!(matches!(err, LifecycleError::UnknownStage { .. }));
    }

    #[test]
    fn test_parse_stage_checks_domain() {
        assert_eq!(
            Domain::Produce.parse_stage("growing").unwrap(),
            Stage::Growing
        );
        assert!(Domain::Cannabis.parse_stage("growing").is_err());
        assert!(Domain::Cannabis.parse_stage("sprouting").is_err());
    }

    #[test]
    fn test_stage_names_parse_back() {
        for domain in DOMAINS {
            for &stage in domain.stages() {
                assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
            }
        }
    }

    #[test]
    fn test_phase_changes() {
        assert_eq!(
            phase_change(Domain::Cannabis, Stage::Vegetative, Stage::Flowering),
            Some((RegulatoryPhase::Vegetative, RegulatoryPhase::Flowering))
        );
        // Both immature
        assert_eq!(
            phase_change(Domain::Cannabis, Stage::Germination, Stage::Seedling),
            None
        );
        // Drying is not tracked
        assert_eq!(
            phase_change(Domain::Cannabis, Stage::Harvest, Stage::Drying),
            None
        );
        assert_eq!(
            phase_change(Domain::Produce, Stage::Growing, Stage::Harvest),
            None
        );
    }
}
