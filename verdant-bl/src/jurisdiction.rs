//! Jurisdiction rules
//!
//! Built once at startup from `[jurisdiction]`; a bad tag pattern or an
//! unknown stage name fails startup instead of the first request.

use regex::Regex;
use std::collections::HashSet;
use verdant_common::config::JurisdictionConfig;

use crate::error::{LifecycleError, Result};
use crate::models::Stage;

#[derive(Debug, Clone)]
pub struct Jurisdiction {
    pub code: String,
    pub requires_external_sync: bool,
    pub requires_plant_tags: bool,
    pub manifest_required_on_destroy: bool,
    pub harvest_tolerance_percent: f64,
    allowed_stages: Option<HashSet<Stage>>,
    tag_pattern: Regex,
}

impl Jurisdiction {
    pub fn from_config(config: &JurisdictionConfig) -> Result<Self> {
        let tag_pattern = Regex::new(&format!("^(?:{})$", config.tag_pattern)).map_err(|e| {
            LifecycleError::Validation(format!(
                "invalid tag pattern '{}': {}",
                config.tag_pattern, e
            ))
        })?;

        let allowed_stages = match &config.allowed_stages {
            Some(names) => {
                let mut stages = HashSet::with_capacity(names.len());
                for name in names {
                    let stage: Stage = name.trim().parse().map_err(|_| {
                        LifecycleError::Validation(format!(
                            "jurisdiction {} lists unknown stage '{}'",
                            config.code, name
                        ))
                    })?;
                    stages.insert(stage);
                }
                Some(stages)
            }
            None => None,
        };

        Ok(Self {
            code: config.code.clone(),
            requires_external_sync: config.requires_external_sync,
            requires_plant_tags: config.requires_plant_tags,
            manifest_required_on_destroy: config.manifest_required_on_destroy,
            harvest_tolerance_percent: config.harvest_tolerance_percent,
            allowed_stages,
            tag_pattern,
        })
    }

    /// Terminal stages are always permitted
    pub fn permits_stage(&self, stage: Stage) -> bool {
        stage.is_terminal()
            || self
                .allowed_stages
                .as_ref()
                .map_or(true, |allowed| allowed.contains(&stage))
    }

    /// Full-match check; `Err` carries the rejection reason
    pub fn check_tag(&self, tag: &str) -> std::result::Result<(), String> {
        if tag.is_empty() {
            return Err("empty tag".to_string());
        }
        if !self.tag_pattern.is_match(tag) {
            return Err(format!(
                "does not match {} tag format",
                self.code
            ));
        }
        Ok(())
    }

    /// `|sum - total| <= total * tolerance%`
    pub fn within_harvest_tolerance(&self, total: f64, sum: f64) -> bool {
        let allowed = total * self.harvest_tolerance_percent / 100.0;
        (sum - total).abs() <= allowed + f64::EPSILON * total.max(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jurisdiction(allowed: Option<Vec<&str>>) -> Jurisdiction {
        let config = JurisdictionConfig {
            code: "TEST".into(),
            allowed_stages: allowed.map(|v| v.into_iter().map(String::from).collect()),
            tag_pattern: "[0-9A-Z]{24}".into(),
            harvest_tolerance_percent: 2.0,
            ..JurisdictionConfig::default()
        };
        Jurisdiction::from_config(&config).unwrap()
    }

    #[test]
    fn test_tag_pattern_is_full_match() {
        let j = jurisdiction(None);
        assert!(j.check_tag("1A4FF0100000022000000001").is_ok());
        assert!(j.check_tag("1A4FF0100000022000000001X").is_err());
        assert!(j.check_tag("x1A4FF010000002200000001").is_err());
        assert!(j.check_tag("").is_err());
    }

    #[test]
    fn test_allowed_stages_restrict_non_terminal() {
        let j = jurisdiction(Some(vec!["vegetative", "flowering"]));
        assert!(j.permits_stage(Stage::Flowering));
        assert!(!j.permits_stage(Stage::Harvest));
        assert!(j.permits_stage(Stage::Completed));
        assert!(jurisdiction(None).permits_stage(Stage::Harvest));
    }

    #[test]
    fn test_unknown_allowed_stage_rejected() {
        let config = JurisdictionConfig {
            allowed_stages: Some(vec!["budding".into()]),
            ..JurisdictionConfig::default()
        };
        assert!(Jurisdiction::from_config(&config).is_err());
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let config = JurisdictionConfig {
            tag_pattern: "[unclosed".into(),
            ..JurisdictionConfig::default()
        };
        assert!(matches!(
            Jurisdiction::from_config(&config),
            Err(LifecycleError::Validation(_))
        ));
    }

    #[test]
    fn test_harvest_tolerance() {
        let j = jurisdiction(None);
        assert!(j.within_harvest_tolerance(500.0, 510.0));
        assert!(j.within_harvest_tolerance(500.0, 490.0));
        assert!(!j.within_harvest_tolerance(500.0, 511.0));
    }
}
