//! Harvest recording and finished-good inventory posting
//!
//! The harvest record and the inventory receipt are separate effects. A
//! failed posting never rolls back the harvest; it is reported on the
//! outcome and can be retried with `post_harvest_inventory`.
//!
//! A harvest is claimed before its receipt is posted, and the receipt is
//! keyed by the harvest, so concurrent or repeated postings never produce a
//! second receipt.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{error, info};
use uuid::Uuid;
use verdant_common::events::LifecycleEvent;
use verdant_common::time;

use super::{event_notes, LifecycleService};
use crate::collaborators::InventoryReceipt;
use crate::db;
use crate::error::{LifecycleError, Result};
use crate::models::{
    Batch, EventType, HarvestInput, HarvestOutcome, HarvestRecord, InventoryPostingRequest,
    InventoryPostingStatus, InventoryUsageEntry, PlantWeight,
};
use crate::utils::retry_on_conflict;

impl LifecycleService {
    /// Record batch harvest weights, optionally posting an inventory receipt
    pub async fn record_harvest(
        &self,
        batch_id: Uuid,
        input: HarvestInput,
        inventory: Option<InventoryPostingRequest>,
        actor: &str,
    ) -> Result<HarvestOutcome> {
        self.record_harvest_with_plants(batch_id, input, &[], inventory, actor)
            .await
    }

    /// Per-plant variant: tagged plant weights must add up to the batch wet
    /// weight within the jurisdiction's tolerance
    pub async fn record_plant_harvest(
        &self,
        batch_id: Uuid,
        input: HarvestInput,
        plants: &[PlantWeight],
        inventory: Option<InventoryPostingRequest>,
        actor: &str,
    ) -> Result<HarvestOutcome> {
        validate_weights(&input)?;
        if plants.is_empty() {
            return Err(LifecycleError::Validation(
                "per-plant harvest needs at least one plant entry".to_string(),
            ));
        }

        let mut tags = HashSet::new();
        for plant in plants {
            if !is_positive(plant.wet_weight) {
                return Err(LifecycleError::Validation(format!(
                    "plant {} wet weight must be positive",
                    plant.tag
                )));
            }
            if !tags.insert(plant.tag.trim()) {
                return Err(LifecycleError::Validation(format!(
                    "plant {} listed more than once",
                    plant.tag
                )));
            }
        }

        let sum: f64 = plants.iter().map(|p| p.wet_weight).sum();
        if !self
            .jurisdiction
            .within_harvest_tolerance(input.wet_weight, sum)
        {
            return Err(LifecycleError::Validation(format!(
                "plant weights total {:.2} but batch wet weight is {:.2} (tolerance {}%)",
                sum, input.wet_weight, self.jurisdiction.harvest_tolerance_percent
            )));
        }

        let plants: Vec<PlantWeight> = plants
            .iter()
            .map(|p| PlantWeight {
                tag: p.tag.trim().to_string(),
                wet_weight: p.wet_weight,
            })
            .collect();

        self.record_harvest_with_plants(batch_id, input, &plants, inventory, actor)
            .await
    }

    async fn record_harvest_with_plants(
        &self,
        batch_id: Uuid,
        input: HarvestInput,
        plants: &[PlantWeight],
        inventory: Option<InventoryPostingRequest>,
        actor: &str,
    ) -> Result<HarvestOutcome> {
        validate_weights(&input)?;
        if let Some(request) = &inventory {
            resolve_quantity(request, input.dry_weight, input.wet_weight)?;
        }

        let (batch, harvest) = retry_on_conflict("record_harvest", || async {
            let mut tx = self.pool.begin().await?;
            let mut batch = db::batches::load_batch(&mut tx, batch_id).await?;
            batch.ensure_not_quarantined()?;

            for plant in plants {
                if !batch.tags.contains(&plant.tag) {
                    return Err(LifecycleError::Validation(format!(
                        "tag {} is not assigned to batch {}",
                        plant.tag, batch.batch_number
                    )));
                }
            }

            let now = time::now();
            let harvest = HarvestRecord {
                id: Uuid::new_v4(),
                batch_id,
                wet_weight: input.wet_weight,
                dry_weight: input.dry_weight,
                waste_weight: input.waste_weight,
                notes: input.notes.clone(),
                recorded_by: actor.to_string(),
                recorded_at: now,
                inventory_entry_id: None,
            };
            db::harvests::insert_harvest(&mut tx, &harvest).await?;
            for plant in plants {
                db::harvests::insert_plant_weight(&mut tx, harvest.id, plant).await?;
            }

            db::batches::save_batch(&mut tx, &mut batch).await?;
            db::history::append_event(
                &mut tx,
                batch_id,
                EventType::HarvestRecorded,
                actor,
                Some(&event_notes(
                    format!(
                        "wet {} / dry {:?} / waste {:?}",
                        harvest.wet_weight, harvest.dry_weight, harvest.waste_weight
                    ),
                    input.notes.as_deref(),
                )),
                now,
            )
            .await?;

            tx.commit().await?;
            Ok((batch, harvest))
        })
        .await?;

        info!(
            batch_id = %batch_id,
            harvest_id = %harvest.id,
            wet_weight = harvest.wet_weight,
            plants = plants.len(),
            "Harvest recorded"
        );
        self.emit(LifecycleEvent::HarvestRecorded {
            batch_id,
            harvest_id: harvest.id,
            wet_weight: harvest.wet_weight,
            timestamp: harvest.recorded_at,
        });

        let Some(request) = inventory else {
            return Ok(HarvestOutcome {
                harvest,
                inventory: InventoryPostingStatus::NotRequested,
            });
        };

        let status = match self.post_inventory(&batch, &harvest, &request, actor).await {
            Ok(entry) => InventoryPostingStatus::Posted { entry },
            Err(e) => InventoryPostingStatus::Failed {
                code: e.code().to_string(),
                message: e.to_string(),
            },
        };

        let harvest = match &status {
            InventoryPostingStatus::Posted { entry } => HarvestRecord {
                inventory_entry_id: Some(entry.id),
                ..harvest
            },
            _ => harvest,
        };

        Ok(HarvestOutcome {
            harvest,
            inventory: status,
        })
    }

    /// Post the receipt for an already-recorded harvest
    ///
    /// Refused if the harvest already has a posted receipt or another
    /// posting of it is in progress. A receipt that was posted but never
    /// linked to the harvest is linked and returned instead of posted again.
    pub async fn post_harvest_inventory(
        &self,
        harvest_id: Uuid,
        request: InventoryPostingRequest,
        actor: &str,
    ) -> Result<InventoryUsageEntry> {
        let (harvest, batch) = {
            let mut conn = self.pool.acquire().await?;
            let harvest = db::harvests::load_harvest(&mut conn, harvest_id).await?;
            let batch = db::batches::load_batch(&mut conn, harvest.batch_id).await?;
            (harvest, batch)
        };

        if let Some(entry_id) = harvest.inventory_entry_id {
            return Err(LifecycleError::Validation(format!(
                "harvest {} already posted as inventory entry {}",
                harvest_id, entry_id
            )));
        }
        resolve_quantity(&request, harvest.dry_weight, harvest.wet_weight)?;

        self.post_inventory(&batch, &harvest, &request, actor).await
    }

    pub async fn harvests(&self, batch_id: Uuid) -> Result<Vec<HarvestRecord>> {
        let mut conn = self.pool.acquire().await?;
        db::batches::load_batch(&mut conn, batch_id).await?;
        db::harvests::list_harvests(&mut conn, batch_id).await
    }

    pub async fn plant_weights(&self, harvest_id: Uuid) -> Result<Vec<PlantWeight>> {
        let mut conn = self.pool.acquire().await?;
        db::harvests::load_harvest(&mut conn, harvest_id).await?;
        db::harvests::list_plant_weights(&mut conn, harvest_id).await
    }

    async fn post_inventory(
        &self,
        batch: &Batch,
        harvest: &HarvestRecord,
        request: &InventoryPostingRequest,
        actor: &str,
    ) -> Result<InventoryUsageEntry> {
        let receipt = InventoryReceipt {
            batch_id: batch.id,
            item_id: request.item_id,
            quantity: resolve_quantity(request, harvest.dry_weight, harvest.wet_weight)?,
            unit: request.unit.trim().to_string(),
            idempotency_key: Some(receipt_key(harvest.id)),
            lot_code: request
                .lot_code
                .as_deref()
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| default_lot_code(&batch.batch_number, harvest.recorded_at)),
        };

        let claim_id = Uuid::new_v4();
        let claimed = retry_on_conflict("claim inventory posting", || async {
            let mut conn = self.pool.acquire().await?;
            db::harvests::claim_inventory_posting(&mut conn, harvest.id, claim_id).await
        })
        .await?;
        if !claimed {
            return self.resume_inventory_posting(harvest.id, &receipt).await;
        }

        match self.inventory.post_receive(&receipt).await {
            Ok(entry) => {
                self.link_inventory_entry(harvest.id, entry.id).await;

                self.append_event_detached(
                    batch.id,
                    EventType::InventoryPosted,
                    actor,
                    &format!(
                        "{} {} lot {} (entry {})",
                        entry.quantity, entry.unit, entry.lot_code, entry.id
                    ),
                )
                .await;
                self.emit(LifecycleEvent::InventoryPosting {
                    batch_id: batch.id,
                    harvest_id: harvest.id,
                    success: true,
                    timestamp: entry.timestamp,
                });

                Ok(entry)
            }
            Err(e) => {
                error!(
                    batch_id = %batch.id,
                    harvest_id = %harvest.id,
                    item_id = %request.item_id,
                    error = %e,
                    "Inventory posting failed; harvest record kept"
                );

                let released = async {
                    let mut conn = self.pool.acquire().await?;
                    db::harvests::release_inventory_claim(&mut conn, harvest.id, claim_id).await
                }
                .await;
                if let Err(release_err) = released {
                    error!(
                        harvest_id = %harvest.id,
                        error = %release_err,
                        "Failed to release inventory posting claim"
                    );
                }

                self.append_event_detached(
                    batch.id,
                    EventType::InventoryPostingFailed,
                    actor,
                    &format!("harvest {}: {}", harvest.id, e),
                )
                .await;
                self.emit(LifecycleEvent::InventoryPosting {
                    batch_id: batch.id,
                    harvest_id: harvest.id,
                    success: false,
                    timestamp: time::now(),
                });

                Err(e)
            }
        }
    }

    /// Another posting holds the claim: adopt its receipt if it exists
    async fn resume_inventory_posting(
        &self,
        harvest_id: Uuid,
        receipt: &InventoryReceipt,
    ) -> Result<InventoryUsageEntry> {
        let harvest = {
            let mut conn = self.pool.acquire().await?;
            db::harvests::load_harvest(&mut conn, harvest_id).await?
        };
        if let Some(entry_id) = harvest.inventory_entry_id {
            return Err(LifecycleError::Validation(format!(
                "harvest {} already posted as inventory entry {}",
                harvest_id, entry_id
            )));
        }

        let key = receipt.idempotency_key.clone().unwrap_or_else(|| receipt_key(harvest_id));
        match self.inventory.find_receipt(&key).await? {
            Some(entry) => {
                info!(
                    harvest_id = %harvest_id,
                    entry_id = %entry.id,
                    "Linking previously posted inventory receipt"
                );
                self.link_inventory_entry(harvest_id, entry.id).await;
                Ok(entry)
            }
            None => Err(LifecycleError::Validation(format!(
                "inventory posting for harvest {} is already in progress",
                harvest_id
            ))),
        }
    }

    /// A receipt exists either way; a failed link is repaired by a retry
    async fn link_inventory_entry(&self, harvest_id: Uuid, entry_id: Uuid) {
        let linked = retry_on_conflict("link inventory entry", || async {
            let mut conn = self.pool.acquire().await?;
            db::harvests::set_inventory_entry(&mut conn, harvest_id, entry_id).await
        })
        .await;

        match linked {
            Ok(true) => {}
            Ok(false) => error!(
                harvest_id = %harvest_id,
                entry_id = %entry_id,
                "Harvest is linked to a different inventory entry"
            ),
            Err(e) => error!(
                harvest_id = %harvest_id,
                entry_id = %entry_id,
                error = %e,
                "Inventory receipt posted but not linked to the harvest"
            ),
        }
    }
}

fn receipt_key(harvest_id: Uuid) -> String {
    format!("harvest:{}", harvest_id)
}

fn validate_weights(input: &HarvestInput) -> Result<()> {
    if !is_positive(input.wet_weight) {
        return Err(LifecycleError::Validation(format!(
            "wet_weight must be positive, got {}",
            input.wet_weight
        )));
    }

    for (field, value) in [("dry_weight", input.dry_weight), ("waste_weight", input.waste_weight)] {
        if let Some(v) = value {
            if !(v.is_finite() && v >= 0.0) {
                return Err(LifecycleError::Validation(format!(
                    "{} must not be negative, got {}",
                    field, v
                )));
            }
        }
    }

    Ok(())
}

fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Requested quantity, else dry weight, else wet weight
fn resolve_quantity(
    request: &InventoryPostingRequest,
    dry_weight: Option<f64>,
    wet_weight: f64,
) -> Result<f64> {
    if request.unit.trim().is_empty() {
        return Err(LifecycleError::Validation(
            "inventory unit must not be empty".to_string(),
        ));
    }

    let quantity = request
        .quantity
        .or(dry_weight.filter(|d| *d > 0.0))
        .unwrap_or(wet_weight);

    if !is_positive(quantity) {
        return Err(LifecycleError::Validation(format!(
            "inventory quantity must be positive, got {}",
            quantity
        )));
    }
    Ok(quantity)
}

/// `{batch_number}-{YYYYMMDD}`
pub fn default_lot_code(batch_number: &str, harvested_at: DateTime<Utc>) -> String {
    format!("{}-{}", batch_number, harvested_at.format("%Y%m%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request(quantity: Option<f64>) -> InventoryPostingRequest {
        InventoryPostingRequest {
            item_id: Uuid::nil(),
            quantity,
            unit: "g".to_string(),
            lot_code: None,
        }
    }

    #[test]
    fn test_quantity_defaults_to_dry_then_wet() {
        assert_eq!(resolve_quantity(&request(None), Some(120.0), 500.0).unwrap(), 120.0);
        assert_eq!(resolve_quantity(&request(None), None, 500.0).unwrap(), 500.0);
        assert_eq!(resolve_quantity(&request(Some(80.0)), Some(120.0), 500.0).unwrap(), 80.0);
    }

    #[test]
    fn test_non_positive_quantity_rejected() {
        assert!(resolve_quantity(&request(Some(0.0)), None, 500.0).is_err());
        assert!(resolve_quantity(&request(Some(-3.0)), None, 500.0).is_err());
    }

    #[test]
    fn test_default_lot_code() {
        let at = Utc.with_ymd_and_hms(2026, 4, 9, 15, 30, 0).unwrap();
        assert_eq!(default_lot_code("B-101", at), "B-101-20260409");
    }

    #[test]
    fn test_weight_validation() {
        let mut input = HarvestInput {
            wet_weight: 0.0,
            dry_weight: None,
            waste_weight: None,
            notes: None,
        };
        assert!(validate_weights(&input).is_err());
        input.wet_weight = 500.0;
        input.waste_weight = Some(-1.0);
        assert!(validate_weights(&input).is_err());
        input.waste_weight = Some(0.0);
        assert!(validate_weights(&input).is_ok());
    }
}
