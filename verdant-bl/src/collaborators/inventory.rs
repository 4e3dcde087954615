//! Inventory service collaborator

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;
use verdant_common::time;

use crate::db::{is_unique_violation, parse_column, parse_uuid};
use crate::error::{LifecycleError, Result};
use crate::models::{InventoryUsageEntry, MovementType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: Uuid,
    pub name: String,
    pub unit: String,
}

/// Finished-good receipt to post
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryReceipt {
    pub batch_id: Uuid,
    pub item_id: Uuid,
    pub quantity: f64,
    pub unit: String,
    pub lot_code: String,
    /// Receipts with the same key are posted once; a repeat returns the
    /// first entry
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Item catalog and receive-movement posting
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Post a receive movement; `NotFound` for an unknown item
    async fn post_receive(&self, receipt: &InventoryReceipt) -> Result<InventoryUsageEntry>;

    /// Entry previously posted under `idempotency_key`
    async fn find_receipt(&self, _idempotency_key: &str) -> Result<Option<InventoryUsageEntry>> {
        Ok(None)
    }
}

const USAGE_COLUMNS: &str =
    "id, batch_id, item_id, movement_type, quantity, unit, lot_code, posted_at";

/// Inventory backed by the lifecycle database
#[derive(Clone)]
pub struct SqliteInventory {
    pool: SqlitePool,
}

impl SqliteInventory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn register_item(&self, name: &str, unit: &str) -> Result<InventoryItem> {
        if name.trim().is_empty() || unit.trim().is_empty() {
            return Err(LifecycleError::Validation(
                "inventory item needs a name and a unit".to_string(),
            ));
        }

        let item = InventoryItem {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            unit: unit.trim().to_string(),
        };

        sqlx::query("INSERT INTO inventory_items (id, name, unit) VALUES (?, ?, ?)")
            .bind(item.id.to_string())
            .bind(&item.name)
            .bind(&item.unit)
            .execute(&self.pool)
            .await?;

        Ok(item)
    }

    pub async fn item(&self, item_id: Uuid) -> Result<Option<InventoryItem>> {
        let row = sqlx::query("SELECT id, name, unit FROM inventory_items WHERE id = ?")
            .bind(item_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> Result<InventoryItem> {
            Ok(InventoryItem {
                id: parse_uuid("id", row.get("id"))?,
                name: row.get("name"),
                unit: row.get("unit"),
            })
        })
        .transpose()
    }

    /// Movements posted for a batch
    pub async fn usage_for_batch(&self, batch_id: Uuid) -> Result<Vec<InventoryUsageEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM inventory_usage WHERE batch_id = ? ORDER BY posted_at",
            USAGE_COLUMNS
        ))
        .bind(batch_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(usage_from_row).collect()
    }
}

fn usage_from_row(row: &SqliteRow) -> Result<InventoryUsageEntry> {
    Ok(InventoryUsageEntry {
        id: parse_uuid("id", row.get("id"))?,
        batch_id: parse_uuid("batch_id", row.get("batch_id"))?,
        item_id: parse_uuid("item_id", row.get("item_id"))?,
        movement_type: parse_column("movement_type", row.get("movement_type"))?,
        quantity: row.get("quantity"),
        unit: row.get("unit"),
        lot_code: row.get("lot_code"),
        timestamp: time::from_db("posted_at", row.get("posted_at"))?,
    })
}

#[async_trait]
impl InventoryService for SqliteInventory {
    async fn post_receive(&self, receipt: &InventoryReceipt) -> Result<InventoryUsageEntry> {
        if receipt.quantity.is_nan() || receipt.quantity <= 0.0 {
            return Err(LifecycleError::Validation(format!(
                "inventory quantity must be positive, got {}",
                receipt.quantity
            )));
        }

        if let Some(key) = &receipt.idempotency_key {
            if let Some(existing) = self.find_receipt(key).await? {
                return Ok(existing);
            }
        }

        if self.item(receipt.item_id).await?.is_none() {
            return Err(LifecycleError::not_found("inventory item", receipt.item_id));
        }

        let entry = InventoryUsageEntry {
            id: Uuid::new_v4(),
            batch_id: receipt.batch_id,
            item_id: receipt.item_id,
            movement_type: MovementType::Receive,
            quantity: receipt.quantity,
            unit: receipt.unit.clone(),
            lot_code: receipt.lot_code.clone(),
            timestamp: time::now(),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO inventory_usage (
                id, batch_id, item_id, movement_type, quantity, unit, lot_code, posted_at,
                idempotency_key
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.batch_id.to_string())
        .bind(entry.item_id.to_string())
        .bind(entry.movement_type.as_str())
        .bind(entry.quantity)
        .bind(&entry.unit)
        .bind(&entry.lot_code)
        .bind(time::to_db(entry.timestamp))
        .bind(&receipt.idempotency_key)
        .execute(&self.pool)
        .await;

        match (result, &receipt.idempotency_key) {
            (Ok(_), _) => {}
            (Err(e), Some(key)) if is_unique_violation(&e) => {
                return self
                    .find_receipt(key)
                    .await?
                    .ok_or_else(|| LifecycleError::not_found("inventory receipt", key));
            }
            (Err(e), _) => return Err(e.into()),
        }

        tracing::info!(
            entry_id = %entry.id,
            batch_id = %entry.batch_id,
            item_id = %entry.item_id,
            quantity = entry.quantity,
            lot_code = %entry.lot_code,
            "Inventory receipt posted"
        );

        Ok(entry)
    }

    async fn find_receipt(&self, idempotency_key: &str) -> Result<Option<InventoryUsageEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM inventory_usage WHERE idempotency_key = ?",
            USAGE_COLUMNS
        ))
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(usage_from_row).transpose()
    }
}
