//! Pod registry mirror and capacity-checked assignments

use tracing::{info, warn};
use uuid::Uuid;
use verdant_common::time;

use super::{require_text, LifecycleService};
use crate::db;
use crate::error::{LifecycleError, Result};
use crate::models::{EventType, Pod, PodAssignment};
use crate::utils::retry_on_conflict;

impl LifecycleService {
    /// Mirror a pod from the pod/room registry
    pub async fn register_pod(&self, pod: Pod) -> Result<Pod> {
        let pod = Pod {
            name: require_text("pod name", &pod.name)?,
            site_id: require_text("site_id", &pod.site_id)?,
            ..pod
        };
        if pod.capacity < 0 {
            return Err(LifecycleError::Validation(format!(
                "pod capacity must not be negative, got {}",
                pod.capacity
            )));
        }

        let used = retry_on_conflict("register_pod", || async {
            let mut tx = self.pool.begin().await?;
            db::pods::upsert_pod(&mut tx, &pod).await?;
            let used = db::pods::active_plant_count(&mut tx, pod.id).await?;
            tx.commit().await?;
            Ok(used)
        })
        .await?;

        if used > pod.capacity {
            warn!(
                pod_id = %pod.id,
                capacity = pod.capacity,
                used,
                "Registry capacity is below current occupancy"
            );
        }

        Ok(pod)
    }

    pub async fn get_pod(&self, pod_id: Uuid) -> Result<Pod> {
        let mut conn = self.pool.acquire().await?;
        let (pod, _) = db::pods::load_pod(&mut conn, pod_id).await?;
        Ok(pod)
    }

    /// Place plants of a batch in a pod
    ///
    /// The sum of active assignments is checked in the same transaction that
    /// inserts the new one, and the pod's version is bumped so two racing
    /// assignments cannot both pass the check.
    pub async fn assign_pod(
        &self,
        batch_id: Uuid,
        pod_id: Uuid,
        plant_count: i64,
        actor: &str,
    ) -> Result<PodAssignment> {
        if plant_count <= 0 {
            return Err(LifecycleError::Validation(format!(
                "plant_count must be positive, got {}",
                plant_count
            )));
        }

        let assignment = retry_on_conflict("assign_pod", || async {
            let mut tx = self.pool.begin().await?;
            let mut batch = db::batches::load_batch(&mut tx, batch_id).await?;
            batch.ensure_mutable()?;

            let (pod, pod_version) = db::pods::load_pod(&mut tx, pod_id).await?;
            let used = db::pods::active_plant_count(&mut tx, pod_id).await?;
            let available = (pod.capacity - used).max(0);
            if plant_count > available {
                return Err(LifecycleError::CapacityExceeded {
                    pod_id,
                    capacity: pod.capacity,
                    available,
                    requested: plant_count,
                });
            }

            let now = time::now();
            let assignment = PodAssignment {
                id: Uuid::new_v4(),
                batch_id,
                pod_id,
                plant_count,
                assigned_at: now,
                removed_at: None,
            };
            db::pods::insert_assignment(&mut tx, &assignment).await?;
            db::pods::bump_pod_version(&mut tx, pod_id, pod_version).await?;
            db::batches::save_batch(&mut tx, &mut batch).await?;
            db::history::append_event(
                &mut tx,
                batch_id,
                EventType::PodAssigned,
                actor,
                Some(&format!("{} plants to pod {}", plant_count, pod.name)),
                now,
            )
            .await?;

            tx.commit().await?;
            Ok(assignment)
        })
        .await?;

        info!(
            batch_id = %batch_id,
            pod_id = %pod_id,
            assignment_id = %assignment.id,
            plant_count,
            "Pod assignment created"
        );

        Ok(assignment)
    }

    /// End an active pod assignment
    pub async fn release_pod_assignment(&self, assignment_id: Uuid, actor: &str) -> Result<PodAssignment> {
        let assignment = retry_on_conflict("release_pod_assignment", || async {
            let mut tx = self.pool.begin().await?;
            let mut assignment = db::pods::load_assignment(&mut tx, assignment_id).await?;
            if !assignment.is_active() {
                return Err(LifecycleError::Validation(format!(
                    "pod assignment {} is already released",
                    assignment_id
                )));
            }

            let mut batch = db::batches::load_batch(&mut tx, assignment.batch_id).await?;
            batch.ensure_mutable()?;

            let now = time::now();
            if !db::pods::end_assignment(&mut tx, assignment_id, now).await? {
                return Err(LifecycleError::ConcurrentModification {
                    entity: "pod assignment",
                    id: assignment_id,
                });
            }
            assignment.removed_at = Some(now);

            db::batches::save_batch(&mut tx, &mut batch).await?;
            db::history::append_event(
                &mut tx,
                batch.id,
                EventType::PodReleased,
                actor,
                Some(&format!("{} plants from pod {}", assignment.plant_count, assignment.pod_id)),
                now,
            )
            .await?;

            tx.commit().await?;
            Ok(assignment)
        })
        .await?;

        info!(
            assignment_id = %assignment_id,
            batch_id = %assignment.batch_id,
            pod_id = %assignment.pod_id,
            "Pod assignment released"
        );

        Ok(assignment)
    }

    pub async fn pod_assignments(&self, batch_id: Uuid, active_only: bool) -> Result<Vec<PodAssignment>> {
        let mut conn = self.pool.acquire().await?;
        db::batches::load_batch(&mut conn, batch_id).await?;
        db::pods::list_batch_assignments(&mut conn, batch_id, active_only).await
    }
}
