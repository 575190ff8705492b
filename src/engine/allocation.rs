use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;

use super::scheduler::{check_suite, next_eligible};
use super::store::{apply_to_group, apply_to_suite};
use super::{Engine, EngineError, ensure_active};

impl Engine {
    /// Units whose turn it is, or `None` once every numbered unit is housed.
    pub async fn next_eligible(&self, draw_id: Ulid) -> Result<Option<Turn>, EngineError> {
        let ds = self.draw_read(&draw_id).await?;
        Ok(self.turn(&ds).await)
    }

    async fn turn(&self, ds: &DrawState) -> Option<Turn> {
        let groups = self.store.groups_in_draw(ds).await;
        let available = self.selectable_suites(ds).await;
        let direction = self.sort_config().await.direction;
        next_eligible(&ds.assignments, &groups, &ds.clips, &available, direction)
    }

    /// House `group_id` in `suite_id`. `admin_override` skips the turn check
    /// and admits medical suites. Two racing calls on one suite serialize on
    /// the suite mutex; the loser sees `SuiteUnavailable(Occupied)`.
    pub async fn assign_suite(
        &self,
        group_id: Ulid,
        suite_id: Ulid,
        admin_override: bool,
    ) -> Result<(), EngineError> {
        let result = self.try_assign(group_id, suite_id, admin_override).await;
        let outcome = match &result {
            Ok(()) => "ok",
            Err(EngineError::SuiteUnavailable { .. }) => "unavailable",
            Err(EngineError::OutOfTurn(_)) => "out_of_turn",
            Err(_) => "rejected",
        };
        metrics::counter!(crate::observability::SUITE_ASSIGNMENTS_TOTAL, "outcome" => outcome)
            .increment(1);
        match &result {
            Ok(()) => info!(group = %group_id, suite = %suite_id, admin_override, "suite assigned"),
            Err(e) => debug!(group = %group_id, suite = %suite_id, "assignment rejected: {e}"),
        }
        result
    }

    async fn try_assign(&self, group_id: Ulid, suite_id: Ulid, admin_override: bool) -> Result<(), EngineError> {
        let draw = match self.store.draw_of_group(&group_id) {
            Some(did) => Some(self.draw_read(&did).await?),
            None => None,
        };

        if let Some(ds) = draw.as_deref() {
            ensure_active(ds)?;
            if ds.phase != DrawPhase::SuiteSelection {
                return Err(EngineError::Precondition(format!(
                    "suites are chosen during suite_selection, draw is in {}",
                    ds.phase
                )));
            }
            if !admin_override {
                let unit = match ds.clip_of(&group_id) {
                    Some(clip) => Unit::Clip(clip.id),
                    None => Unit::Group(group_id),
                };
                let in_turn = self
                    .turn(ds)
                    .await
                    .is_some_and(|t| t.units.iter().any(|u| u.unit == unit));
                if !in_turn {
                    return Err(EngineError::OutOfTurn(group_id));
                }
            }
        }

        let mut group = self.group_write(&group_id).await?;
        if draw.is_some() && !group.status.is_locked() {
            return Err(EngineError::Precondition(format!(
                "group {group_id} is not locked"
            )));
        }
        if let Some(current) = group.suite_id {
            return Err(EngineError::Precondition(format!(
                "group {group_id} already lives in suite {current}"
            )));
        }

        let suite = self
            .store
            .get_suite(&suite_id)
            .ok_or(EngineError::NotFound(suite_id))?;
        let mut suite = suite.lock().await;
        check_suite(&group, &suite, draw.as_deref(), admin_override)?;

        let event = Event::SuiteAssigned { group_id, suite_id };
        self.persist_and_apply(event, |e| {
            apply_to_group(&mut group, e);
            apply_to_suite(&mut suite, e);
        })
        .await
    }

    /// Administrative correction, allowed in any phase. A finalizing group
    /// drops back to locked. Returns the suite that was released.
    pub async fn unassign_suite(&self, group_id: Ulid) -> Result<Ulid, EngineError> {
        let _draw = match self.store.draw_of_group(&group_id) {
            Some(did) => Some(self.draw_write(&did).await?),
            None => None,
        };
        let mut group = self.group_write(&group_id).await?;
        let suite_id = group.suite_id.ok_or_else(|| {
            EngineError::Precondition(format!("group {group_id} has no suite"))
        })?;
        let suite = self
            .store
            .get_suite(&suite_id)
            .ok_or(EngineError::NotFound(suite_id))?;
        let mut suite = suite.lock().await;

        let event = Event::SuiteUnassigned { group_id, suite_id };
        self.persist_and_apply(event, |e| {
            apply_to_group(&mut group, e);
            apply_to_suite(&mut suite, e);
        })
        .await?;
        info!(group = %group_id, suite = %suite_id, "suite unassigned");
        Ok(suite_id)
    }
}
