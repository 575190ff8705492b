use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;

use super::capacity::{blocking_sizes, capacity_index, selectable_by_size};
use super::lottery::assign_numbers;
use super::scheduler::is_selected;
use super::store::apply_to_draw;
use super::{Engine, EngineError, ensure_active};

impl Engine {
    /// Move a draw one step forward. The caller names the target phase, so
    /// a repeated trigger fails instead of advancing twice. Returns the
    /// lottery numbers handed out, if this was the lottery transition.
    pub async fn advance_draw(
        &self,
        draw_id: Ulid,
        to: DrawPhase,
    ) -> Result<Vec<LotteryAssignment>, EngineError> {
        let mut ds = self.draw_write(&draw_id).await?;
        let from = ds.phase;
        if !ds.active || from.advance(to, ds.intent_locked).is_none() {
            return Err(EngineError::InvalidTransition { from, to });
        }

        let mut assignments = Vec::new();
        match (from, to) {
            (DrawPhase::Draft, _) => self.check_draft_ready(&ds)?,
            (_, DrawPhase::Lottery) => {
                let groups = self.store.groups_in_draw(&ds).await;
                let suites = self.store.suites_in_draw(&ds).await;
                let candidates = self.candidates(&ds, &groups).await;
                let rows = capacity_index(
                    &suites,
                    &ds.restricted_sizes,
                    candidates.iter().map(|c| c.sorting_size),
                );
                let sizes = blocking_sizes(&rows, &ds.restricted_sizes);
                if !sizes.is_empty() {
                    warn!(draw = %draw_id, ?sizes, "lottery blocked by oversubscription");
                    return Err(EngineError::Oversubscribed { sizes });
                }
                let tie_break = self.sort_config().await.tie_break;
                let mut rng = self.lottery_rng.lock().await;
                assignments = assign_numbers(candidates, &ds.assignments, tie_break, &mut *rng)?;
            }
            (_, DrawPhase::SuiteSelection) => {
                let groups = self.store.groups_in_draw(&ds).await;
                let unnumbered: Vec<String> = self
                    .candidates(&ds, &groups)
                    .await
                    .into_iter()
                    .filter(|c| ds.assignment_for(&c.unit).is_none())
                    .map(|c| c.unit.to_string())
                    .collect();
                if !unnumbered.is_empty() {
                    return Err(EngineError::Precondition(format!(
                        "units without a lottery number: {}",
                        unnumbered.join(", ")
                    )));
                }
            }
            (_, DrawPhase::Results) => {
                let groups = self.store.groups_in_draw(&ds).await;
                let units: Vec<Unit> = ds
                    .assignments
                    .iter()
                    .map(|a| a.unit)
                    .filter(|u| !is_selected(u, &groups, &ds.clips))
                    .collect();
                if !units.is_empty() {
                    return Err(EngineError::IncompleteAllocation { units });
                }
            }
            _ => {}
        }

        let event = Event::PhaseChanged {
            draw_id,
            from,
            to,
            assignments: assignments.clone(),
        };
        self.persist_and_apply(event, |e| apply_to_draw(&mut ds, e))
            .await?;

        metrics::counter!(crate::observability::PHASE_TRANSITIONS_TOTAL, "to" => to.as_str())
            .increment(1);
        if !assignments.is_empty() {
            metrics::counter!(crate::observability::LOTTERY_NUMBERS_ASSIGNED_TOTAL)
                .increment(assignments.len() as u64);
        }
        info!(draw = %draw_id, %from, %to, numbered = assignments.len(), "draw advanced");
        Ok(assignments)
    }

    /// At least one participant who is not moving off campus, and at least
    /// one suite to hand out.
    fn check_draft_ready(&self, ds: &DrawState) -> Result<(), EngineError> {
        let participants = self
            .store
            .students_in_draw(ds)
            .iter()
            .filter(|s| s.intent != Intent::OffCampus)
            .count();
        if participants == 0 {
            return Err(EngineError::Precondition(
                "draw has no eligible participants".into(),
            ));
        }
        if ds.suites.is_empty() {
            return Err(EngineError::Precondition("draw has no suites".into()));
        }
        Ok(())
    }

    /// Number units that became eligible after the lottery started. Fails
    /// with `AssignmentConflict` when re-run over numbered units.
    pub async fn run_lottery(&self, draw_id: Ulid) -> Result<Vec<LotteryAssignment>, EngineError> {
        let mut ds = self.draw_write(&draw_id).await?;
        ensure_active(&ds)?;
        if ds.phase != DrawPhase::Lottery {
            return Err(EngineError::Precondition(format!(
                "lottery runs during the lottery phase, draw is in {}",
                ds.phase
            )));
        }
        let groups = self.store.groups_in_draw(&ds).await;
        let candidates = self.candidates(&ds, &groups).await;
        let tie_break = self.sort_config().await.tie_break;
        let assignments = {
            let mut rng = self.lottery_rng.lock().await;
            assign_numbers(candidates, &ds.assignments, tie_break, &mut *rng)?
        };
        if assignments.is_empty() {
            return Ok(assignments);
        }

        let event = Event::LotteryNumbered {
            draw_id,
            assignments: assignments.clone(),
        };
        self.persist_and_apply(event, |e| apply_to_draw(&mut ds, e))
            .await?;
        metrics::counter!(crate::observability::LOTTERY_NUMBERS_ASSIGNED_TOTAL)
            .increment(assignments.len() as u64);
        info!(draw = %draw_id, numbered = assignments.len(), "lottery re-run");
        Ok(assignments)
    }

    /// Deactivate a draw. Idempotent; the phase is left untouched.
    pub async fn archive_draw(&self, draw_id: Ulid) -> Result<(), EngineError> {
        let mut ds = self.draw_write(&draw_id).await?;
        if !ds.active {
            return Ok(());
        }
        let event = Event::DrawArchived { draw_id };
        self.persist_and_apply(event, |e| apply_to_draw(&mut ds, e))
            .await?;
        self.notify.remove(&draw_id);
        info!(draw = %draw_id, phase = %ds.phase, "draw archived");
        Ok(())
    }

    /// Per-size capacity for the draw, recomputed on every call.
    pub async fn capacity_report(&self, draw_id: Ulid) -> Result<Vec<CapacityRow>, EngineError> {
        let ds = self.draw_read(&draw_id).await?;
        let groups = self.store.groups_in_draw(&ds).await;
        let suites = self.store.suites_in_draw(&ds).await;
        let candidates = self.candidates(&ds, &groups).await;
        Ok(capacity_index(
            &suites,
            &ds.restricted_sizes,
            candidates.iter().map(|c| c.sorting_size),
        ))
    }

    /// Size → (available − units).
    pub async fn oversubscription_report(&self, draw_id: Ulid) -> Result<Vec<(Size, i64)>, EngineError> {
        let rows = self.capacity_report(draw_id).await?;
        Ok(rows.iter().map(|r| (r.size, r.delta())).collect())
    }

    /// Free suites per size that a group may take without an override.
    pub(super) async fn selectable_suites(&self, ds: &DrawState) -> std::collections::BTreeMap<Size, u32> {
        let suites = self.store.suites_in_draw(ds).await;
        selectable_by_size(&suites, &ds.restricted_sizes)
    }
}
