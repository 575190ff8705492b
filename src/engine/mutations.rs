use tokio::sync::oneshot;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::{Notice, Notification};

use super::store::apply_to_draw;
use super::{Engine, EngineError, WalCommand, ensure_active};

impl Engine {
    // ── Draws ────────────────────────────────────────────────

    pub async fn create_draw(
        &self,
        id: Ulid,
        name: String,
        intent_locked: bool,
        allow_clipping: bool,
    ) -> Result<(), EngineError> {
        if self.store.draw_count() >= MAX_DRAWS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many draws"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("draw name too long"));
        }
        if self.store.contains_draw(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::DrawCreated {
            id,
            name,
            intent_locked,
            allow_clipping,
        };
        self.persist_and_apply(event, |_| {}).await?;
        info!(draw = %id, "draw created");
        Ok(())
    }

    /// `None` leaves a deadline as it is; `Some(None)` clears it.
    pub async fn set_deadlines(
        &self,
        draw_id: Ulid,
        intent_deadline: Option<Option<Ms>>,
        locking_deadline: Option<Option<Ms>>,
    ) -> Result<(), EngineError> {
        let mut ds = self.draw_write(&draw_id).await?;
        ensure_active(&ds)?;
        let event = Event::DeadlinesSet {
            draw_id,
            intent_deadline: intent_deadline.unwrap_or(ds.intent_deadline),
            locking_deadline: locking_deadline.unwrap_or(ds.locking_deadline),
        };
        self.persist_and_apply(event, |e| apply_to_draw(&mut ds, e))
            .await
    }

    /// Exclude a suite size from the draw: its suites stop counting as
    /// available and its oversubscription no longer blocks the lottery.
    pub async fn restrict_size(&self, draw_id: Ulid, size: Size) -> Result<(), EngineError> {
        let mut ds = self.draw_write(&draw_id).await?;
        ensure_active(&ds)?;
        if ds.restricted_sizes.contains(&size) {
            return Ok(());
        }
        let event = Event::SizeRestricted { draw_id, size };
        self.persist_and_apply(event, |e| apply_to_draw(&mut ds, e))
            .await
    }

    pub async fn unrestrict_size(&self, draw_id: Ulid, size: Size) -> Result<(), EngineError> {
        let mut ds = self.draw_write(&draw_id).await?;
        ensure_active(&ds)?;
        if !ds.restricted_sizes.contains(&size) {
            return Ok(());
        }
        let event = Event::SizeUnrestricted { draw_id, size };
        self.persist_and_apply(event, |e| apply_to_draw(&mut ds, e))
            .await
    }

    pub async fn configure_sort(&self, config: SortConfig) -> Result<(), EngineError> {
        let mut current = self.sort_config.write().await;
        let event = Event::SortConfigured { config };
        self.persist_and_apply(event, |_| *current = config).await?;
        info!(?config, "lottery sort configured");
        Ok(())
    }

    // ── Suites ───────────────────────────────────────────────

    pub async fn create_suite(
        &self,
        id: Ulid,
        label: String,
        size: Size,
        medical: bool,
    ) -> Result<(), EngineError> {
        if self.store.suite_count() >= MAX_SUITES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many suites"));
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(EngineError::LimitExceeded("suite label too long"));
        }
        if size == 0 || size > MAX_GROUP_SIZE {
            return Err(EngineError::LimitExceeded("suite size out of range"));
        }
        if self.store.contains_suite(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::SuiteCreated {
            id,
            label,
            size,
            medical,
        };
        self.persist_and_apply(event, |_| {}).await
    }

    pub async fn attach_suite(&self, draw_id: Ulid, suite_id: Ulid) -> Result<(), EngineError> {
        if !self.store.contains_suite(&suite_id) {
            return Err(EngineError::NotFound(suite_id));
        }
        let mut ds = self.draw_write(&draw_id).await?;
        ensure_active(&ds)?;
        if ds.suites.contains(&suite_id) {
            return Err(EngineError::AlreadyExists(suite_id));
        }
        let event = Event::SuiteAttached { draw_id, suite_id };
        self.persist_and_apply(event, |e| apply_to_draw(&mut ds, e))
            .await
    }

    /// Detach a suite. Refused while a group of this draw lives in it.
    pub async fn detach_suite(&self, draw_id: Ulid, suite_id: Ulid) -> Result<(), EngineError> {
        let mut ds = self.draw_write(&draw_id).await?;
        if !ds.suites.contains(&suite_id) {
            return Err(EngineError::NotFound(suite_id));
        }
        if let Some(suite) = self.store.get_suite(&suite_id)
            && let Some(occupant) = suite.lock().await.occupant
            && ds.groups.contains(&occupant)
        {
            return Err(EngineError::Precondition(format!(
                "suite {suite_id} is occupied by group {occupant}"
            )));
        }
        let event = Event::SuiteDetached { draw_id, suite_id };
        self.persist_and_apply(event, |e| apply_to_draw(&mut ds, e))
            .await
    }

    // ── Students ─────────────────────────────────────────────

    pub async fn create_student(&self, id: Ulid, name: String, surname: String) -> Result<(), EngineError> {
        if self.store.student_count() >= MAX_STUDENTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many students"));
        }
        if name.len() > MAX_NAME_LEN || surname.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("student name too long"));
        }
        if self.store.get_student(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::StudentCreated { id, name, surname };
        self.persist_and_apply(event, |_| {}).await
    }

    /// Add a student to a draw. A student takes part in at most one draw.
    pub async fn enroll_student(&self, draw_id: Ulid, student_id: Ulid) -> Result<(), EngineError> {
        let mut ds = self.draw_write(&draw_id).await?;
        ensure_active(&ds)?;
        if ds.phase.is_frozen() {
            return Err(EngineError::Precondition(format!(
                "draw {draw_id} no longer takes students"
            )));
        }
        let student = self
            .store
            .get_student(&student_id)
            .ok_or(EngineError::NotFound(student_id))?;
        match student.draw_id {
            Some(d) if d == draw_id => return Err(EngineError::AlreadyExists(student_id)),
            Some(d) => {
                return Err(EngineError::Precondition(format!(
                    "student {student_id} already takes part in draw {d}"
                )));
            }
            None => {}
        }
        if self.store.group_of_student(&student_id).is_some() {
            return Err(EngineError::Precondition(format!(
                "student {student_id} belongs to a special group"
            )));
        }
        let event = Event::StudentEnrolled {
            draw_id,
            student_id,
        };
        self.persist_and_apply(event, |e| apply_to_draw(&mut ds, e))
            .await
    }

    /// Declare housing intent. Fixed once the draw's intents lock.
    pub async fn set_intent(&self, student_id: Ulid, intent: Intent) -> Result<(), EngineError> {
        let student = self
            .store
            .get_student(&student_id)
            .ok_or(EngineError::NotFound(student_id))?;
        let _draw = match student.draw_id {
            Some(did) => {
                let ds = self.draw_read(&did).await?;
                ensure_active(&ds)?;
                if ds.intent_locked || !ds.phase.allows_intent_changes() {
                    return Err(EngineError::Precondition(format!(
                        "intents are locked in draw {did}"
                    )));
                }
                Some(ds)
            }
            None => None,
        };
        let event = Event::IntentSet { student_id, intent };
        self.persist_and_apply(event, |_| {}).await
    }

    // ── Deadline reminders ───────────────────────────────────

    /// Deadlines whose reminder window has opened and that were not
    /// reminded yet: (draw, deadline, due at).
    pub fn due_reminders(&self, now: Ms, lead_ms: Ms) -> Vec<(Ulid, Deadline, Ms)> {
        let mut due = Vec::new();
        for draw_id in self.store.draw_ids() {
            let Some(draw) = self.store.get_draw(&draw_id) else {
                continue;
            };
            // Skip draws that are busy; the next tick picks them up.
            let Ok(ds) = draw.try_read() else {
                continue;
            };
            if !ds.active {
                continue;
            }
            let open = |at: Ms| now >= at.saturating_sub(lead_ms) && now < at;
            if ds.phase == DrawPhase::IntentSelection
                && let Some(at) = ds.intent_deadline
                && open(at)
                && !ds.reminders_sent.contains(&Deadline::Intent)
            {
                due.push((draw_id, Deadline::Intent, at));
            }
            if ds.phase.allows_group_changes()
                && let Some(at) = ds.locking_deadline
                && open(at)
                && !ds.reminders_sent.contains(&Deadline::Locking)
            {
                due.push((draw_id, Deadline::Locking, at));
            }
        }
        due
    }

    /// Record a reminder and publish `DeadlineApproaching`. Returns the
    /// recipients, or `None` if this reminder already went out.
    pub async fn send_reminder(
        &self,
        draw_id: Ulid,
        deadline: Deadline,
    ) -> Result<Option<Vec<Ulid>>, EngineError> {
        let mut ds = self.draw_write(&draw_id).await?;
        if ds.reminders_sent.contains(&deadline) {
            return Ok(None);
        }
        let (at, recipients) = match deadline {
            Deadline::Intent => {
                let undeclared: Vec<Ulid> = self
                    .store
                    .students_in_draw(&ds)
                    .into_iter()
                    .filter(|s| s.intent == Intent::Undeclared)
                    .map(|s| s.id)
                    .collect();
                (ds.intent_deadline, undeclared)
            }
            Deadline::Locking => {
                let groups = self.store.groups_in_draw(&ds).await;
                let leaders = groups
                    .values()
                    .filter(|g| !g.status.is_locked())
                    .map(|g| g.leader_id)
                    .collect();
                (ds.locking_deadline, leaders)
            }
        };
        let at = at.ok_or_else(|| {
            EngineError::Precondition(format!("draw {draw_id} has no {} deadline", deadline.as_str()))
        })?;

        let event = Event::ReminderSent { draw_id, deadline };
        self.persist_and_apply(event, |e| apply_to_draw(&mut ds, e))
            .await?;
        self.notify.send(Notice {
            tenant: self.tenant.clone(),
            draw_id: Some(draw_id),
            notification: Notification::DeadlineApproaching {
                draw_id,
                deadline,
                at,
                recipients: recipients.clone(),
            },
        });
        metrics::counter!(crate::observability::REMINDERS_SENT_TOTAL, "deadline" => deadline.as_str())
            .increment(1);
        Ok(Some(recipients))
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current
    /// state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = vec![Event::SortConfigured {
            config: self.sort_config().await,
        }];

        for student in self.store.all_students() {
            events.push(Event::StudentCreated {
                id: student.id,
                name: student.name.clone(),
                surname: student.surname.clone(),
            });
            if student.intent != Intent::Undeclared {
                events.push(Event::IntentSet {
                    student_id: student.id,
                    intent: student.intent,
                });
            }
        }

        for suite_id in self.store.suite_ids() {
            let Some(suite) = self.store.get_suite(&suite_id) else {
                continue;
            };
            let suite = suite.lock().await;
            events.push(Event::SuiteCreated {
                id: suite.id,
                label: suite.label.clone(),
                size: suite.size,
                medical: suite.medical,
            });
        }

        for draw_id in self.store.draw_ids() {
            let Some(draw) = self.store.get_draw(&draw_id) else {
                continue;
            };
            let ds = draw.read().await;
            emit_draw(&ds, &mut events);
        }

        for group_id in self.store.group_ids() {
            let Some(group) = self.store.get_group(&group_id) else {
                continue;
            };
            let group = group.read().await;
            emit_group(&group, &mut events);
        }

        // Clips reference groups, so they follow them.
        for draw_id in self.store.draw_ids() {
            let Some(draw) = self.store.get_draw(&draw_id) else {
                continue;
            };
            let ds = draw.read().await;
            for clip in ds.clips.values() {
                events.push(Event::ClipCreated {
                    clip_id: clip.id,
                    draw_id: ds.id,
                    memberships: clip.memberships.clone(),
                });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!(tenant = %self.tenant, events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn emit_draw(ds: &DrawState, events: &mut Vec<Event>) {
    events.push(Event::DrawCreated {
        id: ds.id,
        name: ds.name.clone(),
        intent_locked: ds.intent_locked,
        allow_clipping: ds.allow_clipping,
    });
    if ds.intent_deadline.is_some() || ds.locking_deadline.is_some() {
        events.push(Event::DeadlinesSet {
            draw_id: ds.id,
            intent_deadline: ds.intent_deadline,
            locking_deadline: ds.locking_deadline,
        });
    }
    for size in &ds.restricted_sizes {
        events.push(Event::SizeRestricted {
            draw_id: ds.id,
            size: *size,
        });
    }
    for suite_id in &ds.suites {
        events.push(Event::SuiteAttached {
            draw_id: ds.id,
            suite_id: *suite_id,
        });
    }
    for student_id in &ds.students {
        events.push(Event::StudentEnrolled {
            draw_id: ds.id,
            student_id: *student_id,
        });
    }
    if ds.phase != DrawPhase::Draft || !ds.assignments.is_empty() {
        events.push(Event::PhaseChanged {
            draw_id: ds.id,
            from: DrawPhase::Draft,
            to: ds.phase,
            assignments: ds.assignments.clone(),
        });
    }
    for deadline in &ds.reminders_sent {
        events.push(Event::ReminderSent {
            draw_id: ds.id,
            deadline: *deadline,
        });
    }
    if !ds.active {
        events.push(Event::DrawArchived { draw_id: ds.id });
    }
}

fn emit_group(group: &Group, events: &mut Vec<Event>) {
    events.push(Event::GroupCreated {
        id: group.id,
        draw_id: group.draw_id,
        leader_id: group.leader_id,
        size: group.size,
    });
    for m in group.memberships.iter().filter(|m| m.student_id != group.leader_id) {
        events.push(Event::MembershipAdded {
            group_id: group.id,
            student_id: m.student_id,
            status: m.status,
        });
    }
    if group.status.is_locked() {
        events.push(Event::GroupLocked { group_id: group.id });
    }
    if let Some(suite_id) = group.suite_id {
        events.push(Event::SuiteAssigned {
            group_id: group.id,
            suite_id,
        });
    }
    if group.status == GroupStatus::Finalizing || group.finalized {
        events.push(Event::FinalizingBegan { group_id: group.id });
        for m in group.memberships.iter().filter(|m| m.room_confirmed) {
            events.push(Event::RoomConfirmed {
                group_id: group.id,
                student_id: m.student_id,
            });
        }
    }
}
