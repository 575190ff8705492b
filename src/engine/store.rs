use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;

pub type SharedDraw = Arc<RwLock<DrawState>>;
pub type SharedGroup = Arc<RwLock<Group>>;
pub type SharedSuite = Arc<Mutex<Suite>>;

/// Rows and join indexes for one tenant. Draw-scoped joins (`draw_suites`,
/// `draw_students`, clips, lottery assignments) live inside `DrawState`
/// under the draw lock; everything here is reachable without it.
pub struct InMemoryStore {
    draws: DashMap<Ulid, SharedDraw>,
    groups: DashMap<Ulid, SharedGroup>,
    suites: DashMap<Ulid, SharedSuite>,
    students: DashMap<Ulid, Student>,
    /// group → draw, for every non-special group.
    group_to_draw: DashMap<Ulid, Ulid>,
    /// student → the group holding their accepted membership.
    student_group: DashMap<Ulid, Ulid>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            draws: DashMap::new(),
            groups: DashMap::new(),
            suites: DashMap::new(),
            students: DashMap::new(),
            group_to_draw: DashMap::new(),
            student_group: DashMap::new(),
        }
    }

    // ── Draws ────────────────────────────────────────────────

    pub fn draw_count(&self) -> usize {
        self.draws.len()
    }

    pub fn contains_draw(&self, id: &Ulid) -> bool {
        self.draws.contains_key(id)
    }

    pub fn get_draw(&self, id: &Ulid) -> Option<SharedDraw> {
        self.draws.get(id).map(|e| e.value().clone())
    }

    pub fn draw_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.draws.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    // ── Groups ───────────────────────────────────────────────

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn contains_group(&self, id: &Ulid) -> bool {
        self.groups.contains_key(id)
    }

    pub fn get_group(&self, id: &Ulid) -> Option<SharedGroup> {
        self.groups.get(id).map(|e| e.value().clone())
    }

    pub fn group_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.groups.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn draw_of_group(&self, group_id: &Ulid) -> Option<Ulid> {
        self.group_to_draw.get(group_id).map(|e| *e.value())
    }

    /// Snapshot of every group in the draw, read-locked one at a time in
    /// ascending id order.
    pub async fn groups_in_draw(&self, ds: &DrawState) -> BTreeMap<Ulid, Group> {
        let mut out = BTreeMap::new();
        for id in &ds.groups {
            if let Some(group) = self.get_group(id) {
                out.insert(*id, group.read().await.clone());
            }
        }
        out
    }

    // ── Suites ───────────────────────────────────────────────

    pub fn suite_count(&self) -> usize {
        self.suites.len()
    }

    pub fn contains_suite(&self, id: &Ulid) -> bool {
        self.suites.contains_key(id)
    }

    pub fn get_suite(&self, id: &Ulid) -> Option<SharedSuite> {
        self.suites.get(id).map(|e| e.value().clone())
    }

    pub fn suite_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.suites.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub async fn suites_in_draw(&self, ds: &DrawState) -> Vec<Suite> {
        let mut out = Vec::with_capacity(ds.suites.len());
        for id in &ds.suites {
            if let Some(suite) = self.get_suite(id) {
                out.push(suite.lock().await.clone());
            }
        }
        out
    }

    // ── Students ─────────────────────────────────────────────

    pub fn student_count(&self) -> usize {
        self.students.len()
    }

    pub fn get_student(&self, id: &Ulid) -> Option<Student> {
        self.students.get(id).map(|e| e.value().clone())
    }

    pub fn surname_of(&self, id: &Ulid) -> String {
        self.students
            .get(id)
            .map(|s| s.surname.clone())
            .unwrap_or_default()
    }

    pub fn students_in_draw(&self, ds: &DrawState) -> Vec<Student> {
        ds.students
            .iter()
            .filter_map(|id| self.get_student(id))
            .collect()
    }

    pub fn all_students(&self) -> Vec<Student> {
        let mut out: Vec<Student> = self.students.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|s| s.id);
        out
    }

    // ── Accepted-membership index ────────────────────────────

    pub fn group_of_student(&self, student_id: &Ulid) -> Option<Ulid> {
        self.student_group.get(student_id).map(|e| *e.value())
    }

    /// Claim the student for `group_id`. Fails if the student already holds
    /// an accepted membership anywhere.
    pub fn reserve_member(&self, student_id: Ulid, group_id: Ulid) -> bool {
        match self.student_group.entry(student_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(group_id);
                true
            }
        }
    }

    pub fn release_member(&self, student_id: &Ulid, group_id: &Ulid) {
        self.student_group.remove_if(student_id, |_, g| g == group_id);
    }

    // ── Event application ────────────────────────────────────

    /// Row creation/removal and the indexes kept outside any entity lock.
    pub fn apply_index(&self, event: &Event) {
        match event {
            Event::DrawCreated {
                id,
                name,
                intent_locked,
                allow_clipping,
            } => {
                let ds = DrawState::new(*id, name.clone(), *intent_locked, *allow_clipping);
                self.draws.insert(*id, Arc::new(RwLock::new(ds)));
            }
            Event::SuiteCreated {
                id,
                label,
                size,
                medical,
            } => {
                let suite = Suite {
                    id: *id,
                    label: label.clone(),
                    size: *size,
                    medical: *medical,
                    occupant: None,
                };
                self.suites.insert(*id, Arc::new(Mutex::new(suite)));
            }
            Event::StudentCreated { id, name, surname } => {
                self.students.insert(
                    *id,
                    Student {
                        id: *id,
                        name: name.clone(),
                        surname: surname.clone(),
                        draw_id: None,
                        intent: Intent::Undeclared,
                    },
                );
            }
            Event::StudentEnrolled {
                draw_id,
                student_id,
            } => {
                if let Some(mut s) = self.students.get_mut(student_id) {
                    s.draw_id = Some(*draw_id);
                }
            }
            Event::IntentSet { student_id, intent } => {
                if let Some(mut s) = self.students.get_mut(student_id) {
                    s.intent = *intent;
                }
            }
            Event::GroupCreated {
                id,
                draw_id,
                leader_id,
                size,
            } => {
                let group = Group::new(*id, *draw_id, *leader_id, *size);
                self.groups.insert(*id, Arc::new(RwLock::new(group)));
                if let Some(did) = draw_id {
                    self.group_to_draw.insert(*id, *did);
                }
                self.student_group.insert(*leader_id, *id);
            }
            Event::MembershipAdded {
                group_id,
                student_id,
                status: MembershipStatus::Accepted,
            }
            | Event::MembershipAccepted {
                group_id,
                student_id,
            } => {
                self.student_group.insert(*student_id, *group_id);
            }
            Event::MembershipRemoved {
                group_id,
                student_id,
                was_accepted: true,
            } => {
                self.release_member(student_id, group_id);
            }
            Event::GroupDisbanded {
                group_id,
                former_members,
                ..
            } => {
                self.groups.remove(group_id);
                self.group_to_draw.remove(group_id);
                for student_id in former_members {
                    self.release_member(student_id, group_id);
                }
            }
            _ => {}
        }
    }
}

/// Apply an event to a draw aggregate (no locking: caller holds the lock).
pub(crate) fn apply_to_draw(ds: &mut DrawState, event: &Event) {
    match event {
        Event::DeadlinesSet {
            intent_deadline,
            locking_deadline,
            ..
        } => {
            if ds.intent_deadline != *intent_deadline {
                ds.reminders_sent.remove(&Deadline::Intent);
            }
            if ds.locking_deadline != *locking_deadline {
                ds.reminders_sent.remove(&Deadline::Locking);
            }
            ds.intent_deadline = *intent_deadline;
            ds.locking_deadline = *locking_deadline;
        }
        Event::PhaseChanged {
            to, assignments, ..
        } => {
            ds.phase = *to;
            if *to == DrawPhase::GroupFormation {
                ds.intent_locked = true;
            }
            ds.assignments.extend(assignments.iter().cloned());
        }
        Event::LotteryNumbered { assignments, .. } => {
            ds.assignments.extend(assignments.iter().cloned());
        }
        Event::DrawArchived { .. } => ds.active = false,
        Event::SizeRestricted { size, .. } => {
            ds.restricted_sizes.insert(*size);
        }
        Event::SizeUnrestricted { size, .. } => {
            ds.restricted_sizes.remove(size);
        }
        Event::ReminderSent { deadline, .. } => {
            ds.reminders_sent.insert(*deadline);
        }
        Event::SuiteAttached { suite_id, .. } => {
            ds.suites.insert(*suite_id);
        }
        Event::SuiteDetached { suite_id, .. } => {
            ds.suites.remove(suite_id);
        }
        Event::StudentEnrolled { student_id, .. } => {
            ds.students.insert(*student_id);
        }
        Event::GroupCreated { id, .. } => {
            ds.groups.insert(*id);
        }
        Event::GroupDisbanded {
            group_id,
            clip_exit,
            ..
        } => {
            ds.groups.remove(group_id);
            ds.assignments.retain(|a| a.unit != Unit::Group(*group_id));
            if let Some(exit) = clip_exit {
                if let Some(clip) = ds.clips.get_mut(&exit.clip_id) {
                    clip.memberships.retain(|m| m.group_id != *group_id);
                }
                if exit.dissolved {
                    ds.clips.remove(&exit.clip_id);
                    ds.assignments.retain(|a| a.unit != Unit::Clip(exit.clip_id));
                }
                if let Some(inherited) = &exit.inherited {
                    ds.assignments.retain(|a| a.unit != Unit::Clip(exit.clip_id));
                    ds.assignments.push(inherited.clone());
                }
            }
        }
        Event::ClipCreated {
            clip_id,
            draw_id,
            memberships,
        } => {
            ds.clips.insert(
                *clip_id,
                Clip {
                    id: *clip_id,
                    draw_id: *draw_id,
                    memberships: memberships.clone(),
                },
            );
        }
        Event::ClipConfirmed {
            clip_id, group_id, ..
        } => {
            if let Some(clip) = ds.clips.get_mut(clip_id)
                && let Some(m) = clip.memberships.iter_mut().find(|m| m.group_id == *group_id)
            {
                m.confirmed = true;
            }
        }
        Event::ClipLeft {
            clip_id, group_id, ..
        } => {
            let dissolve = match ds.clips.get_mut(clip_id) {
                Some(clip) => {
                    clip.memberships.retain(|m| m.group_id != *group_id);
                    clip.memberships.len() < 2
                }
                None => false,
            };
            if dissolve {
                ds.clips.remove(clip_id);
                ds.assignments.retain(|a| a.unit != Unit::Clip(*clip_id));
            }
        }
        _ => {}
    }
}

/// Apply an event to a group row (caller holds the group's write lock).
pub(crate) fn apply_to_group(group: &mut Group, event: &Event) {
    match event {
        Event::MembershipAdded {
            student_id, status, ..
        } => {
            group.memberships.push(Membership {
                student_id: *student_id,
                status: *status,
                locked: false,
                room_confirmed: false,
            });
            group.refresh_status();
        }
        Event::MembershipAccepted { student_id, .. } => {
            if let Some(m) = group.membership_mut(student_id) {
                m.status = MembershipStatus::Accepted;
            }
            group.refresh_status();
        }
        Event::MembershipRemoved { student_id, .. } => {
            group.memberships.retain(|m| m.student_id != *student_id);
            group.refresh_status();
        }
        Event::GroupLocked { .. } => {
            group
                .memberships
                .retain(|m| m.status == MembershipStatus::Accepted);
            for m in &mut group.memberships {
                m.locked = true;
            }
            group.status = GroupStatus::Locked;
        }
        Event::FinalizingBegan { .. } => {
            group.status = GroupStatus::Finalizing;
            for m in &mut group.memberships {
                m.room_confirmed = false;
            }
        }
        Event::RoomConfirmed { student_id, .. } => {
            if let Some(m) = group.membership_mut(student_id) {
                m.room_confirmed = true;
            }
            let all_confirmed = group
                .memberships
                .iter()
                .filter(|m| m.status == MembershipStatus::Accepted)
                .all(|m| m.room_confirmed);
            if all_confirmed
                && let Some(next) = group.status.apply(GroupAction::FinishFinalizing)
            {
                group.status = next;
                group.finalized = true;
            }
        }
        Event::SuiteAssigned { suite_id, .. } => {
            group.suite_id = Some(*suite_id);
        }
        Event::SuiteUnassigned { .. } => {
            group.suite_id = None;
            if let Some(next) = group.status.apply(GroupAction::CancelFinalizing) {
                group.status = next;
                for m in &mut group.memberships {
                    m.room_confirmed = false;
                }
            }
        }
        _ => {}
    }
}

/// Apply an event to a suite row (caller holds the suite's mutex).
pub(crate) fn apply_to_suite(suite: &mut Suite, event: &Event) {
    match event {
        Event::SuiteAssigned { group_id, .. } => suite.occupant = Some(*group_id),
        Event::SuiteUnassigned { .. } | Event::GroupDisbanded { .. } => suite.occupant = None,
        _ => {}
    }
}
