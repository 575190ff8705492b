use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::lottery::sorting_size;
use super::store::{apply_to_draw, apply_to_group, apply_to_suite};
use super::{Engine, EngineError, ensure_active};

/// Group edits inside a draw are only legal while groups are forming.
fn ensure_forming(ds: &DrawState) -> Result<(), EngineError> {
    ensure_active(ds)?;
    if ds.phase.allows_group_changes() {
        Ok(())
    } else {
        Err(EngineError::Precondition(format!(
            "groups are frozen during {}",
            ds.phase
        )))
    }
}

fn ensure_unlocked(group: &Group) -> Result<(), EngineError> {
    if group.status.is_locked() {
        Err(EngineError::Precondition(format!(
            "group {} is locked",
            group.id
        )))
    } else {
        Ok(())
    }
}

impl Engine {
    /// A student may join a draw group only if they take part in that draw
    /// and are not moving off campus; special groups take students outside
    /// every draw.
    fn check_student_for(&self, student_id: &Ulid, draw: Option<&DrawState>) -> Result<(), EngineError> {
        let student = self
            .store
            .get_student(student_id)
            .ok_or(EngineError::NotFound(*student_id))?;
        match draw {
            Some(ds) => {
                if student.draw_id != Some(ds.id) {
                    return Err(EngineError::Precondition(format!(
                        "student {student_id} is not in draw {}",
                        ds.id
                    )));
                }
                if student.intent == Intent::OffCampus {
                    return Err(EngineError::Precondition(format!(
                        "student {student_id} is moving off campus"
                    )));
                }
            }
            None => {
                if student.draw_id.is_some() {
                    return Err(EngineError::Precondition(format!(
                        "student {student_id} takes part in a draw"
                    )));
                }
            }
        }
        Ok(())
    }

    pub async fn create_group(
        &self,
        id: Ulid,
        draw_id: Option<Ulid>,
        leader_id: Ulid,
        size: Size,
    ) -> Result<(), EngineError> {
        if self.store.group_count() >= MAX_GROUPS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many groups"));
        }
        if size == 0 || size > MAX_GROUP_SIZE {
            return Err(EngineError::LimitExceeded("group size out of range"));
        }
        if self.store.contains_group(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let mut draw = match draw_id {
            Some(did) => Some(self.draw_write(&did).await?),
            None => None,
        };
        if let Some(ds) = draw.as_deref() {
            ensure_forming(ds)?;
            if ds.restricted_sizes.contains(&size) {
                return Err(EngineError::Precondition(format!(
                    "size {size} is restricted in this draw"
                )));
            }
        }
        self.check_student_for(&leader_id, draw.as_deref())?;
        if !self.store.reserve_member(leader_id, id) {
            return Err(EngineError::Precondition(format!(
                "student {leader_id} already belongs to a group"
            )));
        }

        let event = Event::GroupCreated {
            id,
            draw_id,
            leader_id,
            size,
        };
        let result = self
            .persist_and_apply(event, |e| {
                if let Some(ds) = draw.as_deref_mut() {
                    apply_to_draw(ds, e);
                }
            })
            .await;
        if result.is_err() {
            self.store.release_member(&leader_id, &id);
        }
        result
    }

    /// Request to join (student-initiated) or invite (leader-initiated).
    pub async fn add_membership(
        &self,
        group_id: Ulid,
        student_id: Ulid,
        status: MembershipStatus,
    ) -> Result<(), EngineError> {
        if status == MembershipStatus::Accepted {
            return Err(EngineError::Precondition(
                "memberships start as requested or invited".into(),
            ));
        }
        let (draw, mut group) = self.lock_group_for_update(&group_id).await?;
        if let Some(ds) = draw.as_deref() {
            ensure_forming(ds)?;
        }
        ensure_unlocked(&group)?;
        if group.status == GroupStatus::Full {
            return Err(EngineError::Precondition(format!("group {group_id} is full")));
        }
        if group.memberships.len() >= MAX_MEMBERSHIPS_PER_GROUP {
            return Err(EngineError::LimitExceeded("too many pending memberships"));
        }
        if group.membership(&student_id).is_some() {
            return Err(EngineError::AlreadyExists(student_id));
        }
        self.check_student_for(&student_id, draw.as_deref())?;
        if self.store.group_of_student(&student_id).is_some() {
            return Err(EngineError::Precondition(format!(
                "student {student_id} already belongs to a group"
            )));
        }

        let event = Event::MembershipAdded {
            group_id,
            student_id,
            status,
        };
        self.persist_and_apply(event, |e| apply_to_group(&mut group, e))
            .await
    }

    pub async fn accept_membership(&self, group_id: Ulid, student_id: Ulid) -> Result<(), EngineError> {
        let (draw, mut group) = self.lock_group_for_update(&group_id).await?;
        if let Some(ds) = draw.as_deref() {
            ensure_forming(ds)?;
        }
        match group.membership(&student_id) {
            None => return Err(EngineError::NotFound(student_id)),
            Some(m) if m.status == MembershipStatus::Accepted => {
                return Err(EngineError::AlreadyExists(student_id));
            }
            Some(_) => {}
        }
        let resize = GroupAction::Resize {
            members: group.accepted_count() + 1,
            size: group.size,
        };
        if group.status.apply(resize).is_none() {
            return Err(EngineError::Precondition(format!(
                "group {group_id} is {} and cannot take another member",
                group.status
            )));
        }
        if !self.store.reserve_member(student_id, group_id) {
            return Err(EngineError::Precondition(format!(
                "student {student_id} already belongs to a group"
            )));
        }

        let event = Event::MembershipAccepted {
            group_id,
            student_id,
        };
        let result = self
            .persist_and_apply(event, |e| apply_to_group(&mut group, e))
            .await;
        if result.is_err() {
            self.store.release_member(&student_id, &group_id);
        }
        result
    }

    /// Leave, decline or remove. The leader cannot leave; disband instead.
    pub async fn remove_membership(&self, group_id: Ulid, student_id: Ulid) -> Result<(), EngineError> {
        let (draw, mut group) = self.lock_group_for_update(&group_id).await?;
        if let Some(ds) = draw.as_deref() {
            ensure_forming(ds)?;
        }
        ensure_unlocked(&group)?;
        if group.leader_id == student_id {
            return Err(EngineError::Precondition(
                "the leader cannot leave; disband the group instead".into(),
            ));
        }
        let was_accepted = match group.membership(&student_id) {
            Some(m) => m.status == MembershipStatus::Accepted,
            None => return Err(EngineError::NotFound(student_id)),
        };

        let event = Event::MembershipRemoved {
            group_id,
            student_id,
            was_accepted,
        };
        self.persist_and_apply(event, |e| apply_to_group(&mut group, e))
            .await
    }

    /// full → locked. Irreversible; pending requests and invites are dropped.
    pub async fn lock_group(&self, group_id: Ulid) -> Result<(), EngineError> {
        let (draw, mut group) = self.lock_group_for_update(&group_id).await?;
        if let Some(ds) = draw.as_deref() {
            ensure_forming(ds)?;
        }
        if group.status.apply(GroupAction::Lock).is_none() {
            return Err(EngineError::Precondition(format!(
                "group {group_id} is {}; only full groups lock",
                group.status
            )));
        }
        let event = Event::GroupLocked { group_id };
        self.persist_and_apply(event, |e| apply_to_group(&mut group, e))
            .await?;
        info!(group = %group_id, "group locked");
        Ok(())
    }

    /// Lock every full group of the draw (optionally only one size).
    /// Returns the groups that were locked.
    pub async fn lock_full_groups(&self, draw_id: Ulid, size: Option<Size>) -> Result<Vec<Ulid>, EngineError> {
        let ds = self.draw_read(&draw_id).await?;
        ensure_forming(&ds)?;

        let mut locked = Vec::new();
        for group_id in ds.groups.iter().copied() {
            let mut group = self.group_write(&group_id).await?;
            if group.status != GroupStatus::Full || size.is_some_and(|s| s != group.size) {
                continue;
            }
            let event = Event::GroupLocked { group_id };
            self.persist_and_apply(event, |e| apply_to_group(&mut group, e))
                .await?;
            locked.push(group_id);
        }
        info!(draw = %draw_id, count = locked.len(), "bulk locked full groups");
        Ok(locked)
    }

    /// locked → finalizing, once the group has a suite. A group finalizes
    /// at most once.
    pub async fn begin_finalizing(&self, group_id: Ulid) -> Result<(), EngineError> {
        let (_draw, mut group) = self.lock_group_for_update(&group_id).await?;
        if group.finalized {
            return Err(EngineError::Precondition(format!(
                "group {group_id} already confirmed its rooms"
            )));
        }
        if group.suite_id.is_none() {
            return Err(EngineError::Precondition(format!(
                "group {group_id} has no suite yet"
            )));
        }
        if group.status.apply(GroupAction::BeginFinalizing).is_none() {
            return Err(EngineError::Precondition(format!(
                "group {group_id} is {}; only locked groups finalize",
                group.status
            )));
        }
        let event = Event::FinalizingBegan { group_id };
        self.persist_and_apply(event, |e| apply_to_group(&mut group, e))
            .await
    }

    /// One member confirms their room. The group returns to locked (and is
    /// marked finalized) once every member has confirmed.
    pub async fn confirm_room(&self, group_id: Ulid, student_id: Ulid) -> Result<(), EngineError> {
        let (_draw, mut group) = self.lock_group_for_update(&group_id).await?;
        if group.status != GroupStatus::Finalizing {
            return Err(EngineError::Precondition(format!(
                "group {group_id} is not finalizing"
            )));
        }
        match group.membership(&student_id) {
            Some(m) if m.status == MembershipStatus::Accepted => {
                if m.room_confirmed {
                    return Ok(());
                }
            }
            _ => return Err(EngineError::NotFound(student_id)),
        }
        let event = Event::RoomConfirmed {
            group_id,
            student_id,
        };
        self.persist_and_apply(event, |e| apply_to_group(&mut group, e))
            .await
    }

    /// Remove a group: release its suite, free its members and take it out
    /// of its clip. Returns the former members.
    pub async fn disband_group(&self, group_id: Ulid) -> Result<Vec<Ulid>, EngineError> {
        let mut draw = match self.store.draw_of_group(&group_id) {
            Some(did) => Some(self.draw_write(&did).await?),
            None => None,
        };
        let clip_exit = match draw.as_deref() {
            Some(ds) => self.clip_exit_for(ds, &group_id).await,
            None => None,
        };

        let mut group = self.group_write(&group_id).await?;
        let suite = match group.suite_id {
            Some(sid) => self.store.get_suite(&sid),
            None => None,
        };
        let mut suite_guard = match &suite {
            Some(s) => Some(s.lock().await),
            None => None,
        };

        let former_members = group.member_ids();
        let event = Event::GroupDisbanded {
            group_id,
            draw_id: group.draw_id,
            suite_id: group.suite_id,
            former_members: former_members.clone(),
            clip_exit,
        };
        self.persist_and_apply(event, |e| {
            if let Some(ds) = draw.as_deref_mut() {
                apply_to_draw(ds, e);
            }
            if let Some(s) = suite_guard.as_deref_mut() {
                apply_to_suite(s, e);
            }
        })
        .await?;
        group.suite_id = None;

        info!(group = %group_id, members = former_members.len(), "group disbanded");
        Ok(former_members)
    }

    /// What leaving its clip does to the rest of the clip. When a numbered
    /// clip dissolves, the remaining group keeps competing: it inherits the
    /// clip's number if its size matches the clip's sorting size, otherwise
    /// it takes the next number of its own size. A numbered clip that
    /// survives is re-sorted over its remaining groups and, if that moves it
    /// to another size, takes the next number there.
    async fn clip_exit_for(&self, ds: &DrawState, group_id: &Ulid) -> Option<ClipExit> {
        let clip = ds.clip_of(group_id)?;
        let remaining: Vec<Ulid> = clip
            .group_ids()
            .into_iter()
            .filter(|g| g != group_id)
            .collect();
        let dissolved = remaining.len() < 2;
        let mut inherited = None;

        if let Some(numbered) = ds.assignment_for(&Unit::Clip(clip.id)) {
            let mut sizes = Vec::with_capacity(remaining.len());
            for id in &remaining {
                if let Some(shared) = self.store.get_group(id) {
                    sizes.push(shared.read().await.size);
                }
            }
            let (unit, size) = match (dissolved, remaining.as_slice(), sizes.as_slice()) {
                (true, [survivor], [size]) => (Unit::Group(*survivor), *size),
                (false, _, _) if !sizes.is_empty() => {
                    let config = self.sort_config().await;
                    (Unit::Clip(clip.id), sorting_size(&sizes, &config))
                }
                _ => (Unit::Clip(clip.id), numbered.sorting_size),
            };
            if size != numbered.sorting_size || unit != numbered.unit {
                let number = if size == numbered.sorting_size {
                    numbered.number
                } else {
                    ds.max_number(size).unwrap_or(0) + 1
                };
                inherited = Some(LotteryAssignment {
                    id: Ulid::new(),
                    unit,
                    sorting_size: size,
                    number,
                });
            }
        }

        Some(ClipExit {
            clip_id: clip.id,
            dissolved,
            inherited,
        })
    }
}
