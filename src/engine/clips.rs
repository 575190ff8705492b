use std::collections::BTreeSet;

use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::store::apply_to_draw;
use super::{Engine, EngineError, ensure_active};

fn ensure_clipping_open(ds: &DrawState) -> Result<(), EngineError> {
    ensure_active(ds)?;
    if !ds.allow_clipping {
        return Err(EngineError::Precondition(format!(
            "draw {} does not allow clipping",
            ds.id
        )));
    }
    if !ds.phase.allows_group_changes() {
        return Err(EngineError::Precondition(format!(
            "clips are frozen during {}",
            ds.phase
        )));
    }
    Ok(())
}

impl Engine {
    /// Propose a clip. The first group initiates and is confirmed; every
    /// other group has to confirm before the clip is numbered.
    pub async fn create_clip(
        &self,
        clip_id: Ulid,
        draw_id: Ulid,
        group_ids: Vec<Ulid>,
    ) -> Result<(), EngineError> {
        if group_ids.len() < 2 {
            return Err(EngineError::Precondition(
                "a clip needs at least two groups".into(),
            ));
        }
        if group_ids.len() > MAX_CLIP_GROUPS {
            return Err(EngineError::LimitExceeded("too many groups in clip"));
        }
        let distinct: BTreeSet<&Ulid> = group_ids.iter().collect();
        if distinct.len() != group_ids.len() {
            return Err(EngineError::Precondition("duplicate group in clip".into()));
        }

        let mut ds = self.draw_write(&draw_id).await?;
        ensure_clipping_open(&ds)?;
        if ds.clips.contains_key(&clip_id) {
            return Err(EngineError::AlreadyExists(clip_id));
        }
        for group_id in &group_ids {
            if !ds.groups.contains(group_id) {
                return Err(EngineError::Precondition(format!(
                    "group {group_id} is not in draw {draw_id}"
                )));
            }
            if let Some(existing) = ds.clip_of(group_id) {
                return Err(EngineError::Precondition(format!(
                    "group {group_id} is already in clip {}",
                    existing.id
                )));
            }
        }

        let memberships = group_ids
            .iter()
            .enumerate()
            .map(|(i, group_id)| ClipMembership {
                group_id: *group_id,
                confirmed: i == 0,
            })
            .collect();
        let event = Event::ClipCreated {
            clip_id,
            draw_id,
            memberships,
        };
        self.persist_and_apply(event, |e| apply_to_draw(&mut ds, e))
            .await?;
        info!(clip = %clip_id, draw = %draw_id, groups = group_ids.len(), "clip proposed");
        Ok(())
    }

    pub async fn confirm_clip(&self, clip_id: Ulid, group_id: Ulid) -> Result<(), EngineError> {
        let draw_id = self
            .store
            .draw_of_group(&group_id)
            .ok_or(EngineError::NotFound(group_id))?;
        let mut ds = self.draw_write(&draw_id).await?;
        ensure_clipping_open(&ds)?;
        let clip = ds.clips.get(&clip_id).ok_or(EngineError::NotFound(clip_id))?;
        match clip.memberships.iter().find(|m| m.group_id == group_id) {
            None => return Err(EngineError::NotFound(group_id)),
            Some(m) if m.confirmed => return Ok(()),
            Some(_) => {}
        }

        let event = Event::ClipConfirmed {
            clip_id,
            draw_id,
            group_id,
        };
        self.persist_and_apply(event, |e| apply_to_draw(&mut ds, e))
            .await
    }

    /// Leave (or decline) a clip. A clip left with fewer than two groups
    /// dissolves.
    pub async fn leave_clip(&self, clip_id: Ulid, group_id: Ulid) -> Result<(), EngineError> {
        let draw_id = self
            .store
            .draw_of_group(&group_id)
            .ok_or(EngineError::NotFound(group_id))?;
        let mut ds = self.draw_write(&draw_id).await?;
        ensure_clipping_open(&ds)?;
        let clip = ds.clips.get(&clip_id).ok_or(EngineError::NotFound(clip_id))?;
        if !clip.contains(&group_id) {
            return Err(EngineError::NotFound(group_id));
        }

        let event = Event::ClipLeft {
            clip_id,
            draw_id,
            group_id,
        };
        self.persist_and_apply(event, |e| apply_to_draw(&mut ds, e))
            .await?;
        if !ds.clips.contains_key(&clip_id) {
            info!(clip = %clip_id, "clip dissolved");
        }
        Ok(())
    }
}
