use ulid::Ulid;

use crate::model::*;

use super::scheduler::lottery_rows;
use super::{Engine, EngineError};

fn draw_info(ds: &DrawState) -> DrawInfo {
    DrawInfo {
        id: ds.id,
        name: ds.name.clone(),
        phase: ds.phase,
        active: ds.active,
        intent_locked: ds.intent_locked,
        allow_clipping: ds.allow_clipping,
        intent_deadline: ds.intent_deadline,
        locking_deadline: ds.locking_deadline,
        restricted_sizes: ds.restricted_sizes.iter().copied().collect(),
        students: ds.students.len(),
        suites: ds.suites.len(),
        groups: ds.groups.len(),
    }
}

fn suite_info(suite: &Suite) -> SuiteInfo {
    SuiteInfo {
        id: suite.id,
        label: suite.label.clone(),
        size: suite.size,
        medical: suite.medical,
        occupant: suite.occupant,
    }
}

impl Engine {
    pub async fn get_draw(&self, draw_id: Ulid) -> Result<DrawInfo, EngineError> {
        let ds = self.draw_read(&draw_id).await?;
        Ok(draw_info(&ds))
    }

    pub async fn list_draws(&self) -> Vec<DrawInfo> {
        let mut out = Vec::new();
        for id in self.store.draw_ids() {
            if let Some(draw) = self.store.get_draw(&id) {
                out.push(draw_info(&*draw.read().await));
            }
        }
        out
    }

    pub async fn get_group(&self, group_id: Ulid) -> Result<GroupInfo, EngineError> {
        let draw = match self.store.draw_of_group(&group_id) {
            Some(did) => Some(self.draw_read(&did).await?),
            None => None,
        };
        let group = self
            .store
            .get_group(&group_id)
            .ok_or(EngineError::NotFound(group_id))?;
        let group = group.read().await;
        Ok(self.group_info(&group, draw.as_deref()))
    }

    /// Groups of one draw, or every group of the tenant (special groups
    /// included) when `draw_id` is `None`.
    pub async fn list_groups(&self, draw_id: Option<Ulid>) -> Result<Vec<GroupInfo>, EngineError> {
        match draw_id {
            Some(did) => {
                let ds = self.draw_read(&did).await?;
                let groups = self.store.groups_in_draw(&ds).await;
                Ok(groups.values().map(|g| self.group_info(g, Some(&*ds))).collect())
            }
            None => {
                let mut out = Vec::new();
                for id in self.store.group_ids() {
                    if let Ok(info) = self.get_group(id).await {
                        out.push(info);
                    }
                }
                Ok(out)
            }
        }
    }

    fn group_info(&self, group: &Group, draw: Option<&DrawState>) -> GroupInfo {
        let clip_id = draw.and_then(|ds| ds.clip_of(&group.id)).map(|c| c.id);
        let unit = match clip_id {
            Some(c) => Unit::Clip(c),
            None => Unit::Group(group.id),
        };
        let lottery_number = draw
            .and_then(|ds| ds.assignment_for(&unit))
            .map(|a| a.number);
        GroupInfo {
            id: group.id,
            draw_id: group.draw_id,
            leader_id: group.leader_id,
            size: group.size,
            status: group.status,
            members: group.member_ids(),
            suite_id: group.suite_id,
            clip_id,
            lottery_number,
            finalized: group.finalized,
        }
    }

    pub async fn get_suite(&self, suite_id: Ulid) -> Result<SuiteInfo, EngineError> {
        let suite = self
            .store
            .get_suite(&suite_id)
            .ok_or(EngineError::NotFound(suite_id))?;
        let suite = suite.lock().await;
        Ok(suite_info(&suite))
    }

    /// Suites attached to a draw, or every suite when `draw_id` is `None`.
    pub async fn list_suites(&self, draw_id: Option<Ulid>) -> Result<Vec<SuiteInfo>, EngineError> {
        match draw_id {
            Some(did) => {
                let ds = self.draw_read(&did).await?;
                let suites = self.store.suites_in_draw(&ds).await;
                Ok(suites.iter().map(suite_info).collect())
            }
            None => {
                let mut out = Vec::new();
                for id in self.store.suite_ids() {
                    if let Some(suite) = self.store.get_suite(&id) {
                        out.push(suite_info(&*suite.lock().await));
                    }
                }
                Ok(out)
            }
        }
    }

    pub async fn list_students(&self, draw_id: Option<Ulid>) -> Result<Vec<Student>, EngineError> {
        match draw_id {
            Some(did) => {
                let ds = self.draw_read(&did).await?;
                Ok(self.store.students_in_draw(&ds))
            }
            None => Ok(self.store.all_students()),
        }
    }

    /// Every numbered unit with its selection state, in turn order.
    pub async fn lottery_results(&self, draw_id: Ulid) -> Result<Vec<LotteryRow>, EngineError> {
        let ds = self.draw_read(&draw_id).await?;
        let groups = self.store.groups_in_draw(&ds).await;
        Ok(lottery_rows(&ds.assignments, &groups, &ds.clips))
    }
}
