use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Suite capacity, which is also the number of people a group holds.
pub type Size = u32;

// ── Draw phase ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DrawPhase {
    Draft,
    IntentSelection,
    GroupFormation,
    PreLottery,
    Lottery,
    SuiteSelection,
    Results,
}

impl DrawPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            DrawPhase::Draft => "draft",
            DrawPhase::IntentSelection => "intent_selection",
            DrawPhase::GroupFormation => "group_formation",
            DrawPhase::PreLottery => "pre_lottery",
            DrawPhase::Lottery => "lottery",
            DrawPhase::SuiteSelection => "suite_selection",
            DrawPhase::Results => "results",
        }
    }

    /// Transition function for draws. Returns `None` for every move that is
    /// not a single forward step; `draft → group_formation` is only legal
    /// (and `draft → intent_selection` only illegal) when intents are locked.
    pub fn advance(self, to: DrawPhase, intent_locked: bool) -> Option<DrawPhase> {
        use DrawPhase::*;
        let legal = match (self, to) {
            (Draft, IntentSelection) => !intent_locked,
            (Draft, GroupFormation) => intent_locked,
            (IntentSelection, GroupFormation)
            | (GroupFormation, PreLottery)
            | (PreLottery, Lottery)
            | (Lottery, SuiteSelection)
            | (SuiteSelection, Results) => true,
            _ => false,
        };
        legal.then_some(to)
    }

    /// Groups and clips can still be created, joined and left.
    pub fn allows_group_changes(self) -> bool {
        matches!(self, DrawPhase::GroupFormation | DrawPhase::PreLottery)
    }

    pub fn allows_intent_changes(self) -> bool {
        matches!(self, DrawPhase::Draft | DrawPhase::IntentSelection)
    }

    /// Lottery and later: membership and clips are frozen.
    pub fn is_frozen(self) -> bool {
        self >= DrawPhase::Lottery
    }
}

impl fmt::Display for DrawPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DrawPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(DrawPhase::Draft),
            "intent_selection" => Ok(DrawPhase::IntentSelection),
            "group_formation" => Ok(DrawPhase::GroupFormation),
            "pre_lottery" => Ok(DrawPhase::PreLottery),
            "lottery" => Ok(DrawPhase::Lottery),
            "suite_selection" => Ok(DrawPhase::SuiteSelection),
            "results" => Ok(DrawPhase::Results),
            other => Err(format!("unknown phase: {other}")),
        }
    }
}

// ── Intent ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Intent {
    #[default]
    Undeclared,
    OnCampus,
    OffCampus,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Undeclared => "undeclared",
            Intent::OnCampus => "on_campus",
            Intent::OffCampus => "off_campus",
        }
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "undeclared" => Ok(Intent::Undeclared),
            "on_campus" => Ok(Intent::OnCampus),
            "off_campus" => Ok(Intent::OffCampus),
            other => Err(format!("unknown intent: {other}")),
        }
    }
}

// ── Group status ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupStatus {
    Open,
    Full,
    Locked,
    Finalizing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupAction {
    /// Accepted-membership count changed.
    Resize { members: u32, size: Size },
    Lock,
    BeginFinalizing,
    FinishFinalizing,
    /// Suite taken away while members were confirming rooms.
    CancelFinalizing,
}

impl GroupStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupStatus::Open => "open",
            GroupStatus::Full => "full",
            GroupStatus::Locked => "locked",
            GroupStatus::Finalizing => "finalizing",
        }
    }

    /// Transition function for groups. `None` means the action is illegal in
    /// the current status (including a resize past the group's size).
    pub fn apply(self, action: GroupAction) -> Option<GroupStatus> {
        use GroupStatus::*;
        match (self, action) {
            (Open | Full, GroupAction::Resize { members, size }) if members < size => Some(Open),
            (Open | Full, GroupAction::Resize { members, size }) if members == size => Some(Full),
            (Full, GroupAction::Lock) => Some(Locked),
            (Locked, GroupAction::BeginFinalizing) => Some(Finalizing),
            (Finalizing, GroupAction::FinishFinalizing | GroupAction::CancelFinalizing) => {
                Some(Locked)
            }
            _ => None,
        }
    }

    /// Locked for lottery purposes (finalizing groups stay locked).
    pub fn is_locked(self) -> bool {
        matches!(self, GroupStatus::Locked | GroupStatus::Finalizing)
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MembershipStatus {
    Requested,
    Invited,
    Accepted,
}

impl MembershipStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MembershipStatus::Requested => "requested",
            MembershipStatus::Invited => "invited",
            MembershipStatus::Accepted => "accepted",
        }
    }
}

impl FromStr for MembershipStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "requested" => Ok(MembershipStatus::Requested),
            "invited" => Ok(MembershipStatus::Invited),
            "accepted" => Ok(MembershipStatus::Accepted),
            other => Err(format!("unknown membership status: {other}")),
        }
    }
}

// ── Lottery configuration ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
    Unsorted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClipBias {
    AdvantageLarge,
    AdvantageSmall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TieBreak {
    /// Leader surname, then unit id. Reproducible.
    Surname,
    /// Random permutation within each size bucket.
    Shuffle,
}

/// College-wide lottery sort configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortConfig {
    pub direction: SortDirection,
    pub clip_bias: ClipBias,
    pub tie_break: TieBreak,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            direction: SortDirection::Ascending,
            clip_bias: ClipBias::AdvantageLarge,
            tie_break: TieBreak::Shuffle,
        }
    }
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ascending" | "asc" => Ok(SortDirection::Ascending),
            "descending" | "desc" => Ok(SortDirection::Descending),
            "none" | "unsorted" => Ok(SortDirection::Unsorted),
            other => Err(format!("unknown sort direction: {other}")),
        }
    }
}

impl FromStr for ClipBias {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "large" | "advantage_large" => Ok(ClipBias::AdvantageLarge),
            "small" | "advantage_small" => Ok(ClipBias::AdvantageSmall),
            other => Err(format!("unknown clip bias: {other}")),
        }
    }
}

impl FromStr for TieBreak {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "surname" => Ok(TieBreak::Surname),
            "shuffle" | "random" => Ok(TieBreak::Shuffle),
            other => Err(format!("unknown tie break: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Deadline {
    Intent,
    Locking,
}

impl Deadline {
    pub fn as_str(self) -> &'static str {
        match self {
            Deadline::Intent => "intent",
            Deadline::Locking => "locking",
        }
    }
}

// ── Entities ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Student {
    pub id: Ulid,
    pub name: String,
    pub surname: String,
    /// The draw this student takes part in (`draw_students` join).
    pub draw_id: Option<Ulid>,
    pub intent: Intent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suite {
    pub id: Ulid,
    pub label: String,
    pub size: Size,
    pub medical: bool,
    pub occupant: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub student_id: Ulid,
    pub status: MembershipStatus,
    /// Frozen once the group locks.
    pub locked: bool,
    pub room_confirmed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: Ulid,
    /// `None` for special groups, which are housed outside any lottery.
    pub draw_id: Option<Ulid>,
    pub leader_id: Ulid,
    pub size: Size,
    pub status: GroupStatus,
    pub memberships: Vec<Membership>,
    pub suite_id: Option<Ulid>,
    /// Room confirmation finished; the group cannot finalize again.
    pub finalized: bool,
}

impl Group {
    pub fn new(id: Ulid, draw_id: Option<Ulid>, leader_id: Ulid, size: Size) -> Self {
        let leader = Membership {
            student_id: leader_id,
            status: MembershipStatus::Accepted,
            locked: false,
            room_confirmed: false,
        };
        let status = if size <= 1 {
            GroupStatus::Full
        } else {
            GroupStatus::Open
        };
        Self {
            id,
            draw_id,
            leader_id,
            size,
            status,
            memberships: vec![leader],
            suite_id: None,
            finalized: false,
        }
    }

    pub fn accepted_count(&self) -> u32 {
        self.memberships
            .iter()
            .filter(|m| m.status == MembershipStatus::Accepted)
            .count() as u32
    }

    pub fn member_ids(&self) -> Vec<Ulid> {
        self.memberships
            .iter()
            .filter(|m| m.status == MembershipStatus::Accepted)
            .map(|m| m.student_id)
            .collect()
    }

    pub fn membership(&self, student_id: &Ulid) -> Option<&Membership> {
        self.memberships.iter().find(|m| m.student_id == *student_id)
    }

    pub fn membership_mut(&mut self, student_id: &Ulid) -> Option<&mut Membership> {
        self.memberships
            .iter_mut()
            .find(|m| m.student_id == *student_id)
    }

    /// Re-derive open/full after the membership list changed.
    pub fn refresh_status(&mut self) {
        let action = GroupAction::Resize {
            members: self.accepted_count(),
            size: self.size,
        };
        if let Some(next) = self.status.apply(action) {
            self.status = next;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipMembership {
    pub group_id: Ulid,
    pub confirmed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clip {
    pub id: Ulid,
    pub draw_id: Ulid,
    pub memberships: Vec<ClipMembership>,
}

impl Clip {
    pub fn group_ids(&self) -> Vec<Ulid> {
        self.memberships.iter().map(|m| m.group_id).collect()
    }

    pub fn contains(&self, group_id: &Ulid) -> bool {
        self.memberships.iter().any(|m| m.group_id == *group_id)
    }

    /// At least two groups, every one of them confirmed.
    pub fn fully_confirmed(&self) -> bool {
        self.memberships.len() >= 2 && self.memberships.iter().all(|m| m.confirmed)
    }
}

/// A competing unit: one bare group or one clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Unit {
    Group(Ulid),
    Clip(Ulid),
}

impl Unit {
    pub fn id(&self) -> Ulid {
        match self {
            Unit::Group(id) | Unit::Clip(id) => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Unit::Group(_) => "group",
            Unit::Clip(_) => "clip",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotteryAssignment {
    pub id: Ulid,
    pub unit: Unit,
    pub sorting_size: Size,
    pub number: u32,
}

/// What happens to a clip when one of its groups is disbanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipExit {
    pub clip_id: Ulid,
    /// Fewer than two groups remain, so the clip is removed.
    pub dissolved: bool,
    /// Replaces the clip's numbering: the remaining group's after a numbered
    /// clip dissolves, or the clip's own when its sorting size moved.
    pub inherited: Option<LotteryAssignment>,
}

/// Draw-scoped aggregate guarded by the draw's lock.
#[derive(Debug, Clone)]
pub struct DrawState {
    pub id: Ulid,
    pub name: String,
    pub phase: DrawPhase,
    pub intent_locked: bool,
    pub allow_clipping: bool,
    pub intent_deadline: Option<Ms>,
    pub locking_deadline: Option<Ms>,
    pub restricted_sizes: BTreeSet<Size>,
    pub active: bool,
    /// `draw_students` join.
    pub students: BTreeSet<Ulid>,
    /// `draw_suites` join.
    pub suites: BTreeSet<Ulid>,
    pub groups: BTreeSet<Ulid>,
    pub clips: BTreeMap<Ulid, Clip>,
    pub assignments: Vec<LotteryAssignment>,
    pub reminders_sent: BTreeSet<Deadline>,
}

impl DrawState {
    pub fn new(id: Ulid, name: String, intent_locked: bool, allow_clipping: bool) -> Self {
        Self {
            id,
            name,
            phase: DrawPhase::Draft,
            intent_locked,
            allow_clipping,
            intent_deadline: None,
            locking_deadline: None,
            restricted_sizes: BTreeSet::new(),
            active: true,
            students: BTreeSet::new(),
            suites: BTreeSet::new(),
            groups: BTreeSet::new(),
            clips: BTreeMap::new(),
            assignments: Vec::new(),
            reminders_sent: BTreeSet::new(),
        }
    }

    pub fn clip_of(&self, group_id: &Ulid) -> Option<&Clip> {
        self.clips.values().find(|c| c.contains(group_id))
    }

    pub fn assignment_for(&self, unit: &Unit) -> Option<&LotteryAssignment> {
        self.assignments.iter().find(|a| a.unit == *unit)
    }

    /// Highest number already held by any unit of this sorting size.
    pub fn max_number(&self, size: Size) -> Option<u32> {
        self.assignments
            .iter()
            .filter(|a| a.sorting_size == size)
            .map(|a| a.number)
            .max()
    }
}

// ── WAL record ───────────────────────────────────────────────────

/// Flat event types, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    DrawCreated {
        id: Ulid,
        name: String,
        intent_locked: bool,
        allow_clipping: bool,
    },
    DeadlinesSet {
        draw_id: Ulid,
        intent_deadline: Option<Ms>,
        locking_deadline: Option<Ms>,
    },
    /// Entering the lottery carries the full numbering batch, so numbers and
    /// the phase change land in a single record.
    PhaseChanged {
        draw_id: Ulid,
        from: DrawPhase,
        to: DrawPhase,
        assignments: Vec<LotteryAssignment>,
    },
    LotteryNumbered {
        draw_id: Ulid,
        assignments: Vec<LotteryAssignment>,
    },
    DrawArchived {
        draw_id: Ulid,
    },
    SizeRestricted {
        draw_id: Ulid,
        size: Size,
    },
    SizeUnrestricted {
        draw_id: Ulid,
        size: Size,
    },
    ReminderSent {
        draw_id: Ulid,
        deadline: Deadline,
    },
    SortConfigured {
        config: SortConfig,
    },
    SuiteCreated {
        id: Ulid,
        label: String,
        size: Size,
        medical: bool,
    },
    SuiteAttached {
        draw_id: Ulid,
        suite_id: Ulid,
    },
    SuiteDetached {
        draw_id: Ulid,
        suite_id: Ulid,
    },
    StudentCreated {
        id: Ulid,
        name: String,
        surname: String,
    },
    StudentEnrolled {
        draw_id: Ulid,
        student_id: Ulid,
    },
    IntentSet {
        student_id: Ulid,
        intent: Intent,
    },
    GroupCreated {
        id: Ulid,
        draw_id: Option<Ulid>,
        leader_id: Ulid,
        size: Size,
    },
    MembershipAdded {
        group_id: Ulid,
        student_id: Ulid,
        status: MembershipStatus,
    },
    MembershipAccepted {
        group_id: Ulid,
        student_id: Ulid,
    },
    MembershipRemoved {
        group_id: Ulid,
        student_id: Ulid,
        was_accepted: bool,
    },
    GroupLocked {
        group_id: Ulid,
    },
    FinalizingBegan {
        group_id: Ulid,
    },
    RoomConfirmed {
        group_id: Ulid,
        student_id: Ulid,
    },
    GroupDisbanded {
        group_id: Ulid,
        draw_id: Option<Ulid>,
        suite_id: Option<Ulid>,
        former_members: Vec<Ulid>,
        clip_exit: Option<ClipExit>,
    },
    ClipCreated {
        clip_id: Ulid,
        draw_id: Ulid,
        memberships: Vec<ClipMembership>,
    },
    ClipConfirmed {
        clip_id: Ulid,
        draw_id: Ulid,
        group_id: Ulid,
    },
    ClipLeft {
        clip_id: Ulid,
        draw_id: Ulid,
        group_id: Ulid,
    },
    SuiteAssigned {
        group_id: Ulid,
        suite_id: Ulid,
    },
    SuiteUnassigned {
        group_id: Ulid,
        suite_id: Ulid,
    },
}

impl Event {
    /// Draw whose aggregate this event mutates.
    pub fn draw_id(&self) -> Option<Ulid> {
        match self {
            Event::DeadlinesSet { draw_id, .. }
            | Event::PhaseChanged { draw_id, .. }
            | Event::LotteryNumbered { draw_id, .. }
            | Event::DrawArchived { draw_id }
            | Event::SizeRestricted { draw_id, .. }
            | Event::SizeUnrestricted { draw_id, .. }
            | Event::ReminderSent { draw_id, .. }
            | Event::SuiteAttached { draw_id, .. }
            | Event::SuiteDetached { draw_id, .. }
            | Event::StudentEnrolled { draw_id, .. }
            | Event::ClipCreated { draw_id, .. }
            | Event::ClipConfirmed { draw_id, .. }
            | Event::ClipLeft { draw_id, .. } => Some(*draw_id),
            Event::GroupCreated { draw_id, .. } | Event::GroupDisbanded { draw_id, .. } => *draw_id,
            _ => None,
        }
    }

    /// Group row this event mutates (disbanding removes the row instead).
    pub fn group_id(&self) -> Option<Ulid> {
        match self {
            Event::MembershipAdded { group_id, .. }
            | Event::MembershipAccepted { group_id, .. }
            | Event::MembershipRemoved { group_id, .. }
            | Event::GroupLocked { group_id }
            | Event::FinalizingBegan { group_id }
            | Event::RoomConfirmed { group_id, .. }
            | Event::SuiteAssigned { group_id, .. }
            | Event::SuiteUnassigned { group_id, .. } => Some(*group_id),
            _ => None,
        }
    }

    /// Suite row this event mutates.
    pub fn suite_id(&self) -> Option<Ulid> {
        match self {
            Event::SuiteAssigned { suite_id, .. } | Event::SuiteUnassigned { suite_id, .. } => {
                Some(*suite_id)
            }
            Event::GroupDisbanded { suite_id, .. } => *suite_id,
            _ => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawInfo {
    pub id: Ulid,
    pub name: String,
    pub phase: DrawPhase,
    pub active: bool,
    pub intent_locked: bool,
    pub allow_clipping: bool,
    pub intent_deadline: Option<Ms>,
    pub locking_deadline: Option<Ms>,
    pub restricted_sizes: Vec<Size>,
    pub students: usize,
    pub suites: usize,
    pub groups: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub id: Ulid,
    pub draw_id: Option<Ulid>,
    pub leader_id: Ulid,
    pub size: Size,
    pub status: GroupStatus,
    pub members: Vec<Ulid>,
    pub suite_id: Option<Ulid>,
    pub clip_id: Option<Ulid>,
    pub lottery_number: Option<u32>,
    pub finalized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteInfo {
    pub id: Ulid,
    pub label: String,
    pub size: Size,
    pub medical: bool,
    pub occupant: Option<Ulid>,
}

/// One row of the capacity index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityRow {
    pub size: Size,
    pub available: u32,
    pub units: u32,
}

impl CapacityRow {
    pub fn delta(&self) -> i64 {
        self.available as i64 - self.units as i64
    }

    pub fn oversubscribed(&self) -> bool {
        self.delta() < 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotteryRow {
    pub unit: Unit,
    pub sorting_size: Size,
    pub number: u32,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibleUnit {
    pub unit: Unit,
    pub number: u32,
    pub sorting_size: Size,
    /// Constituent groups that still have to pick a suite.
    pub pending_groups: Vec<Ulid>,
    /// No compatible suite is left for some pending group.
    pub waiting: bool,
}

/// Units whose turn it is: every unselected unit holding the lowest number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub number: u32,
    pub units: Vec<EligibleUnit>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_forward_steps() {
        use DrawPhase::*;
        assert_eq!(Draft.advance(IntentSelection, false), Some(IntentSelection));
        assert_eq!(IntentSelection.advance(GroupFormation, false), Some(GroupFormation));
        assert_eq!(GroupFormation.advance(PreLottery, false), Some(PreLottery));
        assert_eq!(PreLottery.advance(Lottery, false), Some(Lottery));
        assert_eq!(Lottery.advance(SuiteSelection, false), Some(SuiteSelection));
        assert_eq!(SuiteSelection.advance(Results, false), Some(Results));
    }

    #[test]
    fn phase_rejects_skips_and_backward() {
        use DrawPhase::*;
        assert_eq!(Draft.advance(PreLottery, false), None);
        assert_eq!(GroupFormation.advance(Lottery, false), None);
        assert_eq!(Lottery.advance(PreLottery, false), None);
        assert_eq!(Results.advance(Draft, false), None);
        assert_eq!(Lottery.advance(Lottery, false), None);
    }

    #[test]
    fn phase_intent_locked_shortcut() {
        use DrawPhase::*;
        assert_eq!(Draft.advance(GroupFormation, false), None);
        assert_eq!(Draft.advance(GroupFormation, true), Some(GroupFormation));
        assert_eq!(Draft.advance(IntentSelection, true), None);
    }

    #[test]
    fn phase_round_trips_through_str() {
        for phase in [
            DrawPhase::Draft,
            DrawPhase::IntentSelection,
            DrawPhase::GroupFormation,
            DrawPhase::PreLottery,
            DrawPhase::Lottery,
            DrawPhase::SuiteSelection,
            DrawPhase::Results,
        ] {
            assert_eq!(phase.as_str().parse::<DrawPhase>().unwrap(), phase);
        }
        assert!("archived".parse::<DrawPhase>().is_err());
    }

    #[test]
    fn group_status_follows_membership_count() {
        let s = GroupStatus::Open;
        assert_eq!(s.apply(GroupAction::Resize { members: 1, size: 2 }), Some(GroupStatus::Open));
        assert_eq!(s.apply(GroupAction::Resize { members: 2, size: 2 }), Some(GroupStatus::Full));
        assert_eq!(
            GroupStatus::Full.apply(GroupAction::Resize { members: 1, size: 2 }),
            Some(GroupStatus::Open)
        );
        assert_eq!(s.apply(GroupAction::Resize { members: 3, size: 2 }), None);
    }

    #[test]
    fn group_status_lock_requires_full() {
        assert_eq!(GroupStatus::Open.apply(GroupAction::Lock), None);
        assert_eq!(GroupStatus::Full.apply(GroupAction::Lock), Some(GroupStatus::Locked));
        assert_eq!(GroupStatus::Locked.apply(GroupAction::Lock), None);
    }

    #[test]
    fn group_status_locked_is_frozen() {
        let resize = GroupAction::Resize { members: 1, size: 2 };
        assert_eq!(GroupStatus::Locked.apply(resize), None);
        assert_eq!(GroupStatus::Finalizing.apply(resize), None);
    }

    #[test]
    fn group_status_finalizing_cycle() {
        let s = GroupStatus::Locked.apply(GroupAction::BeginFinalizing).unwrap();
        assert_eq!(s, GroupStatus::Finalizing);
        assert!(s.is_locked());
        assert_eq!(s.apply(GroupAction::FinishFinalizing), Some(GroupStatus::Locked));
        assert_eq!(s.apply(GroupAction::CancelFinalizing), Some(GroupStatus::Locked));
        assert_eq!(GroupStatus::Full.apply(GroupAction::BeginFinalizing), None);
    }

    #[test]
    fn new_single_group_starts_full() {
        let g = Group::new(Ulid::new(), None, Ulid::new(), 1);
        assert_eq!(g.status, GroupStatus::Full);
        let g = Group::new(Ulid::new(), None, Ulid::new(), 3);
        assert_eq!(g.status, GroupStatus::Open);
        assert_eq!(g.accepted_count(), 1);
    }

    #[test]
    fn clip_confirmation_gate() {
        let mut clip = Clip {
            id: Ulid::new(),
            draw_id: Ulid::new(),
            memberships: vec![ClipMembership {
                group_id: Ulid::new(),
                confirmed: true,
            }],
        };
        assert!(!clip.fully_confirmed()); // one group is not a clip
        clip.memberships.push(ClipMembership {
            group_id: Ulid::new(),
            confirmed: false,
        });
        assert!(!clip.fully_confirmed());
        clip.memberships[1].confirmed = true;
        assert!(clip.fully_confirmed());
    }

    #[test]
    fn capacity_row_delta() {
        let row = CapacityRow { size: 1, available: 2, units: 3 };
        assert_eq!(row.delta(), -1);
        assert!(row.oversubscribed());
        let row = CapacityRow { size: 2, available: 3, units: 3 };
        assert!(!row.oversubscribed());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::PhaseChanged {
            draw_id: Ulid::new(),
            from: DrawPhase::PreLottery,
            to: DrawPhase::Lottery,
            assignments: vec![LotteryAssignment {
                id: Ulid::new(),
                unit: Unit::Clip(Ulid::new()),
                sorting_size: 3,
                number: 1,
            }],
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
