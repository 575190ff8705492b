use std::net::SocketAddr;

use crate::sql::Command;

// ── Requests ────────────────────────────────────────────────────

/// Counter: statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "suitedraw_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "suitedraw_query_duration_seconds";

// ── Resources ───────────────────────────────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "suitedraw_connections_active";
pub const CONNECTIONS_TOTAL: &str = "suitedraw_connections_total";
pub const CONNECTIONS_REJECTED_TOTAL: &str = "suitedraw_connections_rejected_total";

/// Gauge: loaded tenant engines.
pub const TENANTS_ACTIVE: &str = "suitedraw_tenants_active";

/// Histogram: group-commit fsync duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "suitedraw_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "suitedraw_wal_flush_batch_size";

// ── Draw lifecycle ──────────────────────────────────────────────

/// Counter: draw phase transitions. Labels: to.
pub const PHASE_TRANSITIONS_TOTAL: &str = "suitedraw_phase_transitions_total";

/// Counter: lottery numbers handed out.
pub const LOTTERY_NUMBERS_ASSIGNED_TOTAL: &str = "suitedraw_lottery_numbers_assigned_total";

/// Counter: suite assignment attempts. Labels: outcome.
pub const SUITE_ASSIGNMENTS_TOTAL: &str = "suitedraw_suite_assignments_total";

/// Counter: deadline reminders sent. Labels: deadline.
pub const REMINDERS_SENT_TOTAL: &str = "suitedraw_reminders_sent_total";

/// Install the Prometheus exporter on `port`. No-op without a port.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter: {e}"),
    }
}

/// Short metric label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertDraw { .. } => "insert_draw",
        Command::AdvanceDraw { .. } => "advance_draw",
        Command::ArchiveDraw { .. } => "archive_draw",
        Command::SetDeadlines { .. } => "set_deadlines",
        Command::InsertSuite { .. } => "insert_suite",
        Command::AttachSuite { .. } => "attach_suite",
        Command::DetachSuite { .. } => "detach_suite",
        Command::InsertStudent { .. } => "insert_student",
        Command::EnrollStudent { .. } => "enroll_student",
        Command::SetIntent { .. } => "set_intent",
        Command::InsertGroup { .. } => "insert_group",
        Command::LockGroup { .. } => "lock_group",
        Command::LockFullGroups { .. } => "lock_full_groups",
        Command::BeginFinalizing { .. } => "begin_finalizing",
        Command::DisbandGroup { .. } => "disband_group",
        Command::InsertMembership { .. } => "insert_membership",
        Command::AcceptMembership { .. } => "accept_membership",
        Command::ConfirmRoom { .. } => "confirm_room",
        Command::DeleteMembership { .. } => "delete_membership",
        Command::InsertClip { .. } => "insert_clip",
        Command::ConfirmClip { .. } => "confirm_clip",
        Command::LeaveClip { .. } => "leave_clip",
        Command::RestrictSize { .. } => "restrict_size",
        Command::UnrestrictSize { .. } => "unrestrict_size",
        Command::RunLottery { .. } => "run_lottery",
        Command::AssignSuite { .. } => "assign_suite",
        Command::UnassignSuite { .. } => "unassign_suite",
        Command::ConfigureSort { .. } => "configure_sort",
        Command::Select { report, .. } => report.as_str(),
    }
}
