use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, now_ms};
use crate::model::Ms;

const REMINDER_TICK: Duration = Duration::from_secs(5);
const COMPACT_TICK: Duration = Duration::from_secs(30);

/// Send every reminder whose window is open at `now`. Returns how many
/// went out.
pub async fn remind_due(engine: &Engine, now: Ms, lead_ms: Ms) -> usize {
    let mut sent = 0;
    for (draw_id, deadline, at) in engine.due_reminders(now, lead_ms) {
        match engine.send_reminder(draw_id, deadline).await {
            Ok(Some(recipients)) => {
                sent += 1;
                info!(
                    tenant = %engine.tenant,
                    draw = %draw_id,
                    deadline = deadline.as_str(),
                    at,
                    recipients = recipients.len(),
                    "deadline reminder sent"
                );
            }
            // Raced with another tick.
            Ok(None) => {}
            Err(e) => debug!(draw = %draw_id, "reminder skipped: {e}"),
        }
    }
    sent
}

/// Per-tenant reminder loop.
pub async fn run_reminders(engine: Arc<Engine>, lead_ms: Ms) {
    let mut interval = tokio::time::interval(REMINDER_TICK);
    loop {
        interval.tick().await;
        remind_due(&engine, now_ms(), lead_ms).await;
    }
}

/// Per-tenant compaction loop: rewrite the WAL once `threshold` appends
/// have accumulated since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_TICK);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        if let Err(e) = engine.compact_wal().await {
            warn!(tenant = %engine.tenant, appends, "WAL compaction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::notify::{Notification, NotifyHub};
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("suitedraw_test_reminders");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn intent_reminder_reaches_undeclared_students() {
        let path = test_wal_path("intent.wal");
        let engine = Engine::new("college".into(), path, Arc::new(NotifyHub::new())).unwrap();

        let draw = Ulid::new();
        engine
            .create_draw(draw, "Fall".into(), false, false)
            .await
            .unwrap();
        let suite = Ulid::new();
        engine.create_suite(suite, "A-1".into(), 2, false).await.unwrap();
        engine.attach_suite(draw, suite).await.unwrap();
        let (quiet, decided) = (Ulid::new(), Ulid::new());
        for id in [quiet, decided] {
            engine
                .create_student(id, "Sam".into(), "Reed".into())
                .await
                .unwrap();
            engine.enroll_student(draw, id).await.unwrap();
        }
        engine.set_intent(decided, Intent::OnCampus).await.unwrap();
        engine
            .advance_draw(draw, DrawPhase::IntentSelection)
            .await
            .unwrap();

        let now = now_ms();
        engine
            .set_deadlines(draw, Some(Some(now + 60_000)), None)
            .await
            .unwrap();
        let mut rx = engine.notify.subscribe(draw);

        // Window not open yet.
        assert_eq!(remind_due(&engine, now, 1_000).await, 0);
        assert_eq!(remind_due(&engine, now, 120_000).await, 1);
        assert_eq!(remind_due(&engine, now, 120_000).await, 0);

        let notice = rx.recv().await.unwrap();
        match notice.notification {
            Notification::DeadlineApproaching {
                deadline,
                recipients,
                ..
            } => {
                assert_eq!(deadline, Deadline::Intent);
                assert_eq!(recipients, vec![quiet]);
            }
            other => panic!("unexpected notice {other:?}"),
        }
    }

    #[tokio::test]
    async fn passed_deadline_is_not_reminded() {
        let path = test_wal_path("passed.wal");
        let engine = Engine::new("college".into(), path, Arc::new(NotifyHub::new())).unwrap();
        let draw = Ulid::new();
        engine
            .create_draw(draw, "Late".into(), true, false)
            .await
            .unwrap();
        let (suite, student) = (Ulid::new(), Ulid::new());
        engine.create_suite(suite, "B-1".into(), 1, false).await.unwrap();
        engine.attach_suite(draw, suite).await.unwrap();
        engine
            .create_student(student, "Jo".into(), "Park".into())
            .await
            .unwrap();
        engine.enroll_student(draw, student).await.unwrap();
        engine
            .advance_draw(draw, DrawPhase::GroupFormation)
            .await
            .unwrap();
        let now = now_ms();
        engine
            .set_deadlines(draw, None, Some(Some(now - 1)))
            .await
            .unwrap();
        assert_eq!(remind_due(&engine, now, 120_000).await, 0);
    }
}
