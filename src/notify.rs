use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use ulid::Ulid;

use crate::model::{Deadline, DrawPhase, Ms};

const CHANNEL_CAPACITY: usize = 256;

/// Outbound notification. Consumers (mailers, dashboards) see these, never
/// raw WAL events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    DrawPhaseChanged {
        draw_id: Ulid,
        old_phase: DrawPhase,
        new_phase: DrawPhase,
    },
    DrawArchived {
        draw_id: Ulid,
    },
    GroupLocked {
        group_id: Ulid,
    },
    GroupDisbanded {
        group_id: Ulid,
        former_members: Vec<Ulid>,
    },
    SuiteAssigned {
        group_id: Ulid,
        suite_id: Ulid,
    },
    SuiteUnassigned {
        group_id: Ulid,
        suite_id: Ulid,
    },
    DeadlineApproaching {
        draw_id: Ulid,
        deadline: Deadline,
        at: Ms,
        recipients: Vec<Ulid>,
    },
}

/// A notification with its tenant and draw attached, since it is consumed
/// outside the request that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub tenant: String,
    /// `None` for special groups.
    pub draw_id: Option<Ulid>,
    pub notification: Notification,
}

/// Broadcast hub for one tenant: a channel per draw plus a firehose.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notice>>,
    firehose: broadcast::Sender<Notice>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            firehose: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to notices for one draw. Creates the channel if needed.
    pub fn subscribe(&self, draw_id: Ulid) -> broadcast::Receiver<Notice> {
        let sender = self
            .channels
            .entry(draw_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Every notice of the tenant, draw-scoped or not.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Notice> {
        self.firehose.subscribe()
    }

    /// Send a notice. Never blocks; no-op if nobody is listening.
    pub fn send(&self, notice: Notice) {
        if let Some(draw_id) = notice.draw_id
            && let Some(sender) = self.channels.get(&draw_id)
        {
            let _ = sender.send(notice.clone());
        }
        let _ = self.firehose.send(notice);
    }

    /// Drop a draw's channel once the draw is archived.
    pub fn remove(&self, draw_id: &Ulid) {
        self.channels.remove(draw_id);
    }
}

/// Drain a tenant's firehose into the log, one JSON object per notice.
/// Mail and dashboard integrations tail this target.
pub async fn run_outbox(mut rx: broadcast::Receiver<Notice>) {
    loop {
        match rx.recv().await {
            Ok(notice) => match serde_json::to_string(&notice) {
                Ok(json) => info!(target: "suitedraw::outbox", "{json}"),
                Err(e) => warn!(tenant = %notice.tenant, "notice not serializable: {e}"),
            },
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "outbox fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(draw_id: Option<Ulid>) -> Notice {
        Notice {
            tenant: "college".into(),
            draw_id,
            notification: Notification::GroupLocked {
                group_id: Ulid::new(),
            },
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let draw = Ulid::new();
        let mut rx = hub.subscribe(draw);

        let n = notice(Some(draw));
        hub.send(n.clone());
        assert_eq!(rx.recv().await.unwrap(), n);
    }

    #[tokio::test]
    async fn firehose_sees_every_draw() {
        let hub = NotifyHub::new();
        let mut all = hub.subscribe_all();
        let mut other = hub.subscribe(Ulid::new());

        let first = notice(Some(Ulid::new()));
        let special = notice(None);
        hub.send(first.clone());
        hub.send(special.clone());

        assert_eq!(all.recv().await.unwrap(), first);
        assert_eq!(all.recv().await.unwrap(), special);
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(notice(Some(Ulid::new())));
        hub.remove(&Ulid::new());
    }

    #[test]
    fn notice_serializes_with_type_tag() {
        let draw_id = Ulid::new();
        let n = Notice {
            tenant: "college".into(),
            draw_id: Some(draw_id),
            notification: Notification::DrawPhaseChanged {
                draw_id,
                old_phase: DrawPhase::PreLottery,
                new_phase: DrawPhase::Lottery,
            },
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["tenant"], "college");
        assert_eq!(json["notification"]["type"], "draw_phase_changed");
        assert_eq!(json["notification"]["new_phase"], "Lottery");
    }

    #[tokio::test]
    async fn outbox_drains_until_hub_dropped() {
        let hub = NotifyHub::new();
        let outbox = tokio::spawn(run_outbox(hub.subscribe_all()));
        hub.send(notice(None));
        drop(hub);
        outbox.await.unwrap();
    }
}
