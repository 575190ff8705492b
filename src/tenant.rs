use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::engine::Engine;
use crate::limits::*;
use crate::model::Ms;
use crate::notify::{self, NotifyHub};
use crate::reminders;

/// Background task settings shared by every tenant.
#[derive(Debug, Clone, Copy)]
pub struct TenantSettings {
    pub compact_threshold: u64,
    pub reminder_lead_ms: Ms,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            compact_threshold: 1000,
            reminder_lead_ms: 24 * 60 * 60 * 1000,
        }
    }
}

/// One engine per college. The tenant is the database name of the pgwire
/// connection; each gets its own WAL file and notify hub, plus outbox,
/// reminder and compaction tasks.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    settings: TenantSettings,
}

/// File name stem for a tenant's WAL. ASCII letters, digits and `_` pass
/// through; every other byte becomes `-` plus two hex digits, so distinct
/// names never share a file.
fn file_stem(tenant: &str) -> io::Result<String> {
    if tenant.len() > MAX_TENANT_NAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "tenant name too long",
        ));
    }
    if tenant.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty tenant name",
        ));
    }
    let mut stem = String::with_capacity(tenant.len());
    for b in tenant.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' {
            stem.push(char::from(b));
        } else {
            stem.push_str(&format!("-{b:02x}"));
        }
    }
    Ok(stem)
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, settings: TenantSettings) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            settings,
        }
    }

    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        let stem = file_stem(tenant)?;
        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        // Two first connections may race here; the entry decides which
        // engine survives, so only one replays and owns the WAL.
        let engine = match self.engines.entry(tenant.to_string()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{stem}.wal"));
                let notify = Arc::new(NotifyHub::new());
                let engine = Arc::new(Engine::new(tenant.to_string(), wal_path, notify)?);
                slot.insert(engine.clone());
                engine
            }
        };

        tokio::spawn(notify::run_outbox(engine.notify.subscribe_all()));
        tokio::spawn(reminders::run_reminders(
            engine.clone(),
            self.settings.reminder_lead_ms,
        ));
        tokio::spawn(reminders::run_compactor(
            engine.clone(),
            self.settings.compact_threshold,
        ));

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        info!(tenant, draws = engine.store.draw_count(), "tenant loaded");
        Ok(engine)
    }

    pub fn tenant_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.engines.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
