//! Operations audit log.
//!
//! One JSON line per record operation: timestamp, operation, caller ip and
//! username. Audit failures are logged and swallowed; they must never fail
//! the request that triggered them.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Serialize)]
struct AuditEntry<'a> {
    ts: chrono::DateTime<chrono::Utc>,
    operation: &'a str,
    ip: &'a str,
    username: &'a str,
}

pub struct AuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn record(&self, operation: &str, ip: &str, username: &str) {
        let entry = AuditEntry {
            ts: chrono::Utc::now(),
            operation,
            ip,
            username,
        };

        log::info!("audit: {operation} by {username} from {ip}");

        if let Err(err) = self.append(&entry) {
            log::error!("failed to append audit entry: {err}");
        }
    }

    fn append(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        let _guard = self.lock.lock().expect("audit lock poisoned");

        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        Ok(())
    }
}
