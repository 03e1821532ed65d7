use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bus::{BusError, LocalBus, Transport};
use crate::clock::Clock;
use crate::protocol::{topic_matches, Envelope};

/// Scan cadence for the inbound directory.
pub const RELAY_POLL_PERIOD_MS: u64 = 10;

/// Writes one JSON file per relayed unit into a spool directory.
///
/// The peer deletes files after consuming them. Files are written to a
/// temporary name and renamed into place so the reader never sees a
/// half-written unit; its tolerance for malformed content remains the
/// backstop, not the mechanism.
#[derive(Debug)]
pub struct RelayWriter {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl RelayWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, RelayError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            sequence: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Sweeps units left over from a previous run. Only the long-running
    /// bridge does this; a one-shot writer must not eat queued units.
    pub fn clean_spool(&self) -> usize {
        let swept = sweep_json_files(&self.dir);
        if swept > 0 {
            info!(dir = %self.dir.display(), swept, "cleared stale relay units");
        }
        swept
    }

    fn write_unit(&self, envelope: &Envelope) -> Result<(), RelayError> {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "{}_{:06}_{}.json",
            envelope.timestamp,
            seq,
            envelope.topic.replace('/', "_")
        );
        let final_path = self.dir.join(&name);
        let tmp_path = self.dir.join(format!(".{name}.tmp"));

        let body = serde_json::to_vec(envelope).map_err(RelayError::Encode)?;
        fs::write(&tmp_path, body)?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }
}

impl Transport for RelayWriter {
    fn publish(&self, topic: &str, payload: Value, now_ms: u64) -> Result<(), BusError> {
        let envelope = Envelope {
            topic: topic.to_string(),
            payload,
            timestamp: now_ms,
        };
        self.write_unit(&envelope)
            .map_err(|e| BusError::PublishFailed(e.to_string()))
    }
}

/// Consumes relayed units from a spool directory: read, parse, delete.
///
/// Files that vanish mid-scan (the writer's own cleanup, a second reader)
/// are skipped silently; malformed files are deleted and logged. Either
/// way the scan continues.
#[derive(Debug)]
pub struct RelayReader {
    dir: PathBuf,
}

impl RelayReader {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, RelayError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// One scan pass over the spool, oldest file names first.
    pub fn poll(&self) -> Vec<Envelope> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "relay scan failed");
                return Vec::new();
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut units = Vec::new();
        for path in paths {
            match fs::read(&path) {
                Ok(bytes) => match serde_json::from_slice::<Envelope>(&bytes) {
                    Ok(envelope) => units.push(envelope),
                    Err(e) => {
                        warn!(file = %path.display(), error = %e, "malformed relay unit discarded");
                    }
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(file = %path.display(), "relay unit vanished mid-scan");
                    continue;
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "relay unit unreadable");
                }
            }
            // Consumed or hopeless either way; missing files are fine.
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(file = %path.display(), error = %e, "relay unit delete failed");
                }
            }
        }
        units
    }
}

fn sweep_json_files(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let mut swept = 0;
    for path in entries.filter_map(Result::ok).map(|e| e.path()) {
        if path.extension().is_some_and(|ext| ext == "json") && fs::remove_file(&path).is_ok() {
            swept += 1;
        }
    }
    swept
}

/// Bridges the in-process buses to a file-relay peer.
///
/// Outbound: `egress` traffic matching `export_filters` becomes one file
/// per message in the writer's directory. Inbound: units found by the
/// reader are republished onto `ingress`. Keeping the two buses separate
/// means an imported unit can never be re-exported and ping-pong between
/// the processes. Per-unit failures are logged and the pumps keep running.
pub async fn run_relay_bridge(
    egress: LocalBus,
    ingress: LocalBus,
    writer: RelayWriter,
    reader: RelayReader,
    export_filters: Vec<String>,
    clock: Arc<dyn Clock>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut outbound = egress.subscribe();
    let mut scan = tokio::time::interval(Duration::from_millis(RELAY_POLL_PERIOD_MS));

    writer.clean_spool();
    info!(
        out_dir = %writer.dir().display(),
        in_dir = %reader.dir().display(),
        "relay bridge running"
    );

    loop {
        tokio::select! {
            received = outbound.recv() => {
                match received {
                    Ok(envelope) => {
                        if export_filters.iter().any(|f| topic_matches(f, &envelope.topic)) {
                            if let Err(e) = writer.write_unit(&envelope) {
                                warn!(topic = %envelope.topic, error = %e, "relay export failed");
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "relay bridge lagged behind the bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = scan.tick() => {
                for unit in reader.poll() {
                    if let Err(e) = ingress.publish(&unit.topic, unit.payload, clock.now_ms()) {
                        warn!(topic = %unit.topic, error = %e, "relay import failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("relay unit encode failed: {0}")]
    Encode(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn written_units_round_trip_and_are_consumed() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RelayWriter::new(dir.path()).unwrap();
        let reader = RelayReader::new(dir.path()).unwrap();

        writer
            .publish("truck/1/sensors", json!({ "truck_id": 1 }), 1000)
            .unwrap();
        writer
            .publish("truck/1/commands", json!({ "accelerate": 5 }), 1001)
            .unwrap();

        let units = reader.poll();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].topic, "truck/1/sensors");
        assert_eq!(units[0].timestamp, 1000);
        assert_eq!(units[1].payload, json!({ "accelerate": 5 }));

        // Consumed units are deleted.
        assert!(reader.poll().is_empty());
    }

    #[test]
    fn malformed_units_are_discarded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RelayWriter::new(dir.path()).unwrap();
        let reader = RelayReader::new(dir.path()).unwrap();

        fs::write(dir.path().join("0000_garbage.json"), b"{ not json").unwrap();
        writer
            .publish("truck/2/state", json!({ "automatic": true, "fault": false }), 5)
            .unwrap();

        let units = reader.poll();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].topic, "truck/2/state");

        // The garbage file was cleaned up too.
        assert!(reader.poll().is_empty());
    }

    #[test]
    fn spool_clean_sweeps_stale_units_only_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("123_old.json"), b"{}").unwrap();

        let writer = RelayWriter::new(dir.path()).unwrap();
        assert!(dir.path().join("123_old.json").exists());

        assert_eq!(writer.clean_spool(), 1);
        let reader = RelayReader::new(dir.path()).unwrap();
        assert!(reader.poll().is_empty());
    }

    #[test]
    fn non_json_files_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let reader = RelayReader::new(dir.path()).unwrap();
        fs::write(dir.path().join("notes.txt"), b"keep me").unwrap();

        assert!(reader.poll().is_empty());
        assert!(dir.path().join("notes.txt").exists());
    }
}
