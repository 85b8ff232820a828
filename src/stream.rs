//! Append-only partitioned record log, the transport between producers and
//! the prediction service. A partition key always maps to the same shard, and
//! within a shard records keep their append order.

use base64::{engine::general_purpose::STANDARD, Engine};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{Result, ServiceError};
use crate::event::InvocationEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRecordOutput {
    pub shard_id: String,
    pub sequence_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub sequence_number: u64,
    pub partition_key: String,
    pub data: Vec<u8>,
}

pub trait RecordLog: Send + Sync {
    fn put_record(&self, stream: &str, data: &[u8], partition_key: &str) -> Result<PutRecordOutput>;

    /// Records of one shard with `sequence_number >= from`, oldest first.
    fn get_records(&self, stream: &str, shard_id: &str, from: u64, limit: usize) -> Result<Vec<LogRecord>>;
}

// ---------- Shard routing ----------

/// Top 64 bits of SHA-256(key), scaled onto `[0, shard_count)`.
pub fn shard_for_key(partition_key: &str, shard_count: usize) -> usize {
    let digest = Sha256::digest(partition_key.as_bytes());
    let mut top = [0u8; 8];
    top.copy_from_slice(&digest[..8]);
    let h = u64::from_be_bytes(top) as u128;
    ((h * shard_count.max(1) as u128) >> 64) as usize
}

pub fn shard_id(index: usize) -> String {
    format!("shardId-{:012}", index)
}

fn parse_shard_id(stream: &str, shard_id: &str, shard_count: usize) -> Result<usize> {
    shard_id
        .strip_prefix("shardId-")
        .and_then(|n| n.parse::<usize>().ok())
        .filter(|&n| n < shard_count)
        .ok_or_else(|| ServiceError::Stream {
            stream: stream.to_string(),
            message: format!("unknown shard `{}`", shard_id),
        })
}

fn check_stream_name(stream: &str) -> Result<()> {
    let valid = !stream.is_empty()
        && stream
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && stream != "."
        && stream != "..";
    if valid {
        Ok(())
    } else {
        Err(ServiceError::Stream {
            stream: stream.to_string(),
            message: "stream names may only contain [a-zA-Z0-9_.-]".to_string(),
        })
    }
}

/// Re-wrap log records as the invocation payload a consumer would receive.
pub fn records_to_event(records: &[LogRecord]) -> InvocationEvent {
    InvocationEvent::from_payloads(records.iter().map(|r| STANDARD.encode(&r.data)))
}

// ---------- In-memory log ----------

#[derive(Debug)]
pub struct MemoryRecordLog {
    shard_count: usize,
    streams: Mutex<HashMap<String, Vec<Vec<LogRecord>>>>,
}

impl MemoryRecordLog {
    pub fn new(shard_count: usize) -> Self {
        Self {
            shard_count: shard_count.max(1),
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Every record of a stream across shards, shard by shard.
    pub fn all_records(&self, stream: &str) -> Vec<LogRecord> {
        self.streams
            .lock()
            .get(stream)
            .map(|shards| shards.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryRecordLog {
    fn default() -> Self {
        Self::new(1)
    }
}

impl RecordLog for MemoryRecordLog {
    fn put_record(&self, stream: &str, data: &[u8], partition_key: &str) -> Result<PutRecordOutput> {
        check_stream_name(stream)?;
        let shard = shard_for_key(partition_key, self.shard_count);
        let mut streams = self.streams.lock();
        let shards = streams
            .entry(stream.to_string())
            .or_insert_with(|| vec![Vec::new(); self.shard_count]);
        let sequence_number = shards[shard].len() as u64;
        shards[shard].push(LogRecord {
            sequence_number,
            partition_key: partition_key.to_string(),
            data: data.to_vec(),
        });
        Ok(PutRecordOutput {
            shard_id: shard_id(shard),
            sequence_number,
        })
    }

    fn get_records(&self, stream: &str, shard_id: &str, from: u64, limit: usize) -> Result<Vec<LogRecord>> {
        let shard = parse_shard_id(stream, shard_id, self.shard_count)?;
        let streams = self.streams.lock();
        Ok(streams
            .get(stream)
            .map(|shards| {
                shards[shard]
                    .iter()
                    .filter(|r| r.sequence_number >= from)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ---------- File-backed log ----------

/// One JSON line per record, payload base64-encoded.
#[derive(Serialize, Deserialize)]
struct StoredRecord {
    sequence_number: u64,
    partition_key: String,
    data: String,
}

/// Log stored as `root/<stream>/<shard id>.jsonl`.
#[derive(Debug)]
pub struct FileRecordLog {
    root: PathBuf,
    shard_count: usize,
    // next sequence number per shard file, loaded lazily
    next_seq: Mutex<HashMap<PathBuf, u64>>,
}

impl FileRecordLog {
    pub fn new(root: impl Into<PathBuf>, shard_count: usize) -> Self {
        Self {
            root: root.into(),
            shard_count: shard_count.max(1),
            next_seq: Mutex::new(HashMap::new()),
        }
    }

    fn shard_path(&self, stream: &str, shard: usize) -> PathBuf {
        self.root.join(stream).join(format!("{}.jsonl", shard_id(shard)))
    }

    /// Records in a shard file. A last line without its newline is an
    /// interrupted append and is skipped if it does not parse.
    fn read_shard(path: &Path) -> Result<Vec<StoredRecord>> {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let torn_tail = !text.is_empty() && !text.ends_with('\n');
        let lines: Vec<&str> = text.lines().collect();
        let mut out = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => out.push(record),
                Err(e) if torn_tail && i + 1 == lines.len() => {
                    warn!(path = %path.display(), "skipping torn trailing record: {}", e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(out)
    }

    /// Cut a trailing partial line so the next append starts on a fresh line.
    fn trim_torn_tail(path: &Path) -> Result<()> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if bytes.is_empty() || bytes.ends_with(b"\n") {
            return Ok(());
        }
        let keep = bytes
            .iter()
            .rposition(|&b| b == b'\n')
            .map(|p| p + 1)
            .unwrap_or(0);
        warn!(path = %path.display(), dropped = bytes.len() - keep, "truncating torn record");
        OpenOptions::new().write(true).open(path)?.set_len(keep as u64)?;
        Ok(())
    }
}

impl RecordLog for FileRecordLog {
    fn put_record(&self, stream: &str, data: &[u8], partition_key: &str) -> Result<PutRecordOutput> {
        check_stream_name(stream)?;
        let shard = shard_for_key(partition_key, self.shard_count);
        let path = self.shard_path(stream, shard);

        let mut next_seq = self.next_seq.lock();
        let sequence_number = match next_seq.get(&path) {
            Some(&n) => n,
            None => {
                Self::trim_torn_tail(&path)?;
                Self::read_shard(&path)?
                    .last()
                    .map(|r| r.sequence_number + 1)
                    .unwrap_or(0)
            }
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let stored = StoredRecord {
            sequence_number,
            partition_key: partition_key.to_string(),
            data: STANDARD.encode(data),
        };
        let mut line = serde_json::to_string(&stored)?;
        line.push('\n');
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let len = file.metadata()?.len();
        if let Err(e) = file.write_all(line.as_bytes()).and_then(|_| file.flush()) {
            // never leave a partial line behind
            if let Err(trunc) = file.set_len(len) {
                warn!(path = %path.display(), "could not truncate after failed append: {}", trunc);
            }
            return Err(e.into());
        }

        next_seq.insert(path, sequence_number + 1);
        Ok(PutRecordOutput {
            shard_id: shard_id(shard),
            sequence_number,
        })
    }

    fn get_records(&self, stream: &str, shard_id: &str, from: u64, limit: usize) -> Result<Vec<LogRecord>> {
        check_stream_name(stream)?;
        let shard = parse_shard_id(stream, shard_id, self.shard_count)?;
        let path = self.shard_path(stream, shard);
        Self::read_shard(&path)?
            .into_iter()
            .filter(|r| r.sequence_number >= from)
            .take(limit)
            .map(|r| -> Result<LogRecord> {
                let data = STANDARD.decode(&r.data)?;
                Ok(LogRecord {
                    sequence_number: r.sequence_number,
                    partition_key: r.partition_key,
                    data,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_same_shard() {
        for key in ["123", "test_ride_0", "abc"] {
            let a = shard_for_key(key, 4);
            assert!(a < 4);
            assert_eq!(a, shard_for_key(key, 4));
        }
        assert_eq!(shard_for_key("anything", 1), 0);
        assert_eq!(shard_for_key("anything", 0), 0);
    }

    #[test]
    fn keys_spread_over_shards() {
        let used: std::collections::HashSet<usize> =
            (0..200).map(|i| shard_for_key(&format!("ride-{i}"), 4)).collect();
        assert_eq!(used.len(), 4);
    }

    #[test]
    fn shard_ids_are_zero_padded() {
        assert_eq!(shard_id(0), "shardId-000000000000");
        assert_eq!(shard_id(12), "shardId-000000000012");
    }

    #[test]
    fn memory_log_keeps_order_per_shard() {
        let log = MemoryRecordLog::new(1);
        for i in 0..3u8 {
            let out = log.put_record("ride-predictions", &[i], "k").unwrap();
            assert_eq!(out.sequence_number, i as u64);
            assert_eq!(out.shard_id, "shardId-000000000000");
        }
        let got = log.get_records("ride-predictions", "shardId-000000000000", 1, 10).unwrap();
        assert_eq!(got.iter().map(|r| r.data[0]).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn file_log_round_trips_and_resumes_sequence() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = FileRecordLog::new(dir.path(), 1);
            log.put_record("preds", b"{\"a\":1}", "1").unwrap();
            log.put_record("preds", b"{\"a\":2}", "2").unwrap();
        }
        let log = FileRecordLog::new(dir.path(), 1);
        let out = log.put_record("preds", b"{\"a\":3}", "3").unwrap();
        assert_eq!(out.sequence_number, 2);

        let got = log.get_records("preds", &out.shard_id, 0, 2).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].data, b"{\"a\":1}");
        assert_eq!(got[1].partition_key, "2");
    }

    #[test]
    fn file_log_recovers_from_torn_append() {
        let dir = tempfile::tempdir().unwrap();
        let shard = shard_id(0);
        {
            let log = FileRecordLog::new(dir.path(), 1);
            log.put_record("preds", b"{\"a\":1}", "1").unwrap();
            log.put_record("preds", b"{\"a\":2}", "2").unwrap();
        }
        let path = dir.path().join("preds").join(format!("{shard}.jsonl"));
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"sequence_number":2,"partit"#).unwrap();
        drop(file);

        let log = FileRecordLog::new(dir.path(), 1);
        assert_eq!(log.get_records("preds", &shard, 0, 10).unwrap().len(), 2);

        let out = log.put_record("preds", b"{\"a\":3}", "3").unwrap();
        assert_eq!(out.sequence_number, 2);
        let got = log.get_records("preds", &shard, 0, 10).unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(got[2].data, b"{\"a\":3}");
        assert!(fs::read_to_string(&path).unwrap().ends_with('\n'));
    }

    #[test]
    fn rejects_bad_names_and_shards() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileRecordLog::new(dir.path(), 2);
        assert!(log.put_record("../escape", b"x", "k").is_err());
        assert!(log.get_records("preds", "shardId-000000000002", 0, 1).is_err());
        assert!(log.get_records("preds", "bogus", 0, 1).is_err());
        assert!(log.get_records("preds", "shardId-000000000001", 0, 1).unwrap().is_empty());
    }

    #[test]
    fn records_become_invocation_payloads() {
        let rec = LogRecord {
            sequence_number: 0,
            partition_key: "1".into(),
            data: br#"{"ride_id": 1}"#.to_vec(),
        };
        let event = records_to_event(&[rec]);
        assert_eq!(event.records.len(), 1);
        let decoded = crate::codec::decode(&event.records[0].kinesis.data).unwrap();
        assert_eq!(decoded["ride_id"], 1);
    }
}
