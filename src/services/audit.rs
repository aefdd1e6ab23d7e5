use crate::error::{AppError, AppResult, SettlementError};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

/// Hash that opens a fresh chain
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Audited fact, before chaining
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    pub timestamp: i64,
    /// "event_settled", "event_rejected", "commission_failed", "bonus_expired", ...
    pub event_type: String,
    pub account_id: Option<Uuid>,
    pub transaction_key: Option<String>,
    pub details: serde_json::Value,
}

/// One line of the audit file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    #[serde(flatten)]
    pub record: AuditRecord,
    pub prev_hash: String,
    pub hash: String,
}

fn chain_hash(prev_hash: &str, record: &AuditRecord) -> AppResult<String> {
    let body = serde_json::to_string(record)?;
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(b"|");
    hasher.update(body.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Check every line links to the one before it. Returns the number of
/// verified entries, or the 1-based line that breaks the chain.
pub fn verify_chain(contents: &str) -> Result<usize, usize> {
    let mut prev = GENESIS_HASH.to_string();
    let mut count = 0;
    for (index, line) in contents.lines().filter(|l| !l.trim().is_empty()).enumerate() {
        let entry: AuditLogEntry = serde_json::from_str(line).map_err(|_| index + 1)?;
        let expected = chain_hash(&prev, &entry.record).map_err(|_| index + 1)?;
        if entry.prev_hash != prev || entry.hash != expected {
            return Err(index + 1);
        }
        prev = entry.hash;
        count += 1;
    }
    Ok(count)
}

struct AuditSink {
    date: NaiveDate,
    path: PathBuf,
    file: std::fs::File,
    last_hash: String,
}

impl AuditSink {
    /// Open the file for `date`, continuing its chain if it already exists
    fn open(log_directory: &Path, date: NaiveDate) -> AppResult<Self> {
        let path = log_directory.join(format!("settlement_audit_{}.log", date.format("%Y-%m-%d")));

        let last_hash = match std::fs::read_to_string(&path) {
            Ok(contents) => contents
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .and_then(|l| serde_json::from_str::<AuditLogEntry>(l).ok())
                .map(|e| e.hash)
                .unwrap_or_else(|| GENESIS_HASH.to_string()),
            Err(_) => GENESIS_HASH.to_string(),
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AppError::Message(format!("Failed to open audit log file: {}", e)))?;

        Ok(Self {
            date,
            path,
            file,
            last_hash,
        })
    }
}

/// Append-only, hash-chained audit trail of settlement outcomes, one file
/// and one chain per UTC day
pub struct AuditTrailService {
    log_directory: PathBuf,
    sink: Mutex<AuditSink>,
}

impl AuditTrailService {
    pub fn new(log_directory: impl AsRef<Path>) -> AppResult<Self> {
        let log_directory = log_directory.as_ref().to_path_buf();
        std::fs::create_dir_all(&log_directory)
            .map_err(|e| AppError::Message(format!("Failed to create log directory: {}", e)))?;

        let sink = AuditSink::open(&log_directory, Utc::now().date_naive())?;
        info!("Audit trail initialized: {:?}", sink.path);

        Ok(Self {
            log_directory,
            sink: Mutex::new(sink),
        })
    }

    /// File currently being appended to
    pub async fn log_file(&self) -> PathBuf {
        self.sink.lock().await.path.clone()
    }

    /// Chain and append one record
    pub async fn log(&self, record: AuditRecord) -> AppResult<AuditLogEntry> {
        self.log_on(Utc::now().date_naive(), record).await
    }

    async fn log_on(&self, date: NaiveDate, record: AuditRecord) -> AppResult<AuditLogEntry> {
        let mut sink = self.sink.lock().await;
        if sink.date != date {
            *sink = AuditSink::open(&self.log_directory, date)?;
            info!("Audit trail rolled over to {:?}", sink.path);
        }

        let hash = chain_hash(&sink.last_hash, &record)?;
        let entry = AuditLogEntry {
            record,
            prev_hash: sink.last_hash.clone(),
            hash: hash.clone(),
        };
        let json = serde_json::to_string(&entry)?;

        writeln!(sink.file, "{}", json)
            .map_err(|e| AppError::Message(format!("Failed to write audit log: {}", e)))?;
        sink.file
            .flush()
            .map_err(|e| AppError::Message(format!("Failed to flush audit log: {}", e)))?;

        sink.last_hash = hash;
        Ok(entry)
    }

    /// Record without letting an audit failure reach the caller
    async fn record(
        &self,
        event_type: &str,
        account_id: Option<Uuid>,
        transaction_key: Option<&str>,
        details: serde_json::Value,
    ) {
        let record = AuditRecord {
            timestamp: Utc::now().timestamp_millis(),
            event_type: event_type.to_string(),
            account_id,
            transaction_key: transaction_key.map(str::to_string),
            details,
        };
        if let Err(e) = self.log(record).await {
            error!("Audit write failed for {}: {}", event_type, e);
        }
    }

    pub async fn log_settled(&self, account_id: Uuid, key: &str, details: serde_json::Value) {
        self.record("event_settled", Some(account_id), Some(key), details)
            .await
    }

    pub async fn log_rejected(&self, account_id: Option<Uuid>, key: &str, err: &SettlementError) {
        let mut details = err.details();
        if let Some(map) = details.as_object_mut() {
            map.insert("kind".to_string(), serde_json::json!(err.kind()));
            map.insert("message".to_string(), serde_json::json!(err.to_string()));
        }
        self.record("event_rejected", account_id, Some(key), details)
            .await
    }

    pub async fn log_commission_failure(&self, account_id: Uuid, key: &str, err: &SettlementError) {
        self.record(
            "commission_failed",
            Some(account_id),
            Some(key),
            serde_json::json!({ "error": err.to_string() }),
        )
        .await
    }

    pub async fn log_bonus_expired(&self, details: serde_json::Value) {
        self.record("bonus_expired", None, None, details).await
    }

    pub async fn log_bonus_cancelled(&self, account_id: Uuid, grant_id: Uuid, details: serde_json::Value) {
        let key = grant_id.to_string();
        self.record("bonus_cancelled", Some(account_id), Some(&key), details)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("settlement-audit-{}", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_chain_verifies_and_detects_tampering() {
        let dir = temp_dir();
        let audit = AuditTrailService::new(&dir).unwrap();
        let account = Uuid::new_v4();
        audit
            .log_settled(account, "TXN1", serde_json::json!({"balance": "1234.56"}))
            .await;
        audit
            .log_rejected(
                Some(account),
                "TXN2",
                &SettlementError::Validation("missing amount".into()),
            )
            .await;

        let contents = std::fs::read_to_string(audit.log_file().await).unwrap();
        assert_eq!(verify_chain(&contents), Ok(2));

        let tampered = contents.replacen("1234.56", "9234.56", 1);
        assert_eq!(verify_chain(&tampered), Err(1));

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_reopen_continues_chain() {
        let dir = temp_dir();
        {
            let audit = AuditTrailService::new(&dir).unwrap();
            audit.log_bonus_expired(serde_json::json!({"grants": 1})).await;
        }
        let audit = AuditTrailService::new(&dir).unwrap();
        audit.log_bonus_expired(serde_json::json!({"grants": 2})).await;

        let contents = std::fs::read_to_string(audit.log_file().await).unwrap();
        assert_eq!(verify_chain(&contents), Ok(2));

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_new_day_starts_new_file() {
        let dir = temp_dir();
        let audit = AuditTrailService::new(&dir).unwrap();
        let record = |n: u32| AuditRecord {
            timestamp: 0,
            event_type: "bonus_expired".to_string(),
            account_id: None,
            transaction_key: None,
            details: serde_json::json!({ "grants": n }),
        };

        let first = NaiveDate::from_ymd_opt(2031, 3, 9).unwrap();
        let second = first.succ_opt().unwrap();
        audit.log_on(first, record(1)).await.unwrap();
        audit.log_on(first, record(2)).await.unwrap();
        let rolled = audit.log_on(second, record(3)).await.unwrap();
        assert_eq!(rolled.prev_hash, GENESIS_HASH);

        let day_one = std::fs::read_to_string(dir.join("settlement_audit_2031-03-09.log")).unwrap();
        let day_two = std::fs::read_to_string(dir.join("settlement_audit_2031-03-10.log")).unwrap();
        assert_eq!(verify_chain(&day_one), Ok(2));
        assert_eq!(verify_chain(&day_two), Ok(1));
        assert_eq!(
            audit.log_file().await,
            dir.join("settlement_audit_2031-03-10.log")
        );

        std::fs::remove_dir_all(dir).ok();
    }
}
