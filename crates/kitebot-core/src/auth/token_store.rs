use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Age given to a record whose `saved_at` cannot be read back
const UNREADABLE_SAVED_AT_AGE_DAYS: i64 = 1;

/// The persisted session: an access token, an optional refresh token, and
/// whatever else the brokerage returned when the session was created.
///
/// Unknown fields are kept in `extra` and written back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    #[serde(
        default,
        deserialize_with = "non_empty_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub access_token: Option<String>,

    #[serde(
        default,
        deserialize_with = "non_empty_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<String>,

    #[serde(default = "unreadable_saved_at", deserialize_with = "lenient_timestamp")]
    pub saved_at: DateTime<Utc>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenRecord {
    /// Build a record from the raw fields of a session response
    pub fn from_fields(fields: Map<String, Value>) -> Result<Self> {
        serde_json::from_value(Value::Object(fields)).context("Invalid token record fields")
    }

    pub fn to_fields(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(anyhow::anyhow!("Token record serialized to {}", other)),
        }
    }

    /// Overlay `fields` on this record; incoming values win on key collision.
    ///
    /// Null or empty-string values do not overwrite what is already stored,
    /// so a renewal response that omits (or blanks) `refresh_token` keeps the
    /// previous one.
    pub fn merge(&self, fields: Map<String, Value>) -> Result<Self> {
        let mut merged = self.to_fields()?;
        for (key, value) in fields {
            let blank = match &value {
                Value::Null => true,
                Value::String(s) => s.is_empty(),
                _ => false,
            };
            if blank && merged.contains_key(&key) {
                continue;
            }
            merged.insert(key, value);
        }
        Self::from_fields(merged)
    }

    /// A record without an access token is never usable
    pub fn has_access_token(&self) -> bool {
        self.access_token.is_some()
    }
}

fn unreadable_saved_at() -> DateTime<Utc> {
    Utc::now() - Duration::days(UNREADABLE_SAVED_AT_AGE_DAYS)
}

fn non_empty_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    })
}

/// Accepts RFC 3339 and naive local ISO timestamps; anything else reads as
/// "a day ago" instead of failing the whole record.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let parsed = match value {
        Some(Value::String(s)) => parse_timestamp(&s),
        _ => None,
    };
    Ok(parsed.unwrap_or_else(unreadable_saved_at))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Single-record token cache backed by one JSON file.
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stamp `saved_at` and write the record, replacing any previous one.
    ///
    /// Each save writes a uniquely named temp file next to the destination,
    /// syncs it, and renames it into place.
    pub fn save(&self, mut record: TokenRecord) -> Result<TokenRecord> {
        record.saved_at = Utc::now();

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create token directory {}", dir.display()))?;

        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        serde_json::to_writer_pretty(&mut tmp, &record)?;
        tmp.flush()?;
        tmp.as_file().sync_all().context("Failed to sync token file")?;
        tmp.persist(&self.path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to replace token file {}", self.path.display()))?;

        debug!(path = %self.path.display(), "Saved token record");
        Ok(record)
    }

    /// Load the last saved record.
    /// A missing, unreadable or corrupt file all read as "no session".
    pub fn load(&self) -> Option<TokenRecord> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No token file");
            return None;
        }

        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read token file");
                return None;
            }
        };

        match serde_json::from_str::<TokenRecord>(&contents) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring corrupt token file");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected a JSON object"),
        }
    }

    fn store_in(dir: &tempfile::TempDir) -> TokenStore {
        TokenStore::new(dir.path().join("tokens.json"))
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let record = TokenRecord::from_fields(fields(json!({
            "access_token": "acc",
            "refresh_token": "ref",
            "user_id": "AB1234",
            "login_time": "2024-06-01 09:15:00"
        })))
        .unwrap();

        let before = Utc::now();
        let saved = store.save(record).unwrap();
        let after = Utc::now();
        assert!(saved.saved_at >= before && saved.saved_at <= after);

        let loaded = store.load().expect("record should load");
        assert_eq!(loaded.access_token.as_deref(), Some("acc"));
        assert_eq!(loaded.refresh_token.as_deref(), Some("ref"));
        assert_eq!(loaded.saved_at, saved.saved_at);
        assert_eq!(loaded.extra.get("user_id"), Some(&json!("AB1234")));
        assert_eq!(loaded, saved);
    }

    #[test]
    fn test_save_overwrites_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store
            .save(TokenRecord::from_fields(fields(json!({"access_token": "first"}))).unwrap())
            .unwrap();
        store
            .save(TokenRecord::from_fields(fields(json!({"access_token": "second"}))).unwrap())
            .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.access_token.as_deref(), Some("second"));
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_save_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("nested").join("tokens.json"));
        store
            .save(TokenRecord::from_fields(fields(json!({"access_token": "acc"}))).unwrap())
            .unwrap();
        assert!(store.load().is_some());
    }

    #[test]
    fn test_save_error_propagates() {
        let dir = tempfile::tempdir().unwrap();
        // The destination is a directory, so the rename must fail
        std::fs::create_dir(dir.path().join("tokens.json")).unwrap();
        let store = store_in(&dir);
        let record = TokenRecord::from_fields(fields(json!({"access_token": "acc"}))).unwrap();
        assert!(store.save(record).is_err());
        // The failed temp file is cleaned up
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_concurrent_saves_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let writers: Vec<_> = (0..2)
            .map(|n| {
                let store = TokenStore::new(path.clone());
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let token = format!("acc-{}-{}", n, i);
                        let record =
                            TokenRecord::from_fields(fields(json!({"access_token": token})))
                                .unwrap();
                        store.save(record).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let loaded = TokenStore::new(path).load().unwrap();
        assert!(loaded.has_access_token());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_load_never_written_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store_in(&dir).load().is_none());
    }

    #[test]
    fn test_load_deleted_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .save(TokenRecord::from_fields(fields(json!({"access_token": "acc"}))).unwrap())
            .unwrap();
        std::fs::remove_file(store.path()).unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_load_corrupt_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "{not json").unwrap();
        assert!(store.load().is_none());

        std::fs::write(store.path(), "[1, 2, 3]").unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_unparsable_saved_at_reads_as_a_day_old() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(
            store.path(),
            r#"{"access_token": "acc", "saved_at": "yesterday-ish"}"#,
        )
        .unwrap();

        let loaded = store.load().unwrap();
        let age = Utc::now() - loaded.saved_at;
        assert!(age >= Duration::hours(23) && age <= Duration::hours(25));
    }

    #[test]
    fn test_naive_saved_at_is_accepted() {
        let record = TokenRecord::from_fields(fields(json!({
            "access_token": "acc",
            "saved_at": "2024-06-01T09:15:00.123456"
        })))
        .unwrap();
        let expected = parse_timestamp("2024-06-01T09:15:00.123456").unwrap();
        assert_eq!(record.saved_at, expected);
    }

    #[test]
    fn test_empty_access_token_is_not_usable() {
        let record =
            TokenRecord::from_fields(fields(json!({"access_token": "", "refresh_token": "ref"})))
                .unwrap();
        assert!(!record.has_access_token());
        assert_eq!(record.refresh_token.as_deref(), Some("ref"));
    }

    #[test]
    fn test_merge_new_values_win() {
        let record = TokenRecord::from_fields(fields(json!({
            "access_token": "old",
            "refresh_token": "ref",
            "user_id": "AB1234"
        })))
        .unwrap();

        let merged = record
            .merge(fields(json!({"access_token": "new", "login_time": "now"})))
            .unwrap();
        assert_eq!(merged.access_token.as_deref(), Some("new"));
        assert_eq!(merged.refresh_token.as_deref(), Some("ref"));
        assert_eq!(merged.extra.get("user_id"), Some(&json!("AB1234")));
        assert_eq!(merged.extra.get("login_time"), Some(&json!("now")));
    }

    #[test]
    fn test_merge_blank_refresh_token_keeps_old_one() {
        let record =
            TokenRecord::from_fields(fields(json!({"access_token": "old", "refresh_token": "ref"})))
                .unwrap();

        let merged = record
            .merge(fields(json!({"access_token": "new", "refresh_token": ""})))
            .unwrap();
        assert_eq!(merged.refresh_token.as_deref(), Some("ref"));

        let merged = record
            .merge(fields(json!({"access_token": "new", "refresh_token": null})))
            .unwrap();
        assert_eq!(merged.refresh_token.as_deref(), Some("ref"));
    }
}
