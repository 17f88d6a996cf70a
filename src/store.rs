use std::collections::HashMap;
use std::fs;
use std::io;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::domain::{Cursor, Queue};
use crate::error::FetchError;
use crate::fs_util::write_bytes_atomic;

pub const QUEUE_KEY: &str = "paystub_queue";
pub const INDEX_KEY: &str = "paystub_index";

/// Durable key/value storage that outlives a single activation.
pub trait KvStore {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> Result<(), FetchError>;
}

impl<T: KvStore + ?Sized> KvStore for &T {
    fn get(&self, key: &str) -> Option<Value> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Value) -> Result<(), FetchError> {
        (**self).set(key, value)
    }
}

#[derive(Debug, Default)]
pub struct MemoryKvStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values
            .lock()
            .ok()
            .and_then(|values| values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), FetchError> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| FetchError::Filesystem("memory store poisoned".to_string()))?;
        values.insert(key.to_string(), value);
        Ok(())
    }
}

/// A single JSON object on disk, rewritten atomically on every `set`.
#[derive(Debug, Clone)]
pub struct FileKvStore {
    path: Utf8PathBuf,
}

impl FileKvStore {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn read_all(&self) -> Map<String, Value> {
        let content = match fs::read_to_string(self.path.as_std_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Map::new(),
            Err(err) => {
                warn!(path = %self.path, error = %err, "state file unreadable, starting empty");
                return Map::new();
            }
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                warn!(path = %self.path, "state file is not a JSON object, starting empty");
                Map::new()
            }
        }
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.read_all().remove(key)
    }

    fn set(&self, key: &str, value: Value) -> Result<(), FetchError> {
        let mut map = self.read_all();
        map.insert(key.to_string(), value);
        let content = serde_json::to_vec_pretty(&Value::Object(map))
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        write_bytes_atomic(&self.path, &content)
    }
}

/// Queue and cursor as read at the start of an activation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersistedState {
    pub queue: Queue,
    pub cursor: Cursor,
}

impl PersistedState {
    pub fn has_active_work(&self) -> bool {
        self.queue.is_active(self.cursor)
    }
}

type Decoder = fn(&Value) -> Result<Option<Queue>, FetchError>;

/// Oldest format last. `Ok(None)` means "not my format", `Err` means "my format, but broken".
const QUEUE_DECODERS: &[(&str, Decoder)] = &[
    ("canonical", decode_canonical),
    ("legacy-text", decode_legacy_text),
];

pub fn decode_canonical(raw: &Value) -> Result<Option<Queue>, FetchError> {
    match raw {
        Value::Array(_) => serde_json::from_value(raw.clone())
            .map(Some)
            .map_err(|err| FetchError::ParseState(err.to_string())),
        _ => Ok(None),
    }
}

pub fn decode_legacy_text(raw: &Value) -> Result<Option<Queue>, FetchError> {
    let Value::String(text) = raw else {
        return Ok(None);
    };
    let parsed: Value =
        serde_json::from_str(text).map_err(|err| FetchError::ParseState(err.to_string()))?;
    match parsed {
        Value::Array(_) => decode_canonical(&parsed),
        _ => Err(FetchError::ParseState(
            "legacy text does not hold a list".to_string(),
        )),
    }
}

/// Runs the decoder chain; anything unrecognized or broken becomes an empty queue.
pub fn decode_queue(raw: Option<&Value>) -> Queue {
    let Some(raw) = raw else {
        return Queue::empty();
    };
    if raw.is_null() {
        return Queue::empty();
    }
    for (name, decoder) in QUEUE_DECODERS {
        match decoder(raw) {
            Ok(Some(queue)) => {
                debug!(format = name, len = queue.len(), "decoded stored queue");
                return queue;
            }
            Ok(None) => continue,
            Err(err) => {
                warn!(format = name, error = %err, "could not parse stored queue, resetting");
                return Queue::empty();
            }
        }
    }
    warn!("stored queue has an unrecognized shape, resetting");
    Queue::empty()
}

pub fn decode_cursor(raw: Option<&Value>) -> Cursor {
    let index = match raw {
        Some(Value::Number(number)) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|value| value.is_finite() && *value >= 0.0 && value.fract() == 0.0)
                .map(|value| value as u64)
        }),
        Some(Value::String(text)) => text.trim().parse::<u64>().ok(),
        _ => None,
    };
    index
        .and_then(|index| usize::try_from(index).ok())
        .map(Cursor::new)
        .unwrap_or(Cursor::START)
}

/// Persistent queue and progress cursor, stored as two independent keys.
#[derive(Debug)]
pub struct QueueStore<S: KvStore> {
    kv: S,
}

impl<S: KvStore> QueueStore<S> {
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &S {
        &self.kv
    }

    pub fn load(&self) -> Queue {
        decode_queue(self.kv.get(QUEUE_KEY).as_ref())
    }

    /// Always writes the canonical structured form.
    pub fn save(&self, queue: &Queue) -> Result<(), FetchError> {
        let value =
            serde_json::to_value(queue).map_err(|err| FetchError::Filesystem(err.to_string()))?;
        self.kv.set(QUEUE_KEY, value)
    }

    pub fn load_cursor(&self) -> Cursor {
        decode_cursor(self.kv.get(INDEX_KEY).as_ref())
    }

    pub fn save_cursor(&self, cursor: Cursor) -> Result<(), FetchError> {
        self.kv.set(INDEX_KEY, Value::from(cursor.index()))
    }

    pub fn load_state(&self) -> PersistedState {
        PersistedState {
            queue: self.load(),
            cursor: self.load_cursor(),
        }
    }

    /// Starts a new run: replaces the queue wholesale and rewinds the cursor.
    pub fn begin(&self, queue: &Queue) -> Result<(), FetchError> {
        self.save(queue)?;
        self.save_cursor(Cursor::START)
    }

    pub fn clear(&self) -> Result<(), FetchError> {
        self.save(&Queue::empty())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn canonical_and_legacy_decode_to_same_queue() {
        let canonical = json!([
            {"filename": "03-01-2024.pdf", "targetUrl": "http://host/ecms/imaging/document/associationRedirect.faces?id=1"}
        ]);
        let legacy = Value::String(canonical.to_string());

        let from_canonical = decode_queue(Some(&canonical));
        let from_legacy = decode_queue(Some(&legacy));
        assert_eq!(from_canonical.len(), 1);
        assert_eq!(from_canonical, from_legacy);
    }

    #[test]
    fn unparseable_text_is_empty() {
        let raw = Value::String("[{not json".to_string());
        assert!(decode_queue(Some(&raw)).is_empty());
    }

    #[test]
    fn legacy_text_holding_object_is_empty() {
        let raw = Value::String("{\"a\":1}".to_string());
        assert!(decode_queue(Some(&raw)).is_empty());
    }

    #[test]
    fn unrecognized_shapes_are_empty() {
        assert!(decode_queue(None).is_empty());
        assert!(decode_queue(Some(&Value::Null)).is_empty());
        assert!(decode_queue(Some(&json!(42))).is_empty());
        assert!(decode_queue(Some(&json!({"filename": "x"}))).is_empty());
        assert!(decode_queue(Some(&json!([{"filename": "x"}]))).is_empty());
    }

    #[test]
    fn cursor_coercion() {
        assert_eq!(decode_cursor(None), Cursor::START);
        assert_eq!(decode_cursor(Some(&json!(3))), Cursor::new(3));
        assert_eq!(decode_cursor(Some(&json!("2"))), Cursor::new(2));
        assert_eq!(decode_cursor(Some(&json!("two"))), Cursor::START);
        assert_eq!(decode_cursor(Some(&json!(-1))), Cursor::START);
        assert_eq!(decode_cursor(Some(&json!(1.5))), Cursor::START);
        assert_eq!(decode_cursor(Some(&json!(2.0))), Cursor::new(2));
        assert_eq!(decode_cursor(Some(&json!(-2.0))), Cursor::START);
    }

    #[test]
    fn save_migrates_legacy_text() {
        let kv = MemoryKvStore::new();
        let legacy = json!([
            {"filename": "a.pdf", "assocUrl": "http://host/ecms/imaging/document/associationRedirect.faces?id=1"}
        ]);
        kv.set(QUEUE_KEY, Value::String(legacy.to_string())).unwrap();

        let store = QueueStore::new(&kv);
        let queue = store.load();
        store.save(&queue).unwrap();

        let raw = kv.get(QUEUE_KEY).unwrap();
        assert!(raw.is_array());
        assert_eq!(raw[0]["targetUrl"], legacy[0]["assocUrl"]);
    }
}
