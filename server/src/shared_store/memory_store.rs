use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use super::{StoreCmd, StoreReply};

const JANITOR_SWEEP: Duration = Duration::from_secs(1);
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
enum Value {
    Str(String),
    List(VecDeque<String>),
    // kept sorted by (score, member)
    ZSet(Vec<(f64, String)>),
    Hash(HashMap<String, String>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Single-writer in-process twin of the networked store. Every command runs
/// under one lock, which gives per-key atomicity for free; a janitor task
/// evicts expired keys between accesses.
#[derive(Clone)]
pub(crate) struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let entries: Arc<Mutex<HashMap<String, Entry>>> = Arc::new(Mutex::new(HashMap::new()));
        Self::spawn_janitor(Arc::downgrade(&entries));
        Self {
            entries,
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn spawn_janitor(entries: Weak<Mutex<HashMap<String, Entry>>>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(JANITOR_SWEEP);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(entries) = entries.upgrade() else {
                    break;
                };
                entries
                    .lock()
                    .expect("memory store poisoned")
                    .retain(|_, entry| !entry.expired());
            }
        });
    }

    pub fn exec(&self, cmd: &StoreCmd) -> StoreReply {
        let mut entries = self.entries.lock().expect("memory store poisoned");
        Self::apply(&mut entries, cmd)
    }

    pub fn pipeline(&self, cmds: &[StoreCmd]) -> Vec<StoreReply> {
        // the lock is held across the whole batch, mirroring MULTI/EXEC
        let mut entries = self.entries.lock().expect("memory store poisoned");
        cmds.iter().map(|cmd| Self::apply(&mut entries, cmd)).collect()
    }

    pub fn publish(&self, channel: &str, payload: &str) {
        let channels = self.channels.lock().expect("memory channels poisoned");
        if let Some(tx) = channels.get(channel) {
            // no subscribers is not an error
            let _ = tx.send(payload.to_string());
        }
    }

    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        let mut channels = self.channels.lock().expect("memory channels poisoned");
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    fn evict_if_expired(entries: &mut HashMap<String, Entry>, key: &str) {
        if entries.get(key).is_some_and(Entry::expired) {
            entries.remove(key);
        }
    }

    fn live_entry<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
    ) -> Option<&'a mut Entry> {
        Self::evict_if_expired(entries, key);
        entries.get_mut(key)
    }

    fn apply(entries: &mut HashMap<String, Entry>, cmd: &StoreCmd) -> StoreReply {
        match cmd {
            StoreCmd::Get(key) => match Self::live_entry(entries, key) {
                Some(Entry {
                    value: Value::Str(s),
                    ..
                }) => StoreReply::Str(s.clone()),
                _ => StoreReply::Nil,
            },
            StoreCmd::Set(key, value) => {
                entries.insert(
                    key.clone(),
                    Entry {
                        value: Value::Str(value.clone()),
                        expires_at: None,
                    },
                );
                StoreReply::Ok
            }
            StoreCmd::SetEx(key, value, ttl_secs) => {
                entries.insert(
                    key.clone(),
                    Entry {
                        value: Value::Str(value.clone()),
                        expires_at: Some(Instant::now() + Duration::from_secs(*ttl_secs)),
                    },
                );
                StoreReply::Ok
            }
            StoreCmd::Incr(key) => {
                Self::evict_if_expired(entries, key);
                let entry = entries.entry(key.clone()).or_insert(Entry {
                    value: Value::Str("0".to_string()),
                    expires_at: None,
                });
                let current = match &entry.value {
                    Value::Str(s) => s.parse::<i64>().unwrap_or(0),
                    _ => 0,
                };
                let next = current + 1;
                entry.value = Value::Str(next.to_string());
                StoreReply::Int(next)
            }
            StoreCmd::Expire(key, ttl_secs) => {
                match Self::live_entry(entries, key) {
                    Some(entry) => {
                        entry.expires_at = Some(Instant::now() + Duration::from_secs(*ttl_secs));
                        StoreReply::Int(1)
                    }
                    None => StoreReply::Int(0),
                }
            }
            StoreCmd::PExpire(key, ttl_ms) => match Self::live_entry(entries, key) {
                Some(entry) => {
                    entry.expires_at = Some(Instant::now() + Duration::from_millis(*ttl_ms));
                    StoreReply::Int(1)
                }
                None => StoreReply::Int(0),
            },
            StoreCmd::PTtl(key) => match Self::live_entry(entries, key) {
                Some(Entry {
                    expires_at: Some(at),
                    ..
                }) => StoreReply::Int(at.saturating_duration_since(Instant::now()).as_millis() as i64),
                Some(_) => StoreReply::Int(-1),
                None => StoreReply::Int(-2),
            },
            StoreCmd::Del(key) => {
                let existed = entries.remove(key).is_some();
                StoreReply::Int(existed as i64)
            }
            StoreCmd::LPush(key, value) => {
                Self::evict_if_expired(entries, key);
                let entry = entries.entry(key.clone()).or_insert(Entry {
                    value: Value::List(VecDeque::new()),
                    expires_at: None,
                });
                if !matches!(entry.value, Value::List(_)) {
                    entry.value = Value::List(VecDeque::new());
                }
                if let Value::List(list) = &mut entry.value {
                    list.push_front(value.clone());
                    StoreReply::Int(list.len() as i64)
                } else {
                    StoreReply::Int(0)
                }
            }
            StoreCmd::LTrim(key, start, stop) => {
                if let Some(Entry {
                    value: Value::List(list),
                    ..
                }) = Self::live_entry(entries, key)
                {
                    let len = list.len() as i64;
                    let start = normalize_index(*start, len).max(0);
                    let stop = normalize_index(*stop, len).min(len - 1);
                    if start > stop || len == 0 {
                        list.clear();
                    } else {
                        *list = list
                            .iter()
                            .skip(start as usize)
                            .take((stop - start + 1) as usize)
                            .cloned()
                            .collect();
                    }
                }
                StoreReply::Ok
            }
            StoreCmd::LRange(key, start, stop) => {
                match Self::live_entry(entries, key) {
                    Some(Entry {
                        value: Value::List(list),
                        ..
                    }) => {
                        let len = list.len() as i64;
                        let start = normalize_index(*start, len).max(0);
                        let stop = normalize_index(*stop, len).min(len - 1);
                        if start > stop || len == 0 {
                            StoreReply::List(Vec::new())
                        } else {
                            StoreReply::List(
                                list.iter()
                                    .skip(start as usize)
                                    .take((stop - start + 1) as usize)
                                    .cloned()
                                    .collect(),
                            )
                        }
                    }
                    _ => StoreReply::List(Vec::new()),
                }
            }
            StoreCmd::ZAdd(key, score, member) => {
                Self::evict_if_expired(entries, key);
                let entry = entries.entry(key.clone()).or_insert(Entry {
                    value: Value::ZSet(Vec::new()),
                    expires_at: None,
                });
                if !matches!(entry.value, Value::ZSet(_)) {
                    entry.value = Value::ZSet(Vec::new());
                }
                if let Value::ZSet(set) = &mut entry.value {
                    let added = match set.iter().position(|(_, m)| m == member) {
                        Some(idx) => {
                            set.remove(idx);
                            0
                        }
                        None => 1,
                    };
                    let at = set
                        .iter()
                        .position(|(s, _)| *s > *score)
                        .unwrap_or(set.len());
                    set.insert(at, (*score, member.clone()));
                    StoreReply::Int(added)
                } else {
                    StoreReply::Int(0)
                }
            }
            StoreCmd::ZRemRangeByScore(key, min, max) => {
                match Self::live_entry(entries, key) {
                    Some(Entry {
                        value: Value::ZSet(set),
                        ..
                    }) => {
                        let before = set.len();
                        set.retain(|(score, _)| *score < *min || *score > *max);
                        StoreReply::Int((before - set.len()) as i64)
                    }
                    _ => StoreReply::Int(0),
                }
            }
            StoreCmd::ZCard(key) => match Self::live_entry(entries, key) {
                Some(Entry {
                    value: Value::ZSet(set),
                    ..
                }) => StoreReply::Int(set.len() as i64),
                _ => StoreReply::Int(0),
            },
            StoreCmd::HIncrBy(key, field, delta) => {
                Self::evict_if_expired(entries, key);
                let entry = entries.entry(key.clone()).or_insert(Entry {
                    value: Value::Hash(HashMap::new()),
                    expires_at: None,
                });
                if !matches!(entry.value, Value::Hash(_)) {
                    entry.value = Value::Hash(HashMap::new());
                }
                if let Value::Hash(hash) = &mut entry.value {
                    let current = hash
                        .get(field)
                        .and_then(|v| v.parse::<i64>().ok())
                        .unwrap_or(0);
                    let next = current + delta;
                    hash.insert(field.clone(), next.to_string());
                    StoreReply::Int(next)
                } else {
                    StoreReply::Int(0)
                }
            }
            StoreCmd::HGetAll(key) => match Self::live_entry(entries, key) {
                Some(Entry {
                    value: Value::Hash(hash),
                    ..
                }) => StoreReply::Map(hash.clone()),
                _ => StoreReply::Map(HashMap::new()),
            },
        }
    }
}

fn normalize_index(idx: i64, len: i64) -> i64 {
    if idx < 0 {
        len + idx
    } else {
        idx
    }
}
