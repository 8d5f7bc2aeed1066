//! In-process store implementing the [`Store`] trait.
//!
//! Accepts exactly the replay commands the serializer emits, so the
//! test suite can exercise full export/import round-trips without a
//! server. Expiry is lazy: expired keys disappear on next access.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{KeyType, Store, StreamEntry};
use crate::error::{Error, Result};
use crate::pattern::glob_match;

#[derive(Debug, Clone)]
enum ValueKind {
    Str(Vec<u8>),
    Hash(Vec<(Vec<u8>, Vec<u8>)>),
    List(Vec<Vec<u8>>),
    Set(Vec<Vec<u8>>),
    ZSet(Vec<(Vec<u8>, f64)>),
    Stream(Vec<StreamEntry>),
}

impl ValueKind {
    fn key_type(&self) -> KeyType {
        match self {
            ValueKind::Str(_) => KeyType::String,
            ValueKind::Hash(_) => KeyType::Hash,
            ValueKind::List(_) => KeyType::List,
            ValueKind::Set(_) => KeyType::Set,
            ValueKind::ZSet(_) => KeyType::SortedSet,
            ValueKind::Stream(_) => KeyType::Stream,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: ValueKind,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: ValueKind) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<Vec<u8>, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn key_count(&self) -> usize {
        let mut entries = self.entries.lock();
        entries.retain(|_, e| !e.expired());
        entries.len()
    }

    pub fn set_string(&self, key: &[u8], value: &[u8]) {
        self.entries
            .lock()
            .insert(key.to_vec(), Entry::new(ValueKind::Str(value.to_vec())));
    }

    pub fn set_string_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) {
        let mut entry = Entry::new(ValueKind::Str(value.to_vec()));
        entry.expires_at = Some(Instant::now() + ttl);
        self.entries.lock().insert(key.to_vec(), entry);
    }

    pub fn set_hash(&self, key: &[u8], fields: &[(&[u8], &[u8])]) {
        let fields = fields
            .iter()
            .map(|(f, v)| (f.to_vec(), v.to_vec()))
            .collect();
        self.entries
            .lock()
            .insert(key.to_vec(), Entry::new(ValueKind::Hash(fields)));
    }

    pub fn set_list(&self, key: &[u8], elements: &[&[u8]]) {
        let elements = elements.iter().map(|e| e.to_vec()).collect();
        self.entries
            .lock()
            .insert(key.to_vec(), Entry::new(ValueKind::List(elements)));
    }

    pub fn set_set(&self, key: &[u8], members: &[&[u8]]) {
        let members = members.iter().map(|m| m.to_vec()).collect();
        self.entries
            .lock()
            .insert(key.to_vec(), Entry::new(ValueKind::Set(members)));
    }

    pub fn set_sorted_set(&self, key: &[u8], entries: &[(&[u8], f64)]) {
        let mut entries: Vec<(Vec<u8>, f64)> = entries
            .iter()
            .map(|(m, s)| (m.to_vec(), *s))
            .collect();
        entries.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        self.entries
            .lock()
            .insert(key.to_vec(), Entry::new(ValueKind::ZSet(entries)));
    }

    pub fn set_stream(&self, key: &[u8], entries: Vec<StreamEntry>) {
        self.entries
            .lock()
            .insert(key.to_vec(), Entry::new(ValueKind::Stream(entries)));
    }

    fn read<T>(&self, key: &[u8], f: impl FnOnce(&ValueKind) -> Result<T>) -> Result<Option<T>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => f(&entry.value).map(Some),
            None => Ok(None),
        }
    }

    fn wrong_type(expected: &str, found: &ValueKind) -> Error {
        Error::Store(format!(
            "WRONGTYPE expected {expected}, found {}",
            found.key_type()
        ))
    }

    fn apply(&self, args: &[Vec<u8>]) -> Result<()> {
        let name = args
            .first()
            .ok_or_else(|| Error::Store("empty command".to_string()))?;
        let name = String::from_utf8_lossy(name).to_uppercase();
        let rest = &args[1..];

        match name.as_str() {
            "SET" => {
                let [key, value] = rest else {
                    return Err(Error::Store("SET takes key and value".to_string()));
                };
                self.set_string(key, value);
                Ok(())
            }
            "DEL" => {
                let mut entries = self.entries.lock();
                for key in rest {
                    entries.remove(key);
                }
                Ok(())
            }
            "HSET" => {
                let (key, pairs) = split_key(rest, "HSET")?;
                if pairs.is_empty() || pairs.len() % 2 != 0 {
                    return Err(Error::Store("HSET needs field/value pairs".to_string()));
                }
                self.with_entry(key, ValueKind::Hash(Vec::new()), |value| {
                    let ValueKind::Hash(fields) = value else {
                        return Err(Self::wrong_type("hash", value));
                    };
                    for pair in pairs.chunks_exact(2) {
                        match fields.iter_mut().find(|(f, _)| f == &pair[0]) {
                            Some(slot) => slot.1 = pair[1].clone(),
                            None => fields.push((pair[0].clone(), pair[1].clone())),
                        }
                    }
                    Ok(())
                })
            }
            "RPUSH" => {
                let (key, elements) = split_key(rest, "RPUSH")?;
                self.with_entry(key, ValueKind::List(Vec::new()), |value| {
                    let ValueKind::List(list) = value else {
                        return Err(Self::wrong_type("list", value));
                    };
                    list.extend(elements.iter().cloned());
                    Ok(())
                })
            }
            "SADD" => {
                let (key, members) = split_key(rest, "SADD")?;
                self.with_entry(key, ValueKind::Set(Vec::new()), |value| {
                    let ValueKind::Set(set) = value else {
                        return Err(Self::wrong_type("set", value));
                    };
                    for member in members {
                        if !set.contains(member) {
                            set.push(member.clone());
                        }
                    }
                    Ok(())
                })
            }
            "ZADD" => {
                let (key, pairs) = split_key(rest, "ZADD")?;
                if pairs.is_empty() || pairs.len() % 2 != 0 {
                    return Err(Error::Store("ZADD needs score/member pairs".to_string()));
                }
                let mut parsed = Vec::with_capacity(pairs.len() / 2);
                for pair in pairs.chunks_exact(2) {
                    let score = parse_f64(&pair[0])?;
                    parsed.push((pair[1].clone(), score));
                }
                self.with_entry(key, ValueKind::ZSet(Vec::new()), |value| {
                    let ValueKind::ZSet(zset) = value else {
                        return Err(Self::wrong_type("zset", value));
                    };
                    for (member, score) in parsed {
                        match zset.iter_mut().find(|(m, _)| m == &member) {
                            Some(slot) => slot.1 = score,
                            None => zset.push((member, score)),
                        }
                    }
                    zset.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
                    Ok(())
                })
            }
            "XADD" => {
                let (key, rest) = split_key(rest, "XADD")?;
                let Some((id, fields)) = rest.split_first() else {
                    return Err(Error::Store("XADD needs an entry id".to_string()));
                };
                if fields.is_empty() || fields.len() % 2 != 0 {
                    return Err(Error::Store("XADD needs field/value pairs".to_string()));
                }
                let entry = StreamEntry {
                    id: String::from_utf8_lossy(id).into_owned(),
                    fields: fields
                        .chunks_exact(2)
                        .map(|pair| (pair[0].clone(), pair[1].clone()))
                        .collect(),
                };
                self.with_entry(key, ValueKind::Stream(Vec::new()), |value| {
                    let ValueKind::Stream(stream) = value else {
                        return Err(Self::wrong_type("stream", value));
                    };
                    stream.push(entry);
                    Ok(())
                })
            }
            "EXPIRE" | "PEXPIRE" => {
                let [key, amount] = rest else {
                    return Err(Error::Store(format!("{name} takes key and duration")));
                };
                let amount = parse_f64(amount)? as u64;
                let ttl = if name == "EXPIRE" {
                    Duration::from_secs(amount)
                } else {
                    Duration::from_millis(amount)
                };
                let mut entries = self.entries.lock();
                match entries.get_mut(key.as_slice()) {
                    Some(entry) if !entry.expired() => {
                        entry.expires_at = Some(Instant::now() + ttl);
                        Ok(())
                    }
                    _ => Err(Error::Store(format!(
                        "{name} on missing key {}",
                        String::from_utf8_lossy(key)
                    ))),
                }
            }
            other => Err(Error::Store(format!("unsupported command {other}"))),
        }
    }

    fn with_entry(
        &self,
        key: &[u8],
        default: ValueKind,
        f: impl FnOnce(&mut ValueKind) -> Result<()>,
    ) -> Result<()> {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(key.to_vec())
            .or_insert_with(|| Entry::new(default.clone()));
        if entry.expired() {
            *entry = Entry::new(default);
        }
        f(&mut entry.value)
    }
}

fn split_key<'a>(rest: &'a [Vec<u8>], cmd: &str) -> Result<(&'a [u8], &'a [Vec<u8>])> {
    rest.split_first()
        .map(|(key, rest)| (key.as_slice(), rest))
        .ok_or_else(|| Error::Store(format!("{cmd} needs a key")))
}

fn parse_f64(bytes: &[u8]) -> Result<f64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Store(format!("not a number: {}", String::from_utf8_lossy(bytes))))
}

#[async_trait]
impl Store for MemoryStore {
    async fn scan_batch(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<Vec<u8>>)> {
        let mut entries = self.entries.lock();
        entries.retain(|_, e| !e.expired());
        let matching: Vec<Vec<u8>> = entries
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();

        let offset = cursor as usize;
        let batch: Vec<Vec<u8>> = matching.iter().skip(offset).take(count.max(1)).cloned().collect();
        let consumed = offset + batch.len();
        let next = if consumed >= matching.len() {
            0
        } else {
            consumed as u64
        };
        Ok((next, batch))
    }

    async fn list_keys(&self, pattern: &str) -> Result<Vec<Vec<u8>>> {
        let mut entries = self.entries.lock();
        entries.retain(|_, e| !e.expired());
        Ok(entries
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect())
    }

    async fn key_type(&self, key: &[u8]) -> Result<KeyType> {
        Ok(self
            .read(key, |v| Ok(v.key_type()))?
            .unwrap_or(KeyType::Unknown("none".to_string())))
    }

    async fn get_string(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.read(key, |v| match v {
            ValueKind::Str(bytes) => Ok(bytes.clone()),
            other => Err(Self::wrong_type("string", other)),
        })
    }

    async fn hash_entries(&self, key: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .read(key, |v| match v {
                ValueKind::Hash(fields) => Ok(fields.clone()),
                other => Err(Self::wrong_type("hash", other)),
            })?
            .unwrap_or_default())
    }

    async fn list_range(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .read(key, |v| match v {
                ValueKind::List(list) => Ok(list.clone()),
                other => Err(Self::wrong_type("list", other)),
            })?
            .unwrap_or_default())
    }

    async fn set_members(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .read(key, |v| match v {
                ValueKind::Set(set) => Ok(set.clone()),
                other => Err(Self::wrong_type("set", other)),
            })?
            .unwrap_or_default())
    }

    async fn sorted_set_entries(&self, key: &[u8]) -> Result<Vec<(Vec<u8>, f64)>> {
        Ok(self
            .read(key, |v| match v {
                ValueKind::ZSet(zset) => Ok(zset.clone()),
                other => Err(Self::wrong_type("zset", other)),
            })?
            .unwrap_or_default())
    }

    async fn stream_entries(&self, key: &[u8]) -> Result<Vec<StreamEntry>> {
        Ok(self
            .read(key, |v| match v {
                ValueKind::Stream(stream) => Ok(stream.clone()),
                other => Err(Self::wrong_type("stream", other)),
            })?
            .unwrap_or_default())
    }

    async fn ttl_remaining(&self, key: &[u8]) -> Result<Option<Duration>> {
        let entries = self.entries.lock();
        Ok(entries
            .get(key)
            .filter(|e| !e.expired())
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now())))
    }

    async fn issue_command(&self, args: &[Vec<u8>]) -> Result<()> {
        self.apply(args)
    }

    async fn total_keys(&self) -> Result<u64> {
        Ok(self.key_count() as u64)
    }

    fn endpoint(&self) -> (String, u16) {
        ("memory".to_string(), 0)
    }
}
