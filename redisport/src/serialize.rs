//! Turns one key into the replay commands that reconstruct it.
//!
//! Each record is a short run of lines: collection types get a `DEL`
//! first so replay is idempotent, then one rebuild command carrying the
//! full contents, then a `PEXPIRE` if the key has a remaining TTL. The
//! TTL is the remaining one observed now, not the original absolute
//! expiry, so an import re-establishes a correct relative expiration.

use crate::error::Result;
use crate::quote::format_arg;
use crate::store::{KeyType, Store};

/// Hash fields per HSET line; larger hashes are split across lines to
/// keep any single line bounded.
pub const MAX_PAIRS_PER_LINE: usize = 512;

/// Replay commands for one key, in replay order.
#[derive(Debug)]
pub struct SerializedKey {
    pub key: Vec<u8>,
    pub key_type: KeyType,
    pub lines: Vec<String>,
    pub warnings: Vec<String>,
}

/// Read `key` from the store and render its record. Never mutates the
/// source; the emitted `DEL` lines act on the *import* target.
pub async fn serialize_key(store: &dyn Store, key: &[u8]) -> Result<SerializedKey> {
    let key_type = store.key_type(key).await?;
    let quoted = format_arg(key);
    let mut lines = Vec::new();
    let mut warnings = Vec::new();

    match &key_type {
        KeyType::String => match store.get_string(key).await? {
            Some(value) => lines.push(format!("SET {quoted} {}", format_arg(&value))),
            None => warnings.push(vanished(key)),
        },
        KeyType::Hash => {
            let fields = store.hash_entries(key).await?;
            // Hashes cannot exist empty; an empty read means the key
            // vanished between the type check and this read.
            if fields.is_empty() {
                warnings.push(vanished(key));
            }
            for chunk in fields.chunks(MAX_PAIRS_PER_LINE) {
                let mut line = format!("HSET {quoted}");
                for (field, value) in chunk {
                    line.push(' ');
                    line.push_str(&format_arg(field));
                    line.push(' ');
                    line.push_str(&format_arg(value));
                }
                lines.push(line);
            }
        }
        KeyType::List => {
            let elements = store.list_range(key).await?;
            lines.push(format!("DEL {quoted}"));
            if elements.is_empty() {
                warnings.push(vanished(key));
            } else {
                // RPUSH in list order reproduces the exact ordering.
                let mut line = format!("RPUSH {quoted}");
                for element in &elements {
                    line.push(' ');
                    line.push_str(&format_arg(element));
                }
                lines.push(line);
            }
        }
        KeyType::Set => {
            let members = store.set_members(key).await?;
            lines.push(format!("DEL {quoted}"));
            if members.is_empty() {
                warnings.push(vanished(key));
            } else {
                let mut line = format!("SADD {quoted}");
                for member in &members {
                    line.push(' ');
                    line.push_str(&format_arg(member));
                }
                lines.push(line);
            }
        }
        KeyType::SortedSet => {
            let entries = store.sorted_set_entries(key).await?;
            lines.push(format!("DEL {quoted}"));
            if entries.is_empty() {
                warnings.push(vanished(key));
            } else {
                let mut line = format!("ZADD {quoted}");
                for (member, score) in &entries {
                    line.push(' ');
                    line.push_str(&format_score(*score));
                    line.push(' ');
                    line.push_str(&format_arg(member));
                }
                lines.push(line);
            }
        }
        KeyType::Stream => {
            let entries = store.stream_entries(key).await?;
            lines.push(format!("DEL {quoted}"));
            for entry in &entries {
                let mut line = format!("XADD {quoted} {}", entry.id);
                for (field, value) in &entry.fields {
                    line.push(' ');
                    line.push_str(&format_arg(field));
                    line.push(' ');
                    line.push_str(&format_arg(value));
                }
                lines.push(line);
            }
        }
        KeyType::Unknown(tag) => {
            // Typed placeholder: visible in the file, skipped on import.
            lines.push(format!("# Unsupported type {tag} for key {quoted}"));
            warnings.push(format!(
                "unsupported type {tag} for key {}",
                String::from_utf8_lossy(key)
            ));
        }
    }

    if !matches!(key_type, KeyType::Unknown(_)) {
        if let Some(ttl) = store.ttl_remaining(key).await? {
            lines.push(format!("PEXPIRE {quoted} {}", ttl.as_millis().max(1)));
        }
    }

    Ok(SerializedKey {
        key: key.to_vec(),
        key_type,
        lines,
        warnings,
    })
}

fn vanished(key: &[u8]) -> String {
    format!(
        "key {} disappeared during export",
        String::from_utf8_lossy(key)
    )
}

/// Scores render as integers when they are whole, so `1` does not
/// become `1.0` on its way through a file.
fn format_score(score: f64) -> String {
    if score.fract() == 0.0 && score.abs() < 1e15 {
        format!("{}", score as i64)
    } else {
        format!("{score}")
    }
}
