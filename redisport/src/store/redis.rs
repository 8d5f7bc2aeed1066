//! Redis-backed store handle.
//!
//! A single handle per target; when the target turns out to be a
//! cluster (probed with `CLUSTER SLOTS` at connect time) one extra
//! handle per master node is kept so enumeration can fan out, and all
//! reads and replays switch to a slot-routing cluster connection so a
//! key owned by any master resolves without a MOVED redirect.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionLike, MultiplexedConnection};
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{AsyncCommands, IntoConnectionInfo};
use tokio::sync::OnceCell;

use super::{KeyType, Store, StreamEntry};
use crate::error::{Error, Result};

pub struct RedisStore {
    client: redis::Client,
    cluster: Option<ClusterClient>,
    host: String,
    port: u16,
    node_handles: Vec<Arc<dyn Store>>,
    conn: OnceCell<Conn>,
}

/// Connection used for everything except enumeration fan-out.
#[derive(Clone)]
enum Conn {
    Single(MultiplexedConnection),
    Cluster(ClusterConnection),
}

impl ConnectionLike for Conn {
    fn req_packed_command<'a>(
        &'a mut self,
        cmd: &'a redis::Cmd,
    ) -> redis::RedisFuture<'a, redis::Value> {
        match self {
            Conn::Single(conn) => conn.req_packed_command(cmd),
            Conn::Cluster(conn) => conn.req_packed_command(cmd),
        }
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        pipeline: &'a redis::Pipeline,
        offset: usize,
        count: usize,
    ) -> redis::RedisFuture<'a, Vec<redis::Value>> {
        match self {
            Conn::Single(conn) => conn.req_packed_commands(pipeline, offset, count),
            Conn::Cluster(conn) => conn.req_packed_commands(pipeline, offset, count),
        }
    }

    fn get_db(&self) -> i64 {
        match self {
            Conn::Single(conn) => conn.get_db(),
            Conn::Cluster(conn) => conn.get_db(),
        }
    }
}

impl RedisStore {
    /// Connect to `url` and probe for cluster topology.
    pub async fn connect(url: &str) -> Result<Arc<Self>> {
        let info = url.into_connection_info()?;
        let mut store = Self::from_info(info.clone())?;

        let mut probe = store.client.get_multiplexed_async_connection().await?;
        let reply: redis::RedisResult<redis::Value> = redis::cmd("CLUSTER")
            .arg("SLOTS")
            .query_async(&mut probe)
            .await;

        match reply {
            Ok(value) => {
                let masters = masters_from_slots(&value);
                if !masters.is_empty() {
                    tracing::info!(
                        nodes = masters.len(),
                        "target is a cluster, routing by slot and enumerating per node"
                    );
                    let mut node_infos = Vec::with_capacity(masters.len());
                    for (host, port) in masters {
                        let mut node_info = info.clone();
                        node_info.addr = redis::ConnectionAddr::Tcp(host, port);
                        store
                            .node_handles
                            .push(Arc::new(Self::from_info(node_info.clone())?) as Arc<dyn Store>);
                        node_infos.push(node_info);
                    }
                    store.cluster = Some(ClusterClient::new(node_infos)?);
                }
            }
            Err(e) => {
                tracing::debug!("not a cluster: {e}");
            }
        }

        Ok(Arc::new(store))
    }

    fn from_info(info: redis::ConnectionInfo) -> Result<Self> {
        let (host, port) = match &info.addr {
            redis::ConnectionAddr::Tcp(host, port) => (host.clone(), *port),
            redis::ConnectionAddr::TcpTls { host, port, .. } => (host.clone(), *port),
            redis::ConnectionAddr::Unix(path) => (path.display().to_string(), 0),
        };
        let client = redis::Client::open(info)?;
        Ok(Self {
            client,
            cluster: None,
            host,
            port,
            node_handles: Vec::new(),
            conn: OnceCell::new(),
        })
    }

    /// Connection is established once and cloned per call; a clone
    /// shares the underlying pipeline.
    async fn connection(&self) -> Result<Conn> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                match &self.cluster {
                    Some(cluster) => cluster
                        .get_async_connection()
                        .await
                        .map(Conn::Cluster)
                        .map_err(Error::from),
                    None => self
                        .client
                        .get_multiplexed_async_connection()
                        .await
                        .map(Conn::Single)
                        .map_err(Error::from),
                }
            })
            .await?;
        Ok(conn.clone())
    }
}

/// Extract master `(host, port)` pairs from a `CLUSTER SLOTS` reply.
fn masters_from_slots(value: &redis::Value) -> Vec<(String, u16)> {
    let mut masters: Vec<(String, u16)> = Vec::new();
    let redis::Value::Array(slots) = value else {
        return masters;
    };
    for slot_range in slots {
        let redis::Value::Array(parts) = slot_range else {
            continue;
        };
        // [start, end, master, replica...]; master is [host, port, ...].
        let Some(redis::Value::Array(node)) = parts.get(2) else {
            continue;
        };
        let host = match node.first() {
            Some(redis::Value::BulkString(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
            Some(redis::Value::SimpleString(s)) => s.clone(),
            _ => continue,
        };
        let port = match node.get(1) {
            Some(redis::Value::Int(p)) => *p as u16,
            _ => continue,
        };
        if !masters.iter().any(|m| m.0 == host && m.1 == port) {
            masters.push((host, port));
        }
    }
    masters
}

#[async_trait]
impl Store for RedisStore {
    async fn scan_batch(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<Vec<u8>>)> {
        let mut conn = self.connection().await?;
        let (next, keys): (u64, Vec<Vec<u8>>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok((next, keys))
    }

    async fn list_keys(&self, pattern: &str) -> Result<Vec<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let keys: Vec<Vec<u8>> = conn.keys(pattern).await?;
        Ok(keys)
    }

    async fn key_type(&self, key: &[u8]) -> Result<KeyType> {
        let mut conn = self.connection().await?;
        let tag: String = redis::cmd("TYPE").arg(key).query_async(&mut conn).await?;
        Ok(KeyType::from_tag(&tag))
    }

    async fn get_string(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn hash_entries(&self, key: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut conn = self.connection().await?;
        let entries: Vec<(Vec<u8>, Vec<u8>)> = conn.hgetall(key).await?;
        Ok(entries)
    }

    async fn list_range(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let elements: Vec<Vec<u8>> = conn.lrange(key, 0, -1).await?;
        Ok(elements)
    }

    async fn set_members(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let members: Vec<Vec<u8>> = conn.smembers(key).await?;
        Ok(members)
    }

    async fn sorted_set_entries(&self, key: &[u8]) -> Result<Vec<(Vec<u8>, f64)>> {
        let mut conn = self.connection().await?;
        let entries: Vec<(Vec<u8>, f64)> = redis::cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;
        Ok(entries)
    }

    async fn stream_entries(&self, key: &[u8]) -> Result<Vec<StreamEntry>> {
        let mut conn = self.connection().await?;
        let raw: Vec<(String, Vec<(Vec<u8>, Vec<u8>)>)> = redis::cmd("XRANGE")
            .arg(key)
            .arg("-")
            .arg("+")
            .query_async(&mut conn)
            .await?;
        Ok(raw
            .into_iter()
            .map(|(id, fields)| StreamEntry { id, fields })
            .collect())
    }

    async fn ttl_remaining(&self, key: &[u8]) -> Result<Option<Duration>> {
        let mut conn = self.connection().await?;
        let millis: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        // -1 means no expiry, -2 means the key is gone.
        if millis < 0 {
            return Ok(None);
        }
        Ok(Some(Duration::from_millis(millis as u64)))
    }

    async fn issue_command(&self, args: &[Vec<u8>]) -> Result<()> {
        let name = args
            .first()
            .ok_or_else(|| Error::Store("empty command".to_string()))?;
        let name = std::str::from_utf8(name)
            .map_err(|_| Error::Store("non-UTF-8 command name".to_string()))?;

        let mut cmd = redis::cmd(name);
        for arg in &args[1..] {
            cmd.arg(arg.as_slice());
        }

        let mut conn = self.connection().await?;
        let _: redis::Value = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn total_keys(&self) -> Result<u64> {
        let mut conn = self.connection().await?;
        let size: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
        Ok(size)
    }

    fn is_multi_node(&self) -> bool {
        !self.node_handles.is_empty()
    }

    fn nodes(&self) -> Vec<Arc<dyn Store>> {
        self.node_handles.clone()
    }

    fn endpoint(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masters_parsed_from_slots_reply() {
        let value = redis::Value::Array(vec![
            redis::Value::Array(vec![
                redis::Value::Int(0),
                redis::Value::Int(5460),
                redis::Value::Array(vec![
                    redis::Value::BulkString(b"10.0.0.1".to_vec()),
                    redis::Value::Int(6379),
                ]),
            ]),
            redis::Value::Array(vec![
                redis::Value::Int(5461),
                redis::Value::Int(10922),
                redis::Value::Array(vec![
                    redis::Value::BulkString(b"10.0.0.2".to_vec()),
                    redis::Value::Int(6379),
                ]),
            ]),
            // Duplicate master owning a second range.
            redis::Value::Array(vec![
                redis::Value::Int(10923),
                redis::Value::Int(16383),
                redis::Value::Array(vec![
                    redis::Value::BulkString(b"10.0.0.1".to_vec()),
                    redis::Value::Int(6379),
                ]),
            ]),
        ]);

        let masters = masters_from_slots(&value);
        assert_eq!(
            masters,
            vec![
                ("10.0.0.1".to_string(), 6379),
                ("10.0.0.2".to_string(), 6379)
            ]
        );
    }

    #[test]
    fn non_array_reply_yields_no_masters() {
        assert!(masters_from_slots(&redis::Value::Nil).is_empty());
    }
}
