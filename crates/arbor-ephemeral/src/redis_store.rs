//! Redis-backed implementation of the ephemeral store.
//!
//! A [`redis::aio::ConnectionManager`] carries all commands and reconnects on
//! its own; pattern subscriptions each get a dedicated pub/sub connection
//! driven by a background task. Key scans use `SCAN`/`MATCH`, never `KEYS`,
//! so large canvases cannot stall the server.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use arbor_core::retry::{RetryConfig, retry};

use crate::error::{EphemeralError, EphemeralResult};
use crate::store::{EphemeralStore, PipelineOp, PubSubMessage, SetOptions};

const SUBSCRIBER_BUFFER: usize = 1024;
const SCAN_COUNT: usize = 100;

/// Redis-backed ephemeral store.
pub struct RedisStore {
    manager: ConnectionManager,
    client: redis::Client,
    retry: RetryConfig,
}

impl RedisStore {
    /// Connect, bounded by `ready_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`EphemeralError::ReadyTimeout`] when the store does not
    /// answer a ping within the window, or a connection error from the
    /// underlying client. Callers degrade to durable-only mode on failure.
    pub async fn connect(url: &str, ready_timeout: Duration) -> EphemeralResult<Self> {
        let client = redis::Client::open(url).map_err(EphemeralError::from)?;

        let manager = tokio::time::timeout(ready_timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| EphemeralError::ReadyTimeout(ready_timeout.as_millis()))?
            .map_err(EphemeralError::from)?;

        let store = Self {
            manager,
            client,
            retry: RetryConfig::store_calls(),
        };
        store.ping().await?;
        info!(url, "connected to ephemeral store");
        Ok(store)
    }

    async fn run<T: redis::FromRedisValue + Send>(
        &self,
        label: &str,
        cmd: &redis::Cmd,
    ) -> EphemeralResult<T> {
        retry(self.retry, label, || {
            let mut conn = self.manager.clone();
            async move {
                cmd.query_async::<T>(&mut conn)
                    .await
                    .map_err(EphemeralError::from)
            }
        })
        .await
    }

    fn push_op(pipe: &mut redis::Pipeline, op: PipelineOp) {
        match op {
            PipelineOp::SetString { key, value, ttl } => {
                let cmd = pipe.cmd("SET").arg(&key).arg(value);
                if let Some(t) = ttl {
                    cmd.arg("EX").arg(t.as_secs());
                }
                cmd.ignore();
            },
            PipelineOp::HashSet { key, fields, ttl } => {
                let cmd = pipe.cmd("HSET").arg(&key);
                for (field, value) in fields {
                    cmd.arg(field).arg(value);
                }
                cmd.ignore();
                if let Some(t) = ttl {
                    pipe.cmd("EXPIRE").arg(&key).arg(t.as_secs()).ignore();
                }
            },
            PipelineOp::SetAdd { key, member } => {
                pipe.cmd("SADD").arg(key).arg(member).ignore();
            },
            PipelineOp::SetRemove { key, member } => {
                pipe.cmd("SREM").arg(key).arg(member).ignore();
            },
            PipelineOp::Delete { key } => {
                pipe.cmd("DEL").arg(key).ignore();
            },
            PipelineOp::Expire { key, ttl } => {
                pipe.cmd("EXPIRE").arg(key).arg(ttl.as_secs()).ignore();
            },
        }
    }
}

#[async_trait]
impl EphemeralStore for RedisStore {
    async fn get_string(&self, key: &str) -> EphemeralResult<Option<String>> {
        self.run("GET", redis::cmd("GET").arg(key)).await
    }

    async fn set_string(&self, key: &str, value: &str, opts: SetOptions) -> EphemeralResult<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = opts.ttl {
            cmd.arg("EX").arg(ttl.as_secs());
        }
        if opts.create_only_if_absent {
            cmd.arg("NX");
        }
        // With NX, SET answers nil when the key already existed.
        let reply: Option<String> = self.run("SET", &cmd).await?;
        Ok(reply.is_some())
    }

    async fn hash_get(&self, key: &str, field: &str) -> EphemeralResult<Option<String>> {
        self.run("HGET", redis::cmd("HGET").arg(key).arg(field)).await
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> EphemeralResult<()> {
        self.run::<i64>("HSET", redis::cmd("HSET").arg(key).arg(field).arg(value))
            .await?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> EphemeralResult<HashMap<String, String>> {
        self.run("HGETALL", redis::cmd("HGETALL").arg(key)).await
    }

    async fn set_add(&self, key: &str, member: &str) -> EphemeralResult<()> {
        self.run::<i64>("SADD", redis::cmd("SADD").arg(key).arg(member))
            .await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> EphemeralResult<()> {
        self.run::<i64>("SREM", redis::cmd("SREM").arg(key).arg(member))
            .await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> EphemeralResult<Vec<String>> {
        self.run("SMEMBERS", redis::cmd("SMEMBERS").arg(key)).await
    }

    async fn keys_matching(&self, pattern: &str) -> EphemeralResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = self
                .run(
                    "SCAN",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_COUNT),
                )
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    async fn pipeline(&self, ops: Vec<PipelineOp>) -> EphemeralResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            Self::push_op(&mut pipe, op);
        }
        let mut conn = self.manager.clone();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(EphemeralError::from)
    }

    async fn publish(&self, channel: &str, payload: &str) -> EphemeralResult<()> {
        self.run::<i64>("PUBLISH", redis::cmd("PUBLISH").arg(channel).arg(payload))
            .await?;
        Ok(())
    }

    async fn pattern_subscribe(
        &self,
        pattern: &str,
    ) -> EphemeralResult<mpsc::Receiver<PubSubMessage>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(EphemeralError::from)?;
        pubsub
            .psubscribe(pattern)
            .await
            .map_err(EphemeralError::from)?;

        let (sender, receiver) = mpsc::channel(SUBSCRIBER_BUFFER);
        let pattern = pattern.to_string();
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name().to_string();
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(err) => {
                        warn!(%err, channel, "non-text pub/sub payload skipped");
                        continue;
                    },
                };
                if sender.send(PubSubMessage { channel, payload }).await.is_err() {
                    break;
                }
            }
            debug!(pattern, "pub/sub forwarder exiting");
        });

        Ok(receiver)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> EphemeralResult<()> {
        self.run::<i64>("EXPIRE", redis::cmd("EXPIRE").arg(key).arg(ttl.as_secs()))
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> EphemeralResult<()> {
        self.run::<i64>("DEL", redis::cmd("DEL").arg(key)).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> EphemeralResult<bool> {
        let n: i64 = self.run("EXISTS", redis::cmd("EXISTS").arg(key)).await?;
        Ok(n > 0)
    }

    async fn ping(&self) -> EphemeralResult<()> {
        let reply: String = self.run("PING", &redis::cmd("PING")).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(EphemeralError::Command(format!("unexpected ping reply: {reply}")))
        }
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}
