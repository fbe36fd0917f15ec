//! Redis Streams broker.
//!
//! Tasks are appended with `XADD`; workers read through a consumer group with
//! `XREADGROUP` and acknowledge with `XACK`. The stream entry id doubles as
//! the job id.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use redis::streams::StreamReadReply;
use redis::{Client, Connection};

use super::{ConversionTask, Delivery, QueueBroker};
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::sanitize::redact_broker_url;

pub struct RedisBroker {
    client: Client,
    url: String,
    stream: String,
    group: String,
    consumer: String,
    connect_timeout: Duration,
    /// Opened on first use and dropped after any failed command.
    connection: Mutex<Option<Connection>>,
}

fn command_error(command: &'static str, e: redis::RedisError) -> QueueError {
    QueueError::Command {
        command,
        reason: e.to_string(),
    }
}

/// `BLOCK` argument for a receive timeout. Never 0, which Redis treats as
/// an unbounded wait that would also hold the connection lock.
fn block_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl RedisBroker {
    pub fn new(config: &QueueConfig, consumer: impl Into<String>) -> Result<Self, QueueError> {
        let url = redact_broker_url(&config.redis_url);
        let client = Client::open(config.redis_url.as_str()).map_err(|e| QueueError::Unreachable {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            client,
            url,
            stream: config.stream.clone(),
            group: config.consumer_group.clone(),
            consumer: consumer.into(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            connection: Mutex::new(None),
        })
    }

    /// Consumer name unique to this process and worker slot.
    pub fn consumer_name(slot: usize) -> String {
        format!("worker-{}-{}", std::process::id(), slot)
    }

    fn connect(&self) -> Result<Connection, QueueError> {
        let mut conn = self
            .client
            .get_connection_with_timeout(self.connect_timeout)
            .map_err(|e| QueueError::Unreachable {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;

        // MKSTREAM creates the stream if needed; BUSYGROUP means the group exists.
        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query(&mut conn);
        if let Err(e) = created {
            if !e.to_string().contains("BUSYGROUP") {
                return Err(command_error("XGROUP", e));
            }
        }

        log::info!("Connected to Redis broker at {}", self.url);
        Ok(conn)
    }

    /// Runs `f` on the shared connection, opening it first if needed.
    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, QueueError>,
    ) -> Result<T, QueueError> {
        let mut guard = self.connection.lock().unwrap_or_else(|e| e.into_inner());

        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(QueueError::Closed);
        };

        let result = f(conn);
        if result.is_err() {
            *guard = None;
        }
        result
    }
}

impl QueueBroker for RedisBroker {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn publish(&self, task: &ConversionTask) -> Result<String, QueueError> {
        let fields = task.to_fields()?;

        self.with_connection(|conn| {
            let mut cmd = redis::cmd("XADD");
            cmd.arg(&self.stream).arg("*");
            for (key, value) in &fields {
                cmd.arg(*key).arg(value);
            }
            cmd.query::<String>(conn).map_err(|e| command_error("XADD", e))
        })
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        let block_ms = block_millis(timeout);
        let reply: Option<StreamReadReply> = self.with_connection(|conn| {
            redis::cmd("XREADGROUP")
                .arg("GROUP")
                .arg(&self.group)
                .arg(&self.consumer)
                .arg("COUNT")
                .arg(1)
                .arg("BLOCK")
                .arg(block_ms)
                .arg("STREAMS")
                .arg(&self.stream)
                .arg(">")
                .query(conn)
                .map_err(|e| command_error("XREADGROUP", e))
        })?;

        let Some(entry) = reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .next()
        else {
            return Ok(None);
        };

        let fields: HashMap<String, String> = entry
            .map
            .keys()
            .filter_map(|key| entry.get::<String>(key).map(|v| (key.clone(), v)))
            .collect();

        match ConversionTask::from_fields(&fields) {
            Ok(task) => Ok(Some(Delivery { id: entry.id, task })),
            Err(e) => {
                // A malformed entry would be redelivered forever; drop it.
                log::error!("Discarding malformed stream entry {}: {}", entry.id, e);
                self.acknowledge(&entry.id)?;
                Err(e)
            }
        }
    }

    fn acknowledge(&self, delivery_id: &str) -> Result<(), QueueError> {
        self.with_connection(|conn| {
            redis::cmd("XACK")
                .arg(&self.stream)
                .arg(&self.group)
                .arg(delivery_id)
                .query::<i64>(conn)
                .map(|_| ())
                .map_err(|e| command_error("XACK", e))
        })
    }
}
