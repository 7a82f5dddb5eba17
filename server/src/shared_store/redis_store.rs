use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;
use redis::aio::ConnectionManager;
use tokio::sync::mpsc;

use crate::server_config::RedisConfig;

use super::{StoreCmd, StoreReply};

/// Networked variant of the shared store. All commands go through a
/// [`ConnectionManager`], which reconnects on its own; pub/sub gets a
/// dedicated connection per subscription.
#[derive(Clone)]
pub(crate) struct RedisStore {
    client: redis::Client,
    manager: ConnectionManager,
    command_timeout: Duration,
}

impl RedisStore {
    pub async fn connect(cfg: &RedisConfig) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(cfg.url())?;
        let connect = ConnectionManager::new(client.clone());
        let manager = tokio::time::timeout(Duration::from_millis(cfg.connect_timeout_ms), connect)
            .await
            .map_err(|_| timeout_error("connect timed out"))??;

        Ok(Self {
            client,
            manager,
            command_timeout: Duration::from_millis(cfg.command_timeout_ms),
        })
    }

    pub async fn ping(&self) -> bool {
        let mut conn = self.manager.clone();
        let query = async move {
            let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<String, redis::RedisError>(pong)
        };
        matches!(
            tokio::time::timeout(self.command_timeout, query).await,
            Ok(Ok(pong)) if pong == "PONG"
        )
    }

    pub async fn exec(&self, cmd: &StoreCmd) -> Result<StoreReply, redis::RedisError> {
        let mut conn = self.manager.clone();
        let command = build_cmd(cmd);
        let query = async move {
            let value: redis::Value = command.query_async(&mut conn).await?;
            Ok::<redis::Value, redis::RedisError>(value)
        };
        let value = tokio::time::timeout(self.command_timeout, query)
            .await
            .map_err(|_| timeout_error("command timed out"))??;
        Ok(reply_for(cmd, value))
    }

    pub async fn pipeline(&self, cmds: &[StoreCmd]) -> Result<Vec<StoreReply>, redis::RedisError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for cmd in cmds {
            pipe.add_command(build_cmd(cmd));
        }

        let mut conn = self.manager.clone();
        let query = async move {
            let values: Vec<redis::Value> = pipe.query_async(&mut conn).await?;
            Ok::<Vec<redis::Value>, redis::RedisError>(values)
        };
        let values = tokio::time::timeout(self.command_timeout, query)
            .await
            .map_err(|_| timeout_error("pipeline timed out"))??;

        Ok(cmds
            .iter()
            .zip(values)
            .map(|(cmd, value)| reply_for(cmd, value))
            .collect())
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.manager.clone();
        let channel = channel.to_string();
        let payload = payload.to_string();
        let query = async move {
            let receivers: i64 = redis::cmd("PUBLISH")
                .arg(&channel)
                .arg(&payload)
                .query_async(&mut conn)
                .await?;
            Ok::<i64, redis::RedisError>(receivers)
        };
        tokio::time::timeout(self.command_timeout, query)
            .await
            .map_err(|_| timeout_error("publish timed out"))??;
        Ok(())
    }

    pub async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, redis::RedisError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(_) => continue,
                };
                if tx.send(payload).await.is_err() {
                    // receiver dropped, unsubscribe by letting pubsub drop
                    break;
                }
            }
        });

        Ok(rx)
    }
}

fn timeout_error(what: &str) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::IoError, "timeout", what.to_string()))
}

fn build_cmd(cmd: &StoreCmd) -> redis::Cmd {
    match cmd {
        StoreCmd::Get(key) => {
            let mut c = redis::cmd("GET");
            c.arg(key);
            c
        }
        StoreCmd::Set(key, value) => {
            let mut c = redis::cmd("SET");
            c.arg(key).arg(value);
            c
        }
        StoreCmd::SetEx(key, value, ttl_secs) => {
            let mut c = redis::cmd("SETEX");
            c.arg(key).arg(*ttl_secs).arg(value);
            c
        }
        StoreCmd::Incr(key) => {
            let mut c = redis::cmd("INCR");
            c.arg(key);
            c
        }
        StoreCmd::Expire(key, ttl_secs) => {
            let mut c = redis::cmd("EXPIRE");
            c.arg(key).arg(*ttl_secs);
            c
        }
        StoreCmd::PExpire(key, ttl_ms) => {
            let mut c = redis::cmd("PEXPIRE");
            c.arg(key).arg(*ttl_ms);
            c
        }
        StoreCmd::PTtl(key) => {
            let mut c = redis::cmd("PTTL");
            c.arg(key);
            c
        }
        StoreCmd::Del(key) => {
            let mut c = redis::cmd("DEL");
            c.arg(key);
            c
        }
        StoreCmd::LPush(key, value) => {
            let mut c = redis::cmd("LPUSH");
            c.arg(key).arg(value);
            c
        }
        StoreCmd::LTrim(key, start, stop) => {
            let mut c = redis::cmd("LTRIM");
            c.arg(key).arg(*start).arg(*stop);
            c
        }
        StoreCmd::LRange(key, start, stop) => {
            let mut c = redis::cmd("LRANGE");
            c.arg(key).arg(*start).arg(*stop);
            c
        }
        StoreCmd::ZAdd(key, score, member) => {
            let mut c = redis::cmd("ZADD");
            c.arg(key).arg(*score).arg(member);
            c
        }
        StoreCmd::ZRemRangeByScore(key, min, max) => {
            let mut c = redis::cmd("ZREMRANGEBYSCORE");
            c.arg(key).arg(*min).arg(*max);
            c
        }
        StoreCmd::ZCard(key) => {
            let mut c = redis::cmd("ZCARD");
            c.arg(key);
            c
        }
        StoreCmd::HIncrBy(key, field, delta) => {
            let mut c = redis::cmd("HINCRBY");
            c.arg(key).arg(field).arg(*delta);
            c
        }
        StoreCmd::HGetAll(key) => {
            let mut c = redis::cmd("HGETALL");
            c.arg(key);
            c
        }
    }
}

fn reply_for(cmd: &StoreCmd, value: redis::Value) -> StoreReply {
    match cmd {
        StoreCmd::HGetAll(_) => StoreReply::Map(value_to_map(value)),
        StoreCmd::LRange(_, _, _) => StoreReply::List(value_to_list(value)),
        _ => value_to_reply(value),
    }
}

fn value_to_reply(value: redis::Value) -> StoreReply {
    match value {
        redis::Value::Nil => StoreReply::Nil,
        redis::Value::Okay => StoreReply::Ok,
        redis::Value::Int(n) => StoreReply::Int(n),
        redis::Value::BulkString(bytes) => StoreReply::Str(String::from_utf8_lossy(&bytes).into_owned()),
        redis::Value::SimpleString(s) => {
            if s == "OK" {
                StoreReply::Ok
            } else {
                StoreReply::Str(s)
            }
        }
        redis::Value::Array(items) => StoreReply::List(
            items
                .into_iter()
                .filter_map(|item| value_to_reply(item).into_string())
                .collect(),
        ),
        redis::Value::Map(pairs) => StoreReply::Map(
            pairs
                .into_iter()
                .filter_map(|(k, v)| {
                    Some((
                        value_to_reply(k).into_string()?,
                        value_to_reply(v).into_string()?,
                    ))
                })
                .collect(),
        ),
        _ => StoreReply::Nil,
    }
}

fn value_to_list(value: redis::Value) -> Vec<String> {
    match value_to_reply(value) {
        StoreReply::List(items) => items,
        StoreReply::Str(s) => vec![s],
        _ => Vec::new(),
    }
}

fn value_to_map(value: redis::Value) -> HashMap<String, String> {
    match value {
        redis::Value::Map(_) => value_to_reply(value).into_map(),
        // RESP2 returns a flat array of field/value pairs
        redis::Value::Array(items) => {
            let mut map = HashMap::new();
            let mut iter = items.into_iter();
            while let (Some(field), Some(val)) = (iter.next(), iter.next()) {
                if let (Some(field), Some(val)) = (
                    value_to_reply(field).into_string(),
                    value_to_reply(val).into_string(),
                ) {
                    map.insert(field, val);
                }
            }
            map
        }
        _ => HashMap::new(),
    }
}
