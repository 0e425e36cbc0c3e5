//! Key-value access behind a small backend switch.
//!
//! The production backend is the shared Redis connection. The memory
//! backend keeps the same keyspace in a process-local map and exists for
//! tests and local development, where pulling up a real key-value service
//! is not worth it.
//!
//! Every pattern used by this crate is a prefix scan (`<prefix>*`), which
//! is what the memory backend implements.

use crate::error::Error;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

/// Page size requested from the cursor scan.
pub const SCAN_PAGE_SIZE: usize = 1000;

#[derive(Clone)]
pub(crate) enum Backend {
    Redis(ConnectionManager),
    Memory(Memory),
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Redis(_) => f.write_str("Backend::Redis"),
            Backend::Memory(_) => f.write_str("Backend::Memory"),
        }
    }
}

/// Process-local stand-in for the key-value service.
#[derive(Clone, Default)]
pub(crate) struct Memory(Arc<Mutex<BTreeMap<String, String>>>);

impl Memory {
    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.0.lock().expect("kv store poisoned")
    }
}

impl Backend {
    pub(crate) async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        match self {
            Self::Redis(conn) => {
                let mut conn = conn.clone();

                conn.get(key).await.map_err(Error::command)
            }
            Self::Memory(memory) => Ok(memory.lock().get(key).cloned()),
        }
    }

    pub(crate) async fn set(&self, key: &str, value: String) -> Result<(), Error> {
        match self {
            Self::Redis(conn) => {
                let mut conn = conn.clone();

                conn.set(key, value).await.map_err(Error::command)
            }
            Self::Memory(memory) => {
                memory.lock().insert(key.to_owned(), value);

                Ok(())
            }
        }
    }

    /// Fetch many keys in one pipelined batch, preserving order.
    pub(crate) async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, Error> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        match self {
            Self::Redis(conn) => {
                let mut pipe = redis::pipe();

                for key in keys {
                    pipe.get(key);
                }

                let mut conn = conn.clone();

                pipe.query_async(&mut conn).await.map_err(Error::command)
            }
            Self::Memory(memory) => {
                let map = memory.lock();

                Ok(keys.iter().map(|key| map.get(key).cloned()).collect())
            }
        }
    }

    /// Apply a batch of writes in one pipeline. `None` deletes the key.
    pub(crate) async fn apply(
        &self,
        writes: Vec<(String, Option<String>)>,
    ) -> Result<(), Error> {
        if writes.is_empty() {
            return Ok(());
        }

        match self {
            Self::Redis(conn) => {
                let mut pipe = redis::pipe();

                for (key, value) in writes {
                    match value {
                        Some(value) => {
                            pipe.set(key, value).ignore();
                        }
                        None => {
                            pipe.del(key).ignore();
                        }
                    }
                }

                let mut conn = conn.clone();

                pipe.query_async::<_, ()>(&mut conn)
                    .await
                    .map_err(Error::command)
            }
            Self::Memory(memory) => {
                let mut map = memory.lock();

                for (key, value) in writes {
                    match value {
                        Some(value) => {
                            map.insert(key, value);
                        }
                        None => {
                            map.remove(&key);
                        }
                    }
                }

                Ok(())
            }
        }
    }

    /// Collect every key matching the prefix pattern via a cursor scan,
    /// never a blocking enumerate-all command.
    pub(crate) async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, Error> {
        match self {
            Self::Redis(conn) => {
                let mut conn = conn.clone();
                let mut keys = Vec::new();
                let mut cursor: u64 = 0;

                loop {
                    let (next, page): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_PAGE_SIZE)
                        .query_async(&mut conn)
                        .await
                        .map_err(Error::command)?;

                    keys.extend(page);

                    if next == 0 {
                        break;
                    }

                    cursor = next;
                }

                Ok(keys)
            }
            Self::Memory(memory) => {
                let prefix = pattern_prefix(pattern);

                Ok(memory
                    .lock()
                    .keys()
                    .filter(|key| key.starts_with(prefix))
                    .cloned()
                    .collect())
            }
        }
    }

    /// Delete every key matching the prefix pattern, returning how many
    /// were removed.
    pub(crate) async fn delete_matching(&self, pattern: &str) -> Result<u64, Error> {
        let keys = self.scan_keys(pattern).await?;

        if keys.is_empty() {
            return Ok(0);
        }

        match self {
            Self::Redis(conn) => {
                let mut conn = conn.clone();

                conn.del(keys).await.map_err(Error::command)
            }
            Self::Memory(memory) => {
                let mut map = memory.lock();
                let mut removed = 0;

                for key in keys {
                    if map.remove(&key).is_some() {
                        removed += 1;
                    }
                }

                Ok(removed)
            }
        }
    }
}

fn pattern_prefix(pattern: &str) -> &str {
    pattern.strip_suffix('*').unwrap_or(pattern)
}
