// Copyright (c) 2025-present, the SiloBang authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Top-level wiring: the per-topic registry, the write-serialization
//! discipline, and process lifecycle.

use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::segment::SegmentManager;
use crate::topic::TopicIndex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Everything needed to serve one topic: its segments, its index, and the
/// mutex that serializes the ingest pipeline for this topic.
///
/// The mutex exists in addition to the index's own `BEGIN IMMEDIATE`
/// discipline because segment append is a side effect outside the SQL
/// transaction; the transaction's lock alone cannot order the file append.
pub(crate) struct TopicHandle {
    pub(crate) name: String,
    pub(crate) segments: SegmentManager,
    pub(crate) index: TopicIndex,
    pub(crate) ingest_lock: Mutex<()>,
}

impl TopicHandle {
    fn open(dir: PathBuf, name: &str, max_dat_size: u64) -> crate::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        let index = TopicIndex::open(&dir.join("index.db"))?;
        let segments = SegmentManager::open(&dir, max_dat_size)?;
        Ok(Self {
            name: name.to_string(),
            segments,
            index,
            ingest_lock: Mutex::new(()),
        })
    }
}

/// The store: one orchestrator, and a registry of lazily-opened topics.
pub struct Store {
    pub(crate) config: Config,
    pub(crate) orchestrator: Orchestrator,
    pub(crate) topics: Mutex<HashMap<String, Arc<TopicHandle>>>,
    shutting_down: AtomicBool,
}

impl Store {
    /// Opens (creating directories as needed) the store described by `config`.
    pub fn open(config: Config) -> crate::Result<Self> {
        std::fs::create_dir_all(&config.work_dir)?;
        std::fs::create_dir_all(&config.topics_root)?;
        let orchestrator = Orchestrator::open(&config.orchestrator_path)?;

        Ok(Self {
            config,
            orchestrator,
            topics: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Creates a new topic directory and index. Fails with
    /// [`crate::Error::TopicAlreadyExists`] if the topic already exists, or
    /// [`crate::Error::InvalidTopicName`] if `name` is malformed.
    pub fn create_topic(&self, name: &str) -> crate::Result<()> {
        validate_topic_name(name)?;

        let dir = self.config.topics_root.join(name);
        if dir.join("index.db").exists() {
            return Err(crate::Error::TopicAlreadyExists(name.to_string()));
        }

        let handle = TopicHandle::open(dir, name, self.config.max_dat_size)?;
        self.topics
            .lock()
            .expect("topic registry poisoned")
            .insert(name.to_string(), Arc::new(handle));
        Ok(())
    }

    /// Resolves a topic handle, opening it from disk on first use.
    pub(crate) fn topic(&self, name: &str) -> crate::Result<Arc<TopicHandle>> {
        validate_topic_name(name)?;

        let mut topics = self.topics.lock().expect("topic registry poisoned");
        if let Some(handle) = topics.get(name) {
            return Ok(Arc::clone(handle));
        }

        let dir = self.config.topics_root.join(name);
        if !dir.join("index.db").exists() {
            return Err(crate::Error::TopicNotFound(name.to_string()));
        }

        let handle = Arc::new(TopicHandle::open(dir, name, self.config.max_dat_size)?);
        topics.insert(name.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Blocks new ingest, waits (up to a 10-second grace period) for any
    /// in-flight per-topic writers to finish, then returns. Connections are
    /// closed as each `TopicHandle`/`Orchestrator` is dropped along with the
    /// `Store`.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        let topics = self.topics.lock().expect("topic registry poisoned");
        for handle in topics.values() {
            loop {
                if handle.ingest_lock.try_lock().is_ok() {
                    break;
                }
                if std::time::Instant::now() >= deadline {
                    log::warn!(
                        "shutdown grace period elapsed while topic {:?} was still writing",
                        handle.name
                    );
                    break;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        }
        log::info!("store shutdown complete");
    }

    pub(crate) fn rejecting_new_work(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

/// Validates a topic name against `^[a-z0-9_-]{1,64}$`.
pub(crate) fn validate_topic_name(name: &str) -> crate::Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-');

    if valid {
        Ok(())
    } else {
        Err(crate::Error::InvalidTopicName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_name_validation() {
        assert!(validate_topic_name("photos").is_ok());
        assert!(validate_topic_name("photos-2024_v2").is_ok());
        assert!(validate_topic_name("").is_err());
        assert!(validate_topic_name("Photos").is_err());
        assert!(validate_topic_name("has/slash").is_err());
        assert!(validate_topic_name(&"a".repeat(65)).is_err());
        assert!(validate_topic_name(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn create_topic_then_reopen_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config::new(dir.path()).open().unwrap();
        store.create_topic("photos").unwrap();

        // Drop the in-memory registry entry, forcing a disk reopen.
        store.topics.lock().unwrap().clear();
        assert!(store.topic("photos").is_ok());
    }

    #[test]
    fn unknown_topic_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config::new(dir.path()).open().unwrap();
        assert!(matches!(
            store.topic("nope"),
            Err(crate::Error::TopicNotFound(_))
        ));
    }

    #[test]
    fn duplicate_topic_creation_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config::new(dir.path()).open().unwrap();
        store.create_topic("photos").unwrap();
        assert!(matches!(
            store.create_topic("photos"),
            Err(crate::Error::TopicAlreadyExists(_))
        ));
    }
}
