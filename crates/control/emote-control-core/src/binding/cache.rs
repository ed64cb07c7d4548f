//! Persisted binding records keyed by a content hash of the raw parameter list.
//!
//! Reads happen inline during `load`; writes go through a single background
//! writer thread so the tick loop never waits on the filesystem.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::descriptor::{ParameterDescriptor, RawParameter};
use super::rules::SemanticRule;
use super::table::BindingTable;
use crate::error::{ControlError, Result};

pub const CACHE_VERSION: u32 = 1;
const FILE_SUFFIX: &str = ".bindings.json";

/// On-disk form of a binding table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub version: u32,
    pub model_id: String,
    pub content_hash: String,
    /// Unix seconds of the write. The only field that differs between two
    /// records for the same raw list.
    pub saved_at: u64,
    pub parameters: Vec<ParameterDescriptor>,
}

impl CacheRecord {
    pub fn from_table(table: &BindingTable) -> Self {
        Self {
            version: CACHE_VERSION,
            model_id: table.model_id().to_string(),
            content_hash: table.content_hash().to_string(),
            saved_at: unix_now(),
            parameters: table.descriptors().to_vec(),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Hex SHA-256 over a length-prefixed encoding of every raw field.
pub fn content_hash(raw: &[RawParameter]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((raw.len() as u64).to_le_bytes());
    for p in raw {
        put_str(&mut hasher, &p.name);
        hasher.update(p.default.to_bits().to_le_bytes());
        hasher.update(p.min.to_bits().to_le_bytes());
        hasher.update(p.max.to_bits().to_le_bytes());
        put_str(&mut hasher, p.role.map(|r| r.as_str()).unwrap_or(""));
        put_str(&mut hasher, p.category.map(|c| c.as_str()).unwrap_or(""));
        hasher.update((p.frames.len() as u64).to_le_bytes());
        for f in &p.frames {
            hasher.update(f.value.to_bits().to_le_bytes());
            put_str(&mut hasher, &f.label);
        }
    }
    hex::encode(hasher.finalize())
}

fn put_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

/// Result of one background write.
#[derive(Debug)]
pub struct PersistOutcome {
    pub path: PathBuf,
    pub result: Result<()>,
}

enum Job {
    Write { path: PathBuf, body: String },
    Flush(Sender<()>),
}

pub struct BindingCache {
    dir: PathBuf,
    jobs: Option<Sender<Job>>,
    outcomes: Receiver<PersistOutcome>,
    worker: Option<JoinHandle<()>>,
}

impl BindingCache {
    /// Open a cache rooted at `dir` and start its writer thread.
    ///
    /// The directory is created lazily by the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let (job_tx, job_rx) = unbounded::<Job>();
        let (out_tx, out_rx) = unbounded::<PersistOutcome>();
        let worker = thread::Builder::new()
            .name("emote-binding-cache".into())
            .spawn(move || writer_loop(job_rx, out_tx))?;
        Ok(Self {
            dir,
            jobs: Some(job_tx),
            outcomes: out_rx,
            worker: Some(worker),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, content_hash: &str) -> PathBuf {
        self.dir.join(format!("{content_hash}{FILE_SUFFIX}"))
    }

    /// Read a record synchronously. `Ok(None)` when no file exists.
    pub fn read_record(&self, content_hash: &str) -> Result<Option<CacheRecord>> {
        let path = self.path_for(content_hash);
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Load bindings for a model, preferring a compatible cached record.
    ///
    /// The fresh derivation always runs so range and role errors in the raw
    /// list are reported even on a cache hit. The resulting table is queued
    /// for persistence.
    pub fn load(
        &self,
        model_id: &str,
        raw: &[RawParameter],
        rules: &[SemanticRule],
    ) -> Result<BindingTable> {
        let fresh = BindingTable::derive(model_id, raw, rules)?;
        let hash = fresh.content_hash().to_string();

        let table = match self.read_record(&hash) {
            Ok(Some(rec)) if is_compatible(&rec, &fresh) => match fresh.overlay(&rec.parameters) {
                Ok(t) => {
                    info!("binding cache hit for '{model_id}' ({hash})");
                    t
                }
                Err(e) => {
                    warn!("cached bindings for '{model_id}' rejected ({e}); rederiving");
                    fresh
                }
            },
            Ok(Some(_)) => {
                info!("cached bindings for '{model_id}' are structurally stale; rebinding");
                fresh
            }
            Ok(None) => {
                info!("binding cache miss for '{model_id}' ({hash})");
                fresh
            }
            Err(e) => {
                warn!("unreadable binding cache record for '{model_id}': {e}");
                fresh
            }
        };

        self.persist(&table);
        Ok(table)
    }

    /// Queue a write of `table`. Failures arrive via [`drain_outcomes`](Self::drain_outcomes).
    pub fn persist(&self, table: &BindingTable) {
        let path = self.path_for(table.content_hash());
        let body = match serde_json::to_string_pretty(&CacheRecord::from_table(table)) {
            Ok(b) => b,
            Err(e) => {
                warn!("failed to encode binding record: {e}");
                return;
            }
        };
        let Some(jobs) = &self.jobs else { return };
        if jobs.send(Job::Write { path, body }).is_err() {
            warn!("binding cache writer is gone; dropping persist");
        }
    }

    /// Block until every write queued so far has finished.
    pub fn flush(&self) {
        let Some(jobs) = &self.jobs else { return };
        let (tx, rx) = crossbeam_channel::bounded(1);
        if jobs.send(Job::Flush(tx)).is_ok() {
            let _ = rx.recv();
        }
    }

    /// Collect results of finished writes without blocking.
    pub fn drain_outcomes(&self) -> Vec<PersistOutcome> {
        self.outcomes.try_iter().collect()
    }
}

impl Drop for BindingCache {
    fn drop(&mut self) {
        // Closing the channel lets the writer finish queued jobs and exit.
        self.jobs.take();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for BindingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingCache").field("dir", &self.dir).finish()
    }
}

fn is_compatible(rec: &CacheRecord, fresh: &BindingTable) -> bool {
    if rec.version != CACHE_VERSION
        || rec.model_id != fresh.model_id()
        || rec.content_hash != fresh.content_hash()
        || rec.parameters.len() != fresh.len()
    {
        return false;
    }
    rec.parameters.iter().all(|p| fresh.contains(&p.name))
}

fn writer_loop(jobs: Receiver<Job>, outcomes: Sender<PersistOutcome>) {
    for job in jobs {
        match job {
            Job::Write { path, body } => {
                let result = write_atomic(&path, &body);
                match &result {
                    Ok(()) => debug!("persisted bindings to {}", path.display()),
                    Err(e) => warn!("binding persist to {} failed: {e}", path.display()),
                }
                let _ = outcomes.send(PersistOutcome { path, result });
            }
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

fn write_atomic(path: &Path, body: &str) -> Result<()> {
    let wrap = |e: std::io::Error| ControlError::CachePersist(format!("{}: {e}", path.display()));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(wrap)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body).map_err(wrap)?;
    fs::rename(&tmp, path).map_err(wrap)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::descriptor::Role;
    use crate::binding::rules::default_rules;

    fn raw() -> Vec<RawParameter> {
        vec![
            RawParameter::new("mouth_open", 0.0, 0.0, 1.0),
            RawParameter::new("mouth_alt", 0.0, 0.0, 1.0),
            RawParameter::new("head_lr", 0.0, -30.0, 30.0),
        ]
    }

    #[test]
    fn hash_is_stable_and_sensitive() {
        let a = content_hash(&raw());
        assert_eq!(a, content_hash(&raw()));
        assert_eq!(a.len(), 64);
        let mut changed = raw();
        changed[2].max = 31.0;
        assert_ne!(a, content_hash(&changed));
    }

    #[test]
    fn edits_survive_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BindingCache::new(dir.path()).unwrap();
        let t = cache.load("m", &raw(), &default_rules()).unwrap();
        let edited = t.reassign_role(Role::MouthOpen, "mouth_alt").unwrap();
        cache.persist(&edited);
        cache.flush();
        assert!(cache.drain_outcomes().iter().all(|o| o.result.is_ok()));

        let again = cache.load("m", &raw(), &default_rules()).unwrap();
        assert_eq!(again.resolve_role(Role::MouthOpen), Some("mouth_alt"));
    }

    #[test]
    fn corrupt_record_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BindingCache::new(dir.path()).unwrap();
        let hash = content_hash(&raw());
        fs::write(cache.path_for(&hash), "{ not json").unwrap();
        let t = cache.load("m", &raw(), &default_rules()).unwrap();
        assert_eq!(t.resolve_role(Role::MouthOpen), Some("mouth_open"));
        cache.flush();
        assert!(cache.read_record(&hash).unwrap().is_some());
    }

    #[test]
    fn persist_failure_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        // A regular file where the cache directory should be.
        let cache = BindingCache::new(&blocker).unwrap();
        let t = cache.load("m", &raw(), &default_rules()).unwrap();
        cache.flush();
        let outcomes = cache.drain_outcomes();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(
            outcomes[0].result,
            Err(ControlError::CachePersist(_))
        ));
        assert_eq!(t.len(), 3);
    }
}
