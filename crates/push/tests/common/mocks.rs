use async_trait::async_trait;
use ferry_core::config::{CompressionConfig, PushCache};
use ferry_core::hash::{ContentHash, NarHash};
use ferry_core::narinfo::NarInfoCreate;
use ferry_core::store_path::{StorePath, StorePathHash};
use ferry_push::{
    ApiError, CacheApi, NarBody, NarDump, NarInfoStatus, PathInfo, PushError, PushOutcome,
    PushStrategy, RetryStatus, Store, StoreError,
};
use futures::TryStreamExt;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct MockEntry {
    content: Vec<u8>,
    info: PathInfo,
}

/// In-memory store. NAR content is arbitrary bytes; the recorded hash is
/// computed from them unless overridden.
#[allow(dead_code)]
#[derive(Default)]
pub struct MockStore {
    entries: Mutex<BTreeMap<StorePath, MockEntry>>,
    dump_failures: AtomicUsize,
    pub dumps: AtomicUsize,
}

#[allow(dead_code)]
impl MockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(
        &self,
        path: &StorePath,
        content: &[u8],
        references: &[StorePath],
        deriver: Option<&StorePath>,
    ) {
        let info = PathInfo {
            nar_hash: NarHash::from_content_hash(ContentHash::compute(content)),
            nar_size: content.len() as u64,
            deriver: deriver.cloned(),
            references: references.to_vec(),
        };
        self.entries.lock().unwrap().insert(
            path.clone(),
            MockEntry {
                content: content.to_vec(),
                info,
            },
        );
    }

    /// Make the store claim a different NAR hash than its content produces.
    pub fn corrupt_recorded_hash(&self, path: &StorePath) {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get_mut(path).unwrap();
        entry.info.nar_hash = NarHash::from_content_hash(ContentHash::compute(b"something else"));
    }

    /// The next `n` dumps stream their content but exit non-zero.
    pub fn fail_dumps(&self, n: usize) {
        self.dump_failures.store(n, Ordering::SeqCst);
    }

    fn entry<T>(
        &self,
        path: &StorePath,
        f: impl FnOnce(&MockEntry) -> T,
    ) -> Result<T, StoreError> {
        self.entries
            .lock()
            .unwrap()
            .get(path)
            .map(f)
            .ok_or_else(|| StoreError::NotInStore(path.to_string()))
    }
}

#[async_trait]
impl Store for MockStore {
    async fn follow_links_to_store_path(&self, path: &Path) -> Result<StorePath, StoreError> {
        let path = path.to_str().unwrap();
        Ok(super::store_dir().parse_path(path)?)
    }

    async fn query_path_info(&self, path: &StorePath) -> Result<PathInfo, StoreError> {
        self.entry(path, |e| e.info.clone())
    }

    async fn compute_closure(&self, paths: &[StorePath]) -> Result<BTreeSet<StorePath>, StoreError> {
        let mut closure = BTreeSet::new();
        let mut queue: VecDeque<StorePath> = paths.iter().cloned().collect();
        while let Some(path) = queue.pop_front() {
            if !closure.insert(path.clone()) {
                continue;
            }
            let references = self.entry(&path, |e| e.info.references.clone())?;
            queue.extend(references);
        }
        Ok(closure)
    }

    async fn dump_nar(&self, path: &StorePath) -> Result<NarDump, StoreError> {
        self.dumps.fetch_add(1, Ordering::SeqCst);
        let content = self.entry(path, |e| e.content.clone())?;
        let fail = self
            .dump_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let exit = Box::pin(async move {
            if fail {
                Err(StoreError::CommandFailed {
                    command: "mock --dump".to_string(),
                    status: "exit status: 1".to_string(),
                    stderr: "simulated dump failure".to_string(),
                })
            } else {
                Ok(())
            }
        });
        Ok(NarDump {
            reader: Box::new(std::io::Cursor::new(content)),
            exit,
        })
    }
}

/// A NAR received by [`MockCacheApi`].
#[allow(dead_code)]
#[derive(Clone, Debug)]
pub struct Upload {
    pub hash: String,
    pub nar_size: u64,
    pub body: Vec<u8>,
}

/// In-memory cache that records every call.
#[allow(dead_code)]
#[derive(Default)]
pub struct MockCacheApi {
    present: Mutex<BTreeSet<String>>,
    head_script: Mutex<VecDeque<Result<NarInfoStatus, ApiError>>>,
    upload_failures: AtomicUsize,
    always_fail_uploads: Mutex<bool>,
    pub head_calls: AtomicUsize,
    pub bulk_calls: AtomicUsize,
    pub uploads: Mutex<Vec<Upload>>,
    pub narinfos: Mutex<Vec<NarInfoCreate>>,
}

#[allow(dead_code)]
impl MockCacheApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mark_present(&self, path: &StorePath) {
        self.present
            .lock()
            .unwrap()
            .insert(path.hash().to_string());
    }

    /// Queue responses returned by the next HEAD probes before falling back
    /// to the present set.
    pub fn script_head(&self, responses: Vec<Result<NarInfoStatus, ApiError>>) {
        self.head_script.lock().unwrap().extend(responses);
    }

    /// The next `n` uploads fail with 503.
    pub fn fail_uploads(&self, n: usize) {
        self.upload_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_all_uploads(&self) {
        *self.always_fail_uploads.lock().unwrap() = true;
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub fn uploaded_hashes(&self) -> BTreeSet<String> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.hash.clone())
            .collect()
    }

    pub fn narinfo_for(&self, path: &StorePath) -> Option<NarInfoCreate> {
        self.narinfos
            .lock()
            .unwrap()
            .iter()
            .find(|n| n.store_hash == path.hash().as_str())
            .cloned()
    }
}

fn unavailable() -> ApiError {
    ApiError::Status {
        status: 503,
        body: "unavailable".to_string(),
    }
}

#[async_trait]
impl CacheApi for MockCacheApi {
    async fn narinfo_head(
        &self,
        _cache: &PushCache,
        hash: &StorePathHash,
    ) -> Result<NarInfoStatus, ApiError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(response) = self.head_script.lock().unwrap().pop_front() {
            return response;
        }
        if self.present.lock().unwrap().contains(hash.as_str()) {
            Ok(NarInfoStatus::Found)
        } else {
            Ok(NarInfoStatus::NotFound)
        }
    }

    async fn narinfo_bulk(
        &self,
        _cache: &PushCache,
        hashes: &[StorePathHash],
    ) -> Result<Vec<String>, ApiError> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        let present = self.present.lock().unwrap();
        Ok(hashes
            .iter()
            .filter(|h| !present.contains(h.as_str()))
            .map(|h| h.to_string())
            .collect())
    }

    async fn upload_nar(
        &self,
        _cache: &PushCache,
        hash: &StorePathHash,
        nar_size: u64,
        body: NarBody,
    ) -> Result<(), ApiError> {
        if *self.always_fail_uploads.lock().unwrap() {
            return Err(unavailable());
        }
        let failed = self
            .upload_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(unavailable());
        }

        let chunks: Vec<_> = body.try_collect().await.map_err(|e| ApiError::Status {
            status: 400,
            body: e.to_string(),
        })?;
        self.uploads.lock().unwrap().push(Upload {
            hash: hash.to_string(),
            nar_size,
            body: chunks.concat(),
        });
        Ok(())
    }

    async fn create_narinfo(
        &self,
        _cache: &PushCache,
        hash: &StorePathHash,
        narinfo: &NarInfoCreate,
    ) -> Result<(), ApiError> {
        self.narinfos.lock().unwrap().push(narinfo.clone());
        self.present.lock().unwrap().insert(hash.to_string());
        Ok(())
    }
}

/// Strategy callback observed by [`RecordingStrategy`].
#[allow(dead_code)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    AlreadyPresent,
    Attempt { attempt: u32, nar_size: u64 },
    Unauthorized,
    Error(String),
    Done,
}

/// Shared, labelled log of strategy callbacks.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<(String, Event)>>>);

#[allow(dead_code)]
impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events_for(&self, label: &str) -> Vec<Event> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| l == label)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.0.lock().unwrap().iter().filter(|(_, e)| pred(e)).count()
    }

    fn push(&self, label: &str, event: Event) {
        self.0.lock().unwrap().push((label.to_string(), event));
    }
}

#[allow(dead_code)]
#[derive(Clone)]
pub struct RecordingStrategy {
    pub label: String,
    pub log: EventLog,
    pub omit_deriver: bool,
    pub compression: CompressionConfig,
}

#[allow(dead_code)]
impl RecordingStrategy {
    pub fn new(label: impl Into<String>, log: &EventLog) -> Self {
        Self {
            label: label.into(),
            log: log.clone(),
            omit_deriver: false,
            compression: CompressionConfig::default(),
        }
    }

    pub fn for_path(path: &StorePath, log: &EventLog) -> Self {
        Self::new(path.basename(), log)
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.events_for(&self.label)
    }
}

impl PushStrategy for RecordingStrategy {
    fn on_already_present(&self) {
        self.log.push(&self.label, Event::AlreadyPresent);
    }

    fn on_attempt(&self, status: RetryStatus, nar_size: u64) {
        self.log.push(
            &self.label,
            Event::Attempt {
                attempt: status.attempt,
                nar_size,
            },
        );
    }

    fn on_unauthorized(&self) -> Result<PushOutcome, PushError> {
        self.log.push(&self.label, Event::Unauthorized);
        Err(PushError::Api(ApiError::Unauthorized))
    }

    fn on_error(&self, err: PushError) -> Result<PushOutcome, PushError> {
        self.log.push(&self.label, Event::Error(err.to_string()));
        Err(err)
    }

    fn on_done(&self) {
        self.log.push(&self.label, Event::Done);
    }

    fn compression(&self) -> CompressionConfig {
        self.compression
    }

    fn omit_deriver(&self) -> bool {
        self.omit_deriver
    }
}
