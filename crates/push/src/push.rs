//! Single path and closure pushes.

use crate::api::{CacheApi, NarInfoStatus};
use crate::error::{PushError, PushResult};
use crate::executor::Concurrency;
use crate::pipeline::{NarPipeline, nar_pipeline};
use crate::retry::{RetryPolicy, RetryStatus, retry};
use crate::store::{NarDump, Store};
use crate::strategy::{PushOutcome, PushStrategy, StrategyFactory};
use ferry_core::config::PushCache;
use ferry_core::hash::NarHash;
use ferry_core::narinfo::{NarInfoCreate, NarInfoParts};
use ferry_core::store_path::{StorePath, StorePathHash};
use ferry_signer::NarInfoSigner;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything shared by the pushes of one session.
#[derive(Clone)]
pub struct PushContext {
    pub api: Arc<dyn CacheApi>,
    pub store: Arc<dyn Store>,
    pub cache: PushCache,
    pub retry: RetryPolicy,
    signer: Option<Arc<NarInfoSigner>>,
}

impl PushContext {
    /// Fails with `MissingCredential` on an empty token and `Signing` on an
    /// unparsable signing key.
    pub fn new(
        api: Arc<dyn CacheApi>,
        store: Arc<dyn Store>,
        cache: PushCache,
        retry: RetryPolicy,
    ) -> PushResult<Self> {
        if cache.secret.token().trim().is_empty() {
            return Err(PushError::MissingCredential(format!(
                "empty auth token for cache {}",
                cache.name
            )));
        }
        let signer = NarInfoSigner::from_push_secret(&cache.secret)?.map(Arc::new);
        Ok(Self {
            api,
            store,
            cache,
            retry,
            signer,
        })
    }

    pub fn signer(&self) -> Option<&NarInfoSigner> {
        self.signer.as_deref()
    }
}

/// Result of [`push_closure`].
#[derive(Debug)]
pub struct ClosurePushReport {
    /// Closure members the bulk probe reported as present.
    pub already_present: Vec<StorePath>,
    /// One entry per missing path, in missing-set order.
    pub results: Vec<(StorePath, PushResult<PushOutcome>)>,
}

impl ClosurePushReport {
    pub fn uploaded(&self) -> usize {
        self.results
            .iter()
            .filter(|(_, r)| matches!(r, Ok(PushOutcome::Uploaded)))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&StorePath, &PushError)> {
        self.results
            .iter()
            .filter_map(|(path, r)| r.as_ref().err().map(|e| (path, e)))
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(|(_, r)| r.is_ok())
    }
}

/// Push one store path unless the cache already has it.
///
/// Probe and upload run as one retried unit: a transient probe failure
/// restarts from the probe. The strategy's reaction decides the final result.
#[tracing::instrument(skip_all, fields(path = %path, cache = %ctx.cache.name))]
pub async fn push_single_store_path<S>(
    ctx: &PushContext,
    strategy: &S,
    path: &StorePath,
) -> PushResult<PushOutcome>
where
    S: PushStrategy + ?Sized,
{
    let result = retry(&ctx.retry, |status| async move {
        match ctx.api.narinfo_head(&ctx.cache, path.hash()).await? {
            NarInfoStatus::Found => Ok(PushOutcome::AlreadyPresent),
            NarInfoStatus::NotFound => upload_store_path(ctx, strategy, path, status).await,
        }
    })
    .await;

    if matches!(result, Ok(PushOutcome::AlreadyPresent)) {
        tracing::debug!("Already in cache");
        strategy.on_already_present();
    }
    settle(strategy, result)
}

/// Stream one store path to the cache and submit its narinfo.
///
/// One call is one attempt; nothing is reused from earlier attempts.
#[tracing::instrument(skip_all, fields(path = %path, attempt = status.attempt))]
pub async fn upload_store_path<S>(
    ctx: &PushContext,
    strategy: &S,
    path: &StorePath,
    status: RetryStatus,
) -> PushResult<PushOutcome>
where
    S: PushStrategy + ?Sized,
{
    let info = ctx.store.query_path_info(path).await?;
    strategy.on_attempt(status, info.nar_size);

    let compression = strategy.compression();
    let NarDump { reader, exit } = ctx.store.dump_nar(path).await?;
    let NarPipeline { body, nar, file } = nar_pipeline(reader, compression);

    ctx.api
        .upload_nar(&ctx.cache, path.hash(), info.nar_size, body)
        .await?;

    let (nar_digest, nar_size) = nar.finish()?;
    let (file_hash, file_size) = file.finish()?;
    exit.await.map_err(|source| PushError::SourceProcess {
        path: path.to_string(),
        source,
    })?;

    let nar_hash = NarHash::from_content_hash(nar_digest);
    if nar_hash != info.nar_hash {
        return Err(PushError::HashMismatch {
            path: path.to_string(),
            expected: info.nar_hash.to_string(),
            actual: nar_hash.to_string(),
        });
    }

    let deriver = if strategy.omit_deriver() {
        None
    } else {
        info.deriver.as_ref()
    };
    let mut narinfo = NarInfoCreate::new(NarInfoParts {
        store_path: path,
        nar_hash: &nar_hash,
        nar_size,
        file_hash: &file_hash,
        file_size,
        references: &info.references,
        deriver,
        compression: compression.method,
    });
    if let Some(signer) = ctx.signer() {
        let fp = narinfo
            .fingerprint(path.store_dir())
            .map_err(|source| PushError::InvalidMetadata {
                path: path.to_string(),
                source,
            })?;
        narinfo.sig = Some(signer.sign_fingerprint(&fp));
    }
    narinfo
        .validate()
        .map_err(|source| PushError::InvalidMetadata {
            path: path.to_string(),
            source,
        })?;

    ctx.api
        .create_narinfo(&ctx.cache, path.hash(), &narinfo)
        .await?;
    strategy.on_done();

    tracing::info!(
        nar_size,
        file_size,
        compression = %compression.method,
        signed = narinfo.sig.is_some(),
        "Pushed store path"
    );
    Ok(PushOutcome::Uploaded)
}

/// Push `inputs` and their whole closure.
///
/// One bulk probe decides what is missing; only those paths are uploaded,
/// each with its own strategy from `factory`, under `concurrency`. A failed
/// path never stops the others. Errors before dispatch (resolving inputs,
/// computing the closure, the bulk probe) fail the whole call.
#[tracing::instrument(skip_all, fields(cache = %ctx.cache.name, inputs = inputs.len()))]
pub async fn push_closure<F>(
    ctx: &PushContext,
    concurrency: Concurrency,
    factory: Arc<F>,
    inputs: &[PathBuf],
) -> PushResult<ClosurePushReport>
where
    F: StrategyFactory + 'static,
    F::Strategy: 'static,
{
    let mut roots = Vec::with_capacity(inputs.len());
    for input in inputs {
        roots.push(ctx.store.follow_links_to_store_path(input).await?);
    }
    let closure = ctx.store.compute_closure(&roots).await?;

    let missing: BTreeSet<String> = if closure.is_empty() {
        BTreeSet::new()
    } else {
        let hashes: Vec<StorePathHash> = closure.iter().map(|p| p.hash().clone()).collect();
        retry(&ctx.retry, |_| ctx.api.narinfo_bulk(&ctx.cache, &hashes))
            .await?
            .into_iter()
            .collect()
    };

    let (to_push, already_present): (Vec<_>, Vec<_>) = closure
        .into_iter()
        .partition(|p| missing.contains(p.hash().as_str()));
    tracing::debug!(
        missing = to_push.len(),
        present = already_present.len(),
        "Computed missing paths"
    );

    for path in &already_present {
        factory.for_path(path).on_already_present();
    }

    let task_ctx = Arc::new(ctx.clone());
    let results = concurrency
        .run_all(to_push, move |path| {
            let ctx = task_ctx.clone();
            let factory = factory.clone();
            async move {
                let strategy = factory.for_path(&path);
                let result = retry(&ctx.retry, |status| {
                    upload_store_path(&ctx, &strategy, &path, status)
                })
                .await;
                let result = settle(&strategy, result);
                (path, result)
            }
        })
        .await;

    Ok(ClosurePushReport {
        already_present,
        results,
    })
}

fn settle<S>(strategy: &S, result: PushResult<PushOutcome>) -> PushResult<PushOutcome>
where
    S: PushStrategy + ?Sized,
{
    match result {
        Ok(outcome) => Ok(outcome),
        Err(err) if err.is_unauthorized() => strategy.on_unauthorized(),
        Err(err) => {
            tracing::debug!(error = %err, "Push failed");
            strategy.on_error(err)
        }
    }
}
