//! Fixed-size decode pools.
//!
//! Two independent pools run decode jobs: one for full previews near the
//! current item and one for filmstrip thumbnails. Because they never share
//! threads, a long thumbnail backlog cannot delay the preview the user is
//! waiting for.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::PoolError;

/// Which pool a job belongs to. Each pool has its own in-flight set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PoolKind {
    Preview,
    Thumbnail,
}

impl PoolKind {
    pub fn name(&self) -> &'static str {
        match self {
            PoolKind::Preview => "preview",
            PoolKind::Thumbnail => "thumbnail",
        }
    }
}

/// Bounded-concurrency executor backed by a dedicated rayon pool.
pub struct WorkerPool {
    kind: PoolKind,
    pool: rayon::ThreadPool,
    /// Jobs submitted and not yet finished (queued or running).
    pending: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(kind: PoolKind, threads: usize) -> Result<Self, PoolError> {
        let name = kind.name();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(move |i| format!("{name}-worker-{i}"))
            // A panicking job must not take the process down; the job's own
            // guards have already cleaned up its bookkeeping by the time this runs.
            .panic_handler(move |payload| {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                tracing::error!(pool = name, %message, "decode job panicked");
            })
            .build()
            .map_err(|source| PoolError::Build { name, source })?;

        tracing::debug!(pool = name, threads = pool.current_num_threads(), "worker pool started");

        Ok(Self {
            kind,
            pool,
            pending: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Number of submitted jobs that have not finished yet.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Run `job` on one of the pool's workers. Never blocks the caller.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::AcqRel);
        let pending = Arc::clone(&self.pending);
        self.pool.spawn(move || {
            let _done = PendingGuard(pending);
            job();
        });
    }
}

/// Decrements the pending counter even when the job unwinds.
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
