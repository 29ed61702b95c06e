//! Per-walk context shared by all walkers
//!
//! Carries the scope the walk reads and writes mappings in, the cancellation
//! token checked before every filesystem or remote call, the recursion limit
//! and the retry policy for idempotent remote calls.

use std::future::Future;
use std::path::Path;

use tokio_util::sync::CancellationToken;

use cloudmirror_core::domain::record::Scope;
use cloudmirror_core::ports::RemoteError;

use crate::retry::{with_retry, RetryPolicy};
use crate::SyncError;

/// Default maximum directory depth
pub const DEFAULT_MAX_DEPTH: usize = 256;

#[derive(Debug, Clone)]
pub struct WalkContext {
    pub scope: Scope,
    pub cancel: CancellationToken,
    pub max_depth: usize,
    pub retry: RetryPolicy,
}

impl WalkContext {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            cancel: CancellationToken::new(),
            max_depth: DEFAULT_MAX_DEPTH,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fails with [`SyncError::Cancelled`] once cancellation was requested
    pub fn checkpoint(&self) -> Result<(), SyncError> {
        if self.cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Fails with [`SyncError::DepthExceeded`] past the recursion limit
    pub fn check_depth(&self, depth: usize, path: &Path) -> Result<(), SyncError> {
        if depth > self.max_depth {
            Err(SyncError::DepthExceeded {
                path: path.to_path_buf(),
                max_depth: self.max_depth,
            })
        } else {
            Ok(())
        }
    }

    /// Runs an idempotent remote call under the retry policy
    pub async fn retry<F, Fut, T>(&self, operation_name: &str, f: F) -> Result<T, SyncError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        self.checkpoint()?;
        Ok(with_retry(&self.retry, operation_name, f).await?)
    }

    /// Runs a non-idempotent remote call exactly once
    pub async fn once<Fut, T>(&self, call: Fut) -> Result<T, SyncError>
    where
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        self.checkpoint()?;
        Ok(call.await?)
    }
}
