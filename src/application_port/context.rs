use super::AuthError;
use crate::domain_model::ClientContext;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-request scope passed through every `AuthService` call.
///
/// Cancelling the token, or reaching the deadline, drops whatever storage or
/// key-set future is pending and the call returns `AuthError::Cancelled`.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    pub client: ClientContext,
}

impl RequestContext {
    pub fn new(cancel: CancellationToken) -> Self {
        RequestContext {
            cancel,
            deadline: None,
            client: ClientContext::default(),
        }
    }

    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_client(mut self, client: ClientContext) -> Self {
        self.client = client;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Runs `fut` unless the context is cancelled or times out first, and
    /// folds its error into `AuthError`.
    pub async fn run<T, E, F>(&self, fut: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, E>>,
        AuthError: From<E>,
    {
        self.guard(fut).await?.map_err(AuthError::from)
    }

    /// Like `run`, but hands the future's output back untouched so the caller
    /// can match on fine-grained errors.
    pub async fn guard<T, F>(&self, fut: F) -> Result<T, AuthError>
    where
        F: Future<Output = T>,
    {
        if self.is_cancelled() {
            return Err(AuthError::Cancelled);
        }
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(AuthError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => Err(AuthError::Cancelled),
                out = fut => Ok(out),
            },
            None => tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(AuthError::Cancelled),
                out = fut => Ok(out),
            },
        }
    }
}
