//! Cancellation and deadline carried by every call.
//!
//! A [`Context`] pairs a `CancellationToken` with an optional deadline.
//! Every suspension point in the crate (HTTP send, body read, poll sleep)
//! runs under [`Context::run`], which resolves to `KscError::Cancelled` as
//! soon as the token fires or the deadline passes, dropping the in-flight
//! future so no further bytes are read.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{KscError, Result};

/// Cancellation token plus optional deadline for one logical operation.
///
/// Cloning shares the token, so cancelling any clone cancels them all.
/// Use [`Context::child`] for a scope that can be cancelled on its own
/// while still following its parent.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A fresh context with no deadline.
    pub fn new() -> Self {
        Context::default()
    }

    /// Wraps an existing token, e.g. one owned by a server shutdown path.
    pub fn from_token(token: CancellationToken) -> Self {
        Context {
            token,
            deadline: None,
        }
    }

    /// Bounds the context by `timeout` from now. An earlier deadline wins.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Bounds the context by an absolute deadline. An earlier deadline wins.
    #[must_use]
    pub fn with_deadline(mut self, at: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(at),
            None => at,
        });
        self
    }

    /// A context cancelled with this one, but which can also be cancelled
    /// independently.
    pub fn child(&self) -> Self {
        Context {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once the token fired or the deadline passed.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|at| Instant::now() >= at)
    }

    /// Runs `fut` until it completes or the context is cancelled.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.run_scoped(None, None, fut).await
    }

    /// Sleeps for `duration`, waking early with `Cancelled`.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }

    /// Like [`Context::run`], additionally racing an ambient token (the
    /// session's) and seeding a deadline when this context carries none.
    pub(crate) async fn run_scoped<T, F>(
        &self,
        ambient: Option<&CancellationToken>,
        fallback_timeout: Option<Duration>,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let deadline = self
            .deadline
            .or_else(|| fallback_timeout.map(|t| Instant::now() + t));
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(KscError::Cancelled),
            _ = cancelled_opt(ambient) => Err(KscError::Cancelled),
            _ = sleep_until_opt(deadline) => Err(KscError::Cancelled),
            out = fut => out,
        }
    }

    /// A context unrelated to any caller token, used for cleanup RPCs
    /// (iterator release, async cancel) that must run after the caller's
    /// own context already fired.
    pub(crate) fn detached(timeout: Duration) -> Self {
        Context::new().with_timeout(timeout)
    }
}

async fn cancelled_opt(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_returns_inner_result() {
        let ctx = Context::new();
        let out = ctx.run(async { Ok(7) }).await.unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn pre_cancelled_context_never_polls_future() {
        let ctx = Context::new();
        ctx.cancel();
        let polled = std::sync::atomic::AtomicBool::new(false);
        let out = ctx
            .run(async {
                polled.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(out, Err(KscError::Cancelled)));
        assert!(!polled.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_sleep() {
        let ctx = Context::new().with_timeout(Duration::from_millis(100));
        let out = ctx.sleep(Duration::from_secs(60)).await;
        assert!(matches!(out, Err(KscError::Cancelled)));
        assert!(ctx.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_timeout_applies_only_without_deadline() {
        let ctx = Context::new();
        let out = ctx
            .run_scoped(None, Some(Duration::from_millis(10)), async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await;
        assert!(matches!(out, Err(KscError::Cancelled)));

        let ctx = Context::new().with_timeout(Duration::from_secs(5));
        let out = ctx
            .run_scoped(None, Some(Duration::from_millis(10)), async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await;
        assert!(out.is_ok(), "caller deadline should override the fallback");
    }

    #[tokio::test]
    async fn ambient_token_cancels() {
        let ambient = CancellationToken::new();
        ambient.cancel();
        let out = Context::new()
            .run_scoped(Some(&ambient), None, async { Ok(()) })
            .await;
        assert!(matches!(out, Err(KscError::Cancelled)));
    }

    #[test]
    fn earlier_deadline_wins() {
        let ctx = Context::new()
            .with_timeout(Duration::from_secs(10))
            .with_timeout(Duration::from_secs(60));
        let remaining = ctx.deadline().unwrap() - Instant::now();
        assert!(remaining <= Duration::from_secs(10));
    }

    #[test]
    fn child_follows_parent_but_not_vice_versa() {
        let parent = Context::new();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());

        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
