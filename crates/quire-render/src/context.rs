use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Per-call execution limits threaded from the caller down to the converter.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    cancellation: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fails when the call was cancelled or its deadline has passed.
    pub fn check(&self) -> anyhow::Result<()> {
        if self.is_cancelled() {
            anyhow::bail!("render cancelled");
        }
        if self.remaining().is_some_and(|left| left.is_zero()) {
            anyhow::bail!("render deadline exceeded");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_context_never_trips() {
        let ctx = RenderContext::new();
        assert!(ctx.check().is_ok());
        assert_eq!(ctx.remaining(), None);
    }

    #[test]
    fn cancelled_token_trips_check() {
        let token = CancellationToken::new();
        let ctx = RenderContext::new().with_cancellation(token.clone());
        assert!(ctx.check().is_ok());
        token.cancel();
        let err = ctx.check().unwrap_err();
        assert_eq!(err.to_string(), "render cancelled");
    }

    #[test]
    fn past_deadline_trips_check() {
        let ctx = RenderContext::new().with_deadline(Instant::now());
        let err = ctx.check().unwrap_err();
        assert_eq!(err.to_string(), "render deadline exceeded");
    }
}
