use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;

use crate::{Error, Result};

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// How far ahead of the caller's deadline a handler gives up.
///
/// The transport starts its own `grpc-timeout` timer before the handler runs
/// and answers `Cancelled` when it fires. Expiring first keeps the handler's
/// `DeadlineExceeded` the status the caller sees.
pub const DEADLINE_MARGIN: Duration = Duration::from_millis(20);

/// Cancellation and deadline state of one inbound call.
///
/// Streaming handlers check it before every receive and race each receive
/// against it, so a cancelled or timed-out call stops within one message.
#[derive(Clone, Debug)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// Creates a context cancelled through `cancel`, expiring at `deadline`.
    pub fn new(cancel: CancellationToken, deadline: Option<Instant>) -> Self {
        Self { cancel, deadline }
    }

    /// Creates a context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::new(CancellationToken::new(), None)
    }

    /// Creates a context for an inbound call.
    ///
    /// The cancellation token is a child of `shutdown`. The deadline comes
    /// from the caller's `grpc-timeout` header when present, moved
    /// [`DEADLINE_MARGIN`] earlier.
    pub fn from_metadata(metadata: &MetadataMap, shutdown: &CancellationToken) -> Self {
        let deadline = metadata
            .get(GRPC_TIMEOUT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_grpc_timeout)
            .map(|timeout| Instant::now() + timeout.saturating_sub(DEADLINE_MARGIN));

        Self::new(shutdown.child_token(), deadline)
    }

    /// Returns a copy of this context with `timeout` applied from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        self
    }

    /// Cancels the call.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Fails with [`Error::Canceled`] or [`Error::DeadlineExceeded`] if the
    /// call should stop.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Resolves once the call is cancelled or its deadline passes, with the
    /// matching error.
    pub async fn done(&self) -> Error {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.cancel.cancelled() => Error::Canceled,
                _ = tokio::time::sleep_until(deadline) => Error::DeadlineExceeded,
            },
            None => {
                self.cancel.cancelled().await;
                Error::Canceled
            }
        }
    }
}

/// Parses a `grpc-timeout` value such as `"250m"` or `"5S"`.
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (amount, unit) = value.split_at(value.len() - 1);
    let amount: u64 = amount.parse().ok()?;

    let timeout = match unit {
        "H" => Duration::from_secs(amount.checked_mul(3600)?),
        "M" => Duration::from_secs(amount.checked_mul(60)?),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(timeout)
}
