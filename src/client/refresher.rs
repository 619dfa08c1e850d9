use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::interceptor::AuthInterceptor;
use crate::{Error, Result};

/// Wait before retrying a failed login.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Anything that can exchange stored credentials for a fresh access token.
#[tonic::async_trait]
pub trait TokenSource: Send + Sync + 'static {
    /// Performs one login and returns the new token.
    async fn login(&self) -> Result<String>;
}

/// Background task keeping an [`AuthInterceptor`]'s token fresh.
///
/// Dropping the handle leaves the task running; call
/// [`shutdown`](Self::shutdown) to stop it.
pub struct TokenRefresher {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl TokenRefresher {
    /// Logs in once, stores the token, then refreshes it every
    /// `refresh_period` until shut down.
    ///
    /// # Errors
    /// Returns the initial login failure, or [`Error::InvalidArgument`] for a
    /// zero `refresh_period`. No task is started in either case.
    pub async fn start<S: TokenSource>(
        source: S,
        interceptor: AuthInterceptor,
        refresh_period: Duration,
    ) -> Result<Self> {
        if refresh_period.is_zero() {
            return Err(Error::InvalidArgument(
                "refresh period must be positive".to_string(),
            ));
        }

        let token = source.login().await?;
        interceptor.set_token(token);
        info!(?refresh_period, "initial login succeeded");

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(refresh_loop(
            source,
            interceptor,
            refresh_period,
            cancel.clone(),
        ));

        Ok(Self { cancel, handle })
    }

    /// Stops the refresh task and waits for it to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("token refresher ended abnormally: {e}");
        }
    }
}

async fn refresh_loop<S: TokenSource>(
    source: S,
    interceptor: AuthInterceptor,
    refresh_period: Duration,
    cancel: CancellationToken,
) {
    let mut wait = refresh_period;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("token refresher stopped");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        match source.login().await {
            Ok(token) => {
                interceptor.set_token(token);
                wait = refresh_period;
                debug!("token refreshed");
            }
            Err(e) => {
                warn!("cannot refresh token: {e}");
                wait = RETRY_DELAY;
            }
        }
    }
}
