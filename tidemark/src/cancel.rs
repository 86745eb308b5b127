use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::errors::MigrationError;

/// Race `future` against `token`.
///
/// Resolves to [`MigrationError::Cancelled`] as soon as the token fires; the
/// in-flight call is dropped and may or may not have reached the backend.
pub async fn cancellable<F, T, E>(token: &CancellationToken, future: F) -> Result<T, MigrationError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<MigrationError>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(MigrationError::Cancelled),
        result = future => result.map_err(Into::into),
    }
}

/// Fail fast when the token already fired.
pub fn checkpoint(token: &CancellationToken) -> Result<(), MigrationError> {
    if token.is_cancelled() {
        Err(MigrationError::Cancelled)
    } else {
        Ok(())
    }
}
