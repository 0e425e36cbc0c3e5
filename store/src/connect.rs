//! Connection establishment with startup backoff.

use crate::error::Error;
use redis::aio::ConnectionManager;
use std::time::Duration;

/// Linear backoff step between connection attempts.
const BACKOFF_STEP: Duration = Duration::from_millis(200);

/// Ceiling on the backoff delay.
const BACKOFF_CAP: Duration = Duration::from_millis(5000);

/// Attempts before giving up on the key-value service entirely.
const MAX_ATTEMPTS: u64 = 25;

/// Delay to wait after the given number of failed attempts.
pub(crate) fn backoff_delay(attempts: u64) -> Duration {
    (BACKOFF_STEP * u32::try_from(attempts).unwrap_or(u32::MAX)).min(BACKOFF_CAP)
}

/// Connect to the key-value service, retrying with bounded backoff so a
/// service that is still starting up does not fail the whole process.
///
/// The returned manager recovers its underlying connection on its own; this
/// backoff only covers initial establishment.
///
/// # Errors
///
/// Returns an [`ErrorType::Connecting`] error type if the URL is invalid or
/// the service stays unreachable for every attempt.
///
/// [`ErrorType::Connecting`]: crate::error::ErrorType::Connecting
pub async fn connect(url: &str) -> Result<ConnectionManager, Error> {
    let client = redis::Client::open(url).map_err(Error::connecting)?;

    let mut attempts = 0;

    loop {
        match ConnectionManager::new(client.clone()).await {
            Ok(conn) => return Ok(conn),
            Err(source) => {
                attempts += 1;

                if attempts >= MAX_ATTEMPTS {
                    return Err(Error::connecting(source));
                }

                let delay = backoff_delay(attempts);

                tracing::warn!(
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    "key-value service unreachable, retrying: {source}",
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::backoff_delay;
    use std::time::Duration;

    #[test]
    fn backoff_grows_linearly_then_caps() {
        assert_eq!(Duration::from_millis(200), backoff_delay(1));
        assert_eq!(Duration::from_millis(400), backoff_delay(2));
        assert_eq!(Duration::from_millis(2000), backoff_delay(10));
        assert_eq!(Duration::from_millis(5000), backoff_delay(25));
        assert_eq!(Duration::from_millis(5000), backoff_delay(1000));
    }
}
