//! Retry policy for control-plane requests.

use std::time::Duration;

use crate::error::PanelError;

/// Back-off between attempts. Transport errors and 5xx retry through this
/// table; 4xx never retries.
pub(crate) const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Execute `build` with retries. The returned response may still be a 4xx
/// (or a 304); the caller decides what those mean.
pub(crate) async fn send_with_retry<F>(
    delays: &[Duration],
    build: F,
) -> Result<reqwest::Response, PanelError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0;
    loop {
        let result = build().send().await;
        let retryable = match &result {
            Ok(resp) => resp.status().is_server_error(),
            Err(_) => true,
        };

        if !retryable {
            return Ok(result?);
        }
        if attempt >= delays.len() {
            return match result {
                Ok(resp) => Err(PanelError::Status(resp.status().as_u16())),
                Err(err) => Err(err.into()),
            };
        }
        tokio::time::sleep(delays[attempt]).await;
        attempt += 1;
    }
}

/// Map any non-2xx status to an error. 304 must be handled before calling.
pub(crate) fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, PanelError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(PanelError::Status(resp.status().as_u16()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_table_is_one_two_four() {
        assert_eq!(
            RETRY_DELAYS,
            [
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }
}
