//! Client-level retry settings for the blob SDK
//!
//! `storageRetryOptions` counts total tries and bounds each one; the SDK
//! counts retries after the first try and bounds the whole operation.

use object_store::{BackoffConfig, ClientOptions, RetryConfig};
use std::time::Duration;

use crate::config::{RetryOptions, RetryPolicyType};

/// Retries after the first try, never negative
pub fn max_retries(options: &RetryOptions) -> usize {
    options.max_tries.max(1) as usize - 1
}

/// SDK retry configuration for `options`.
///
/// Exponential doubles the delay from `retryDelayInMs`; fixed waits
/// `retryDelayInMs` every time. Both are capped at `maxRetryDelayInMs`.
pub fn retry_config(options: &RetryOptions) -> RetryConfig {
    let max_backoff = Duration::from_millis(options.max_retry_delay_in_ms);
    let init_backoff = Duration::from_millis(options.retry_delay_in_ms).min(max_backoff);

    let mut backoff = BackoffConfig::default();
    backoff.init_backoff = init_backoff;
    backoff.max_backoff = max_backoff;
    backoff.base = match options.retry_policy_type {
        RetryPolicyType::Exponential => 2.0,
        RetryPolicyType::Fixed => 1.0,
    };

    let retries = max_retries(options);
    let mut config = RetryConfig::default();
    config.backoff = backoff;
    config.max_retries = retries;
    // Every try may run to its timeout, plus the wait before each retry
    config.retry_timeout = try_timeout(options) * options.max_tries.max(1)
        + max_backoff * retries as u32;
    config
}

/// Per-request timeout for a single try
pub fn try_timeout(options: &RetryOptions) -> Duration {
    Duration::from_millis(options.try_timeout_in_ms)
}

/// HTTP client options, allowing plain http only for an http endpoint
pub fn client_options(options: &RetryOptions, allow_http: bool) -> ClientOptions {
    ClientOptions::new()
        .with_timeout(try_timeout(options))
        .with_allow_http(allow_http)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_config() {
        let options = RetryOptions {
            max_tries: 4,
            try_timeout_in_ms: 30_000,
            retry_delay_in_ms: 2_000,
            max_retry_delay_in_ms: 30_000,
            retry_policy_type: RetryPolicyType::Exponential,
        };
        let config = retry_config(&options);

        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff.init_backoff, Duration::from_secs(2));
        assert_eq!(config.backoff.max_backoff, Duration::from_secs(30));
        assert_eq!(config.backoff.base, 2.0);
        assert_eq!(config.retry_timeout, Duration::from_secs(4 * 30 + 3 * 30));
    }

    #[test]
    fn test_fixed_config_is_capped() {
        let options = RetryOptions {
            retry_delay_in_ms: 500,
            max_retry_delay_in_ms: 300,
            retry_policy_type: RetryPolicyType::Fixed,
            ..RetryOptions::default()
        };
        let config = retry_config(&options);

        assert_eq!(config.backoff.init_backoff, Duration::from_millis(300));
        assert_eq!(config.backoff.base, 1.0);
    }

    #[test]
    fn test_single_try_means_no_retries() {
        for max_tries in [0, 1] {
            let options = RetryOptions {
                max_tries,
                ..RetryOptions::default()
            };
            assert_eq!(max_retries(&options), 0);
            assert_eq!(retry_config(&options).max_retries, 0);
        }
    }

    #[test]
    fn test_defaults() {
        let options = RetryOptions::default();
        assert_eq!(max_retries(&options), 3);
        assert_eq!(try_timeout(&options), Duration::from_secs(30));
    }
}
