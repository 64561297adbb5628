//! Retry helpers for provider calls.
//!
//! Provides the constant-delay backoff used per question during generation,
//! for use with `backon::Retryable`.

use std::time::Duration;

use backon::ConstantBuilder;

use crate::errors::ProviderError;

/// Constant backoff for one question: `attempts` total tries, `delay` apart.
///
/// `attempts` counts the first try, so `attempts <= 1` means no retry.
pub fn question_backoff(attempts: usize, delay: Duration) -> ConstantBuilder {
    ConstantBuilder::default()
        .with_delay(delay)
        .with_max_times(attempts.saturating_sub(1))
}

/// Whether an error from a provider call is worth another attempt.
///
/// Authentication failures will not fix themselves; everything else
/// (connection resets, timeouts, 5xx while a model loads) might.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    !matches!(
        err.downcast_ref::<ProviderError>(),
        Some(ProviderError::AuthError { .. })
    )
}
