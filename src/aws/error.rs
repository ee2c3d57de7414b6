//! Mapping of SDK failures onto [`ProviderError`].

use aws_sdk_ec2::error::ProvideErrorMetadata;

use crate::client::ProviderError;

/// Flattens any SDK error into the structured form the core matches on.
///
/// The failure code survives the mapping so `is_unauthorized` and
/// `is_not_found` keep working against real provider responses.
pub(crate) fn provider_error<E>(err: E) -> ProviderError
where
    E: ProvideErrorMetadata + std::fmt::Display,
{
    let code = err.code().map(str::to_owned);
    let message = err
        .message()
        .map(str::to_owned)
        .unwrap_or_else(|| err.to_string());
    ProviderError { code, message }
}
