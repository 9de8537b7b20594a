pub mod dispatch;
pub mod fetch;
pub mod pkg_version;

pub use dispatch::{pin_revision_url, CategoryInfo, FileInfoKind, GatewayInfo};
pub use fetch::{fetch_with, Fetcher, HttpFetcher, RetryWrapper, SingleAttempt};

use crate::control::CancelToken;
use crate::error::Error;
use crate::model::AssetDescriptor;

/// Fetch a package-version manifest and decode whichever shape it is in.
pub fn load_pkg_version(
    wrapper: &dyn RetryWrapper,
    fetcher: &dyn Fetcher,
    url: &str,
    cancel: &CancelToken,
) -> Result<Vec<AssetDescriptor>, Error> {
    let data = fetch_with(wrapper, fetcher, url, cancel)?;
    pkg_version::decode(url, &data)
}
