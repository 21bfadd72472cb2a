//! Instance labels that mark pool membership.

use fleet_core::maps::merge_maps;
use fleet_core::{Error, Result};
use std::collections::BTreeMap;

/// Prefix reserved for labels the autoscaler sets itself.
pub const LABEL_PREFIX: &str = "fleet.autoscaler/";
pub const LABEL_POOL: &str = "fleet.autoscaler/pool";
pub const LABEL_IMAGE: &str = "fleet.autoscaler/image";

/// User labels merged with the pool and image labels. User labels may not
/// use the reserved prefix.
pub fn instance_labels(
    provider: &str,
    pool_id: &str,
    image: &str,
    user_labels: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    if let Some(key) = user_labels.keys().find(|k| k.starts_with(LABEL_PREFIX)) {
        return Err(Error::provider(
            provider,
            format!("label {:?} uses the reserved prefix {}", key, LABEL_PREFIX),
        ));
    }

    let defaults = BTreeMap::from([
        (LABEL_POOL.to_string(), pool_id.to_string()),
        (LABEL_IMAGE.to_string(), image.to_string()),
    ]);
    Ok(merge_maps(user_labels, &defaults))
}
