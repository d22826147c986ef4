//! Choosing the worker file a client should run.

use std::collections::BTreeMap;

use crate::config::DeliveryFile;

/// Pick the configured file for the best of the client's environments.
///
/// Among environments that have a file, the lowest configured priority wins;
/// equal priorities fall back to the order the client listed them in.
/// Returns the environment name and its file.
pub fn select<'a>(
    files: &'a BTreeMap<String, DeliveryFile>,
    environments: &[String],
) -> Option<(&'a str, &'a DeliveryFile)> {
    environments
        .iter()
        .enumerate()
        .filter_map(|(position, environment)| {
            files
                .get_key_value(environment.as_str())
                .map(|(name, file)| (position, name.as_str(), file))
        })
        .min_by_key(|(position, _, file)| (file.priority(), *position))
        .map(|(_, name, file)| (name, file))
}
