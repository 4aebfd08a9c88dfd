//! Layered catalogue merge.

use super::{ModuleDefinition, RepositoryModel};
use crate::error::{FlowError, Result};

/// Merge pre catalogues, the local catalogue and post catalogues into one.
///
/// Module order is pre (in order), then local, then post (in order). A module
/// contributed by more than one source is rejected; the error names the module
/// and the modules accumulated so far.
pub fn merge(
    pre: &[RepositoryModel],
    local: &RepositoryModel,
    post: &[RepositoryModel],
) -> Result<RepositoryModel> {
    let mut accumulated: Vec<ModuleDefinition> = Vec::new();

    for source in pre.iter().chain(std::iter::once(local)).chain(post.iter()) {
        for definition in source.definitions() {
            if accumulated.iter().any(|d| d.name == definition.name) {
                let existing: Vec<&str> = accumulated.iter().map(|d| d.name.as_str()).collect();
                return Err(FlowError::config(format!(
                    "Attempting to merge repository with duplicate module definition '{}'. Existing modules: {:?}",
                    definition.name, existing
                )));
            }
            accumulated.push(definition);
        }
    }

    RepositoryModel::from_modules(accumulated)
}
