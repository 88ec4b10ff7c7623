//! Eager-load orchestrator.
//!
//! Splits dotted relation paths into a root -> nested-suffix tree, resolves
//! one relation instance per distinct root name from the first parent (all
//! parents of a query share the same relation definition), and delegates to
//! the relation's batched `match_eager` exactly once per root.

use crate::error::{Result, TrellisError};
use crate::model::DynRecord;

/// Resolves every requested path against the given parents.
///
/// Each root relation issues at most one additional query regardless of the
/// parent count; zero parents means zero queries. Root fetches run
/// sequentially, since a nested fetch depends on its parent fetch's result
/// set.
pub async fn load(records: &mut [DynRecord], paths: &[String]) -> Result<()> {
    if records.is_empty() || paths.is_empty() {
        return Ok(());
    }
    for (root, nested) in group_paths(paths) {
        let mut relation =
            records[0]
                .relation(&root)
                .ok_or_else(|| TrellisError::UnknownRelation {
                    name: root.clone(),
                })?;
        tracing::debug!(relation = %root, parents = records.len(), "trellis.eager");
        relation.match_eager(records, &root, &nested).await?;
    }
    Ok(())
}

/// Groups dotted paths by root segment, collecting the remaining suffixes
/// as nested requests. Order of first appearance is preserved.
fn group_paths(paths: &[String]) -> Vec<(String, Vec<String>)> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for path in paths {
        let (root, rest) = match path.split_once('.') {
            Some((root, rest)) => (root.to_string(), Some(rest.to_string())),
            None => (path.clone(), None),
        };
        match groups.iter_mut().find(|(name, _)| *name == root) {
            Some((_, nested)) => {
                if let Some(rest) = rest
                    && !nested.contains(&rest)
                {
                    nested.push(rest);
                }
            }
            None => groups.push((root, rest.into_iter().collect())),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_group_by_root_segment() {
        let paths = vec![
            "posts".to_string(),
            "posts.comments".to_string(),
            "posts.comments.author".to_string(),
            "profile".to_string(),
        ];
        let groups = group_paths(&paths);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "posts");
        assert_eq!(
            groups[0].1,
            vec!["comments".to_string(), "comments.author".to_string()]
        );
        assert_eq!(groups[1].0, "profile");
        assert!(groups[1].1.is_empty());
    }

    #[test]
    fn duplicate_suffixes_collapse() {
        let paths = vec!["posts.comments".to_string(), "posts.comments".to_string()];
        let groups = group_paths(&paths);
        assert_eq!(groups[0].1.len(), 1);
    }
}
