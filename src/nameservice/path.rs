//! Path navigation
//!
//! Paths are absolute, `/`-separated, with no `.`/`..` segments. Walking
//! a path always starts at the root directory (id `"0"`).

use crate::error::{Error, Result};
use crate::model::{Directory, FsNode};
use crate::store::DocumentStore;

/// A path resolved down to its parent directory and final segment name.
/// `ancestors` holds every directory strictly above `parent` (root
/// included), used for the ancestor-execute permission check; `parent`
/// is checked separately against its own required bits.
pub struct Resolved {
    pub ancestors: Vec<Directory>,
    pub parent: Directory,
    pub name: String,
    pub existing: Option<FsNode>,
}

/// Split `/a/b/c` into `["a", "b", "c"]`; `/` splits to an empty list.
/// Rejects relative paths and `.`/`..` segments.
pub fn split_path(path: &str) -> Result<Vec<String>> {
    if !path.starts_with('/') {
        return Err(Error::InvalidSyntax(format!("path must be absolute: {path}")));
    }
    let segments: Vec<String> = path.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect();
    for s in &segments {
        if s == "." || s == ".." {
            return Err(Error::InvalidSyntax(format!("path must not contain . or ..: {path}")));
        }
    }
    Ok(segments)
}

/// Walk from root through every directory segment in `segments`,
/// returning the full chain root..=last (inclusive). Every segment must
/// name an existing directory.
pub async fn walk_dirs(store: &DocumentStore, segments: &[String]) -> Result<Vec<Directory>> {
    let root = store
        .get_directory("0")
        .await?
        .ok_or_else(|| Error::Internal("root directory missing from store".into()))?;
    let mut chain = vec![root];
    for seg in segments {
        let current = chain.last().unwrap();
        match current.child_dirs.get(seg) {
            Some(id) => {
                let id = id.clone();
                let dir = store
                    .get_directory(&id)
                    .await?
                    .ok_or_else(|| Error::NotFound(seg.clone()))?;
                chain.push(dir);
            }
            None => {
                if current.child_files.contains_key(seg) {
                    return Err(Error::NotDirectory(seg.clone()));
                }
                return Err(Error::NotFound(seg.clone()));
            }
        }
    }
    Ok(chain)
}

/// Resolve `path` down to its parent directory and final segment,
/// reporting whether a child by that name already exists (and if so,
/// as which kind of node).
pub async fn resolve(store: &DocumentStore, path: &str) -> Result<Resolved> {
    let mut segments = split_path(path)?;
    let name = segments.pop().ok_or(Error::RootDirectory)?;
    let mut chain = walk_dirs(store, &segments).await?;
    let parent = chain.pop().unwrap();
    let existing = match parent.child_dirs.get(&name) {
        Some(id) => Some(FsNode::Dir(
            store.get_directory(id).await?.ok_or_else(|| Error::NotFound(name.clone()))?,
        )),
        None => match parent.child_files.get(&name) {
            Some(id) => Some(FsNode::File(
                store.get_file(id).await?.ok_or_else(|| Error::NotFound(name.clone()))?,
            )),
            None => None,
        },
    };
    Ok(Resolved { ancestors: chain, parent, name, existing })
}

/// Resolve `path` and require that it names an existing node, returning
/// the node alongside the same ancestor/parent context as [`resolve`].
pub async fn resolve_existing(store: &DocumentStore, path: &str) -> Result<(Resolved, FsNode)> {
    let resolved = resolve(store, path).await?;
    match resolved.existing.clone() {
        Some(node) => Ok((resolved, node)),
        None => Err(Error::NotFound(path.to_string())),
    }
}

/// True if `maybe_ancestor_id` is `descendant_id` or one of its ancestors,
/// walking parent links up to root. Used to reject `mv` into a subdirectory
/// of the thing being moved.
pub async fn is_ancestor_of(store: &DocumentStore, maybe_ancestor_id: &str, descendant_id: &str) -> Result<bool> {
    if maybe_ancestor_id == descendant_id {
        return Ok(true);
    }
    let mut current = store.get_directory(descendant_id).await?;
    while let Some(dir) = current {
        match dir.parent {
            Some(parent_id) => {
                if parent_id == maybe_ancestor_id {
                    return Ok(true);
                }
                current = store.get_directory(&parent_id).await?;
            }
            None => return Ok(false),
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Directory;

    async fn store_with_tree() -> DocumentStore {
        let store = DocumentStore::open_in_memory().unwrap();
        store.bootstrap().await.unwrap();
        let mut root = store.get_directory("0").await.unwrap().unwrap();
        let a = Directory::new("1", "a", "0", "root", "root");
        root.add_dir("a", "1");
        store.put_directory(&root).await.unwrap();
        store.put_directory(&a).await.unwrap();
        store
    }

    #[tokio::test]
    async fn resolves_existing_directory() {
        let store = store_with_tree().await;
        let resolved = resolve(&store, "/a").await.unwrap();
        assert_eq!(resolved.name, "a");
        assert!(resolved.existing.is_some());
    }

    #[tokio::test]
    async fn missing_segment_is_not_found() {
        let store = store_with_tree().await;
        assert!(matches!(resolve(&store, "/missing/x").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn root_path_has_no_parent_to_resolve() {
        let store = store_with_tree().await;
        assert!(matches!(resolve(&store, "/").await, Err(Error::RootDirectory)));
    }

    #[tokio::test]
    async fn detects_self_and_descendant_as_ancestor() {
        let store = store_with_tree().await;
        assert!(is_ancestor_of(&store, "0", "1").await.unwrap());
        assert!(!is_ancestor_of(&store, "1", "0").await.unwrap());
    }
}
