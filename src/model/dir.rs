//! Directory node

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::Mode;

/// A directory node. The root directory has `parent = None` and
/// `name = "/"`; every other node's name is unique among its parent's
/// children (checked across both `child_files` and `child_dirs`, which
/// map a child's name to its stable identifier).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Directory {
    pub id: String,
    pub name: String,
    pub parent: Option<String>,
    pub child_files: HashMap<String, String>,
    pub child_dirs: HashMap<String, String>,
    pub created: chrono::DateTime<chrono::Utc>,
    pub owner_user: String,
    pub owner_group: String,
    pub mode: Mode,
}

impl Directory {
    pub fn root(owner_user: impl Into<String>, owner_group: impl Into<String>) -> Self {
        Self {
            id: "0".to_string(),
            name: "/".to_string(),
            parent: None,
            child_files: HashMap::new(),
            child_dirs: HashMap::new(),
            created: chrono::Utc::now(),
            owner_user: owner_user.into(),
            owner_group: owner_group.into(),
            mode: Mode::new(7, 5, 5),
        }
    }

    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        parent: impl Into<String>,
        owner_user: impl Into<String>,
        owner_group: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent: Some(parent.into()),
            child_files: HashMap::new(),
            child_dirs: HashMap::new(),
            created: chrono::Utc::now(),
            owner_user: owner_user.into(),
            owner_group: owner_group.into(),
            mode: Mode::default(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// True if `name` collides with an existing child (file or dir).
    pub fn has_child_named(&self, name: &str) -> bool {
        self.child_files.contains_key(name) || self.child_dirs.contains_key(name)
    }

    /// The id of the child named `name`, whichever kind it is.
    pub fn child_id(&self, name: &str) -> Option<&str> {
        self.child_files
            .get(name)
            .or_else(|| self.child_dirs.get(name))
            .map(|s| s.as_str())
    }

    pub fn add_file(&mut self, name: impl Into<String>, id: impl Into<String>) {
        self.child_files.insert(name.into(), id.into());
    }

    pub fn add_dir(&mut self, name: impl Into<String>, id: impl Into<String>) {
        self.child_dirs.insert(name.into(), id.into());
    }

    pub fn remove_file(&mut self, name: &str) {
        self.child_files.remove(name);
    }

    pub fn remove_dir(&mut self, name: &str) {
        self.child_dirs.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_has_no_parent() {
        let root = Directory::root("root", "root");
        assert!(root.is_root());
        assert_eq!(root.name, "/");
    }

    #[test]
    fn child_name_collision_detection() {
        let mut d = Directory::root("root", "root");
        d.add_dir("etc", "1");
        d.add_file("passwd", "2");
        assert!(d.has_child_named("etc"));
        assert!(d.has_child_named("passwd"));
        assert!(!d.has_child_named("var"));
        assert_eq!(d.child_id("etc"), Some("1"));
    }
}
