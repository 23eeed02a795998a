//! Users and groups

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub password: String,
    pub main_group: String,
    pub groups: Vec<String>,
}

impl User {
    pub fn new(name: impl Into<String>, main_group: impl Into<String>) -> Self {
        let main_group = main_group.into();
        Self {
            name: name.into(),
            password: String::new(),
            groups: vec![main_group.clone()],
            main_group,
        }
    }

    pub fn with_password(name: impl Into<String>, main_group: impl Into<String>, password: impl Into<String>) -> Self {
        let mut u = Self::new(name, main_group);
        u.password = password.into();
        u
    }

    pub fn is_root(&self) -> bool {
        self.name == "root"
    }

    pub fn is_member_of(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub members: Vec<String>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_belongs_to_its_main_group() {
        let u = User::new("alice", "staff");
        assert!(u.is_member_of("staff"));
        assert!(!u.is_member_of("wheel"));
    }

    #[test]
    fn root_is_recognized() {
        assert!(User::new("root", "root").is_root());
        assert!(!User::new("alice", "staff").is_root());
    }
}
