//! Permission checks
//!
//! `root` bypasses every check below. For everyone else, each operation
//! requires specific bits on up to three positions: every ancestor
//! directory on the path (execute, i.e. "may traverse"), the immediate
//! parent directory (a combination of read/write/execute, i.e. "may
//! list/modify its children"), and the resource itself (read/write,
//! i.e. "may read/modify its content or attributes"). Recursive
//! operations re-check every descendant independently; a single denial
//! anywhere fails the whole operation with `AccessDeniedAtLeastOne`
//! rather than `AccessDenied`.

use crate::error::{Error, Result};
use crate::model::{Directory, File, Mode, User};

const READ: u8 = 4;
const WRITE: u8 = 2;
const EXECUTE: u8 = 1;

/// The operation being permission-checked, used only to select which
/// bits are required where; it does not otherwise affect the check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Mkdir,
    Touch,
    PutFile,
    RemoveFile,
    RemoveDir,
    MoveSource,
    MoveDest,
    CopyDest,
    Read,
    Count,
    Du,
    Chmod,
    Chown,
}

/// Required bit on the ancestor path, the parent directory, and the
/// resource itself for a given operation. `None` means "not checked".
struct Requirement {
    parent: Option<u8>,
    resource: Option<u8>,
}

fn requirement_for(op: Operation) -> Requirement {
    match op {
        Operation::List => Requirement { parent: Some(READ | EXECUTE), resource: Some(READ) },
        Operation::Mkdir => Requirement { parent: Some(WRITE | EXECUTE), resource: None },
        Operation::Touch | Operation::PutFile => {
            Requirement { parent: Some(WRITE | EXECUTE), resource: Some(WRITE) }
        }
        Operation::RemoveFile => Requirement { parent: Some(WRITE | EXECUTE), resource: Some(WRITE) },
        Operation::RemoveDir => {
            Requirement { parent: Some(WRITE | EXECUTE), resource: Some(WRITE | EXECUTE) }
        }
        Operation::MoveSource => Requirement { parent: Some(WRITE | EXECUTE), resource: Some(WRITE) },
        Operation::MoveDest => Requirement { parent: Some(WRITE | EXECUTE), resource: None },
        Operation::CopyDest => Requirement { parent: Some(WRITE | EXECUTE), resource: Some(WRITE) },
        Operation::Read => Requirement { parent: Some(READ | EXECUTE), resource: Some(READ) },
        Operation::Count => Requirement { parent: Some(READ | EXECUTE), resource: Some(READ | EXECUTE) },
        Operation::Du => Requirement { parent: Some(EXECUTE), resource: Some(READ | EXECUTE) },
        // chmod/chown/chgrp require ownership (or root), checked separately below.
        Operation::Chmod | Operation::Chown => Requirement { parent: Some(READ | EXECUTE), resource: None },
    }
}

/// Effective permission bits a user has on a node given its mode and
/// owner/group.
pub fn effective_bits(mode: Mode, owner_user: &str, owner_group: &str, user: &User) -> u8 {
    if user.name == owner_user {
        mode.owner
    } else if user.is_member_of(owner_group) {
        mode.group
    } else {
        mode.others
    }
}

fn has_bits(mode: Mode, owner_user: &str, owner_group: &str, user: &User, required: u8) -> bool {
    if user.is_root() {
        return true;
    }
    effective_bits(mode, owner_user, owner_group, user) & required == required
}

/// Check execute permission on every ancestor directory of a path (the
/// directories do not include the resource or its immediate parent).
pub fn check_ancestors(ancestors: &[Directory], user: &User) -> Result<()> {
    if user.is_root() {
        return Ok(());
    }
    for dir in ancestors {
        if !has_bits(dir.mode, &dir.owner_user, &dir.owner_group, user, EXECUTE) {
            return Err(Error::AccessDenied(dir.name.clone()));
        }
    }
    Ok(())
}

/// Full permission check for an operation whose resource (if any) is a
/// directory (mkdir's parent, rmdir's target, a destination directory).
pub fn check_dir(op: Operation, ancestors: &[Directory], parent: &Directory, user: &User) -> Result<()> {
    check_ancestors(ancestors, user)?;
    let req = requirement_for(op);
    if let Some(bits) = req.parent {
        if !has_bits(parent.mode, &parent.owner_user, &parent.owner_group, user, bits) {
            return Err(Error::AccessDenied(parent.name.clone()));
        }
    }
    Ok(())
}

/// Full permission check for an operation against a directory resource
/// itself (e.g. `rmr` on a directory, where `resource` is that directory).
pub fn check_dir_resource(
    op: Operation,
    ancestors: &[Directory],
    parent: &Directory,
    resource: &Directory,
    user: &User,
) -> Result<()> {
    check_dir(op, ancestors, parent, user)?;
    let req = requirement_for(op);
    if let Some(bits) = req.resource {
        if !has_bits(resource.mode, &resource.owner_user, &resource.owner_group, user, bits) {
            return Err(Error::AccessDenied(resource.name.clone()));
        }
    }
    Ok(())
}

/// Full permission check for an operation against a file resource.
pub fn check_file(
    op: Operation,
    ancestors: &[Directory],
    parent: &Directory,
    file: &File,
    user: &User,
) -> Result<()> {
    check_dir(op, ancestors, parent, user)?;
    let req = requirement_for(op);
    if let Some(bits) = req.resource {
        if !has_bits(file.mode, &file.owner_user, &file.owner_group, user, bits) {
            return Err(Error::AccessDenied(file.name.clone()));
        }
    }
    Ok(())
}

/// chmod/chown/chgrp require that the caller owns the resource, or is root.
pub fn check_owner_or_root(owner_user: &str, user: &User) -> Result<()> {
    if user.is_root() || user.name == owner_user {
        return Ok(());
    }
    Err(Error::RootNecessary)
}

/// useradd/groupadd/mkfs/status and the rest of the administrative verbs
/// that have no owner of their own: the caller must be root outright.
pub fn require_root(user: &User) -> Result<()> {
    if user.is_root() {
        Ok(())
    } else {
        Err(Error::RootNecessary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::User;

    fn dir(mode: Mode, owner: &str, group: &str) -> Directory {
        let mut d = Directory::root(owner, group);
        d.mode = mode;
        d
    }

    #[test]
    fn root_bypasses_everything() {
        let root_user = User::new("root", "root");
        let d = dir(Mode::new(0, 0, 0), "alice", "staff");
        assert!(check_dir(Operation::Mkdir, &[], &d, &root_user).is_ok());
    }

    #[test]
    fn owner_with_write_execute_may_mkdir() {
        let alice = User::new("alice", "staff");
        let d = dir(Mode::new(7, 5, 5), "alice", "staff");
        assert!(check_dir(Operation::Mkdir, &[], &d, &alice).is_ok());
    }

    #[test]
    fn owner_with_only_write_may_not_mkdir() {
        let alice = User::new("alice", "staff");
        let d = dir(Mode::new(6, 5, 5), "alice", "staff");
        assert!(check_dir(Operation::Mkdir, &[], &d, &alice).is_err());
    }

    #[test]
    fn stranger_without_bits_is_denied() {
        let bob = User::new("bob", "guests");
        let d = dir(Mode::new(7, 0, 0), "alice", "staff");
        assert!(check_dir(Operation::Mkdir, &[], &d, &bob).is_err());
    }

    #[test]
    fn ancestor_without_execute_blocks_traversal() {
        let bob = User::new("bob", "guests");
        let blocked_ancestor = dir(Mode::new(7, 0, 0), "alice", "staff");
        let parent = dir(Mode::new(7, 7, 7), "alice", "staff");
        let result = check_dir(Operation::Mkdir, &[blocked_ancestor], &parent, &bob);
        assert!(matches!(result, Err(Error::AccessDenied(_))));
    }

    #[test]
    fn chmod_requires_ownership() {
        let bob = User::new("bob", "guests");
        assert!(check_owner_or_root("alice", &bob).is_err());
        assert!(check_owner_or_root("bob", &bob).is_ok());
    }

    #[test]
    fn private_directory_denies_others_listing() {
        let bob = User::new("bob", "guests");
        let parent = dir(Mode::new(7, 0, 0), "alice", "staff");
        assert!(check_dir(Operation::List, &[], &parent, &bob).is_err());
    }
}
