//! Channel access control.
//!
//! Evaluation order for a requester: absent requester (the system) is always
//! allowed, then owner, then per-identity grant, then group rights, then
//! "other" rights.

use std::collections::HashMap;
use std::fmt;
use std::iter;

use crate::message::types::ChannelDef;

const NO_PERMISSION: char = '-';
const READ: char = 'r';
const WRITE: char = 'w';

fn fixed_width(raw: &str, width: usize) -> String {
    raw.chars()
        .chain(iter::repeat(NO_PERMISSION))
        .take(width)
        .collect()
}

fn flag_at(value: &str, index: usize, flag: char) -> bool {
    value.chars().nth(index) == Some(flag)
}

/// Four-character rights string: group-read, group-write, other-read, other-write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rights(String);

impl Rights {
    /// Number of characters in a rights string.
    pub const WIDTH: usize = 4;

    /// Parses a rights string, padding missing positions with `-`.
    pub fn parse(raw: &str) -> Self {
        Self(fixed_width(raw, Self::WIDTH))
    }

    /// No permission for anyone but owner and grantees.
    pub fn none() -> Self {
        Self::parse("")
    }

    /// Default for system channels: readable by everyone.
    pub fn system_default() -> Self {
        Self::parse("r-r-")
    }

    /// Group members may read.
    pub fn group_read(&self) -> bool {
        flag_at(&self.0, 0, READ)
    }

    /// Group members may write.
    pub fn group_write(&self) -> bool {
        flag_at(&self.0, 1, WRITE)
    }

    /// Everyone may read.
    pub fn other_read(&self) -> bool {
        flag_at(&self.0, 2, READ)
    }

    /// Everyone may write.
    pub fn other_write(&self) -> bool {
        flag_at(&self.0, 3, WRITE)
    }

    /// Raw string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Rights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Two-character per-identity override: read, write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantMode(String);

impl GrantMode {
    /// Number of characters in a grant value.
    pub const WIDTH: usize = 2;

    /// Parses a grant value, padding missing positions with `-`.
    pub fn parse(raw: &str) -> Self {
        Self(fixed_width(raw, Self::WIDTH))
    }

    /// Grantee may read.
    pub fn can_read(&self) -> bool {
        flag_at(&self.0, 0, READ)
    }

    /// Grantee may write.
    pub fn can_write(&self) -> bool {
        flag_at(&self.0, 1, WRITE)
    }

    /// Raw string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identity a permission check is evaluated for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requester {
    /// User identity.
    pub id: String,
    /// Group of the requester's session.
    pub group: String,
}

impl Requester {
    /// Creates a requester.
    pub fn new(id: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            group: group.into(),
        }
    }
}

/// Ownership and permission state of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Access {
    /// Owner identity; empty for system channels.
    pub owner: String,
    /// Group label.
    pub group: String,
    /// Default rights.
    pub rights: Rights,
    /// Per-identity overrides.
    pub grant: HashMap<String, GrantMode>,
}

impl Access {
    /// Builds normalized access state from a definition.
    pub fn from_def(def: &ChannelDef, system: bool) -> Self {
        let rights = if system && def.rights.is_empty() {
            Rights::system_default()
        } else {
            Rights::parse(&def.rights)
        };
        let mut access = Self {
            owner: def.owner.clone(),
            group: def.group.clone(),
            rights,
            grant: HashMap::new(),
        };
        access.merge_grant(&def.grant);
        access
    }

    /// Whether the requester owns the channel.
    pub fn is_owner(&self, requester: &Requester) -> bool {
        !requester.id.is_empty() && requester.id == self.owner
    }

    fn grant_for(&self, requester: &Requester) -> Option<&GrantMode> {
        if requester.id.is_empty() {
            return None;
        }
        self.grant.get(&requester.id)
    }

    fn same_group(&self, requester: &Requester) -> bool {
        !requester.group.is_empty() && !self.group.is_empty() && requester.group == self.group
    }

    /// Read authorization. `None` is the system and always allowed.
    pub fn can_read(&self, requester: Option<&Requester>) -> bool {
        let Some(requester) = requester else {
            return true;
        };
        if self.is_owner(requester) {
            return true;
        }
        if self.grant_for(requester).is_some_and(GrantMode::can_read) {
            return true;
        }
        if self.same_group(requester) && self.rights.group_read() {
            return true;
        }
        self.rights.other_read()
    }

    /// Write authorization. `None` is the system and always allowed.
    pub fn can_write(&self, requester: Option<&Requester>) -> bool {
        let Some(requester) = requester else {
            return true;
        };
        if self.is_owner(requester) {
            return true;
        }
        if self.grant_for(requester).is_some_and(GrantMode::can_write) {
            return true;
        }
        if self.same_group(requester) && self.rights.group_write() {
            return true;
        }
        self.rights.other_write()
    }

    /// Merges grant entries by key; existing keys not mentioned are kept.
    pub fn merge_grant(&mut self, grant: &HashMap<String, String>) {
        for (identity, mode) in grant {
            self.grant.insert(identity.clone(), GrantMode::parse(mode));
        }
    }

    /// Applies an owner-issued update: every non-empty field replaces the
    /// current value and grant entries are merged.
    pub fn apply_owner_update(&mut self, def: &ChannelDef) {
        if !def.owner.is_empty() {
            self.owner = def.owner.clone();
        }
        if !def.group.is_empty() {
            self.group = def.group.clone();
        }
        if !def.rights.is_empty() {
            self.rights = Rights::parse(&def.rights);
        }
        self.merge_grant(&def.grant);
    }

    /// Writes the access state into a definition.
    pub fn fill_def(&self, def: &mut ChannelDef) {
        def.owner = self.owner.clone();
        def.group = self.group.clone();
        def.rights = self.rights.to_string();
        def.grant = self
            .grant
            .iter()
            .map(|(identity, mode)| (identity.clone(), mode.as_str().to_string()))
            .collect();
    }
}
