//! Proxy groups: named sets of interfaces cooperating as one ND proxy.
//!
//! A group owns its ordered member list; an interface belongs to at most
//! one group and carries the group's name as a back-edge that is
//! revalidated on use. The manager owns the groups and keeps a reverse
//! membership index. Join and leave notifications are driven by the
//! engine right after each successful mutation here.

use fxhash::FxHashMap;

use crate::error::{Error, ErrorKind, Result};

/// Group names end up typed on a shell, so they are restricted to
/// non-empty alphanumerics, underscores and dashes.
pub fn is_valid_group_name(pg_name: &str) -> bool {
    !pg_name.is_empty()
        && pg_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[derive(Debug)]
pub struct Group {
    name: String,
    members: Vec<String>,
    upstream: Option<String>,
}

impl Group {
    fn new(name: impl Into<String>) -> Group {
        Group {
            name: name.into(),
            members: Vec::new(),
            upstream: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Members in insertion order; multicast fan-out follows this order.
    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn contains(&self, if_name: &str) -> bool {
        self.members.iter().any(|m| m == if_name)
    }

    /// The at-most-one member expected to face a real router.
    pub fn upstream(&self) -> Option<&str> {
        self.upstream.as_deref()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct GroupManager {
    groups: FxHashMap<String, Group>,
    /// Reverse index: interface name to owning group name.
    memberships: FxHashMap<String, String>,
}

impl GroupManager {
    pub fn new() -> GroupManager {
        GroupManager::default()
    }

    pub fn create_group(&mut self, pg_name: &str) -> Result<()> {
        if self.has_group(pg_name) {
            return Err(Error::with(
                ErrorKind::AlreadyExists,
                format!("a proxy group named {pg_name} already exists"),
            ));
        }
        if !is_valid_group_name(pg_name) {
            return Err(Error::with(
                ErrorKind::InvalidArgument,
                format!("invalid proxy group name {pg_name:?}"),
            ));
        }
        self.groups.insert(pg_name.to_string(), Group::new(pg_name));
        Ok(())
    }

    /// Destroys a group, removing all of its members first. The removed
    /// member names are returned so the caller can deliver their leave
    /// notifications.
    pub fn release_group(&mut self, pg_name: &str) -> Result<Vec<String>> {
        let Some(group) = self.groups.remove(pg_name) else {
            return Err(Error::with(
                ErrorKind::DoesNotExist,
                format!("the proxy group {pg_name} does not exist"),
            ));
        };
        for member in &group.members {
            self.memberships.remove(member);
        }
        Ok(group.members)
    }

    /// Destroys every group, returning all removed member names.
    pub fn release_all(&mut self) -> Vec<String> {
        let names: Vec<String> = self.groups.keys().cloned().collect();
        let mut removed = Vec::new();
        for pg_name in names {
            if let Ok(mut members) = self.release_group(&pg_name) {
                removed.append(&mut members);
            }
        }
        removed
    }

    pub fn has_group(&self, pg_name: &str) -> bool {
        self.groups.contains_key(pg_name)
    }

    pub fn group(&self, pg_name: &str) -> Option<&Group> {
        self.groups.get(pg_name)
    }

    pub fn group_names(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    /// Adds an interface to a group. Returns `Ok(true)` when the member
    /// newly joined (the caller delivers its join notification),
    /// `Ok(false)` when it was already a member of this same group.
    pub fn add_member(&mut self, if_name: &str, pg_name: &str) -> Result<bool> {
        if !self.has_group(pg_name) {
            return Err(Error::with(
                ErrorKind::DoesNotExist,
                format!("the proxy group {pg_name} does not exist"),
            ));
        }
        if let Some(current) = self.memberships.get(if_name) {
            if current == pg_name {
                return Ok(false);
            }
            return Err(Error::with(
                ErrorKind::AlreadyExists,
                format!("interface {if_name} is already a member of group {current}"),
            ));
        }

        let group = self.groups.get_mut(pg_name).unwrap();
        group.members.push(if_name.to_string());
        self.memberships
            .insert(if_name.to_string(), pg_name.to_string());
        Ok(true)
    }

    /// Removes an interface from its group, clearing the upstream slot
    /// if it held it. Returns the name of the group left.
    pub fn remove_member(&mut self, if_name: &str) -> Result<String> {
        let Some(pg_name) = self.memberships.remove(if_name) else {
            return Err(Error::with(
                ErrorKind::DoesNotExist,
                format!("interface {if_name} is not a member of any group"),
            ));
        };
        let group = self.groups.get_mut(&pg_name).unwrap();
        group.members.retain(|m| m != if_name);
        if group.upstream.as_deref() == Some(if_name) {
            group.upstream = None;
        }
        Ok(pg_name)
    }

    pub fn is_member(&self, if_name: &str) -> bool {
        self.memberships.contains_key(if_name)
    }

    pub fn group_of(&self, if_name: &str) -> Option<&str> {
        self.memberships.get(if_name).map(String::as_str)
    }

    pub fn is_upstream(&self, if_name: &str, pg_name: &str) -> bool {
        self.groups
            .get(pg_name)
            .is_some_and(|g| g.upstream.as_deref() == Some(if_name))
    }

    /// Makes `if_name` the upstream of its group, replacing any current
    /// upstream.
    pub fn set_upstream(&mut self, if_name: &str) -> Result<()> {
        let Some(pg_name) = self.memberships.get(if_name) else {
            return Err(Error::with(
                ErrorKind::DoesNotExist,
                format!("interface {if_name} is not a member of any group"),
            ));
        };
        let group = self.groups.get_mut(pg_name).unwrap();
        group.upstream = Some(if_name.to_string());
        Ok(())
    }

    pub fn unset_upstream(&mut self, pg_name: &str) -> Result<()> {
        let Some(group) = self.groups.get_mut(pg_name) else {
            return Err(Error::with(
                ErrorKind::DoesNotExist,
                format!("the proxy group {pg_name} does not exist"),
            ));
        };
        group.upstream = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_name_validation() {
        assert!(is_valid_group_name("g1"));
        assert!(is_valid_group_name("lan_guests-2"));
        assert!(!is_valid_group_name(""));
        assert!(!is_valid_group_name("has space"));
        assert!(!is_valid_group_name("g#1"));
        assert!(!is_valid_group_name("dot.dot"));
    }

    #[test]
    fn create_rejects_duplicates_and_bad_names() {
        let mut mgr = GroupManager::new();
        mgr.create_group("g1").unwrap();
        assert!(mgr.has_group("g1"));

        let dup = mgr.create_group("g1").unwrap_err();
        assert_eq!(dup.kind(), ErrorKind::AlreadyExists);

        let invalid = mgr.create_group("not a name").unwrap_err();
        assert_eq!(invalid.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn release_missing_group_fails() {
        let mut mgr = GroupManager::new();
        let err = mgr.release_group("g1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DoesNotExist);
    }

    #[test]
    fn membership_lifecycle() {
        let mut mgr = GroupManager::new();
        mgr.create_group("g1").unwrap();
        mgr.create_group("g2").unwrap();

        assert!(mgr.add_member("eth0", "g1").unwrap());
        assert!(mgr.add_member("vmtap0", "g1").unwrap());
        assert_eq!(mgr.group("g1").unwrap().members(), ["eth0", "vmtap0"]);
        assert_eq!(mgr.group_of("eth0"), Some("g1"));
        assert!(mgr.is_member("eth0"));

        // Re-adding to the same group is a no-op success.
        assert!(!mgr.add_member("eth0", "g1").unwrap());
        assert_eq!(mgr.group("g1").unwrap().len(), 2);

        // Adding to a different group fails.
        let err = mgr.add_member("eth0", "g2").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        // Adding to a missing group fails.
        let err = mgr.add_member("vmtap1", "g3").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DoesNotExist);

        assert_eq!(mgr.remove_member("eth0").unwrap(), "g1");
        assert!(!mgr.is_member("eth0"));
        assert_eq!(mgr.group("g1").unwrap().members(), ["vmtap0"]);

        let err = mgr.remove_member("eth0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DoesNotExist);
    }

    #[test]
    fn upstream_tracking() {
        let mut mgr = GroupManager::new();
        mgr.create_group("g1").unwrap();
        mgr.add_member("eth0", "g1").unwrap();
        mgr.add_member("vmtap0", "g1").unwrap();

        // An interface without a group cannot be an upstream.
        assert!(mgr.set_upstream("vmtap9").is_err());

        mgr.set_upstream("eth0").unwrap();
        assert!(mgr.is_upstream("eth0", "g1"));
        assert_eq!(mgr.group("g1").unwrap().upstream(), Some("eth0"));

        // Replacing the upstream is allowed.
        mgr.set_upstream("vmtap0").unwrap();
        assert!(mgr.is_upstream("vmtap0", "g1"));
        assert!(!mgr.is_upstream("eth0", "g1"));

        mgr.unset_upstream("g1").unwrap();
        assert_eq!(mgr.group("g1").unwrap().upstream(), None);
        assert!(mgr.unset_upstream("g9").is_err());
    }

    #[test]
    fn removing_the_upstream_member_clears_the_slot() {
        let mut mgr = GroupManager::new();
        mgr.create_group("g1").unwrap();
        mgr.add_member("eth0", "g1").unwrap();
        mgr.set_upstream("eth0").unwrap();

        mgr.remove_member("eth0").unwrap();
        assert_eq!(mgr.group("g1").unwrap().upstream(), None);
    }

    #[test]
    fn release_group_evicts_members() {
        let mut mgr = GroupManager::new();
        mgr.create_group("g1").unwrap();
        mgr.add_member("eth0", "g1").unwrap();
        mgr.add_member("vmtap0", "g1").unwrap();

        let mut removed = mgr.release_group("g1").unwrap();
        removed.sort();
        assert_eq!(removed, ["eth0", "vmtap0"]);
        assert!(!mgr.has_group("g1"));
        assert!(!mgr.is_member("eth0"));

        // The names are free for a new group.
        mgr.create_group("g1").unwrap();
        assert!(mgr.add_member("eth0", "g1").unwrap());
    }

    #[test]
    fn release_all_groups() {
        let mut mgr = GroupManager::new();
        mgr.create_group("g1").unwrap();
        mgr.create_group("g2").unwrap();
        mgr.add_member("eth0", "g1").unwrap();
        mgr.add_member("vmtap0", "g2").unwrap();

        let mut removed = mgr.release_all();
        removed.sort();
        assert_eq!(removed, ["eth0", "vmtap0"]);
        assert!(mgr.group_names().is_empty());
    }
}
