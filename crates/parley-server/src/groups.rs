//! Read side of group membership, plus the rules applied before the store
//! is asked to change a group.

use std::collections::BTreeSet;
use std::sync::Arc;

use parley_shared::constants::{MAX_GROUP_DESCRIPTION_LEN, MAX_GROUP_NAME_LEN, MIN_GROUP_INVITEES};
use parley_shared::{GroupId, UserId};
use parley_store::{ChatStore, Group, NewGroup};

use crate::error::ServerError;

/// Snapshot reader over the store's group records.
///
/// Every call reads whatever the store holds right now. There is no caching
/// and no consistency with concurrent membership edits; a member removed
/// while a fanout is in flight may or may not receive that push.
pub struct GroupMembershipView<S> {
    store: Arc<S>,
}

impl<S> Clone for GroupMembershipView<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: ChatStore> GroupMembershipView<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn members(&self, group: GroupId) -> Result<BTreeSet<UserId>, ServerError> {
        Ok(self.store.get_group_members(group).await?)
    }

    pub async fn snapshot(&self, group: GroupId) -> Result<Group, ServerError> {
        Ok(self.store.get_group(group).await?)
    }

    /// The group, provided `user` is one of its members.
    pub async fn require_member(&self, group: GroupId, user: UserId) -> Result<Group, ServerError> {
        let snapshot = self.snapshot(group).await?;
        if !snapshot.is_member(user) {
            return Err(ServerError::PermissionDenied(format!(
                "user {} is not a member of group {}",
                user, group
            )));
        }
        Ok(snapshot)
    }

    /// The group, provided `user` is its admin.
    pub async fn require_admin(&self, group: GroupId, user: UserId) -> Result<Group, ServerError> {
        let snapshot = self.snapshot(group).await?;
        if !snapshot.is_admin(user) {
            return Err(ServerError::PermissionDenied(
                "only the group admin can change its members".into(),
            ));
        }
        Ok(snapshot)
    }
}

/// Normalise and check a group creation request.
///
/// The name is trimmed; the admin is dropped from the invitee list and put
/// back as a member by the store.
pub fn validate_new_group(
    admin: UserId,
    name: &str,
    description: Option<&str>,
    members: impl IntoIterator<Item = UserId>,
    avatar: Option<String>,
) -> Result<NewGroup, ServerError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ServerError::BadRequest("group name is required".into()));
    }
    if name.chars().count() > MAX_GROUP_NAME_LEN {
        return Err(ServerError::BadRequest(format!(
            "group name must be at most {MAX_GROUP_NAME_LEN} characters"
        )));
    }

    let description = description
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);
    if let Some(d) = &description {
        if d.chars().count() > MAX_GROUP_DESCRIPTION_LEN {
            return Err(ServerError::BadRequest(format!(
                "group description must be at most {MAX_GROUP_DESCRIPTION_LEN} characters"
            )));
        }
    }

    let invitees: BTreeSet<UserId> = members.into_iter().filter(|m| *m != admin).collect();
    if invitees.len() < MIN_GROUP_INVITEES {
        return Err(ServerError::BadRequest(format!(
            "a group needs at least {MIN_GROUP_INVITEES} members besides the admin"
        )));
    }

    Ok(NewGroup {
        name: name.to_string(),
        description,
        admin,
        members: invitees,
        avatar,
    })
}
