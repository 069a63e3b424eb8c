//! Friends boundary adapter.

use async_trait::async_trait;

use super::types::{Friend, FriendRequest, UserId};
use crate::error::AdapterError;

/// Stateless calls into the friends backend. Every call stands alone.
#[async_trait]
pub trait FriendsAdapter: Send + Sync {
    async fn fetch_friends(&self) -> Result<Vec<Friend>, AdapterError>;

    async fn fetch_incoming_requests(&self) -> Result<Vec<FriendRequest>, AdapterError>;

    async fn fetch_outgoing_requests(&self) -> Result<Vec<FriendRequest>, AdapterError>;

    async fn remove_friend(&self, id: UserId) -> Result<(), AdapterError>;

    /// Accept the incoming request from `id`, returning the new friend.
    async fn accept_request(&self, id: UserId) -> Result<Friend, AdapterError>;

    async fn decline_request(&self, id: UserId) -> Result<(), AdapterError>;

    async fn cancel_request(&self, id: UserId) -> Result<(), AdapterError>;

    async fn send_request(&self, id: UserId) -> Result<FriendRequest, AdapterError>;
}

/// Adapter used when nothing was registered. Every call is `Unavailable`.
pub struct UnconfiguredFriendsAdapter;

impl UnconfiguredFriendsAdapter {
    fn unavailable<T>() -> Result<T, AdapterError> {
        Err(AdapterError::Unavailable("no friends adapter registered".into()))
    }
}

#[async_trait]
impl FriendsAdapter for UnconfiguredFriendsAdapter {
    async fn fetch_friends(&self) -> Result<Vec<Friend>, AdapterError> {
        Self::unavailable()
    }

    async fn fetch_incoming_requests(&self) -> Result<Vec<FriendRequest>, AdapterError> {
        Self::unavailable()
    }

    async fn fetch_outgoing_requests(&self) -> Result<Vec<FriendRequest>, AdapterError> {
        Self::unavailable()
    }

    async fn remove_friend(&self, _id: UserId) -> Result<(), AdapterError> {
        Self::unavailable()
    }

    async fn accept_request(&self, _id: UserId) -> Result<Friend, AdapterError> {
        Self::unavailable()
    }

    async fn decline_request(&self, _id: UserId) -> Result<(), AdapterError> {
        Self::unavailable()
    }

    async fn cancel_request(&self, _id: UserId) -> Result<(), AdapterError> {
        Self::unavailable()
    }

    async fn send_request(&self, _id: UserId) -> Result<FriendRequest, AdapterError> {
        Self::unavailable()
    }
}
