//! Friends feature data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Backend user identifier.
pub type UserId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Friend {
    pub id: UserId,
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(rename = "friendsSince")]
    pub friends_since: DateTime<Utc>,
}

/// A pending request, identified by the other party's user id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRequest {
    #[serde(rename = "userId")]
    pub user_id: UserId,
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(rename = "sentAt")]
    pub sent_at: DateTime<Utc>,
}

/// Everything the friends screen shows, merged from three fetches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendsData {
    pub friends: Vec<Friend>,
    pub incoming: Vec<FriendRequest>,
    pub outgoing: Vec<FriendRequest>,
}

impl FriendsData {
    pub fn friend(&self, id: UserId) -> Option<&Friend> {
        self.friends.iter().find(|f| f.id == id)
    }

    pub fn has_incoming(&self, id: UserId) -> bool {
        self.incoming.iter().any(|r| r.user_id == id)
    }

    pub fn has_outgoing(&self, id: UserId) -> bool {
        self.outgoing.iter().any(|r| r.user_id == id)
    }

    pub(crate) fn remove_friend(&mut self, id: UserId) {
        self.friends.retain(|f| f.id != id);
    }

    /// Move an accepted incoming request into the friends list.
    pub(crate) fn accept(&mut self, friend: Friend) {
        self.incoming.retain(|r| r.user_id != friend.id);
        self.friends.retain(|f| f.id != friend.id);
        self.friends.push(friend);
    }

    pub(crate) fn drop_incoming(&mut self, id: UserId) {
        self.incoming.retain(|r| r.user_id != id);
    }

    pub(crate) fn drop_outgoing(&mut self, id: UserId) {
        self.outgoing.retain(|r| r.user_id != id);
    }

    pub(crate) fn add_outgoing(&mut self, request: FriendRequest) {
        self.drop_outgoing(request.user_id);
        self.outgoing.push(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: UserId) -> FriendRequest {
        FriendRequest {
            user_id: id,
            display_name: format!("user{}", id),
            sent_at: Utc::now(),
        }
    }

    #[test]
    fn test_accept_moves_request() {
        let mut data = FriendsData {
            incoming: vec![request(1), request(2)],
            ..Default::default()
        };
        data.accept(Friend {
            id: 1,
            display_name: "user1".into(),
            friends_since: Utc::now(),
        });
        assert!(data.friend(1).is_some());
        assert!(!data.has_incoming(1));
        assert!(data.has_incoming(2));
    }

    #[test]
    fn test_add_outgoing_replaces_existing() {
        let mut data = FriendsData::default();
        data.add_outgoing(request(5));
        data.add_outgoing(request(5));
        assert_eq!(data.outgoing.len(), 1);
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(request(3)).unwrap();
        assert_eq!(json["userId"], 3);
        assert!(json.get("sentAt").is_some());
    }
}
