//! Notifications, friendships, game requests, and search results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CourtId, FriendshipId, GameRequestId, NotificationId, ProfileSummary, UserId};

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewGameRequest,
    RequestAccepted,
    RequestDeclined,
    BookingConfirmed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    #[serde(default)]
    pub actor_id: Option<UserId>,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub related_entity_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub actor_profile: Option<ProfileSummary>,
}

impl Notification {
    pub fn is_unread(&self) -> bool {
        self.read_at.is_none()
    }

    /// Set `read_at` if still unread. Returns whether anything changed;
    /// an existing timestamp is never replaced.
    pub fn mark_read(&mut self, at: DateTime<Utc>) -> bool {
        if self.read_at.is_some() {
            return false;
        }
        self.read_at = Some(at);
        true
    }
}

// ---------------------------------------------------------------------------
// Friendships
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FriendshipStatus {
    Pending,
    Accepted,
    Declined,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Friendship {
    #[serde(alias = "id")]
    pub friendship_id: FriendshipId,
    pub status: FriendshipStatus,
    pub requester_id: UserId,
    pub receiver_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// How the viewer relates to another user, as shown on the friend button.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    AddFriend,
    RequestSent,
    RequestReceived,
    Friends,
    Blocked,
    Loading,
}

impl Relationship {
    pub fn from_friendship(friendship: Option<&Friendship>, viewer: &UserId) -> Self {
        let Some(friendship) = friendship else {
            return Relationship::AddFriend;
        };
        match friendship.status {
            FriendshipStatus::Pending if &friendship.requester_id == viewer => {
                Relationship::RequestSent
            }
            FriendshipStatus::Pending => Relationship::RequestReceived,
            FriendshipStatus::Accepted => Relationship::Friends,
            FriendshipStatus::Blocked => Relationship::Blocked,
            FriendshipStatus::Declined => Relationship::AddFriend,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Friend {
    pub friend_id: UserId,
    pub friend_name: String,
    #[serde(default)]
    pub friend_avatar: Option<String>,
    #[serde(default)]
    pub friend_location: Option<String>,
    pub friendship_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingFriendRequest {
    pub friendship_id: FriendshipId,
    pub requester_id: UserId,
    pub requester_name: String,
    #[serde(default)]
    pub requester_avatar: Option<String>,
    #[serde(default)]
    pub requester_location: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Game requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GameRequestStatus {
    Pending,
    Accepted,
    Declined,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameRequest {
    pub id: GameRequestId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub status: GameRequestStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub proposed_datetime: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sender_profile: Option<ProfileSummary>,
    #[serde(default)]
    pub receiver_profile: Option<ProfileSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewGameRequest {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposed_datetime: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerSearchFilters {
    pub sport: Option<String>,
    pub level: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SkillLevel {
    Beginner,
    Intermediate,
    Advanced,
    Professional,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerSport {
    pub sport: String,
    pub level: SkillLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerSearchResult {
    pub id: String,
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub sports: Vec<PlayerSport>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CourtSearchFilters {
    pub sport_type: Option<String>,
    pub court_type: Option<String>,
    pub location: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Court {
    pub id: CourtId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub sport_type: String,
    #[serde(default)]
    pub court_type: Option<String>,
    #[serde(default)]
    pub location_address: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub images: Vec<String>,
    pub hourly_price: f64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn friendship(status: FriendshipStatus, requester: UserId, receiver: UserId) -> Friendship {
        Friendship {
            friendship_id: FriendshipId::new(),
            status,
            requester_id: requester,
            receiver_id: receiver,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_relationship_depends_on_who_asked() {
        let me = UserId::new();
        let them = UserId::new();

        let sent = friendship(FriendshipStatus::Pending, me, them);
        assert_eq!(Relationship::from_friendship(Some(&sent), &me), Relationship::RequestSent);

        let received = friendship(FriendshipStatus::Pending, them, me);
        assert_eq!(
            Relationship::from_friendship(Some(&received), &me),
            Relationship::RequestReceived
        );

        let friends = friendship(FriendshipStatus::Accepted, them, me);
        assert_eq!(Relationship::from_friendship(Some(&friends), &me), Relationship::Friends);
        assert_eq!(Relationship::from_friendship(None, &me), Relationship::AddFriend);
    }

    #[test]
    fn test_read_at_is_monotonic() {
        let mut notification = Notification {
            id: NotificationId::new(),
            user_id: UserId::new(),
            actor_id: None,
            kind: NotificationKind::RequestAccepted,
            message: "Your request was accepted".into(),
            read_at: None,
            related_entity_id: None,
            created_at: Utc::now(),
            actor_profile: None,
        };
        let first = Utc::now();
        assert!(notification.mark_read(first));
        assert!(!notification.mark_read(first + chrono::Duration::seconds(5)));
        assert_eq!(notification.read_at, Some(first));
    }

    #[test]
    fn test_notification_type_field_name() {
        let json = serde_json::json!({
            "id": "33333333-3333-4333-8333-333333333333",
            "user_id": "11111111-1111-4111-8111-111111111111",
            "type": "new_game_request",
            "message": "Ana wants to play",
            "created_at": "2024-05-01T10:00:00Z"
        });
        let notification: Notification = serde_json::from_value(json).unwrap();
        assert_eq!(notification.kind, NotificationKind::NewGameRequest);
        assert!(notification.is_unread());
    }
}
