//! Game-session negotiation: the session row, its chat, and court
//! suggestions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CourtId, MessageId, ProfileSummary, SessionId, UserId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    PendingAcceptance,
    CourtSelection,
    PendingPayment,
    Confirmed,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::PendingAcceptance => "pending_acceptance",
            SessionStatus::CourtSelection => "court_selection",
            SessionStatus::PendingPayment => "pending_payment",
            SessionStatus::Confirmed => "confirmed",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    /// Human label shown next to the session header.
    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::PendingAcceptance => "Waiting for Response",
            SessionStatus::CourtSelection => "Choosing Court",
            SessionStatus::PendingPayment => "Payment Required",
            SessionStatus::Confirmed => "Confirmed",
            SessionStatus::Completed => "Completed",
            SessionStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOption {
    InitiatorPaysAll,
    #[serde(rename = "split_50_50")]
    Split5050,
    CustomSplit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    NotRequired,
}

/// Which side of the session the viewer is on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    Initiator,
    Invitee,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameSession {
    pub id: SessionId,
    pub status: SessionStatus,
    pub initiator_id: UserId,
    pub invitee_id: UserId,
    pub sport: String,
    pub proposed_datetime: DateTime<Utc>,
    #[serde(default)]
    pub selected_court_id: Option<CourtId>,
    #[serde(default)]
    pub total_cost: Option<f64>,
    #[serde(default)]
    pub payment_option: Option<PaymentOption>,
    #[serde(default)]
    pub initiator_payment_status: PaymentStatus,
    #[serde(default)]
    pub invitee_payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // Joined columns; absent on raw change-feed rows.
    #[serde(default)]
    pub other_user_name: Option<String>,
    #[serde(default)]
    pub other_user_avatar: Option<String>,
    #[serde(default)]
    pub court_name: Option<String>,
    #[serde(default)]
    pub user_role: Option<SessionRole>,
}

impl GameSession {
    /// The viewer's role, or `None` if the viewer is not a party.
    pub fn role_of(&self, user: &UserId) -> Option<SessionRole> {
        if &self.invitee_id == user {
            Some(SessionRole::Invitee)
        } else if &self.initiator_id == user {
            Some(SessionRole::Initiator)
        } else {
            None
        }
    }

    /// Both parties have paid (or do not need to).
    pub fn payments_settled(&self) -> bool {
        let settled = |s: PaymentStatus| matches!(s, PaymentStatus::Paid | PaymentStatus::NotRequired);
        settled(self.initiator_payment_status) && settled(self.invitee_payment_status)
    }

    /// Overwrite the columns a change-feed row carries, keeping the
    /// joined display columns already loaded.
    pub fn merge_row(&mut self, row: GameSession) {
        let other_user_name = self.other_user_name.take();
        let other_user_avatar = self.other_user_avatar.take();
        let court_name = self.court_name.take();
        let user_role = self.user_role.take();
        *self = GameSession {
            other_user_name: row.other_user_name.or(other_user_name),
            other_user_avatar: row.other_user_avatar.or(other_user_avatar),
            court_name: row.court_name.or(court_name),
            user_role: row.user_role.or(user_role),
            ..row
        };
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewGameSession {
    pub initiator_id: UserId,
    pub invitee_id: UserId,
    pub sport: String,
    pub proposed_datetime: DateTime<Utc>,
}

/// Partial update of a session row. Unset fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SessionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_court_id: Option<CourtId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_option: Option<PaymentOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiator_payment_status: Option<PaymentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invitee_payment_status: Option<PaymentStatus>,
}

impl SessionUpdate {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionMessageType {
    #[default]
    Text,
    CourtSuggestion,
    PaymentRequest,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionChatMessage {
    pub id: MessageId,
    pub session_id: SessionId,
    pub sender_id: UserId,
    pub message: String,
    #[serde(default)]
    pub message_type: SessionMessageType,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub sender_avatar: Option<String>,
    #[serde(default)]
    pub sender: Option<ProfileSummary>,
}

impl SessionChatMessage {
    pub fn sender_display_name(&self) -> String {
        self.sender_name
            .clone()
            .or_else(|| self.sender.as_ref().map(ProfileSummary::display_name))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewSessionMessage {
    pub session_id: SessionId,
    pub sender_id: UserId,
    pub message: String,
    pub message_type: SessionMessageType,
    pub metadata: serde_json::Value,
}

/// A court ranked for a session by distance and availability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourtSuggestion {
    pub court_id: CourtId,
    pub court_name: String,
    #[serde(default)]
    pub court_address: Option<String>,
    pub hourly_price: f64,
    pub distance_km: f64,
    pub availability_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_json(status: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "9d8a7c6b-5e4f-4a3b-8c2d-1e0f9a8b7c6d",
            "status": status,
            "initiator_id": "11111111-1111-4111-8111-111111111111",
            "invitee_id": "22222222-2222-4222-8222-222222222222",
            "sport": "Tennis",
            "proposed_datetime": "2024-06-01T18:00:00Z",
            "payment_option": "split_50_50",
            "initiator_payment_status": "paid",
            "invitee_payment_status": "not_required",
            "created_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-05-01T10:00:00Z"
        })
    }

    #[test]
    fn test_status_and_payment_wire_names() {
        let session: GameSession = serde_json::from_value(session_json("court_selection")).unwrap();
        assert_eq!(session.status, SessionStatus::CourtSelection);
        assert_eq!(session.payment_option, Some(PaymentOption::Split5050));
        assert!(session.payments_settled());
    }

    #[test]
    fn test_role_of() {
        let session: GameSession = serde_json::from_value(session_json("pending_acceptance")).unwrap();
        assert_eq!(session.role_of(&session.invitee_id), Some(SessionRole::Invitee));
        assert_eq!(session.role_of(&session.initiator_id), Some(SessionRole::Initiator));
        assert_eq!(session.role_of(&UserId::new()), None);
    }

    #[test]
    fn test_merge_row_keeps_joined_columns() {
        let mut session: GameSession = serde_json::from_value(session_json("pending_acceptance")).unwrap();
        session.other_user_name = Some("Ana Lopez".into());
        let row: GameSession = serde_json::from_value(session_json("cancelled")).unwrap();
        session.merge_row(row);
        assert_eq!(session.status, SessionStatus::Cancelled);
        assert_eq!(session.other_user_name.as_deref(), Some("Ana Lopez"));
    }

    #[test]
    fn test_update_skips_unset_fields() {
        let update = SessionUpdate::status(SessionStatus::CourtSelection);
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "court_selection" }));
    }
}
