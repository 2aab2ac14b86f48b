//! Legal game-session transitions.
//!
//! ```text
//! pending_acceptance --accept (invitee)--> court_selection --select_court--> pending_payment
//!         |                                                                       |
//!         +--decline / cancel (either)--> cancelled              (payments, external)
//!                                                                                 v
//!                                                                             confirmed
//! ```
//!
//! `completed` exists server-side only. Anything not listed is a no-op.

use fitcha_shared::session::{
    CourtSuggestion, GameSession, PaymentOption, SessionRole, SessionStatus, SessionUpdate,
};
use fitcha_shared::types::UserId;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    Accept,
    Decline,
    Cancel,
    SelectCourt(CourtSuggestion),
}

/// Outcome of a user action on a container.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition<T> {
    Applied(T),
    /// Not allowed for the current state or role; nothing was sent.
    Ignored,
}

impl<T> Transition<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

/// The update `actor` may apply to `session` for `action`, if any.
pub fn plan(session: &GameSession, actor: &UserId, action: &SessionAction) -> Option<SessionUpdate> {
    let role = session.role_of(actor)?;
    match (action, session.status, role) {
        (SessionAction::Accept, SessionStatus::PendingAcceptance, SessionRole::Invitee) => {
            Some(SessionUpdate::status(SessionStatus::CourtSelection))
        }
        (
            SessionAction::Decline | SessionAction::Cancel,
            SessionStatus::PendingAcceptance,
            _,
        ) => Some(SessionUpdate::status(SessionStatus::Cancelled)),
        (SessionAction::SelectCourt(court), SessionStatus::CourtSelection, _) => {
            Some(SessionUpdate {
                status: Some(SessionStatus::PendingPayment),
                selected_court_id: Some(court.court_id),
                total_cost: Some(court.hourly_price),
                payment_option: Some(PaymentOption::Split5050),
                ..Default::default()
            })
        }
        _ => None,
    }
}
