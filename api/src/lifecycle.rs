//! Lead lifecycle rules: which status moves are legal, what a complete
//! booking looks like, and when a confirmation email is owed.
//!
//! Everything here is pure; persistence and sending live elsewhere.

use chrono::NaiveDate;
use entity::lead;
use thiserror::Error;
use uuid::Uuid;

pub const CONFIRMATION_TEMPLATE: &str = "inspection-confirmed";

#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum TransitionError {
    #[error("transition {from:?} -> {to:?} is not allowed")]
    Illegal {
        from: lead::Status,
        to: lead::Status,
    },
    #[error("an inspection date and time must be booked before a lead is marked contacted")]
    MissingBooking,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
#[error("inspection date and time must be provided together")]
pub struct IncompleteBooking;

/// The inspection date/time pair. Half-present pairs are unrepresentable;
/// construct via [`Booking::from_columns`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub date: NaiveDate,
    pub time: String,
}

impl Booking {
    pub fn from_columns(
        date: Option<NaiveDate>,
        time: Option<String>,
    ) -> Result<Option<Self>, IncompleteBooking> {
        match (date, time) {
            (Some(date), Some(time)) => Ok(Some(Booking { date, time })),
            (None, None) => Ok(None),
            _ => Err(IncompleteBooking),
        }
    }
}

pub fn is_terminal(status: lead::Status) -> bool {
    matches!(status, lead::Status::Converted | lead::Status::ClosedLost)
}

/// The transition table. Self-moves are not edges; callers treat them as
/// always legal (see [`validate_transition`]).
pub fn transition_allowed(from: lead::Status, to: lead::Status) -> bool {
    use lead::Status::*;
    if to == ClosedLost {
        return !is_terminal(from);
    }
    matches!(
        (from, to),
        (New, Contacted)
            | (Contacted, Qualified)
            | (Qualified, Quoted)
            | (Quoted, Converted)
            | (Contacted, FollowUp)
            | (Qualified, FollowUp)
            | (Quoted, FollowUp)
            | (FollowUp, Contacted)
            | (FollowUp, Qualified)
    )
}

/// Decide whether a proposed move is legal given the booking the record
/// would end up with. `booking` is the merged (proposed over persisted)
/// pair, so a half-updated booking has already been rejected by
/// [`Booking::from_columns`].
pub fn validate_transition(
    from: lead::Status,
    to: lead::Status,
    booking: Option<&Booking>,
) -> Result<(), TransitionError> {
    if from != to && !transition_allowed(from, to) {
        return Err(TransitionError::Illegal { from, to });
    }
    if to == lead::Status::Contacted && booking.is_none() {
        return Err(TransitionError::MissingBooking);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationIntent {
    pub lead_id: Uuid,
    pub recipient: String,
    pub first_name: String,
    pub booking: Booking,
}

/// Booking-confirmation policy: evaluated after every accepted write.
///
/// Fires iff the lead sits in CONTACTED with a complete booking, has a
/// recipient address, and the idempotency guard is still unarmed. The store
/// resets `email_sent` whenever the persisted booking pair changes, so a
/// re-book re-fires exactly once and re-saving the same booking never does.
pub fn confirmation_due(after: &lead::Model) -> Option<NotificationIntent> {
    if after.status != lead::Status::Contacted || after.email_sent {
        return None;
    }
    let recipient = after.email.clone()?;
    let booking =
        Booking::from_columns(after.inspection_date, after.inspection_time.clone()).ok()??;
    Some(NotificationIntent {
        lead_id: after.id,
        recipient,
        first_name: after.first_name.clone(),
        booking,
    })
}
