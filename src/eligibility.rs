use crate::auth::UserInfo;
use crate::evdatetime::EvDateTime;
use crate::event::{EventId, EventRecord};

// exactly one state applies to a viewer, declaration order is precedence order
#[derive(serde::Serialize, serde::Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
pub enum EligibilityState {
    Anonymous,
    Organizer,
    AlreadyRegistered,
    RegistrationClosed,
    Eligible,
}

pub fn registration_closed(event: &EventRecord, now: EvDateTime) -> bool {
    now.0 >= event.deadline.0 || now.0 >= event.date.0
}

// the caller decides what "now" is, the register route runs this again at
// submit time with a fresh clock
pub fn evaluate(viewer: Option<&UserInfo>, event: &EventRecord, registered_events: &[EventId], now: EvDateTime) -> EligibilityState {
    let Some(viewer) = viewer else {
        return EligibilityState::Anonymous;
    };
    if viewer.id == event.organiser_id {
        return EligibilityState::Organizer;
    }
    if registered_events.contains(&event.id) {
        return EligibilityState::AlreadyRegistered;
    }
    if registration_closed(event, now) {
        return EligibilityState::RegistrationClosed;
    }
    EligibilityState::Eligible
}
