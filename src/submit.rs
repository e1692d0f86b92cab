use std::time::Duration;
use anyhow::Context;
use crate::event::EventId;
use crate::fields::FieldRecord;
use crate::form::{first_missing_required, submit_payload, ResponseMap};
use crate::registration::{PostedRegistration, RegistrationReceipt};

pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(10);

// each variant carries the human-readable message to show
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum SubmitFailure {
    Network(String),
    Unauthorized(String),
    Validation(String),
    Duplicate(String),
    DeadlinePassed(String),
    NotFound(String),
    Unknown(String),
}
impl SubmitFailure {
    // only well-known substrings are sniffed, a reworded server degrades to
    // Unknown instead of misclassifying
    pub fn classify(status: u16, message: &str) -> SubmitFailure {
        let msg = message.to_lowercase();
        if status == 401 {
            return SubmitFailure::Unauthorized(message.to_string());
        }
        if msg.contains("already registered") {
            return SubmitFailure::Duplicate(message.to_string());
        }
        if msg.contains("deadline") {
            return SubmitFailure::DeadlinePassed(message.to_string());
        }
        if status == 404 || msg.contains("not found") {
            return SubmitFailure::NotFound(message.to_string());
        }
        if msg.contains("required") || msg.contains("invalid") {
            return SubmitFailure::Validation(message.to_string());
        }
        SubmitFailure::Unknown(message.to_string())
    }
    pub fn message(&self) -> &str {
        match self {
            SubmitFailure::Network(m)
            | SubmitFailure::Unauthorized(m)
            | SubmitFailure::Validation(m)
            | SubmitFailure::Duplicate(m)
            | SubmitFailure::DeadlinePassed(m)
            | SubmitFailure::NotFound(m)
            | SubmitFailure::Unknown(m) => m,
        }
    }
}
impl std::fmt::Display for SubmitFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitFailure::Network(m) => write!(f, "Network error: {m}"),
            SubmitFailure::Unauthorized(m) => write!(f, "Unauthorized: {m}"),
            SubmitFailure::Validation(m) => write!(f, "Validation failed: {m}"),
            SubmitFailure::Duplicate(m) => write!(f, "Duplicate registration: {m}"),
            SubmitFailure::DeadlinePassed(m) => write!(f, "Deadline passed: {m}"),
            SubmitFailure::NotFound(m) => write!(f, "Not found: {m}"),
            SubmitFailure::Unknown(m) => write!(f, "Unknown error: {m}"),
        }
    }
}

// one call is exactly one POST with no retry, dropping the returned future
// aborts the request
pub struct RegistrationSubmitter {
    http: reqwest::Client,
    base_url: String,
    session_token: String,
}
impl RegistrationSubmitter {
    pub fn new(base_url: &str, session_token: &str) -> Result<Self, anyhow::Error> {
        let http = reqwest::Client::builder()
            .timeout(SUBMIT_TIMEOUT)
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            session_token: session_token.to_string(),
        })
    }

    // required fields are checked locally first, a gap costs no round trip
    pub async fn submit(&self, event_id: EventId, schema: &[FieldRecord], responses: &ResponseMap) -> Result<RegistrationReceipt, SubmitFailure> {
        if let Some(field) = first_missing_required(schema, responses) {
            return Err(SubmitFailure::Validation(format!("Field '{}' is required.", field.field_name)));
        }
        let payload = PostedRegistration { responses: submit_payload(schema, responses) };
        let url = format!("{}/api/events/{}/register", self.base_url, event_id);
        let response = match self.http.post(&url)
            .bearer_auth(&self.session_token)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Err(SubmitFailure::Unknown(format!("Request timed out: {e}"))),
            Err(e) => return Err(SubmitFailure::Network(e.to_string())),
        };
        let status = response.status().as_u16();
        if response.status().is_success() {
            response.json::<RegistrationReceipt>().await
                .map_err(|e| SubmitFailure::Unknown(format!("Malformed receipt: {e}")))
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(SubmitFailure::classify(status, &message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldType;

    #[test]
    fn classification_taxonomy() {
        for (status, message, expected) in [
            (401u16, "Session expired", SubmitFailure::Unauthorized("Session expired".to_string())),
            (409, "Already registered for this event.", SubmitFailure::Duplicate("Already registered for this event.".to_string())),
            (403, "Registration deadline has passed.", SubmitFailure::DeadlinePassed("Registration deadline has passed.".to_string())),
            (404, "Event not found.", SubmitFailure::NotFound("Event not found.".to_string())),
            (404, "", SubmitFailure::NotFound(String::new())),
            (400, "Field 'Phone' is required.", SubmitFailure::Validation("Field 'Phone' is required.".to_string())),
            (400, "Invalid field type", SubmitFailure::Validation("Invalid field type".to_string())),
            (500, "SQLx error: database is locked", SubmitFailure::Unknown("SQLx error: database is locked".to_string())),
        ] {
            assert_eq!(SubmitFailure::classify(status, message), expected, "status {status} message {message:?}");
        }
    }

    #[test]
    fn status_401_wins_over_message_content() {
        let failure = SubmitFailure::classify(401, "Registration deadline has passed.");
        assert_eq!(failure, SubmitFailure::Unauthorized("Registration deadline has passed.".to_string()));
        assert_eq!(failure.message(), "Registration deadline has passed.");
    }

    #[rocket::async_test]
    async fn missing_required_field_costs_no_round_trip() {
        // port 9 is never contacted, the local gate fails first
        let submitter = RegistrationSubmitter::new("http://127.0.0.1:9/", "plelababamak").unwrap();
        let schema = vec![FieldRecord {
            id: 1,
            event_id: 42,
            field_name: "Phone".to_string(),
            field_type: FieldType::Text,
            is_required: true,
            is_default: false,
            ord: 0,
        }];
        let err = submitter.submit(42, &schema, &ResponseMap::new()).await.unwrap_err();
        assert_eq!(err, SubmitFailure::Validation("Field 'Phone' is required.".to_string()));
    }
}
