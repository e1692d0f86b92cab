use std::collections::BTreeMap;
use crate::auth::UserInfo;
use crate::fields::{FieldId, FieldRecord, FieldType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    FreeText,
    Email,
    Numeric,
}

pub fn input_kind(field_type: FieldType) -> InputKind {
    match field_type {
        FieldType::Text => InputKind::FreeText,
        FieldType::Email => InputKind::Email,
        FieldType::Number => InputKind::Numeric,
    }
}

// best effort, the declared field type stays authoritative
pub fn digits_only_hint(field_name: &str) -> bool {
    let name = field_name.to_lowercase();
    ["mobile", "phone", "roll", "number"].iter().any(|w| name.contains(w))
}

#[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug, Clone)]
pub struct FieldResponse {
    pub field_id: FieldId,
    pub response_value: String,
}

// keyed by field id, setting a field twice keeps the later value
#[derive(Debug, Default, Clone)]
pub struct ResponseMap(BTreeMap<FieldId, String>);
impl ResponseMap {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }
    pub fn set(&mut self, field_id: FieldId, value: &str) {
        self.0.insert(field_id, value.to_string());
    }
    pub fn get(&self, field_id: FieldId) -> Option<&str> {
        self.0.get(&field_id).map(|v| v.as_str())
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

pub fn first_missing_required<'a>(schema: &'a [FieldRecord], responses: &ResponseMap) -> Option<&'a FieldRecord> {
    schema.iter().find(|f| f.is_required && is_blank(responses.get(f.id)))
}

pub fn can_submit(schema: &[FieldRecord], responses: &ResponseMap) -> bool {
    first_missing_required(schema, responses).is_none()
}

// schema order, one entry per answered field, ids the schema does not know
// are dropped
pub fn submit_payload(schema: &[FieldRecord], responses: &ResponseMap) -> Vec<FieldResponse> {
    schema.iter()
        .filter_map(|f| responses.get(f.id).map(|v| FieldResponse {
            field_id: f.id,
            response_value: v.to_string(),
        }))
        .collect()
}

pub struct InputPlan {
    pub field_id: FieldId,
    pub label: String,
    pub kind: InputKind,
    pub digits_only: bool,
    pub is_required: bool,
}

pub struct RegistrationForm {
    identity: UserInfo,
    schema: Vec<FieldRecord>,
    responses: ResponseMap,
}
impl RegistrationForm {
    pub fn new(identity: UserInfo, schema: Vec<FieldRecord>) -> Self {
        Self { identity, schema, responses: ResponseMap::new() }
    }
    // shown next to the inputs, never editable
    pub fn identity(&self) -> &UserInfo {
        &self.identity
    }
    pub fn inputs(&self) -> Vec<InputPlan> {
        self.schema.iter()
            .map(|f| InputPlan {
                field_id: f.id,
                label: f.field_name.clone(),
                kind: input_kind(f.field_type),
                digits_only: digits_only_hint(&f.field_name),
                is_required: f.is_required,
            })
            .collect()
    }
    // an empty schema still needs a way to confirm participation
    pub fn confirm_only(&self) -> bool {
        self.schema.is_empty()
    }
    pub fn set_response(&mut self, field_id: FieldId, value: &str) {
        self.responses.set(field_id, value);
    }
    pub fn responses(&self) -> &ResponseMap {
        &self.responses
    }
    pub fn validate(&self) -> Result<(), String> {
        match first_missing_required(&self.schema, &self.responses) {
            Some(field) => Err(format!("Field '{}' is required.", field.field_name)),
            None => Ok(()),
        }
    }
    pub fn payload(&self) -> Vec<FieldResponse> {
        submit_payload(&self.schema, &self.responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(id: FieldId, field_name: &str, field_type: FieldType, is_required: bool) -> FieldRecord {
        FieldRecord {
            id,
            event_id: 42,
            field_name: field_name.to_string(),
            field_type,
            is_required,
            is_default: false,
            ord: id,
        }
    }
    fn identity() -> UserInfo {
        UserInfo { id: 2, name: "Maris Novak".to_string(), email: "maris@campus.example".to_string() }
    }

    #[test]
    fn input_kinds_map_one_to_one() {
        assert_eq!(input_kind(FieldType::Text), InputKind::FreeText);
        assert_eq!(input_kind(FieldType::Email), InputKind::Email);
        assert_eq!(input_kind(FieldType::Number), InputKind::Numeric);
    }

    #[test]
    fn digits_hint_is_name_based() {
        assert!(digits_only_hint("Mobile Number"));
        assert!(digits_only_hint("PHONE (WhatsApp)"));
        assert!(digits_only_hint("roll no"));
        assert!(digits_only_hint("Jersey Number"));
        assert!(!digits_only_hint("Department"));
        // declared type does not matter
        let plan = RegistrationForm::new(identity(), vec![field(1, "Phone", FieldType::Text, false)]);
        assert!(plan.inputs()[0].digits_only);
        assert_eq!(plan.inputs()[0].kind, InputKind::FreeText);
    }

    #[test]
    fn response_map_keeps_last_write() {
        let mut responses = ResponseMap::new();
        responses.set(3, "a");
        responses.set(3, "b");
        assert_eq!(responses.get(3), Some("b"));
        assert_eq!(responses.len(), 1);
    }

    #[test]
    fn required_gate_iff_all_required_filled() {
        let schema = vec![
            field(1, "Roll Number", FieldType::Text, true),
            field(2, "Dietary preference", FieldType::Text, false),
            field(3, "Team name", FieldType::Text, true),
        ];
        let mut responses = ResponseMap::new();
        assert!(!can_submit(&schema, &responses));
        responses.set(1, "21BCE1024");
        assert!(!can_submit(&schema, &responses));
        responses.set(3, "   ");
        assert!(!can_submit(&schema, &responses));
        responses.set(3, "Null Pointers");
        assert!(can_submit(&schema, &responses));
        assert!(first_missing_required(&schema, &responses).is_none());
    }

    #[test]
    fn payload_follows_schema_order_and_drops_unknown_ids() {
        let schema = vec![
            field(5, "Department", FieldType::Text, false),
            field(2, "Mobile Number", FieldType::Number, true),
        ];
        let mut responses = ResponseMap::new();
        responses.set(2, "9999999999");
        responses.set(99, "stray");
        responses.set(5, "CSE");
        let payload = submit_payload(&schema, &responses);
        let ids = payload.iter().map(|r| r.field_id).collect::<Vec<_>>();
        assert_eq!(ids, vec![5, 2]);
        assert_eq!(payload[0].response_value, "CSE");
    }

    #[test]
    fn empty_schema_confirms_with_empty_payload() {
        let form = RegistrationForm::new(identity(), vec![]);
        assert!(form.confirm_only());
        assert_eq!(form.validate(), Ok(()));
        assert!(form.payload().is_empty());
    }

    #[test]
    fn phone_field_scenario() {
        let schema = vec![field(1, "Phone", FieldType::Text, true)];
        let mut form = RegistrationForm::new(identity(), schema);
        assert!(!form.confirm_only());
        assert_eq!(form.inputs().len(), 1);
        assert!(form.inputs()[0].is_required);
        assert_eq!(form.validate(), Err("Field 'Phone' is required.".to_string()));
        form.set_response(1, "9999999999");
        assert_eq!(form.validate(), Ok(()));
        let payload = form.payload();
        assert_eq!(payload, vec![FieldResponse { field_id: 1, response_value: "9999999999".to_string() }]);
        assert_eq!(form.identity().email, "maris@campus.example");
    }
}
