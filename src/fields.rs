use std::str::FromStr;
use anyhow::anyhow;
use rocket::State;
use sqlx::FromRow;
use crate::db::DbPool;
use crate::evdatetime::EvDateTime;
use crate::event::{EventId, Mode, ParticipationType, PostedEvent};
use crate::impl_sqlx_text_type_and_decode;
use crate::util::tee_sqlx_error;

pub type FieldId = i64;

pub const EVENT_TITLE_MAX_LEN: usize = 190;
pub const FIELD_NAME_MAX_LEN: usize = 100;

#[derive(serde::Serialize, serde::Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Email,
    Number,
}
impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Email => "email",
            FieldType::Number => "number",
        }
    }
}
impl FromStr for FieldType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(FieldType::Text),
            "email" => Ok(FieldType::Email),
            "number" => Ok(FieldType::Number),
            _ => Err(anyhow!("Unknown field type: {s}")),
        }
    }
}
impl_sqlx_text_type_and_decode!(FieldType);

// position in the posted list is the field's order, ord is assigned on insert
#[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug, Clone)]
pub struct FieldSpec {
    pub field_name: String,
    pub field_type: FieldType,
    pub is_required: bool,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(serde::Serialize, serde::Deserialize, FromRow, PartialEq, Debug, Clone)]
pub struct FieldRecord {
    pub id: FieldId,
    pub event_id: EventId,
    pub field_name: String,
    pub field_type: FieldType,
    pub is_required: bool,
    pub is_default: bool,
    pub ord: i64,
}

pub(crate) async fn load_event_fields(event_id: EventId, db: &State<DbPool>) -> Result<Vec<FieldRecord>, anyhow::Error> {
    let fields = sqlx::query_as::<_, FieldRecord>("SELECT * FROM registration_fields WHERE event_id=? ORDER BY ord")
        .bind(event_id)
        .fetch_all(&db.0)
        .await.map_err(tee_sqlx_error)?;
    Ok(fields)
}

pub const DEFAULT_FIELD_CATALOG: [(&str, FieldType); 4] = [
    ("Mobile Number", FieldType::Number),
    ("Department", FieldType::Text),
    ("Year of Study", FieldType::Number),
    ("Roll Number", FieldType::Text),
];

struct DefaultField {
    field_name: &'static str,
    field_type: FieldType,
    enabled: bool,
    is_required: bool,
}

// nothing is persisted until the whole event draft is posted
pub struct SchemaBuilder {
    defaults: Vec<DefaultField>,
    customs: Vec<FieldSpec>,
}
impl SchemaBuilder {
    pub fn new() -> Self {
        let defaults = DEFAULT_FIELD_CATALOG.iter()
            .map(|(field_name, field_type)| DefaultField {
                field_name,
                field_type: *field_type,
                enabled: false,
                is_required: false,
            })
            .collect();
        Self { defaults, customs: Vec::new() }
    }
    pub fn set_default_enabled(&mut self, field_name: &str, enabled: bool) {
        if let Some(field) = self.defaults.iter_mut().find(|f| f.field_name == field_name) {
            field.enabled = enabled;
            if !enabled {
                field.is_required = false;
            }
        }
    }
    // no-op unless the default field is currently enabled
    pub fn set_default_required(&mut self, field_name: &str, is_required: bool) {
        if let Some(field) = self.defaults.iter_mut().find(|f| f.field_name == field_name && f.enabled) {
            field.is_required = is_required;
        }
    }
    pub fn add_custom(&mut self) -> usize {
        self.customs.push(FieldSpec {
            field_name: String::new(),
            field_type: FieldType::Text,
            is_required: false,
            is_default: false,
        });
        self.customs.len() - 1
    }
    pub fn custom_mut(&mut self, ix: usize) -> Option<&mut FieldSpec> {
        self.customs.get_mut(ix)
    }
    pub fn remove_custom(&mut self, ix: usize) {
        if ix < self.customs.len() {
            self.customs.remove(ix);
        }
    }
    // enabled defaults in catalog order, then custom fields in insertion order
    pub fn fields(&self) -> Vec<FieldSpec> {
        let mut fields = self.defaults.iter()
            .filter(|f| f.enabled)
            .map(|f| FieldSpec {
                field_name: f.field_name.to_string(),
                field_type: f.field_type,
                is_required: f.is_required,
                is_default: true,
            })
            .collect::<Vec<_>>();
        fields.extend(self.customs.iter().cloned());
        fields
    }
}
impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// the first violated rule wins and its message is the whole answer
pub fn validate_event(event: &PostedEvent, now: EvDateTime) -> Result<(), String> {
    validate_event_impl(event, Some(now))
}

// clock rules skipped for updates that touch neither instant, the stored
// dates already passed the full check once
pub fn validate_event_dates_kept(event: &PostedEvent) -> Result<(), String> {
    validate_event_impl(event, None)
}

fn validate_event_impl(event: &PostedEvent, now: Option<EvDateTime>) -> Result<(), String> {
    if event.title.trim().is_empty() {
        return Err("Event title must be set.".to_string());
    }
    if event.title.chars().count() > EVENT_TITLE_MAX_LEN {
        return Err(format!("Event title is limited to {EVENT_TITLE_MAX_LEN} characters."));
    }
    if event.description.trim().is_empty() {
        return Err("Event description must be set.".to_string());
    }
    if event.category.trim().is_empty() {
        return Err("Event category must be set.".to_string());
    }
    if let Some(now) = now {
        if event.date.0 <= now.0 {
            return Err("Event date must be in the future.".to_string());
        }
        if event.deadline.0 <= now.0 {
            return Err("Registration deadline must be in the future.".to_string());
        }
        if event.deadline.0 >= event.date.0 {
            return Err("Registration deadline must be before the event date.".to_string());
        }
    }
    if event.mode == Mode::Offline && event.venue.as_ref().map(|v| v.trim().is_empty()).unwrap_or(true) {
        return Err("Venue must be set for offline events.".to_string());
    }
    if event.participation_type == ParticipationType::Team && event.team_size.unwrap_or(0) < 2 {
        return Err("Team size must be at least 2 for team events.".to_string());
    }
    for field in &event.fields {
        if field.field_name.trim().is_empty() {
            return Err("Field name must be set.".to_string());
        }
        if field.field_name.chars().count() > FIELD_NAME_MAX_LEN {
            return Err(format!("Field name is limited to {FIELD_NAME_MAX_LEN} characters."));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn sample_draft(now: EvDateTime) -> PostedEvent {
        PostedEvent {
            title: "Robo Rally".to_string(),
            description: "Annual robotics meetup".to_string(),
            category: "Technical".to_string(),
            poster_url: None,
            date: EvDateTime(now.0 + TimeDelta::days(30)),
            deadline: EvDateTime(now.0 + TimeDelta::days(20)),
            mode: Mode::Online,
            venue: None,
            participation_type: ParticipationType::Individual,
            team_size: None,
            prizes: None,
            eligibility: None,
            fields: vec![],
        }
    }

    #[test]
    fn catalog_starts_disabled() {
        let builder = SchemaBuilder::new();
        assert!(builder.fields().is_empty());
    }

    #[test]
    fn default_field_toggling() {
        let mut builder = SchemaBuilder::new();
        // required cannot be set while the field is disabled
        builder.set_default_required("Mobile Number", true);
        builder.set_default_enabled("Mobile Number", true);
        let fields = builder.fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].field_name, "Mobile Number");
        assert_eq!(fields[0].field_type, FieldType::Number);
        assert!(!fields[0].is_required);
        assert!(fields[0].is_default);

        builder.set_default_required("Mobile Number", true);
        assert!(builder.fields()[0].is_required);
        // disabling clears the required flag
        builder.set_default_enabled("Mobile Number", false);
        builder.set_default_enabled("Mobile Number", true);
        assert!(!builder.fields()[0].is_required);
    }

    #[test]
    fn custom_fields_are_edited_by_position() {
        let mut builder = SchemaBuilder::new();
        let first = builder.add_custom();
        builder.custom_mut(first).unwrap().field_name = "GitHub profile".to_string();
        let second = builder.add_custom();
        let custom = builder.custom_mut(second).unwrap();
        custom.field_name = "T-shirt size".to_string();
        custom.field_type = FieldType::Number;
        builder.remove_custom(0);
        let fields = builder.fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].field_name, "T-shirt size");
        assert_eq!(fields[0].field_type, FieldType::Number);
        // out of range removal is ignored
        builder.remove_custom(7);
        assert_eq!(builder.fields().len(), 1);
    }

    #[test]
    fn schema_order_is_catalog_then_insertion() {
        let mut builder = SchemaBuilder::new();
        let ix = builder.add_custom();
        builder.custom_mut(ix).unwrap().field_name = "Team name".to_string();
        builder.set_default_enabled("Roll Number", true);
        builder.set_default_enabled("Department", true);
        let names = builder.fields().into_iter().map(|f| f.field_name).collect::<Vec<_>>();
        assert_eq!(names, vec!["Department", "Roll Number", "Team name"]);
    }

    #[test]
    fn first_violated_rule_wins() {
        let now = EvDateTime::now();
        let mut draft = sample_draft(now);
        draft.title = "  ".to_string();
        draft.deadline = EvDateTime(now.0 - TimeDelta::days(1));
        assert_eq!(validate_event(&draft, now), Err("Event title must be set.".to_string()));
        draft.title = "Robo Rally".to_string();
        assert_eq!(validate_event(&draft, now), Err("Registration deadline must be in the future.".to_string()));
        draft.deadline = EvDateTime(now.0 + TimeDelta::days(40));
        assert_eq!(validate_event(&draft, now), Err("Registration deadline must be before the event date.".to_string()));
        draft.deadline = EvDateTime(now.0 + TimeDelta::days(20));
        assert_eq!(validate_event(&draft, now), Ok(()));
    }

    #[test]
    fn dates_kept_variant_skips_clock_rules() {
        let now = EvDateTime::now();
        let mut draft = sample_draft(now);
        draft.date = EvDateTime(now.0 - TimeDelta::days(1));
        draft.deadline = EvDateTime(now.0 - TimeDelta::days(2));
        assert_eq!(validate_event_dates_kept(&draft), Ok(()));
        draft.category = String::new();
        assert_eq!(validate_event_dates_kept(&draft), Err("Event category must be set.".to_string()));
    }

    #[test]
    fn title_length_is_limited() {
        let now = EvDateTime::now();
        let mut draft = sample_draft(now);
        draft.title = "x".repeat(EVENT_TITLE_MAX_LEN + 1);
        assert_eq!(validate_event(&draft, now), Err("Event title is limited to 190 characters.".to_string()));
        draft.title = "x".repeat(EVENT_TITLE_MAX_LEN);
        assert_eq!(validate_event(&draft, now), Ok(()));
    }

    #[test]
    fn mode_and_participation_pairings() {
        let now = EvDateTime::now();
        let mut draft = sample_draft(now);
        draft.mode = Mode::Offline;
        assert_eq!(validate_event(&draft, now), Err("Venue must be set for offline events.".to_string()));
        draft.venue = Some("Main auditorium".to_string());
        assert_eq!(validate_event(&draft, now), Ok(()));
        draft.participation_type = ParticipationType::Team;
        assert_eq!(validate_event(&draft, now), Err("Team size must be at least 2 for team events.".to_string()));
        draft.team_size = Some(1);
        assert_eq!(validate_event(&draft, now), Err("Team size must be at least 2 for team events.".to_string()));
        draft.team_size = Some(4);
        assert_eq!(validate_event(&draft, now), Ok(()));
    }

    #[test]
    fn field_names_are_checked_last() {
        let now = EvDateTime::now();
        let mut draft = sample_draft(now);
        let mut builder = SchemaBuilder::new();
        builder.set_default_enabled("Department", true);
        builder.add_custom();
        draft.fields = builder.fields();
        assert_eq!(validate_event(&draft, now), Err("Field name must be set.".to_string()));
        draft.fields[1].field_name = "y".repeat(FIELD_NAME_MAX_LEN + 1);
        assert_eq!(validate_event(&draft, now), Err("Field name is limited to 100 characters.".to_string()));
        draft.fields[1].field_name = "Dietary preference".to_string();
        assert_eq!(validate_event(&draft, now), Ok(()));
    }
}
