use std::str::FromStr;
use anyhow::anyhow;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::serde::{Deserialize, Serialize};
use rocket::{Build, Rocket, State};
use sqlx::{query, query_as, FromRow};
use evhttpd_proc_macros::PatchFields;
use crate::auth::{user_info, UserId, UserInfo};
use crate::db::DbPool;
use crate::eligibility::{self, EligibilityState};
use crate::evdatetime::EvDateTime;
use crate::fields::{load_event_fields, validate_event, validate_event_dates_kept, FieldRecord, FieldSpec};
use crate::registration::registered_event_ids;
use crate::util::{status_any_error, status_sqlx_error};
use crate::{impl_sqlx_text_type_and_decode, SessionToken, SharedEvState};

pub type EventId = i64;

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Online,
    Offline,
}
impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Online => "online",
            Mode::Offline => "offline",
        }
    }
}
impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Mode::Online),
            "offline" => Ok(Mode::Offline),
            _ => Err(anyhow!("Unknown event mode: {s}")),
        }
    }
}
impl_sqlx_text_type_and_decode!(Mode);

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ParticipationType {
    Individual,
    Team,
}
impl ParticipationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipationType::Individual => "individual",
            ParticipationType::Team => "team",
        }
    }
}
impl FromStr for ParticipationType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "individual" => Ok(ParticipationType::Individual),
            "team" => Ok(ParticipationType::Team),
            _ => Err(anyhow!("Unknown participation type: {s}")),
        }
    }
}
impl_sqlx_text_type_and_decode!(ParticipationType);

#[derive(Serialize, Deserialize, FromRow, Clone, Debug)]
pub struct EventRecord {
    pub id: EventId,
    pub title: String,
    pub description: String,
    pub category: String,
    pub poster_url: Option<String>,
    pub date: EvDateTime,
    pub deadline: EvDateTime,
    pub mode: Mode,
    pub venue: Option<String>,
    pub participation_type: ParticipationType,
    pub team_size: Option<i64>,
    pub prizes: Option<String>,
    pub eligibility: Option<String>,
    pub organiser_id: UserId,
}

// the field list is the whole schema, ordered; immutable once the event exists
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PostedEvent {
    pub title: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub poster_url: Option<String>,
    pub date: EvDateTime,
    pub deadline: EvDateTime,
    pub mode: Mode,
    #[serde(default)]
    pub venue: Option<String>,
    pub participation_type: ParticipationType,
    #[serde(default)]
    pub team_size: Option<i64>,
    #[serde(default)]
    pub prizes: Option<String>,
    #[serde(default)]
    pub eligibility: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}
impl From<&EventRecord> for PostedEvent {
    fn from(event: &EventRecord) -> Self {
        Self {
            title: event.title.clone(),
            description: event.description.clone(),
            category: event.category.clone(),
            poster_url: event.poster_url.clone(),
            date: event.date,
            deadline: event.deadline,
            mode: event.mode,
            venue: event.venue.clone(),
            participation_type: event.participation_type,
            team_size: event.team_size,
            prizes: event.prizes.clone(),
            eligibility: event.eligibility.clone(),
            fields: vec![],
        }
    }
}

// absent members keep their stored value, the schema is never updatable
#[derive(Serialize, Deserialize, Clone, Debug, Default, PatchFields)]
pub struct EventPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub date: Option<EvDateTime>,
    #[serde(default)]
    pub deadline: Option<EvDateTime>,
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub participation_type: Option<ParticipationType>,
    #[serde(default)]
    pub team_size: Option<i64>,
    #[serde(default)]
    pub prizes: Option<String>,
    #[serde(default)]
    pub eligibility: Option<String>,
}

fn none_if_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl EventPatch {
    fn apply(self, event: &mut EventRecord) {
        if let Some(title) = self.title { event.title = title; }
        if let Some(description) = self.description { event.description = description; }
        if let Some(category) = self.category { event.category = category; }
        if let Some(poster_url) = self.poster_url { event.poster_url = none_if_blank(Some(poster_url)); }
        if let Some(date) = self.date { event.date = date; }
        if let Some(deadline) = self.deadline { event.deadline = deadline; }
        if let Some(mode) = self.mode { event.mode = mode; }
        if let Some(venue) = self.venue { event.venue = none_if_blank(Some(venue)); }
        if let Some(participation_type) = self.participation_type { event.participation_type = participation_type; }
        if let Some(team_size) = self.team_size { event.team_size = Some(team_size); }
        if let Some(prizes) = self.prizes { event.prizes = none_if_blank(Some(prizes)); }
        if let Some(eligibility) = self.eligibility { event.eligibility = none_if_blank(Some(eligibility)); }
    }
}

#[derive(Serialize, Deserialize, FromRow, Clone, Debug)]
pub struct EventListRecord {
    pub id: EventId,
    pub title: String,
    pub category: String,
    pub date: EvDateTime,
    pub organiser_name: String,
    pub registration_count: i64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct EventDetail {
    pub event: EventRecord,
    pub organiser_name: String,
    pub registration_count: i64,
    pub fields: Vec<FieldRecord>,
    pub viewer: EligibilityState,
}

pub async fn load_event(event_id: EventId, db: &State<DbPool>) -> Result<EventRecord, Custom<String>> {
    let pool = &db.0;
    let event = sqlx::query_as::<_, EventRecord>("SELECT * FROM events WHERE id=?")
        .bind(event_id)
        .fetch_optional(pool)
        .await
        .map_err(status_sqlx_error)?
        .ok_or(Custom(Status::NotFound, "Event not found.".to_string()))?;
    Ok(event)
}

async fn load_user_name(user_id: UserId, db: &State<DbPool>) -> Result<String, Custom<String>> {
    let name: (String,) = query_as("SELECT name FROM users WHERE id=?")
        .bind(user_id)
        .fetch_one(&db.0)
        .await
        .map_err(status_sqlx_error)?;
    Ok(name.0)
}

pub(crate) async fn load_registration_count(event_id: EventId, db: &State<DbPool>) -> Result<i64, Custom<String>> {
    let count: (i64,) = query_as("SELECT COUNT(*) FROM registrations WHERE event_id=?")
        .bind(event_id)
        .fetch_one(&db.0)
        .await
        .map_err(status_sqlx_error)?;
    Ok(count.0)
}

async fn save_new_event(event: &PostedEvent, organiser_id: UserId, db: &State<DbPool>) -> Result<EventId, anyhow::Error> {
    // venue and team size only make sense for their mode, keep storage clean
    let venue = if event.mode == Mode::Offline { event.venue.clone() } else { None };
    let team_size = if event.participation_type == ParticipationType::Team { event.team_size } else { None };
    let mut txn = db.0.begin().await?;
    let id: (i64,) = query_as(
        "INSERT INTO events(title, description, category, poster_url, date, deadline, mode, venue, participation_type, team_size, prizes, eligibility, organiser_id) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id")
        .bind(&event.title)
        .bind(&event.description)
        .bind(&event.category)
        .bind(none_if_blank(event.poster_url.clone()))
        .bind(event.date.0)
        .bind(event.deadline.0)
        .bind(event.mode.as_str())
        .bind(venue)
        .bind(event.participation_type.as_str())
        .bind(team_size)
        .bind(none_if_blank(event.prizes.clone()))
        .bind(none_if_blank(event.eligibility.clone()))
        .bind(organiser_id)
        .fetch_one(&mut *txn)
        .await?;
    for (ord, field) in event.fields.iter().enumerate() {
        query("INSERT INTO registration_fields(event_id, field_name, field_type, is_required, is_default, ord) VALUES (?, ?, ?, ?, ?, ?)")
            .bind(id.0)
            .bind(&field.field_name)
            .bind(field.field_type.as_str())
            .bind(field.is_required)
            .bind(field.is_default)
            .bind(ord as i64)
            .execute(&mut *txn)
            .await?;
    }
    txn.commit().await?;
    Ok(id.0)
}

async fn update_event_row(event: &EventRecord, db: &State<DbPool>) -> Result<(), anyhow::Error> {
    let venue = if event.mode == Mode::Offline { event.venue.clone() } else { None };
    let team_size = if event.participation_type == ParticipationType::Team { event.team_size } else { None };
    query("UPDATE events SET title=?, description=?, category=?, poster_url=?, date=?, deadline=?, mode=?, venue=?, participation_type=?, team_size=?, prizes=?, eligibility=?, updated=CURRENT_TIMESTAMP WHERE id=?")
        .bind(&event.title)
        .bind(&event.description)
        .bind(&event.category)
        .bind(&event.poster_url)
        .bind(event.date.0)
        .bind(event.deadline.0)
        .bind(event.mode.as_str())
        .bind(venue)
        .bind(event.participation_type.as_str())
        .bind(team_size)
        .bind(&event.prizes)
        .bind(&event.eligibility)
        .bind(event.id)
        .execute(&db.0)
        .await?;
    Ok(())
}

async fn event_drop(event_id: EventId, db: &State<DbPool>) -> Result<(), anyhow::Error> {
    let mut txn = db.0.begin().await?;
    for tbl in &["registrations", "registration_fields"] {
        sqlx::query(&format!("DELETE FROM {tbl} WHERE event_id=?"))
            .bind(event_id)
            .execute(&mut *txn).await?;
    }
    sqlx::query("DELETE FROM events WHERE id=?")
        .bind(event_id)
        .execute(&mut *txn).await?;
    txn.commit().await?;
    Ok(())
}

async fn event_detail(event_id: EventId, user: Option<UserInfo>, db: &State<DbPool>) -> Result<EventDetail, Custom<String>> {
    let event = load_event(event_id, db).await?;
    let fields = load_event_fields(event_id, db).await.map_err(status_any_error)?;
    let organiser_name = load_user_name(event.organiser_id, db).await?;
    let registration_count = load_registration_count(event_id, db).await?;
    let registered = match &user {
        Some(user) => registered_event_ids(user.id, db).await.map_err(status_any_error)?,
        None => vec![],
    };
    let viewer = eligibility::evaluate(user.as_ref(), &event, &registered, EvDateTime::now());
    Ok(EventDetail { event, organiser_name, registration_count, fields, viewer })
}

#[get("/api/events")]
async fn get_events(db: &State<DbPool>) -> Result<Json<Vec<EventListRecord>>, Custom<String>> {
    let events = sqlx::query_as::<_, EventListRecord>(
        "SELECT e.id, e.title, e.category, e.date, u.name AS organiser_name, \
         (SELECT COUNT(*) FROM registrations r WHERE r.event_id=e.id) AS registration_count \
         FROM events e JOIN users u ON u.id=e.organiser_id ORDER BY e.date")
        .fetch_all(&db.0)
        .await
        .map_err(status_sqlx_error)?;
    Ok(Json(events))
}

#[post("/api/events", data = "<posted>")]
async fn post_events(posted: Json<PostedEvent>, session_id: SessionToken, state: &State<SharedEvState>, db: &State<DbPool>) -> Result<Json<EventDetail>, Custom<String>> {
    let user = user_info(session_id, state).map_err(|e| Custom(Status::Unauthorized, e))?;
    let posted = posted.into_inner();
    validate_event(&posted, EvDateTime::now()).map_err(|e| Custom(Status::BadRequest, e))?;
    let event_id = save_new_event(&posted, user.id, db).await.map_err(status_any_error)?;
    info!("Event created, id: {}", event_id);
    let detail = event_detail(event_id, Some(user), db).await?;
    Ok(Json(detail))
}

#[get("/api/events/<event_id>", rank = 2)]
async fn get_event(event_id: EventId, db: &State<DbPool>) -> Result<Json<EventDetail>, Custom<String>> {
    let detail = event_detail(event_id, None, db).await?;
    Ok(Json(detail))
}
#[get("/api/events/<event_id>")]
async fn get_event_authorized(event_id: EventId, session_id: SessionToken, state: &State<SharedEvState>, db: &State<DbPool>) -> Result<Json<EventDetail>, Custom<String>> {
    let user = user_info(session_id, state).map_err(|e| Custom(Status::Unauthorized, e))?;
    let detail = event_detail(event_id, Some(user), db).await?;
    Ok(Json(detail))
}

#[put("/api/events/<event_id>", data = "<patch>")]
async fn put_event(event_id: EventId, patch: Json<EventPatch>, session_id: SessionToken, state: &State<SharedEvState>, db: &State<DbPool>) -> Result<Json<EventDetail>, Custom<String>> {
    let user = user_info(session_id, state).map_err(|e| Custom(Status::Unauthorized, e))?;
    let mut event = load_event(event_id, db).await?;
    if event.organiser_id != user.id {
        return Err(Custom(Status::Forbidden, "Forbidden: Only organiser can update.".to_string()));
    }
    let patch = patch.into_inner();
    if patch.is_empty_patch() {
        return Err(Custom(Status::BadRequest, "Nothing to update.".to_string()));
    }
    let dates_patched = patch.date.is_some() || patch.deadline.is_some();
    info!("Updating event {}, fields: {:?}", event_id, patch.patched_fields());
    patch.apply(&mut event);
    let draft = PostedEvent::from(&event);
    if dates_patched {
        validate_event(&draft, EvDateTime::now()).map_err(|e| Custom(Status::BadRequest, e))?;
    } else {
        validate_event_dates_kept(&draft).map_err(|e| Custom(Status::BadRequest, e))?;
    }
    update_event_row(&event, db).await.map_err(status_any_error)?;
    let detail = event_detail(event_id, Some(user), db).await?;
    Ok(Json(detail))
}

#[delete("/api/events/<event_id>")]
async fn delete_event(event_id: EventId, session_id: SessionToken, state: &State<SharedEvState>, db: &State<DbPool>) -> Result<(), Custom<String>> {
    let user = user_info(session_id, state).map_err(|e| Custom(Status::Unauthorized, e))?;
    let event = load_event(event_id, db).await?;
    if event.organiser_id != user.id {
        return Err(Custom(Status::Forbidden, "Forbidden: Only organiser can delete.".to_string()));
    }
    event_drop(event_id, db).await.map_err(status_any_error)?;
    info!("Event dropped, id: {}", event_id);
    Ok(())
}

#[get("/api/events/users/<user_id>/events")]
async fn get_user_events(user_id: UserId, session_id: SessionToken, state: &State<SharedEvState>, db: &State<DbPool>) -> Result<Json<Vec<EventListRecord>>, Custom<String>> {
    let user = user_info(session_id, state).map_err(|e| Custom(Status::Unauthorized, e))?;
    if user.id != user_id {
        return Err(Custom(Status::Forbidden, "Forbidden".to_string()));
    }
    let events = sqlx::query_as::<_, EventListRecord>(
        "SELECT e.id, e.title, e.category, e.date, u.name AS organiser_name, \
         (SELECT COUNT(*) FROM registrations r WHERE r.event_id=e.id) AS registration_count \
         FROM events e JOIN users u ON u.id=e.organiser_id WHERE e.organiser_id=? ORDER BY e.date")
        .bind(user_id)
        .fetch_all(&db.0)
        .await
        .map_err(status_sqlx_error)?;
    Ok(Json(events))
}

pub fn extend(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/", routes![
            get_events,
            post_events,
            get_event,
            get_event_authorized,
            put_event,
            delete_event,
            get_user_events,
        ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn mode_and_participation_parse_round_trip() {
        assert_eq!("online".parse::<Mode>().unwrap(), Mode::Online);
        assert_eq!("offline".parse::<Mode>().unwrap(), Mode::Offline);
        assert!("hybrid".parse::<Mode>().is_err());
        assert_eq!("team".parse::<ParticipationType>().unwrap(), ParticipationType::Team);
        assert_eq!(ParticipationType::Individual.as_str(), "individual");
    }

    #[test]
    fn patch_apply_keeps_absent_members() {
        let now = EvDateTime::now();
        let mut event = EventRecord {
            id: 1,
            title: "Robo Rally".to_string(),
            description: "Annual robotics meetup".to_string(),
            category: "Technical".to_string(),
            poster_url: Some("https://img.example/poster.png".to_string()),
            date: EvDateTime(now.0 + TimeDelta::days(30)),
            deadline: EvDateTime(now.0 + TimeDelta::days(20)),
            mode: Mode::Online,
            venue: None,
            participation_type: ParticipationType::Individual,
            team_size: None,
            prizes: None,
            eligibility: None,
            organiser_id: 1,
        };
        let patch = EventPatch {
            title: Some("Robo Rally 2026".to_string()),
            poster_url: Some("   ".to_string()),
            ..EventPatch::default()
        };
        assert!(!patch.is_empty_patch());
        assert_eq!(patch.patched_fields(), vec!["title", "poster_url"]);
        patch.apply(&mut event);
        assert_eq!(event.title, "Robo Rally 2026");
        // blank strings clear optional columns
        assert_eq!(event.poster_url, None);
        assert_eq!(event.description, "Annual robotics meetup");
        assert!(EventPatch::default().is_empty_patch());
    }
}
