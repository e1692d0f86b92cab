use log::info;
use rocket::http::{ContentType, Status};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::serde::{Deserialize, Serialize};
use rocket::{Build, Rocket, State};
use sqlx::{query_as, FromRow};
use crate::auth::{user_info, UserId};
use crate::db::DbPool;
use crate::eligibility;
use crate::evdatetime::EvDateTime;
use crate::event::{load_event, EventId};
use crate::fields::{load_event_fields, FieldId, FieldRecord};
use crate::form::{first_missing_required, submit_payload, FieldResponse, ResponseMap};
use crate::util::{status_any_error, status_sqlx_error, tee_sqlx_error};
use crate::{impl_sqlx_json_text_type_and_decode, SessionToken, SharedEvState};

pub type RegistrationId = i64;

// response list as stored in the registrations row: schema order, unknown
// field ids already dropped
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
#[serde(transparent)]
pub struct FieldResponses(pub Vec<FieldResponse>);
impl_sqlx_json_text_type_and_decode!(FieldResponses);

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PostedRegistration {
    #[serde(default)]
    pub responses: Vec<FieldResponse>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RegistrationReceipt {
    pub registration_id: RegistrationId,
    pub event_id: EventId,
}

pub(crate) async fn registered_event_ids(user_id: UserId, db: &State<DbPool>) -> Result<Vec<EventId>, anyhow::Error> {
    let ids = query_as::<_, (i64,)>("SELECT event_id FROM registrations WHERE user_id=?")
        .bind(user_id)
        .fetch_all(&db.0)
        .await.map_err(tee_sqlx_error)?;
    Ok(ids.into_iter().map(|(id,)| id).collect())
}

#[post("/api/events/<event_id>/register", data = "<posted>")]
async fn post_register(event_id: EventId, posted: Json<PostedRegistration>, session_id: SessionToken, state: &State<SharedEvState>, db: &State<DbPool>) -> Result<Json<RegistrationReceipt>, Custom<String>> {
    let user = user_info(session_id, state).map_err(|e| Custom(Status::Unauthorized, e))?;
    let event = load_event(event_id, db).await?;
    if event.organiser_id == user.id {
        return Err(Custom(Status::Forbidden, "Organiser cannot register for own event.".to_string()));
    }
    if eligibility::registration_closed(&event, EvDateTime::now()) {
        return Err(Custom(Status::Forbidden, "Registration deadline has passed.".to_string()));
    }
    let schema = load_event_fields(event_id, db).await.map_err(status_any_error)?;
    // a duplicated field id in the posted list keeps the later value
    let mut responses = ResponseMap::new();
    for response in &posted.responses {
        responses.set(response.field_id, &response.response_value);
    }
    if let Some(field) = first_missing_required(&schema, &responses) {
        return Err(Custom(Status::BadRequest, format!("Field '{}' is required.", field.field_name)));
    }
    let responses = FieldResponses(submit_payload(&schema, &responses));
    let responses_json = serde_json::to_string(&responses).map_err(|e| status_any_error(e.into()))?;
    // the UNIQUE (event_id, user_id) constraint is what makes a second
    // submit fail, any earlier check is cosmetic
    let id = match query_as::<_, (i64,)>("INSERT INTO registrations(event_id, user_id, responses) VALUES (?, ?, ?) RETURNING id")
        .bind(event_id)
        .bind(user.id)
        .bind(&responses_json)
        .fetch_one(&db.0)
        .await
    {
        Ok((id,)) => id,
        Err(sqlx::Error::Database(err)) if err.kind() == sqlx::error::ErrorKind::UniqueViolation => {
            return Err(Custom(Status::Conflict, "Already registered for this event.".to_string()));
        }
        Err(err) => return Err(status_sqlx_error(err)),
    };
    info!("Registration created, id: {}, event: {}, user: {}", id, event_id, user.email);
    Ok(Json(RegistrationReceipt { registration_id: id, event_id }))
}

#[derive(Serialize, Deserialize, FromRow, Clone, Debug)]
pub struct RegistrationListRecord {
    pub event_id: EventId,
    pub event_title: String,
    pub event_date: EvDateTime,
}

#[get("/api/events/users/<user_id>/registrations")]
async fn get_user_registrations(user_id: UserId, session_id: SessionToken, state: &State<SharedEvState>, db: &State<DbPool>) -> Result<Json<Vec<RegistrationListRecord>>, Custom<String>> {
    let user = user_info(session_id, state).map_err(|e| Custom(Status::Unauthorized, e))?;
    if user.id != user_id {
        return Err(Custom(Status::Forbidden, "Forbidden".to_string()));
    }
    let registrations = query_as::<_, RegistrationListRecord>(
        "SELECT r.event_id, e.title AS event_title, e.date AS event_date \
         FROM registrations r JOIN events e ON e.id=r.event_id WHERE r.user_id=? ORDER BY e.date")
        .bind(user_id)
        .fetch_all(&db.0)
        .await
        .map_err(status_sqlx_error)?;
    Ok(Json(registrations))
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ParticipantField {
    pub field_id: FieldId,
    pub field_name: String,
    pub response_value: String,
}
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Participant {
    pub name: String,
    pub email: String,
    pub fields: Vec<ParticipantField>,
}
#[derive(FromRow, Debug)]
struct RosterRow {
    name: String,
    email: String,
    responses: FieldResponses,
}

async fn load_roster(event_id: EventId, schema: &[FieldRecord], db: &State<DbPool>) -> Result<Vec<Participant>, anyhow::Error> {
    let rows = query_as::<_, RosterRow>(
        "SELECT u.name, u.email, r.responses FROM registrations r JOIN users u ON u.id=r.user_id WHERE r.event_id=? ORDER BY r.id")
        .bind(event_id)
        .fetch_all(&db.0)
        .await.map_err(tee_sqlx_error)?;
    let participants = rows.into_iter()
        .map(|row| {
            let fields = schema.iter()
                .filter_map(|f| row.responses.0.iter()
                    .find(|r| r.field_id == f.id)
                    .map(|r| ParticipantField {
                        field_id: f.id,
                        field_name: f.field_name.clone(),
                        response_value: r.response_value.clone(),
                    }))
                .collect();
            Participant { name: row.name, email: row.email, fields }
        })
        .collect();
    Ok(participants)
}

async fn organiser_roster(event_id: EventId, session_id: SessionToken, state: &State<SharedEvState>, db: &State<DbPool>) -> Result<(Vec<FieldRecord>, Vec<Participant>), Custom<String>> {
    let user = user_info(session_id, state).map_err(|e| Custom(Status::Unauthorized, e))?;
    let event = load_event(event_id, db).await?;
    if event.organiser_id != user.id {
        return Err(Custom(Status::Forbidden, "Forbidden: Only organiser can view participants.".to_string()));
    }
    let schema = load_event_fields(event_id, db).await.map_err(status_any_error)?;
    let participants = load_roster(event_id, &schema, db).await.map_err(status_any_error)?;
    Ok((schema, participants))
}

#[get("/api/events/<event_id>/participants")]
async fn get_participants(event_id: EventId, session_id: SessionToken, state: &State<SharedEvState>, db: &State<DbPool>) -> Result<Json<Vec<Participant>>, Custom<String>> {
    let (_, participants) = organiser_roster(event_id, session_id, state, db).await?;
    Ok(Json(participants))
}

// Name, Email, then one column per schema field; a skipped optional field is
// an empty cell. Columns are joined by field id, names are not unique.
pub fn roster_to_csv(schema: &[FieldRecord], participants: &[Participant]) -> Result<String, anyhow::Error> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    let mut header = vec!["Name".to_string(), "Email".to_string()];
    header.extend(schema.iter().map(|f| f.field_name.clone()));
    wtr.write_record(&header)?;
    for participant in participants {
        let mut record = vec![participant.name.clone(), participant.email.clone()];
        for f in schema {
            let value = participant.fields.iter()
                .find(|r| r.field_id == f.id)
                .map(|r| r.response_value.clone())
                .unwrap_or_default();
            record.push(value);
        }
        wtr.write_record(&record)?;
    }
    let data = wtr.into_inner()?;
    Ok(String::from_utf8(data)?)
}

#[get("/api/events/<event_id>/participants/csv")]
async fn get_participants_csv(event_id: EventId, session_id: SessionToken, state: &State<SharedEvState>, db: &State<DbPool>) -> Result<(ContentType, String), Custom<String>> {
    let (schema, participants) = organiser_roster(event_id, session_id, state, db).await?;
    let csv = roster_to_csv(&schema, &participants).map_err(status_any_error)?;
    Ok((ContentType::CSV, csv))
}

pub fn extend(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/", routes![
            post_register,
            get_user_registrations,
            get_participants,
            get_participants_csv,
        ])
}
