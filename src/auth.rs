use anyhow::{anyhow, Context};
use rand::Rng;
use reqwest::header::AUTHORIZATION;
use rocket::{get, post, routes, Build, Rocket, State};
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde_json::Value;
use crate::{AppConfig, EvSession, SessionToken, SharedEvState};
use crate::db::DbPool;
use crate::util::{status_any_error, status_sqlx_error};

pub type UserId = i64;

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct UserInfo {
    pub(crate) id: UserId,
    pub(crate) name: String,
    pub(crate) email: String,
}

struct UserIdentity {
    ext_id: String,
    name: String,
    email: String,
}
impl TryFrom<&IdentityClaims> for UserIdentity {
    type Error = anyhow::Error;

    fn try_from(claims: &IdentityClaims) -> Result<Self, Self::Error> {
        fn to_string(val: &Value) -> String {
            val.as_str().map(|s| s.to_string()).unwrap_or_default()
        }
        let ext_id = to_string(&claims.sub);
        if ext_id.is_empty() {
            return Err(anyhow!("User id claim must be set"));
        };
        let email = to_string(&claims.email);
        if email.is_empty() {
            return Err(anyhow!("User email must be set"));
        };
        Ok(Self {
            ext_id,
            name: to_string(&claims.name),
            email,
        })
    }
}

pub fn generate_random_string(len: usize) -> String {
    const WOWELS: &str = "aeiouy";
    const CONSONANTS: &str = "bcdfghjklmnopqrstvwxz";
    let mut rng = rand::rng();
    (0..len)
        .map(|n| {
            let charset = if n % 2 == 0 { CONSONANTS } else { WOWELS };
            let idx = rng.random_range(0..charset.len());
            charset.chars().nth(idx).unwrap()
        })
        .collect()
}

/// Claims as presented by the identity provider's userinfo endpoint.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct IdentityClaims {
    pub(crate) sub: Value,
    pub(crate) name: Value,
    pub(crate) email: Value,
}

#[derive(serde::Serialize, serde::Deserialize)]
pub struct PostedSession {
    pub(crate) access_token: String,
    #[serde(default)]
    pub(crate) claims: Option<IdentityClaims>,
}

#[derive(serde::Serialize, serde::Deserialize)]
pub struct SessionInfo {
    pub(crate) token: String,
    pub(crate) user: UserInfo,
}

pub fn user_info(session_id: SessionToken, state: &State<SharedEvState>) -> Result<UserInfo, String> {
    state.read().map_err(|e| e.to_string())?
        .sessions.get(&session_id).map(|s| s.user_info.clone()).ok_or("Session expired".to_string())
}

#[post("/api/auth/session", data = "<posted>")]
async fn post_session(posted: Json<PostedSession>, cfg: &State<AppConfig>, db: &State<DbPool>, state: &State<SharedEvState>) -> Result<Json<SessionInfo>, Custom<String>> {
    let posted = posted.into_inner();
    let claims = if let Some(userinfo_url) = &cfg.auth_userinfo_url {
        // The access token is only trusted after the provider vouches for it.
        let rq = reqwest::Client::builder()
            .build()
            .context("failed to build reqwest client").map_err(status_any_error)?
            .get(userinfo_url)
            .header(AUTHORIZATION, format!("Bearer {}", posted.access_token));
        let response = rq.send()
            .await
            .context("failed to complete request").map_err(status_any_error)?;
        response
            .json::<IdentityClaims>()
            .await
            .context("failed to deserialize response").map_err(status_any_error)?
    } else {
        posted.claims.ok_or(Custom(Status::BadRequest, "Missing identity claims.".to_string()))?
    };
    let identity = UserIdentity::try_from(&claims).map_err(|e| Custom(Status::BadRequest, e.to_string()))?;
    let user_id = match sqlx::query_as::<_, (i64,)>(
        "INSERT INTO users (ext_id, name, email) VALUES (?, ?, ?) \
         ON CONFLICT(ext_id) DO UPDATE SET name=excluded.name, email=excluded.email, last_login=CURRENT_TIMESTAMP \
         RETURNING id")
        .bind(&identity.ext_id)
        .bind(&identity.name)
        .bind(&identity.email)
        .fetch_one(&db.0)
        .await
    {
        Ok((id,)) => id,
        Err(sqlx::Error::Database(err)) if err.kind() == sqlx::error::ErrorKind::UniqueViolation => {
            return Err(Custom(Status::BadRequest, "Email already registered.".to_string()));
        }
        Err(err) => return Err(status_sqlx_error(err)),
    };
    let user_info = UserInfo { id: user_id, name: identity.name, email: identity.email };
    fn generate_session_token() -> String {
        generate_random_string(32)
    }
    let token = generate_session_token();
    info!("User log in, name: {}, email: {}", user_info.name, user_info.email);
    state.write().expect("not poisoned")
        .sessions.insert(SessionToken(token.clone()), EvSession { user_info: user_info.clone() });
    Ok(Json(SessionInfo { token, user: user_info }))
}

#[get("/api/auth/me")]
fn get_me(session_id: SessionToken, state: &State<SharedEvState>) -> Result<Json<UserInfo>, Custom<String>> {
    let user = user_info(session_id, state).map_err(|e| Custom(Status::Unauthorized, e))?;
    Ok(Json(user))
}

pub fn extend(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/", routes![
            post_session,
            get_me,
        ])
}
