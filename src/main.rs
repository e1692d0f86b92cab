#[macro_use] extern crate rocket;

use std::collections::HashMap;
use std::sync::RwLock;
use rocket::http::Status;
use rocket::request;
use serde::Deserialize;
use crate::auth::UserInfo;
use crate::db::DbPoolFairing;

mod db;
mod util;
mod evdatetime;
mod auth;
mod fields;
mod form;
mod submit;
mod eligibility;
mod event;
mod registration;

#[derive(Deserialize, Default)]
struct AppConfig {
    // when unset, posted claims are trusted as-is (development mode)
    auth_userinfo_url: Option<String>,
}

struct EvSession {
    user_info: UserInfo,
}

#[derive(Eq, Hash, PartialEq)]
struct SessionToken(String);
#[rocket::async_trait]
impl<'r> request::FromRequest<'r> for SessionToken {
    type Error = ();
    async fn from_request(request: &'r request::Request<'_>) -> request::Outcome<SessionToken, ()> {
        if let Some(auth_header) = request.headers().get_one("Authorization") {
            if let Some(token) = auth_header.strip_prefix("Bearer ") {
                return request::Outcome::Success(SessionToken(token.to_string()));
            }
        }
        request::Outcome::Forward(Status::Unauthorized)
    }
}

#[derive(Default)]
struct EvState {
    sessions: HashMap<SessionToken, EvSession>,
}
type SharedEvState = RwLock<EvState>;

#[get("/")]
fn index() -> String {
    format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

#[launch]
fn rocket() -> _ {
    let rocket = rocket::build()
        .attach(DbPoolFairing())
        .mount("/", routes![
            index,
        ]);
    let rocket = auth::extend(rocket);
    let rocket = event::extend(rocket);
    let rocket = registration::extend(rocket);

    let figment = rocket.figment();
    let cfg = figment.extract::<AppConfig>().unwrap_or_default();
    let rocket = rocket.manage(cfg);

    rocket.manage(SharedEvState::new(EvState::default()))
}
