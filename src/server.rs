use rocket::http::Status;
use rocket::{get, routes, Build, Rocket, Shutdown, State};

use crate::config::ServerConfig;
use crate::handler::{Handler, HandlerError};

/// `GET /?file=<key>`: record one comment summary for `file`.
///
/// 200 with an empty body on success, 400 when `file` is missing or unsafe,
/// 500 with `<stage>: <message>` otherwise. Server shutdown cancels requests
/// still in flight.
#[get("/?<file>")]
async fn record(
    file: Option<String>,
    handler: &State<Handler>,
    shutdown: Shutdown,
) -> (Status, String) {
    match handler.handle(file.as_deref(), shutdown).await {
        Ok(_) => (Status::Ok, String::new()),
        Err(e) => (status(&e), error_body(&e)),
    }
}

/// 400 for caller mistakes, 500 for everything past validation.
fn status(e: &HandlerError) -> Status {
    match e {
        HandlerError::Validation(_) => Status::BadRequest,
        _ => Status::InternalServerError,
    }
}

fn error_body(e: &HandlerError) -> String {
    match e {
        HandlerError::Validation(_) => e.to_string(),
        _ => format!("{}: {e}", e.stage()),
    }
}

/// Build the Rocket instance serving the trigger endpoint.
pub fn build(handler: Handler, config: &ServerConfig) -> Rocket<Build> {
    let figment = rocket::Config::figment()
        .merge(("address", config.address))
        .merge(("port", config.port));

    rocket::custom(figment)
        .manage(handler)
        .mount("/", routes![record])
}
