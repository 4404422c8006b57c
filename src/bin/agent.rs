use fleetwatch::{Metric, Readings, collector::SECRET_HEADER, util::AgentSettings};
use rocket::{
    State,
    figment::Figment,
    get,
    http::Status,
    launch,
    request::{FromRequest, Outcome},
    routes,
    serde::json::Json,
};
use sysinfo::System;
use tracing::{debug, instrument};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Host readings; database counters are left to database-aware agents
#[get("/snapshot")]
#[instrument(skip_all)]
fn snapshot(_secret: SecretKey) -> Json<Readings> {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let mut readings = Readings::default().with(Metric::CpuPercent, f64::from(sys.global_cpu_usage()));

    if sys.total_memory() > 0 {
        let memory = sys.used_memory() as f64 / sys.total_memory() as f64 * 100.0;
        readings = readings.with(Metric::MemoryPercent, memory);
    }

    debug!("serving snapshot: {readings:?}");

    Json(readings)
}

#[get("/ping")]
fn ping() {}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new()
        .with_target("fleetwatch_agent", tracing::metadata::LevelFilter::TRACE)
        .with_target("fleetwatch", tracing::metadata::LevelFilter::DEBUG);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(true),
        )
        .with(filter)
        .init();
}

fn get_config(settings: &AgentSettings) -> Figment {
    rocket::Config::figment()
        .merge(("port", settings.port))
        .merge(("address", settings.address))
        .merge(("workers", 1))
}

#[launch]
fn rocket() -> _ {
    init();
    let settings = AgentSettings::from_env();
    let figment = get_config(&settings);

    rocket::custom(figment)
        .manage(settings)
        .mount("/", routes![snapshot, ping])
}

#[derive(Debug)]
struct SecretKey;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SecretKey {
    type Error = ();

    async fn from_request(request: &'r rocket::Request<'_>) -> Outcome<Self, Self::Error> {
        let expected = match request.guard::<&State<AgentSettings>>().await {
            Outcome::Success(settings) => settings.secret.clone(),
            _ => return Outcome::Error((Status::InternalServerError, ())),
        };

        let Some(expected) = expected else {
            return Outcome::Success(SecretKey);
        };

        match request.headers().get_one(SECRET_HEADER) {
            Some(passed) if passed == expected => Outcome::Success(SecretKey),
            _ => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}
