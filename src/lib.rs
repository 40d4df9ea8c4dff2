pub mod allocation;
pub mod auth;
pub mod clock;
pub mod conflict;
pub mod directory;
pub mod error;
pub mod handlers;
pub mod ical;
pub mod ledger;
pub mod models;
pub mod openapi;
pub mod policy;
pub mod schedule;
pub mod settings;
pub mod store;
pub mod studio;
pub mod validation;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::LatencyUnit;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::clock::SystemClock;
use crate::directory::SeedData;
use crate::ical::ICalExporter;
use crate::openapi::ApiDoc;
use crate::settings::Settings;
use crate::store::{Backend, FileBackend, MemoryBackend, Repository};
use crate::studio::Studio;

#[derive(Clone)]
pub struct AppState {
    pub(crate) settings: Settings,
    pub(crate) studio: Studio,
    pub(crate) exporter: Arc<ICalExporter>,
}

impl AppState {
    pub fn new(settings: Settings, studio: Studio) -> Self {
        let exporter = Arc::new(ICalExporter::new(settings.studio_name.clone()));
        Self {
            settings,
            studio,
            exporter,
        }
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;

    let env_filter = if settings.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .without_time()
        .init();

    let backend: Arc<dyn Backend> = match &settings.data_dir {
        Some(dir) => {
            info!("Storing studio data under {dir}");
            Arc::new(FileBackend::open(dir)?)
        }
        None => {
            info!("No data_dir configured, studio data lives in memory");
            Arc::new(MemoryBackend::new())
        }
    };
    let repo = Repository::new(backend, settings.max_write_attempts);
    let clock = Arc::new(SystemClock::new(settings.tz()?));
    let studio = Studio::new(repo, settings.studio_policy()?, clock);

    if let Some(path) = &settings.seed_file {
        let seed: SeedData = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        studio.directory().seed_if_empty(seed)?;
    }

    let state = AppState::new(settings, studio);
    let app = build_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], state.settings.port));
    info!("Starting {} booking API on {addr}", state.settings.studio_name);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    let mut router = Router::new()
        .route("/", get(handlers::root))
        .route("/healthz/live", get(handlers::healthz_live))
        .route("/healthz/ready", get(handlers::healthz_ready))
        .route(
            "/classes",
            get(handlers::list_classes).post(handlers::create_class),
        )
        .route(
            "/classes/{id}",
            get(handlers::get_class)
                .patch(handlers::update_class)
                .delete(handlers::delete_class),
        )
        .route("/classes/{id}/status", post(handlers::set_class_status))
        .route("/classes/{id}/bookings", get(handlers::class_bookings))
        .route(
            "/bookings",
            get(handlers::list_bookings).post(handlers::create_booking),
        )
        .route("/bookings/{id}", get(handlers::get_booking))
        .route("/bookings/{id}/cancel", post(handlers::cancel_booking))
        .route("/bookings/{id}/can-cancel", get(handlers::can_cancel))
        .route("/bookings/{id}/pay", post(handlers::mark_paid))
        .route(
            "/class-types",
            get(handlers::list_class_types).post(handlers::create_class_type),
        )
        .route(
            "/class-types/{id}",
            delete(handlers::delete_class_type).patch(handlers::update_class_type),
        )
        .route(
            "/equipment",
            get(handlers::list_equipment).post(handlers::create_equipment),
        )
        .route("/equipment/{id}", delete(handlers::delete_equipment))
        .route("/equipment/{id}/status", post(handlers::set_equipment_status))
        .route(
            "/users",
            get(handlers::list_users).post(handlers::create_user),
        )
        .route("/users/{id}/active", post(handlers::set_user_active))
        .route("/timetable", get(handlers::get_timetable))
        .route("/timetable.ical", get(handlers::get_ical))
        .route("/events", get(handlers::events))
        .with_state(state.clone());

    if state.settings.enable_swagger {
        let openapi = ApiDoc::openapi();
        let swagger = SwaggerUi::new("/docs").url("/openapi.json", openapi);
        router = router.merge(swagger);
    }

    router.layer(trace_layer)
}
