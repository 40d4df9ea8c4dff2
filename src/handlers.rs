use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{Json, http::StatusCode, response::IntoResponse};
use axum_extra::extract::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use chrono::{Datelike, Duration, NaiveDate};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error};
use utoipa::ToSchema;

use crate::auth::{CurrentUser, verify_token};
use crate::directory::{ClassTypePatch, NewClassType, NewEquipment, NewUser};
use crate::error::{ApiError, BookingError};
use crate::models::{
    Booking, ClassInstance, ClassStatus, ClassSummary, ClassType, Equipment, EquipmentStatus, Id,
    Role, User,
};
use crate::schedule::{ClassDraft, ClassPatch, ClassQuery};
use crate::studio::Studio;
use crate::{AppState, validation::validate_weeks};

#[derive(Debug, Deserialize)]
pub struct TimetableQuery {
    #[serde(default = "default_weeks")]
    pub weeks: u8,
    pub token: Option<String>,
}

fn default_weeks() -> u8 {
    1
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BookingListQuery {
    pub client_id: Option<Id>,
}

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct NewBooking {
    pub class_id: Id,
    /// Required when an admin books on behalf of a client.
    #[serde(default)]
    pub client_id: Option<Id>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CanCancelResponse {
    pub can_cancel: bool,
    pub notice_hours: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StatusChange {
    pub status: ClassStatus,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EquipmentStatusChange {
    pub status: EquipmentStatus,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ActiveChange {
    pub active: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ClassUpdateResponse {
    pub class: ClassInstance,
    pub promoted: Vec<Id>,
}

fn current_monday(today: NaiveDate) -> NaiveDate {
    today - Duration::days(i64::from(today.weekday().num_days_from_monday()))
}

/// Runs `op` on the blocking pool. The studio core takes locks and writes
/// its files synchronously, so it must not run on a runtime worker.
pub(crate) async fn blocking<T, F>(studio: &Studio, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Studio) -> Result<T, BookingError> + Send + 'static,
{
    let studio = studio.clone();
    tokio::task::spawn_blocking(move || op(&studio))
        .await
        .map_err(|err| {
            error!("Studio task failed: {err}");
            ApiError::Internal("Studio task failed".into())
        })?
        .map_err(ApiError::from)
}

#[utoipa::path(get, path = "/", tag = "studio")]
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Studio Booking API",
        "endpoints": {
            "/classes": "Scheduled class instances",
            "/bookings": "Bookings of the current user",
            "/timetable": "Timetable data as JSON",
            "/timetable.ical": "Download timetable as iCal file",
            "/events": "Server-sent change notifications"
        }
    }))
}

#[utoipa::path(get, path = "/healthz/live", tag = "studio")]
pub async fn healthz_live() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[utoipa::path(
    get,
    path = "/healthz/ready",
    responses(
        (status = 200, description = "Storage is reachable"),
        (status = 500, description = "Storage unavailable")
    ),
    tag = "studio"
)]
pub async fn healthz_ready(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    blocking(&state.studio, |studio| studio.directory().list_class_types()).await?;
    Ok(Json(serde_json::json!({"status": "ok"})))
}

#[utoipa::path(
    get,
    path = "/classes",
    params(ClassQuery),
    responses((status = 200, description = "Matching classes ordered by start", body = [ClassInstance])),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "classes"
)]
pub async fn list_classes(
    State(state): State<AppState>,
    CurrentUser(_actor): CurrentUser,
    Query(query): Query<ClassQuery>,
) -> Result<Json<Vec<ClassInstance>>, ApiError> {
    let classes = blocking(&state.studio, move |studio| studio.schedule().list_classes(&query)).await?;
    Ok(Json(classes))
}

#[utoipa::path(
    post,
    path = "/classes",
    request_body = ClassDraft,
    responses(
        (status = 201, description = "Class scheduled", body = ClassInstance),
        (status = 400, description = "Invalid draft or outside opening hours"),
        (status = 403, description = "Admin role required"),
        (status = 409, description = "Instructor or equipment already taken")
    ),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "classes"
)]
pub async fn create_class(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Json(draft): Json<ClassDraft>,
) -> Result<impl IntoResponse, ApiError> {
    let class = blocking(&state.studio, move |studio| studio.create_class(&actor, draft)).await?;
    Ok((StatusCode::CREATED, Json(class)))
}

#[utoipa::path(
    get,
    path = "/classes/{id}",
    params(("id" = String, Path, description = "Class id")),
    responses(
        (status = 200, body = ClassInstance),
        (status = 404, description = "Unknown class")
    ),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "classes"
)]
pub async fn get_class(
    State(state): State<AppState>,
    CurrentUser(_actor): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ClassInstance>, ApiError> {
    let class = blocking(&state.studio, move |studio| studio.schedule().get_class(&id)).await?;
    Ok(Json(class))
}

#[utoipa::path(
    patch,
    path = "/classes/{id}",
    params(("id" = String, Path, description = "Class id")),
    request_body = ClassPatch,
    responses(
        (status = 200, body = ClassUpdateResponse),
        (status = 400, description = "Invalid edit"),
        (status = 409, description = "Instructor or equipment already taken")
    ),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "classes"
)]
pub async fn update_class(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
    Json(patch): Json<ClassPatch>,
) -> Result<Json<ClassUpdateResponse>, ApiError> {
    let update =
        blocking(&state.studio, move |studio| studio.update_class(&actor, &id, patch)).await?;
    Ok(Json(ClassUpdateResponse {
        class: update.class,
        promoted: update.promoted,
    }))
}

#[utoipa::path(
    delete,
    path = "/classes/{id}",
    params(("id" = String, Path, description = "Class id")),
    responses(
        (status = 200, description = "Class withdrawn", body = ClassInstance),
        (status = 409, description = "Class still has active bookings")
    ),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "classes"
)]
pub async fn delete_class(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ClassInstance>, ApiError> {
    let class = blocking(&state.studio, move |studio| studio.delete_class(&actor, &id)).await?;
    Ok(Json(class))
}

#[utoipa::path(
    post,
    path = "/classes/{id}/status",
    params(("id" = String, Path, description = "Class id")),
    request_body = StatusChange,
    responses(
        (status = 200, body = ClassInstance),
        (status = 400, description = "Transition not allowed")
    ),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "classes"
)]
pub async fn set_class_status(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
    Json(change): Json<StatusChange>,
) -> Result<Json<ClassInstance>, ApiError> {
    let class = blocking(&state.studio, move |studio| {
        studio.set_class_status(&actor, &id, change.status)
    })
    .await?;
    Ok(Json(class))
}

#[utoipa::path(
    get,
    path = "/classes/{id}/bookings",
    params(("id" = String, Path, description = "Class id")),
    responses((status = 200, body = [Booking])),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "classes"
)]
pub async fn class_bookings(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<Booking>>, ApiError> {
    let bookings = blocking(&state.studio, move |studio| studio.class_bookings(&actor, &id)).await?;
    Ok(Json(bookings))
}

#[utoipa::path(
    get,
    path = "/bookings",
    params(("client_id" = Option<String>, Query, description = "Admins only: bookings of this client")),
    responses((status = 200, body = [Booking])),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "bookings"
)]
pub async fn list_bookings(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Query(query): Query<BookingListQuery>,
) -> Result<Json<Vec<Booking>>, ApiError> {
    let bookings = blocking(&state.studio, move |studio| {
        studio.bookings(&actor, query.client_id.as_deref())
    })
    .await?;
    Ok(Json(bookings))
}

#[utoipa::path(
    post,
    path = "/bookings",
    request_body = NewBooking,
    responses(
        (status = 201, description = "Confirmed or waiting booking", body = Booking),
        (status = 409, description = "Already booked or class not bookable"),
        (status = 422, description = "Booking limit reached")
    ),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "bookings"
)]
pub async fn create_booking(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Json(request): Json<NewBooking>,
) -> Result<impl IntoResponse, ApiError> {
    let booking = blocking(&state.studio, move |studio| {
        studio.book(
            &actor,
            &request.class_id,
            request.client_id.as_deref(),
            request.notes,
        )
    })
    .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

#[utoipa::path(
    get,
    path = "/bookings/{id}",
    params(("id" = String, Path, description = "Booking id")),
    responses(
        (status = 200, body = Booking),
        (status = 403, description = "Booking belongs to someone else"),
        (status = 404, description = "Unknown booking")
    ),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "bookings"
)]
pub async fn get_booking(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Booking>, ApiError> {
    let booking = blocking(&state.studio, move |studio| studio.visible_booking(&actor, &id)).await?;
    Ok(Json(booking))
}

#[utoipa::path(
    post,
    path = "/bookings/{id}/cancel",
    params(("id" = String, Path, description = "Booking id")),
    request_body(content = CancelRequest, description = "Optional cancellation reason"),
    responses(
        (status = 200, body = CancelResponse),
        (status = 403, description = "Booking belongs to someone else"),
        (status = 422, description = "Too close to the start of the class")
    ),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "bookings"
)]
pub async fn cancel_booking(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
    request: Option<Json<CancelRequest>>,
) -> Result<Json<CancelResponse>, ApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let cancelled =
        blocking(&state.studio, move |studio| studio.cancel(&actor, &id, request.reason)).await?;
    Ok(Json(CancelResponse { cancelled }))
}

#[utoipa::path(
    get,
    path = "/bookings/{id}/can-cancel",
    params(("id" = String, Path, description = "Booking id")),
    responses((status = 200, body = CanCancelResponse)),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "bookings"
)]
pub async fn can_cancel(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<CanCancelResponse>, ApiError> {
    let can_cancel = blocking(&state.studio, move |studio| studio.can_cancel(&actor, &id)).await?;
    Ok(Json(CanCancelResponse {
        can_cancel,
        notice_hours: state.studio.policy().cancellation.notice().num_hours(),
    }))
}

#[utoipa::path(
    post,
    path = "/bookings/{id}/pay",
    params(("id" = String, Path, description = "Booking id")),
    responses(
        (status = 200, body = Booking),
        (status = 400, description = "Cancelled or refunded booking")
    ),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "bookings"
)]
pub async fn mark_paid(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Booking>, ApiError> {
    let booking = blocking(&state.studio, move |studio| studio.mark_paid(&actor, &id)).await?;
    Ok(Json(booking))
}

#[utoipa::path(
    get,
    path = "/class-types",
    responses((status = 200, body = [ClassType])),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "directory"
)]
pub async fn list_class_types(
    State(state): State<AppState>,
    CurrentUser(_actor): CurrentUser,
) -> Result<Json<Vec<ClassType>>, ApiError> {
    let class_types = blocking(&state.studio, |studio| studio.directory().list_class_types()).await?;
    Ok(Json(class_types))
}

#[utoipa::path(
    post,
    path = "/class-types",
    request_body = NewClassType,
    responses((status = 201, body = ClassType)),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "directory"
)]
pub async fn create_class_type(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Json(new): Json<NewClassType>,
) -> Result<impl IntoResponse, ApiError> {
    let class_type =
        blocking(&state.studio, move |studio| studio.create_class_type(&actor, new)).await?;
    Ok((StatusCode::CREATED, Json(class_type)))
}

#[utoipa::path(
    patch,
    path = "/class-types/{id}",
    params(("id" = String, Path, description = "Class type id")),
    request_body = ClassTypePatch,
    responses((status = 200, body = ClassType)),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "directory"
)]
pub async fn update_class_type(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
    Json(patch): Json<ClassTypePatch>,
) -> Result<Json<ClassType>, ApiError> {
    let class_type = blocking(&state.studio, move |studio| {
        studio.update_class_type(&actor, &id, patch)
    })
    .await?;
    Ok(Json(class_type))
}

#[utoipa::path(
    delete,
    path = "/class-types/{id}",
    params(("id" = String, Path, description = "Class type id")),
    responses(
        (status = 204, description = "Removed"),
        (status = 409, description = "Still used by a class")
    ),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "directory"
)]
pub async fn delete_class_type(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    blocking(&state.studio, move |studio| studio.delete_class_type(&actor, &id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/equipment",
    responses((status = 200, body = [Equipment])),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "directory"
)]
pub async fn list_equipment(
    State(state): State<AppState>,
    CurrentUser(_actor): CurrentUser,
) -> Result<Json<Vec<Equipment>>, ApiError> {
    let equipment = blocking(&state.studio, |studio| studio.directory().list_equipment()).await?;
    Ok(Json(equipment))
}

#[utoipa::path(
    post,
    path = "/equipment",
    request_body = NewEquipment,
    responses((status = 201, body = Equipment)),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "directory"
)]
pub async fn create_equipment(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Json(new): Json<NewEquipment>,
) -> Result<impl IntoResponse, ApiError> {
    let equipment =
        blocking(&state.studio, move |studio| studio.create_equipment(&actor, new)).await?;
    Ok((StatusCode::CREATED, Json(equipment)))
}

#[utoipa::path(
    post,
    path = "/equipment/{id}/status",
    params(("id" = String, Path, description = "Equipment id")),
    request_body = EquipmentStatusChange,
    responses((status = 200, body = Equipment)),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "directory"
)]
pub async fn set_equipment_status(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
    Json(change): Json<EquipmentStatusChange>,
) -> Result<Json<Equipment>, ApiError> {
    let equipment = blocking(&state.studio, move |studio| {
        studio.set_equipment_status(&actor, &id, change.status)
    })
    .await?;
    Ok(Json(equipment))
}

#[utoipa::path(
    delete,
    path = "/equipment/{id}",
    params(("id" = String, Path, description = "Equipment id")),
    responses(
        (status = 204, description = "Removed"),
        (status = 409, description = "Assigned to a live class")
    ),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "directory"
)]
pub async fn delete_equipment(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    blocking(&state.studio, move |studio| studio.delete_equipment(&actor, &id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/users",
    params(("role" = Option<Role>, Query, description = "Filter by role")),
    responses((status = 200, body = [User])),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "directory"
)]
pub async fn list_users(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Query(query): Query<UserListQuery>,
) -> Result<Json<Vec<User>>, ApiError> {
    let users = blocking(&state.studio, move |studio| studio.users(&actor, query.role)).await?;
    Ok(Json(users))
}

#[utoipa::path(
    post,
    path = "/users",
    request_body = NewUser,
    responses(
        (status = 201, body = User),
        (status = 400, description = "Invalid or duplicate email")
    ),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "directory"
)]
pub async fn create_user(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Json(new): Json<NewUser>,
) -> Result<impl IntoResponse, ApiError> {
    let user = blocking(&state.studio, move |studio| studio.create_user(&actor, new)).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[utoipa::path(
    post,
    path = "/users/{id}/active",
    params(("id" = String, Path, description = "User id")),
    request_body = ActiveChange,
    responses((status = 200, body = User)),
    security(("bearer_auth" = [], "user_id" = [])),
    tag = "directory"
)]
pub async fn set_user_active(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
    Json(change): Json<ActiveChange>,
) -> Result<Json<User>, ApiError> {
    let user = blocking(&state.studio, move |studio| {
        studio.set_user_active(&actor, &id, change.active)
    })
    .await?;
    Ok(Json(user))
}

#[utoipa::path(
    get,
    path = "/timetable",
    params(
        ("weeks" = u8, Query, description = "Number of weeks (1-6)"),
        ("token" = Option<String>, Query, description = "Authentication token (alternative to Bearer header)")
    ),
    responses(
        (status = 200, description = "Classes from this week's Monday on", body = [ClassSummary]),
        (status = 401, description = "Invalid authentication token"),
        (status = 404, description = "No classes found")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "timetable"
)]
pub async fn get_timetable(
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
    Query(query): Query<TimetableQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let auth_header = auth.map(|TypedHeader(a)| a);
    verify_token(&state.settings, auth_header, query.token.as_deref())?;
    let weeks = validate_weeks(query.weeks)?;

    let monday = current_monday(state.studio.today());
    let classes =
        blocking(&state.studio, move |studio| studio.schedule().timetable(monday, weeks)).await?;
    if classes.is_empty() {
        return Err(ApiError::NotFound("No classes found".into()));
    }
    Ok(Json(classes))
}

#[utoipa::path(
    get,
    path = "/timetable.ical",
    params(
        ("weeks" = u8, Query, description = "Number of weeks (1-6)"),
        ("token" = Option<String>, Query, description = "Authentication token (alternative to Bearer header)")
    ),
    responses(
        (status = 200, description = "iCal file", content_type = "text/calendar"),
        (status = 401, description = "Invalid authentication token"),
        (status = 404, description = "No classes found")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "timetable"
)]
pub async fn get_ical(
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
    Query(query): Query<TimetableQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let auth_header = auth.map(|TypedHeader(a)| a);
    verify_token(&state.settings, auth_header, query.token.as_deref())?;
    let weeks = validate_weeks(query.weeks)?;

    let monday = current_monday(state.studio.today());
    let classes =
        blocking(&state.studio, move |studio| studio.schedule().timetable(monday, weeks)).await?;
    if classes.is_empty() {
        return Err(ApiError::NotFound("No classes found".into()));
    }

    let body = state.exporter.generate(&classes);
    Ok((
        StatusCode::OK,
        [
            ("content-type", "text/calendar"),
            (
                "content-disposition",
                "attachment; filename=studio_timetable.ics",
            ),
        ],
        body,
    ))
}

#[utoipa::path(
    get,
    path = "/events",
    params(("token" = Option<String>, Query, description = "Authentication token (alternative to Bearer header)")),
    responses((status = 200, description = "Change notifications", content_type = "text/event-stream")),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "timetable"
)]
pub async fn events(
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
    Query(query): Query<TokenQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let auth_header = auth.map(|TypedHeader(a)| a);
    verify_token(&state.settings, auth_header, query.token.as_deref())?;

    let stream = BroadcastStream::new(state.studio.subscribe()).filter_map(|result| match result {
        Ok(change) => Event::default()
            .event("update")
            .json_data(change)
            .ok()
            .map(Ok::<Event, Infallible>),
        Err(lagged) => {
            debug!("event subscriber lagged: {lagged}");
            None
        }
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
