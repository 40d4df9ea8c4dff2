use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::auth::USER_HEADER;
use crate::conflict::ConflictResource;
use crate::directory::{ClassTypePatch, NewClassType, NewEquipment, NewUser};
use crate::handlers::{
    ActiveChange, CanCancelResponse, CancelRequest, CancelResponse, ClassUpdateResponse,
    EquipmentStatusChange, NewBooking, StatusChange,
};
use crate::models::{
    Booking, BookingStatus, ClassInstance, ClassStatus, ClassSummary, ClassType, Equipment,
    EquipmentStatus, EquipmentType, Level, Membership, PaymentStatus, Role, User,
};
use crate::schedule::{ClassDraft, ClassPatch};

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
        components.add_security_scheme(
            "query_token",
            SecurityScheme::ApiKey(ApiKey::Query(ApiKeyValue::new("token"))),
        );
        components.add_security_scheme(
            "user_id",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(USER_HEADER))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz_live,
        crate::handlers::healthz_ready,
        crate::handlers::list_classes,
        crate::handlers::create_class,
        crate::handlers::get_class,
        crate::handlers::update_class,
        crate::handlers::delete_class,
        crate::handlers::set_class_status,
        crate::handlers::class_bookings,
        crate::handlers::list_bookings,
        crate::handlers::create_booking,
        crate::handlers::get_booking,
        crate::handlers::cancel_booking,
        crate::handlers::can_cancel,
        crate::handlers::mark_paid,
        crate::handlers::list_class_types,
        crate::handlers::create_class_type,
        crate::handlers::update_class_type,
        crate::handlers::delete_class_type,
        crate::handlers::list_equipment,
        crate::handlers::create_equipment,
        crate::handlers::set_equipment_status,
        crate::handlers::delete_equipment,
        crate::handlers::list_users,
        crate::handlers::create_user,
        crate::handlers::set_user_active,
        crate::handlers::get_timetable,
        crate::handlers::get_ical,
        crate::handlers::events
    ),
    components(schemas(
        Booking, BookingStatus, PaymentStatus, ClassInstance, ClassStatus, ClassSummary,
        ClassType, Equipment, EquipmentStatus, EquipmentType, Level, Membership, Role, User,
        ClassDraft, ClassPatch, ClassTypePatch, NewClassType, NewEquipment, NewUser,
        NewBooking, CancelRequest, CancelResponse, CanCancelResponse, StatusChange,
        EquipmentStatusChange, ActiveChange, ClassUpdateResponse, ConflictResource
    )),
    tags(
        (name = "studio", description = "Service information"),
        (name = "classes", description = "Class scheduling"),
        (name = "bookings", description = "Bookings and waiting lists"),
        (name = "directory", description = "Users, equipment and class types"),
        (name = "timetable", description = "Timetable export and change notifications")
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_routes_and_schemes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/bookings/{id}/cancel"));
        assert!(doc.paths.paths.contains_key("/timetable.ical"));
        let schemes = &doc.components.as_ref().unwrap().security_schemes;
        assert!(schemes.contains_key("bearer_auth"));
        assert!(schemes.contains_key("user_id"));
    }
}
