use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};

use crate::web::{
    AppState, admin, auth, courses, dashboard, landing, password_reset, profile, rate_limit,
    registration, storage, teacher, uploads::MAX_UPLOAD_BYTES,
};

const ROBOTS_TXT_BODY: &str = include_str!("../../robots.txt");
/// Room for three maximum-size files plus the text fields of a multipart form.
const REQUEST_BODY_LIMIT: usize = (MAX_UPLOAD_BYTES as usize) * 3 + 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let registration = Router::new()
        .route(
            "/register/student",
            get(registration::student_form).post(registration::register_student),
        )
        .route(
            "/register/teacher",
            get(registration::teacher_form).post(registration::register_teacher),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_registration,
        ));

    let login = Router::new()
        .route("/login", get(auth::login_page).post(auth::process_login))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_login,
        ));

    Router::new()
        .route("/", get(landing::landing_page))
        .route("/logout", post(auth::logout))
        .route("/healthz", get(healthz))
        .route("/robots.txt", get(robots_txt))
        .route(
            "/password_reset",
            get(password_reset::request_form).post(password_reset::request_reset),
        )
        .route("/password_reset/done", get(password_reset::request_done))
        .route("/reset/done", get(password_reset::reset_complete))
        .route(
            "/reset/:token",
            get(password_reset::confirm_form).post(password_reset::confirm_reset),
        )
        .route("/dashboard", get(dashboard::dashboard))
        .route("/my-schedule", get(dashboard::student_schedule))
        .route(
            "/edit-profile",
            get(profile::edit_profile_page).post(profile::update_profile),
        )
        .route(
            "/profile/edit",
            get(profile::edit_profile_page).post(profile::update_profile),
        )
        .route(
            "/profile/edit/",
            get(profile::edit_profile_page).post(profile::update_profile),
        )
        .route("/view-transcript", get(profile::view_transcript))
        .route("/media/*path", get(storage::serve_media))
        .route("/courses", get(courses::course_list))
        .route(
            "/courses/:id",
            get(courses::course_detail).post(courses::request_enrollment),
        )
        .route(
            "/teacher/dashboard",
            get(teacher::teacher_dashboard).post(teacher::direct_enroll),
        )
        .route("/teacher/courses", get(teacher::teacher_courses))
        .route(
            "/teacher/courses/pending",
            get(teacher::pending_enrollments).post(teacher::review_pending),
        )
        .route(
            "/teacher/courses/:id/students",
            get(teacher::teacher_course_students),
        )
        .route("/admin", get(admin::dashboard))
        .route("/admin/users", post(admin::create_user))
        .route("/admin/users/password", post(admin::update_user_password))
        .route("/admin/users/active", post(admin::set_user_active))
        .route("/admin/students", get(admin::student_profiles))
        .route("/admin/teachers", get(admin::teacher_profiles))
        .route("/admin/courses", post(admin::save_course))
        .route("/admin/courses/delete", post(admin::delete_course))
        .route("/admin/courses/:id", get(admin::edit_course_page))
        .route(
            "/admin/courses/:id/prerequisites",
            post(admin::save_prerequisites),
        )
        .route(
            "/admin/enrollments",
            get(admin::enrollment_requests).post(admin::review_enrollment_request),
        )
        .merge(registration)
        .merge(login)
        .layer(DefaultBodyLimit::max(REQUEST_BODY_LIMIT))
        .with_state(state)
}

async fn robots_txt() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        ROBOTS_TXT_BODY,
    )
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}
