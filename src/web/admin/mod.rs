mod auth;
mod courses;
mod dashboard;
mod enrollments;
mod profiles;
mod types;
mod users;

pub use courses::{delete_course, edit_course_page, save_course, save_prerequisites};
pub use dashboard::dashboard;
pub use enrollments::{enrollment_requests, review_enrollment_request};
pub use profiles::{student_profiles, teacher_profiles};
pub use users::{create_user, set_user_active, update_user_password};
