pub mod admin;
pub mod auth;
pub mod courses;
pub mod dashboard;
pub mod data;
pub mod flash;
pub mod landing;
pub mod models;
pub mod password_reset;
pub mod profile;
pub mod rate_limit;
pub mod registration;
pub mod review;
pub mod router;
pub mod state;
pub mod storage;
pub mod teacher;
pub mod templates;
pub mod uploads;
pub mod validation;

pub use auth::AuthUser;
pub use state::AppState;
pub use templates::{escape_html, render_login_page};
