use axum::{
    extract::{Query, State},
    response::Html,
};
use axum_extra::extract::cookie::CookieJar;

use crate::web::{
    AppState, AuthUser,
    auth::current_user,
    escape_html,
    flash::FlashQuery,
    models::Role,
    templates::{PageLayout, render_page},
};

pub async fn landing_page(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(flash): Query<FlashQuery>,
) -> Html<String> {
    let user = current_user(&state, &jar).await;
    let flash_html = flash.render(user.as_ref().map(|user| user.username.as_str()));
    let body = match &user {
        Some(user) => render_member_home(user),
        None => render_visitor_home(),
    };

    Html(render_page(PageLayout {
        title: "Home",
        user: user.as_ref(),
        flash_html: &flash_html,
        body_html: &body,
    }))
}

fn render_visitor_home() -> String {
    r#"<section class="panel">
    <h1>Welcome to the Student Portal</h1>
    <p class="note">Students keep their profile and documents in one place, browse the course catalogue and request enrollment. Teachers review requests for their courses and manage their rosters.</p>
</section>
<section class="grid">
    <a class="card" href="/login"><h3>Log in</h3><p class="note">Already registered? Sign in to your dashboard.</p></a>
    <a class="card" href="/register/student"><h3>Register as a student</h3><p class="note">Create a student account with your profile and documents.</p></a>
    <a class="card" href="/register/teacher"><h3>Register as a teacher</h3><p class="note">Create a teacher account for your department.</p></a>
</section>"#
        .to_string()
}

fn render_member_home(user: &AuthUser) -> String {
    let cards: &[(&str, &str, &str)] = match user.role() {
        Some(Role::Student) => &[
            ("/dashboard", "Dashboard", "Your profile and enrollment requests."),
            ("/courses", "Courses", "Browse courses and request enrollment."),
            ("/my-schedule", "My schedule", "Courses you are enrolled in."),
        ],
        Some(Role::Teacher) => &[
            ("/teacher/dashboard", "Teacher console", "Enroll students directly into your courses."),
            ("/teacher/courses", "My courses", "Courses you teach and their rosters."),
            ("/teacher/courses/pending", "Pending requests", "Approve or deny enrollment requests."),
        ],
        Some(Role::Admin) => &[
            ("/admin", "Administration", "Users, courses and enrollments."),
            ("/admin/enrollments", "Enrollment requests", "Review pending requests."),
            ("/admin/students", "Students", "Student profiles and documents."),
        ],
        None => &[("/dashboard", "Dashboard", "Your account overview.")],
    };

    let cards_html = cards
        .iter()
        .map(|(href, title, text)| {
            format!(r#"<a class="card" href="{href}"><h3>{title}</h3><p class="note">{text}</p></a>"#)
        })
        .collect::<String>();

    format!(
        r#"<section class="panel"><h1>Hello, {username}</h1><p class="note">Choose where to go next.</p></section>
<section class="grid">{cards_html}</section>"#,
        username = escape_html(&user.username),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn member_home_links_follow_role() {
        let teacher = AuthUser {
            id: Uuid::new_v4(),
            username: "ada".into(),
            email: String::new(),
            role: "teacher".into(),
        };
        let html = render_member_home(&teacher);
        assert!(html.contains("/teacher/courses/pending"));
        assert!(!html.contains("/my-schedule"));
    }

    #[test]
    fn visitor_home_offers_registration() {
        let html = render_visitor_home();
        assert!(html.contains("/register/student"));
        assert!(html.contains("/register/teacher"));
    }
}
