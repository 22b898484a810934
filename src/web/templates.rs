use chrono::{DateTime, Datelike, Utc};

use super::{
    AuthUser,
    models::{EnrollmentStatus, Role},
};

const PAGE_BASE_STYLES: &str = r#"
        :root { color-scheme: light; }
        body { font-family: "Helvetica Neue", Arial, sans-serif; margin: 0; background: #f8fafc; color: #0f172a; }
        header { background: #ffffff; padding: 1.25rem 1.5rem; border-bottom: 1px solid #e2e8f0; }
        .header-bar { display: flex; justify-content: space-between; align-items: center; flex-wrap: wrap; gap: 1rem; max-width: 1080px; margin: 0 auto; }
        .brand { font-size: 1.35rem; font-weight: 700; color: #0f172a; text-decoration: none; }
        nav { display: flex; gap: 0.5rem; flex-wrap: wrap; align-items: center; }
        nav a { color: #1d4ed8; text-decoration: none; font-weight: 600; background: #e0f2fe; padding: 0.45rem 0.9rem; border-radius: 999px; border: 1px solid #bfdbfe; }
        nav a:hover { background: #bfdbfe; border-color: #93c5fd; }
        nav .who { color: #475569; font-size: 0.9rem; margin-left: 0.5rem; }
        .logout-form { display: inline; margin: 0; }
        .logout-form button { padding: 0.45rem 0.9rem; border-radius: 999px; }
        main { padding: 2rem 1.5rem; max-width: 1080px; margin: 0 auto; box-sizing: border-box; }
        section { margin-bottom: 2rem; }
        h1 { margin-top: 0; }
        .panel { background: #ffffff; border-radius: 12px; border: 1px solid #e2e8f0; padding: 1.5rem; box-shadow: 0 18px 40px rgba(15, 23, 42, 0.08); margin-bottom: 1.5rem; }
        .panel h2 { margin-top: 0; }
        .field { display: flex; flex-direction: column; gap: 0.35rem; margin-bottom: 1rem; }
        .field label { font-weight: 600; color: #0f172a; }
        .field .help { color: #64748b; font-size: 0.85rem; }
        input, select, textarea { padding: 0.7rem; border-radius: 8px; border: 1px solid #cbd5f5; background: #f8fafc; color: #0f172a; font-size: 0.95rem; box-sizing: border-box; font-family: inherit; }
        input:focus, select:focus, textarea:focus { outline: none; border-color: #2563eb; box-shadow: 0 0 0 3px rgba(37, 99, 235, 0.12); }
        textarea { min-height: 5rem; }
        button { padding: 0.75rem 1.2rem; border: none; border-radius: 8px; background: #2563eb; color: #ffffff; font-weight: 600; cursor: pointer; transition: background 0.15s ease; }
        button:hover { background: #1d4ed8; }
        button.danger { background: #dc2626; }
        button.danger:hover { background: #b91c1c; }
        button.secondary { background: #64748b; }
        table { width: 100%; border-collapse: collapse; background: #ffffff; border: 1px solid #e2e8f0; border-radius: 12px; overflow: hidden; }
        th, td { padding: 0.7rem 0.9rem; border-bottom: 1px solid #e2e8f0; text-align: left; vertical-align: top; font-size: 0.93rem; }
        th { background: #f1f5f9; font-weight: 600; }
        .inline-form { display: flex; gap: 0.5rem; flex-wrap: wrap; align-items: center; margin: 0; }
        .inline-form input, .inline-form select { padding: 0.45rem 0.6rem; }
        .inline-form button { padding: 0.45rem 0.8rem; }
        .flash { padding: 1rem 1.25rem; border-radius: 10px; margin-bottom: 1.5rem; font-weight: 600; border: 1px solid transparent; }
        .flash.success { background: #ecfdf3; border-color: #bbf7d0; color: #166534; }
        .flash.info { background: #eff6ff; border-color: #bfdbfe; color: #1d4ed8; }
        .flash.error { background: #fef2f2; border-color: #fecaca; color: #b91c1c; }
        .errors { margin: 0 0 1rem; padding-left: 1.25rem; color: #b91c1c; }
        .note { color: #475569; font-size: 0.95rem; line-height: 1.6; }
        .status-tag { display: inline-flex; padding: 0.2rem 0.7rem; border-radius: 999px; font-size: 0.82rem; font-weight: 600; }
        .status-tag.pending { background: #fef3c7; color: #92400e; }
        .status-tag.approved { background: #dcfce7; color: #166534; }
        .status-tag.denied { background: #fee2e2; color: #b91c1c; }
        .grid { display: grid; gap: 1.25rem; grid-template-columns: repeat(auto-fit, minmax(220px, 1fr)); }
        .card { display: block; background: #ffffff; padding: 1.25rem; border-radius: 14px; text-decoration: none; color: inherit; border: 1px solid #e2e8f0; box-shadow: 0 12px 30px rgba(15, 23, 42, 0.06); }
        .card h3 { margin-top: 0; }
        .stat { font-size: 2rem; font-weight: 700; color: #1d4ed8; }
        dl.profile { display: grid; grid-template-columns: max-content 1fr; gap: 0.4rem 1.25rem; margin: 0; }
        dl.profile dt { font-weight: 600; color: #475569; }
        dl.profile dd { margin: 0; }
        img.avatar { width: 96px; height: 96px; object-fit: cover; border-radius: 50%; border: 1px solid #e2e8f0; }
        img.thumbnail { width: 100px; border-radius: 6px; border: 1px solid #e2e8f0; }
        form.stacked { display: flex; flex-direction: column; gap: 0.75rem; max-width: 480px; }
        form.stacked label { display: flex; flex-direction: column; gap: 0.35rem; font-weight: 600; }
        label.checkbox { display: flex; gap: 0.5rem; align-items: center; font-weight: 400; }
        tr.current-user td { background: #f0f9ff; }
        button.btn-sm { padding: 0.35rem 0.7rem; font-size: 0.85rem; }
        button.btn-warning { background: #d97706; }
        .app-footer { margin-top: 3rem; text-align: center; font-size: 0.85rem; color: #94a3b8; }
        @media (max-width: 768px) {
            main { padding: 1.5rem 1rem; }
            .header-bar { flex-direction: column; align-items: flex-start; }
            th, td { padding: 0.5rem; }
        }
"#;

pub struct PageLayout<'a> {
    pub title: &'a str,
    pub user: Option<&'a AuthUser>,
    pub flash_html: &'a str,
    pub body_html: &'a str,
}

pub fn render_page(layout: PageLayout<'_>) -> String {
    let PageLayout {
        title,
        user,
        flash_html,
        body_html,
    } = layout;

    let nav = render_nav(user);
    let footer = render_footer();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{title} · Student Portal</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta name="robots" content="noindex,nofollow">
    <style>
{styles}
    </style>
</head>
<body>
    <header>
        <div class="header-bar">
            <a class="brand" href="/">Student Portal</a>
            {nav}
        </div>
    </header>
    <main>
        {flash_html}
        {body_html}
        {footer}
    </main>
</body>
</html>"#,
        title = escape_html(title),
        styles = PAGE_BASE_STYLES,
        nav = nav,
        flash_html = flash_html,
        body_html = body_html,
        footer = footer,
    )
}

fn render_nav(user: Option<&AuthUser>) -> String {
    let Some(user) = user else {
        return r#"<nav><a href="/login">Log in</a><a href="/register/student">Register as student</a><a href="/register/teacher">Register as teacher</a></nav>"#.to_string();
    };

    let links: &[(&str, &str)] = match user.role() {
        Some(Role::Student) => &[
            ("/dashboard", "Dashboard"),
            ("/courses", "Courses"),
            ("/my-schedule", "My schedule"),
            ("/edit-profile", "Edit profile"),
        ],
        Some(Role::Teacher) => &[
            ("/dashboard", "Dashboard"),
            ("/teacher/dashboard", "Teacher console"),
            ("/teacher/courses", "My courses"),
            ("/teacher/courses/pending", "Pending requests"),
            ("/edit-profile", "Edit profile"),
        ],
        Some(Role::Admin) => &[
            ("/dashboard", "Dashboard"),
            ("/admin", "Administration"),
            ("/admin/enrollments", "Enrollment requests"),
            ("/courses", "Courses"),
        ],
        None => &[("/dashboard", "Dashboard")],
    };

    let links_html = links
        .iter()
        .map(|(href, label)| format!(r#"<a href="{href}">{label}</a>"#))
        .collect::<String>();

    format!(
        r#"<nav>{links_html}<span class="who">{username}</span><form class="logout-form" method="post" action="/logout"><button type="submit" class="secondary">Log out</button></form></nav>"#,
        username = escape_html(&user.username),
    )
}

pub fn render_login_page(flash_html: &str, username_value: &str) -> String {
    let body = format!(
        r#"<section class="panel" style="max-width: 460px; margin: 0 auto;">
    <h1>Log in</h1>
    <form method="post" action="/login">
        <div class="field">
            <label for="username">Username</label>
            <input id="username" name="username" value="{username}" required autofocus>
        </div>
        <div class="field">
            <label for="password">Password</label>
            <input id="password" type="password" name="password" required>
        </div>
        <button type="submit">Log in</button>
    </form>
    <p class="note"><a href="/password_reset">Forgot your password?</a></p>
    <p class="note">No account yet? <a href="/register/student">Register as a student</a> or <a href="/register/teacher">as a teacher</a>.</p>
</section>"#,
        username = escape_html(username_value),
    );

    render_page(PageLayout {
        title: "Log in",
        user: None,
        flash_html,
        body_html: &body,
    })
}

/// Renders a standalone message page, used for 404s and similar dead ends.
pub fn render_message_page(user: Option<&AuthUser>, title: &str, message: &str) -> String {
    let body = format!(
        r#"<section class="panel"><h1>{title}</h1><p class="note">{message}</p><p><a href="/dashboard">Back to dashboard</a></p></section>"#,
        title = escape_html(title),
        message = escape_html(message),
    );
    render_page(PageLayout {
        title,
        user,
        flash_html: "",
        body_html: &body,
    })
}

pub fn render_footer() -> String {
    let current_year = Utc::now().year();
    format!(
        r#"<footer class="app-footer">© {year} Student Portal</footer>"#,
        year = current_year
    )
}

pub fn render_error_list(errors: &[String]) -> String {
    if errors.is_empty() {
        return String::new();
    }
    let items = errors
        .iter()
        .map(|err| format!("<li>{}</li>", escape_html(err)))
        .collect::<String>();
    format!(r#"<div class="flash error">Please correct the errors below.</div><ul class="errors">{items}</ul>"#)
}

pub fn status_tag(status: &str) -> String {
    let (class, label) = match EnrollmentStatus::parse(status) {
        Some(parsed) => (parsed.as_str(), parsed.label()),
        None => ("", status),
    };
    format!(
        r#"<span class="status-tag {class}">{label}</span>"#,
        label = escape_html(label)
    )
}

pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.format("%Y-%m-%d %H:%M UTC").to_string()
}

pub fn format_optional_timestamp(value: Option<&DateTime<Utc>>) -> String {
    value.map(format_timestamp).unwrap_or_else(|| "—".to_string())
}

/// Escapes `value` for use inside an `<option>` list, marking the matching entry.
pub fn render_option(value: &str, label: &str, selected: bool) -> String {
    format!(
        r#"<option value="{value}"{selected}>{label}</option>"#,
        value = escape_html(value),
        label = escape_html(label),
        selected = if selected { " selected" } else { "" },
    )
}

pub fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user(role: &str) -> AuthUser {
        AuthUser {
            id: Uuid::new_v4(),
            username: "alice<3".to_string(),
            email: "alice@example.com".to_string(),
            role: role.to_string(),
        }
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn nav_depends_on_role() {
        let student = render_nav(Some(&user("student")));
        assert!(student.contains("/my-schedule"));
        assert!(!student.contains("/admin"));
        assert!(student.contains("alice&lt;3"));

        let teacher = render_nav(Some(&user("teacher")));
        assert!(teacher.contains("/teacher/courses/pending"));

        let admin = render_nav(Some(&user("admin")));
        assert!(admin.contains("/admin/enrollments"));

        let anonymous = render_nav(None);
        assert!(anonymous.contains("/register/student"));
        assert!(!anonymous.contains("/logout"));
    }

    #[test]
    fn status_tag_uses_known_classes() {
        assert!(status_tag("approved").contains("status-tag approved"));
        assert!(status_tag("<odd>").contains("&lt;odd&gt;"));
    }

    #[test]
    fn error_list_is_empty_without_errors() {
        assert!(render_error_list(&[]).is_empty());
        let html = render_error_list(&["Passwords do not match.".to_string()]);
        assert!(html.contains("<li>Passwords do not match.</li>"));
    }
}
