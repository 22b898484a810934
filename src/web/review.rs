use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    enrollment::{self, ReviewAction, ReviewScope},
    utils::sanitize::{clean_text, truncate_chars},
    web::{
        AppState, AuthUser, escape_html,
        models::EnrollmentListingRow,
        templates::{format_timestamp, status_tag},
    },
};

const NOTE_MAX_CHARS: usize = 1000;

#[derive(Deserialize)]
pub struct ReviewForm {
    #[serde(default)]
    pub enrollment_id: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub note: String,
}

/// Applies a review submitted from one of the pending queues and mails the student.
///
/// Returns the flash query to append to the redirect.
pub async fn apply_review(
    state: &AppState,
    reviewer: &AuthUser,
    scope: ReviewScope,
    form: &ReviewForm,
) -> String {
    let Some(action) = ReviewAction::parse(&form.action) else {
        warn!(action = %form.action, username = %reviewer.username, "unknown review action");
        return "error=invalid_action".to_string();
    };
    let Ok(enrollment_id) = Uuid::parse_str(form.enrollment_id.trim()) else {
        return "error=enrollment_missing".to_string();
    };
    let note = truncate_chars(&clean_text(&form.note), NOTE_MAX_CHARS);

    match enrollment::review_enrollment(
        state.pool_ref(),
        reviewer.id,
        scope,
        enrollment_id,
        action,
        &note,
    )
    .await
    {
        Ok(outcome) => {
            let mail = enrollment::decision_mail(
                &outcome.student_username,
                &outcome.student_email,
                &outcome.course_name,
                action,
                &note,
                scope,
            );
            state.mailer().send_best_effort(&mail).await;
            format!("status=enrollment_{}", outcome.status.as_str())
        }
        Err(err) => format!("error={}", err.code()),
    }
}

/// Pending requests with approve/deny controls posting back to `action_path`.
pub fn render_pending_table(pending: &[EnrollmentListingRow], action_path: &str) -> String {
    if pending.is_empty() {
        return r#"<p class="note">No pending enrollment requests.</p>"#.to_string();
    }

    let rows = pending
        .iter()
        .map(|enrollment| {
            format!(
                r#"<tr>
    <td>{student}<br><span class="note">{email}</span></td>
    <td>{code}<br><span class="note">{course}</span></td>
    <td>{requested}</td>
    <td>{status}</td>
    <td>
        <form class="inline-form" method="post" action="{action_path}">
            <input type="hidden" name="enrollment_id" value="{id}">
            <input type="text" name="note" placeholder="Note (optional)">
            <button type="submit" name="action" value="approve">Approve</button>
            <button type="submit" name="action" value="deny" class="danger">Deny</button>
        </form>
    </td>
</tr>"#,
                id = enrollment.id,
                student = escape_html(&enrollment.student_username),
                email = escape_html(&enrollment.student_email),
                code = escape_html(&enrollment.course_code),
                course = escape_html(&enrollment.course_name),
                requested = format_timestamp(&enrollment.requested_at),
                status = status_tag(&enrollment.status),
                action_path = escape_html(action_path),
            )
        })
        .collect::<String>();

    format!(
        "<table><thead><tr><th>Student</th><th>Course</th><th>Requested</th><th>Status</th><th>Decision</th></tr></thead><tbody>{rows}</tbody></table>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn pending_row() -> EnrollmentListingRow {
        EnrollmentListingRow {
            id: Uuid::new_v4(),
            status: "pending".into(),
            requested_at: Utc::now(),
            reviewed_at: None,
            reviewer_username: None,
            note: String::new(),
            student_id: Uuid::new_v4(),
            student_username: "sam<".into(),
            student_email: "sam@example.com".into(),
            course_id: Uuid::new_v4(),
            course_code: "MATH101".into(),
            course_name: "Algebra".into(),
            course_schedule: String::new(),
        }
    }

    #[test]
    fn pending_table_posts_to_queue() {
        let row = pending_row();
        let html = render_pending_table(&[row.clone()], "/teacher/courses/pending");
        assert!(html.contains(r#"action="/teacher/courses/pending""#));
        assert!(html.contains(&row.id.to_string()));
        assert!(html.contains("sam&lt;"));
        assert!(html.contains(r#"value="approve""#));
        assert!(html.contains(r#"value="deny""#));
    }

    #[test]
    fn empty_queue_message() {
        assert!(render_pending_table(&[], "/admin/enrollments").contains("No pending"));
    }
}
