use serde::Deserialize;

use super::templates::escape_html;

/// Query parameters carrying a one-shot status or error code after a redirect.
#[derive(Default, Deserialize)]
pub struct FlashQuery {
    pub status: Option<String>,
    pub error: Option<String>,
}

impl FlashQuery {
    pub fn render(&self, username: Option<&str>) -> String {
        compose_flash_message(self.status.as_deref(), self.error.as_deref(), username)
    }
}

/// Compose a flash message HTML snippet for known status or error codes.
pub fn compose_flash_message(
    status: Option<&str>,
    error: Option<&str>,
    username: Option<&str>,
) -> String {
    if let Some(status) = status {
        if status == "welcome" {
            if let Some(username) = username {
                return format!(
                    r#"<div class="flash success">Welcome back, {}!</div>"#,
                    escape_html(username)
                );
            }
        }

        let (class, message) = match status {
            "registered_student" => ("success", "Student registration successful."),
            "registered_teacher" => ("success", "Teacher registration successful."),
            "logged_out" => ("info", "You have been logged out."),
            "profile_updated" => ("success", "Profile updated successfully."),
            "enrollment_requested" => ("success", "Enrollment request submitted."),
            "enrollment_approved" => ("success", "Enrollment request approved."),
            "enrollment_denied" => ("info", "Enrollment request denied."),
            "user_created" => ("success", "User created."),
            "password_updated" => ("success", "Password updated."),
            "user_activated" => ("success", "User activated."),
            "user_deactivated" => ("success", "User deactivated."),
            "course_saved" => ("success", "Course saved."),
            "course_deleted" => ("success", "Course deleted."),
            "prerequisites_saved" => ("success", "Prerequisites updated."),
            _ => ("", ""),
        };

        if !message.is_empty() {
            return format!(r#"<div class="flash {class}">{message}</div>"#);
        }
    }

    if let Some(error) = error {
        let message = match error {
            "invalid_login" => "Invalid username or password.",
            "unauthorized_role" => "Unauthorized role.",
            "not_authorized" => "You do not have access to that page.",
            "profile_forbidden" => "Only students and teachers can edit profiles.",
            "no_transcript" => "No transcript available.",
            "enrollment_missing" => "That enrollment request is no longer pending.",
            "invalid_action" => "Unknown review action.",
            "course_full" => "No seats available in this course.",
            "already_enrolled" => "You are already enrolled or have a pending request for this course.",
            "missing_prerequisites" => "You have not completed the prerequisites for this course.",
            "invalid_course_or_student" => "Invalid course or student.",
            "duplicate" => "That username is already taken.",
            "missing_username" => "Please enter a username.",
            "invalid_username" => "Usernames may only contain letters, digits and @/./+/-/_ characters.",
            "missing_password" => "Please enter a password.",
            "weak_password" => "The password does not meet the password rules.",
            "invalid_role" => "Please choose a valid role.",
            "invalid_email" => "Please enter a valid email address.",
            "user_missing" => "No such user.",
            "self_deactivate" => "You cannot deactivate your own account.",
            "course_missing_fields" => "Course code and name are required.",
            "course_duplicate" => "A course with that code already exists.",
            "course_invalid_capacity" => "Capacity must be a non-negative whole number.",
            "course_capacity_below_approved" => {
                "Capacity cannot be lower than the number of approved enrollments."
            }
            "course_code_too_long" => "Course code must be at most 20 characters.",
            "course_name_too_long" => "Course name must be at most 100 characters.",
            "course_schedule_too_long" => "Schedule must be at most 100 characters.",
            "course_invalid_teacher" => "The selected teacher is not a teacher account.",
            "course_not_found" => "Course not found.",
            "prerequisite_invalid" => "A course cannot be its own prerequisite.",
            _ => "Something went wrong. Please check the logs.",
        };

        return format!(r#"<div class="flash error">{message}</div>"#);
    }

    String::new()
}
