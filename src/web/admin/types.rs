use serde::Deserialize;

use crate::web::{
    flash::FlashQuery,
    models::{EnrollmentStatus, Role},
};

/// Filters and flash codes accepted by `GET /admin`.
#[derive(Default, Deserialize)]
pub struct ConsoleQuery {
    pub status: Option<String>,
    pub error: Option<String>,
    pub role: Option<String>,
    pub active: Option<String>,
    pub q: Option<String>,
    pub enrollment_status: Option<String>,
    pub course_id: Option<String>,
    pub enrollment_q: Option<String>,
}

impl ConsoleQuery {
    pub fn flash(&self) -> FlashQuery {
        FlashQuery {
            status: self.status.clone(),
            error: self.error.clone(),
        }
    }

    pub fn role_filter(&self) -> Option<Role> {
        self.role.as_deref().and_then(Role::parse)
    }

    pub fn active_filter(&self) -> Option<bool> {
        match self.active.as_deref() {
            Some("yes") => Some(true),
            Some("no") => Some(false),
            _ => None,
        }
    }

    pub fn enrollment_status_filter(&self) -> Option<EnrollmentStatus> {
        self.enrollment_status
            .as_deref()
            .and_then(EnrollmentStatus::parse)
    }
}

#[derive(Default, Deserialize)]
pub struct EnrollmentFilterQuery {
    pub status: Option<String>,
    pub error: Option<String>,
    pub student: Option<String>,
    pub course: Option<String>,
}

impl EnrollmentFilterQuery {
    pub fn flash(&self) -> FlashQuery {
        FlashQuery {
            status: self.status.clone(),
            error: self.error.clone(),
        }
    }
}

#[derive(Default, Deserialize)]
pub struct TeacherFilterQuery {
    pub department: Option<String>,
    pub q: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_filters_ignore_unknown_values() {
        let query = ConsoleQuery {
            role: Some("teacher".into()),
            active: Some("maybe".into()),
            enrollment_status: Some("approved".into()),
            ..Default::default()
        };
        assert_eq!(query.role_filter(), Some(Role::Teacher));
        assert_eq!(query.active_filter(), None);
        assert_eq!(
            query.enrollment_status_filter(),
            Some(EnrollmentStatus::Approved)
        );

        let inactive = ConsoleQuery {
            active: Some("no".into()),
            role: Some("root".into()),
            ..Default::default()
        };
        assert_eq!(inactive.active_filter(), Some(false));
        assert_eq!(inactive.role_filter(), None);
    }
}
