use std::collections::HashSet;

use axum::{
    extract::{Form, Path, Query, State},
    response::{Html, Redirect},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    utils::sanitize::clean_text,
    web::{
        AppState, AuthUser, data, escape_html,
        flash::FlashQuery,
        models::{CourseRow, Role, UserRow},
        templates::{PageLayout, render_option, render_page},
    },
};

use super::auth::require_admin_user;

pub const DEFAULT_CAPACITY: i32 = 30;
const COURSE_NAME_MAX_CHARS: usize = 100;
const COURSE_CODE_MAX_CHARS: usize = 20;
const SCHEDULE_MAX_CHARS: usize = 100;

#[derive(Deserialize, Default)]
pub(crate) struct CourseForm {
    #[serde(default)]
    id: String,
    #[serde(default)]
    code: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    teacher_id: String,
    #[serde(default)]
    schedule: String,
    #[serde(default)]
    capacity: String,
}

#[derive(Deserialize)]
pub(crate) struct DeleteCourseForm {
    course_id: Uuid,
}

#[derive(Debug, PartialEq)]
struct CourseInput {
    id: Option<Uuid>,
    code: String,
    name: String,
    description: String,
    teacher_id: Option<Uuid>,
    schedule: String,
    capacity: i32,
}

/// Sanitizes a field and rejects it with `code` when it runs past `max_chars`.
fn bounded_text(raw: &str, max_chars: usize, code: &'static str) -> Result<String, &'static str> {
    let value = clean_text(raw);
    if value.chars().count() > max_chars {
        return Err(code);
    }
    Ok(value)
}

fn validate_course(form: &CourseForm) -> Result<CourseInput, &'static str> {
    let id = match form.id.trim() {
        "" => None,
        raw => Some(Uuid::parse_str(raw).map_err(|_| "course_not_found")?),
    };

    let code = bounded_text(&form.code, COURSE_CODE_MAX_CHARS, "course_code_too_long")?;
    let name = bounded_text(&form.name, COURSE_NAME_MAX_CHARS, "course_name_too_long")?;
    if code.is_empty() || name.is_empty() {
        return Err("course_missing_fields");
    }
    let schedule = bounded_text(&form.schedule, SCHEDULE_MAX_CHARS, "course_schedule_too_long")?;

    let capacity = match form.capacity.trim() {
        "" => DEFAULT_CAPACITY,
        raw => raw
            .parse::<i32>()
            .ok()
            .filter(|capacity| *capacity >= 0)
            .ok_or("course_invalid_capacity")?,
    };

    let teacher_id = match form.teacher_id.trim() {
        "" => None,
        raw => Some(Uuid::parse_str(raw).map_err(|_| "course_invalid_teacher")?),
    };

    Ok(CourseInput {
        id,
        code,
        name,
        description: clean_text(&form.description),
        teacher_id,
        schedule,
        capacity,
    })
}

fn course_redirect(id: Option<Uuid>, query: &str) -> Redirect {
    match id {
        Some(id) => Redirect::to(&format!("/admin/courses/{id}?{query}")),
        None => Redirect::to(&format!("/admin?{query}")),
    }
}

/// `POST /admin/courses`: creates a course, or updates it when `id` is set.
pub async fn save_course(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<CourseForm>,
) -> Result<Redirect, Redirect> {
    let admin = require_admin_user(&state, &jar).await?;

    let input = match validate_course(&form) {
        Ok(input) => input,
        Err(code) => {
            let id = Uuid::parse_str(form.id.trim()).ok();
            return Ok(course_redirect(id, &format!("error={code}")));
        }
    };

    if let Some(teacher_id) = input.teacher_id {
        match data::fetch_user(state.pool_ref(), teacher_id).await {
            Ok(Some(user)) if user.role() == Some(Role::Teacher) => {}
            Ok(_) => return Ok(course_redirect(input.id, "error=course_invalid_teacher")),
            Err(err) => {
                error!(?err, "failed to look up course teacher");
                return Ok(course_redirect(input.id, "error=unknown"));
            }
        }
    }

    match store_course(state.pool_ref(), &input).await {
        Ok(()) => {
            info!(admin = %admin.username, code = %input.code, "course saved");
            Ok(course_redirect(input.id, "status=course_saved"))
        }
        Err("course_not_found") => Ok(Redirect::to("/admin?error=course_not_found")),
        Err(code) => Ok(course_redirect(input.id, &format!("error={code}"))),
    }
}

/// Inserts or updates a course. An update holds the course row lock while comparing
/// the new capacity with the approved seats.
async fn store_course(pool: &PgPool, input: &CourseInput) -> Result<(), &'static str> {
    match write_course(pool, input).await {
        Ok(outcome) => outcome,
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
            Err("course_duplicate")
        }
        Err(err) => {
            error!(?err, "failed to save course");
            Err("unknown")
        }
    }
}

async fn write_course(
    pool: &PgPool,
    input: &CourseInput,
) -> sqlx::Result<Result<(), &'static str>> {
    let Some(id) = input.id else {
        sqlx::query(
            "INSERT INTO courses (id, code, name, description, teacher_id, schedule, capacity)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(Uuid::new_v4())
        .bind(&input.code)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.teacher_id)
        .bind(&input.schedule)
        .bind(input.capacity)
        .execute(pool)
        .await?;
        return Ok(Ok(()));
    };

    let mut tx = pool.begin().await?;
    let locked: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM courses WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
    if locked.is_none() {
        return Ok(Err("course_not_found"));
    }

    let approved: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM enrollments WHERE course_id = $1 AND status = 'approved'",
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;
    if i64::from(input.capacity) < approved {
        return Ok(Err("course_capacity_below_approved"));
    }

    sqlx::query(
        "UPDATE courses
         SET code = $2, name = $3, description = $4, teacher_id = $5, schedule = $6, capacity = $7, updated_at = NOW()
         WHERE id = $1",
    )
    .bind(id)
    .bind(&input.code)
    .bind(&input.name)
    .bind(&input.description)
    .bind(input.teacher_id)
    .bind(&input.schedule)
    .bind(input.capacity)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(Ok(()))
}

/// `POST /admin/courses/delete`. Enrollments and prerequisite links cascade.
pub async fn delete_course(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<DeleteCourseForm>,
) -> Result<Redirect, Redirect> {
    let admin = require_admin_user(&state, &jar).await?;

    let result = sqlx::query("DELETE FROM courses WHERE id = $1")
        .bind(form.course_id)
        .execute(state.pool_ref())
        .await;

    match result {
        Ok(res) if res.rows_affected() > 0 => {
            info!(admin = %admin.username, course_id = %form.course_id, "course deleted");
            Ok(Redirect::to("/admin?status=course_deleted"))
        }
        Ok(_) => Ok(Redirect::to("/admin?error=course_not_found")),
        Err(err) => {
            error!(?err, "failed to delete course");
            Ok(Redirect::to("/admin?error=unknown"))
        }
    }
}

/// Collects the checked prerequisite ids, rejecting the course itself.
fn parse_prerequisites(
    course_id: Uuid,
    fields: &[(String, String)],
) -> Result<Vec<Uuid>, &'static str> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for (name, value) in fields {
        if name != "prerequisite" {
            continue;
        }
        let id = Uuid::parse_str(value.trim()).map_err(|_| "course_not_found")?;
        if id == course_id {
            return Err("prerequisite_invalid");
        }
        if seen.insert(id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// `POST /admin/courses/:id/prerequisites`: replaces the whole prerequisite set.
pub async fn save_prerequisites(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(course_id): Path<Uuid>,
    Form(fields): Form<Vec<(String, String)>>,
) -> Result<Redirect, Redirect> {
    let _admin = require_admin_user(&state, &jar).await?;

    let prerequisites = match parse_prerequisites(course_id, &fields) {
        Ok(ids) => ids,
        Err(code) => return Ok(course_redirect(Some(course_id), &format!("error={code}"))),
    };

    match store_prerequisites(&state, course_id, &prerequisites).await {
        Ok(true) => Ok(course_redirect(Some(course_id), "status=prerequisites_saved")),
        Ok(false) => Ok(Redirect::to("/admin?error=course_not_found")),
        Err(sqlx::Error::Database(db_err))
            if matches!(db_err.code().as_deref(), Some("23503") | Some("23514")) =>
        {
            Ok(course_redirect(Some(course_id), "error=course_not_found"))
        }
        Err(err) => {
            error!(?err, %course_id, "failed to save prerequisites");
            Ok(course_redirect(Some(course_id), "error=unknown"))
        }
    }
}

async fn store_prerequisites(
    state: &AppState,
    course_id: Uuid,
    prerequisites: &[Uuid],
) -> sqlx::Result<bool> {
    let mut tx = state.pool_ref().begin().await?;

    let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM courses WHERE id = $1 FOR UPDATE")
        .bind(course_id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Ok(false);
    }

    sqlx::query("DELETE FROM course_prerequisites WHERE course_id = $1")
        .bind(course_id)
        .execute(&mut *tx)
        .await?;

    for prerequisite_id in prerequisites {
        sqlx::query(
            "INSERT INTO course_prerequisites (course_id, prerequisite_id) VALUES ($1, $2)",
        )
        .bind(course_id)
        .bind(prerequisite_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(true)
}

/// `GET /admin/courses/:id`: edit form plus the prerequisite checklist.
pub async fn edit_course_page(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(course_id): Path<Uuid>,
    Query(flash): Query<FlashQuery>,
) -> Result<Html<String>, Redirect> {
    let admin = require_admin_user(&state, &jar).await?;
    let pool = state.pool_ref();

    let load = async {
        let course = data::fetch_course(pool, course_id).await?;
        let all_courses = data::fetch_courses(pool).await?;
        let prerequisites = data::fetch_prerequisites(pool, course_id).await?;
        let teachers = data::fetch_teachers(pool).await?;
        Ok::<_, sqlx::Error>((course, all_courses, prerequisites, teachers))
    };

    let (course, all_courses, prerequisites, teachers) = load.await.map_err(|err| {
        error!(?err, %course_id, "failed to load course for editing");
        Redirect::to("/admin?error=unknown")
    })?;
    let course = course.ok_or_else(|| Redirect::to("/admin?error=course_not_found"))?;

    let selected: HashSet<Uuid> = prerequisites.iter().map(|course| course.id).collect();
    let flash_html = flash.render(None);
    Ok(Html(render_edit_page(
        &admin,
        &course,
        &all_courses,
        &selected,
        &teachers,
        &flash_html,
    )))
}

pub(super) fn render_teacher_options(teachers: &[UserRow], selected: Option<Uuid>) -> String {
    let mut options = render_option("", "Unassigned", selected.is_none());
    for teacher in teachers {
        options.push_str(&render_option(
            &teacher.id.to_string(),
            &teacher.username,
            selected == Some(teacher.id),
        ));
    }
    options
}

/// Shared course form. `course` is `None` for the create form on the console.
pub(super) fn render_course_form(course: Option<&CourseRow>, teachers: &[UserRow]) -> String {
    let value = |pick: fn(&CourseRow) -> String| course.map(pick).unwrap_or_default();
    format!(
        r#"<form method="post" action="/admin/courses" class="stacked">
    <input type="hidden" name="id" value="{id}">
    <label>Code <input type="text" name="code" value="{code}" required></label>
    <label>Name <input type="text" name="name" value="{name}" required></label>
    <label>Description <textarea name="description">{description}</textarea></label>
    <label>Teacher <select name="teacher_id">{teachers}</select></label>
    <label>Schedule <input type="text" name="schedule" value="{schedule}"></label>
    <label>Capacity <input type="number" name="capacity" min="0" value="{capacity}"></label>
    <button type="submit">{submit}</button>
</form>"#,
        id = value(|c| c.id.to_string()),
        code = escape_html(&value(|c| c.code.clone())),
        name = escape_html(&value(|c| c.name.clone())),
        description = escape_html(&value(|c| c.description.clone())),
        teachers = render_teacher_options(teachers, course.and_then(|c| c.teacher_id)),
        schedule = escape_html(&value(|c| c.schedule.clone())),
        capacity = course.map_or(DEFAULT_CAPACITY, |c| c.capacity),
        submit = if course.is_some() { "Save course" } else { "Create course" },
    )
}

fn render_edit_page(
    admin: &AuthUser,
    course: &CourseRow,
    all_courses: &[CourseRow],
    selected: &HashSet<Uuid>,
    teachers: &[UserRow],
    flash_html: &str,
) -> String {
    let checklist = all_courses
        .iter()
        .filter(|candidate| candidate.id != course.id)
        .map(|candidate| {
            format!(
                r#"<label class="checkbox"><input type="checkbox" name="prerequisite" value="{id}"{checked}> {name}</label>"#,
                id = candidate.id,
                checked = if selected.contains(&candidate.id) { " checked" } else { "" },
                name = escape_html(&candidate.display_name()),
            )
        })
        .collect::<String>();
    let checklist = if checklist.is_empty() {
        r#"<p class="note">No other courses exist yet.</p>"#.to_string()
    } else {
        checklist
    };

    let body = format!(
        r#"<section class="panel">
    <h1>Edit {title}</h1>
    {form}
</section>
<section class="panel">
    <h2>Prerequisites</h2>
    <form method="post" action="/admin/courses/{id}/prerequisites" class="stacked">
        {checklist}
        <button type="submit">Save prerequisites</button>
    </form>
</section>
<section class="panel">
    <form method="post" action="/admin/courses/delete">
        <input type="hidden" name="course_id" value="{id}">
        <button type="submit" class="danger">Delete course</button>
    </form>
    <p><a href="/admin">Back to the admin console</a></p>
</section>"#,
        title = escape_html(&course.display_name()),
        form = render_course_form(Some(course), teachers),
        id = course.id,
    );

    render_page(PageLayout {
        title: "Edit course",
        user: Some(admin),
        flash_html,
        body_html: &body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(code: &str, name: &str, capacity: &str) -> CourseForm {
        CourseForm {
            code: code.into(),
            name: name.into(),
            capacity: capacity.into(),
            ..Default::default()
        }
    }

    #[test]
    fn blank_capacity_uses_default() {
        let input = validate_course(&form("MATH101", "<b>Algebra</b>", "")).unwrap();
        assert_eq!(input.capacity, DEFAULT_CAPACITY);
        assert_eq!(input.name, "Algebra");
        assert_eq!(input.id, None);
        assert_eq!(input.teacher_id, None);
    }

    #[test]
    fn rejects_bad_course_fields() {
        assert_eq!(validate_course(&form("", "Algebra", "10")), Err("course_missing_fields"));
        assert_eq!(validate_course(&form("M1", "Algebra", "-1")), Err("course_invalid_capacity"));
        assert_eq!(validate_course(&form("M1", "Algebra", "lots")), Err("course_invalid_capacity"));

        let mut bad_teacher = form("M1", "Algebra", "0");
        bad_teacher.teacher_id = "not-a-uuid".into();
        assert_eq!(validate_course(&bad_teacher), Err("course_invalid_teacher"));
    }

    #[test]
    fn overlong_fields_are_rejected_not_truncated() {
        assert_eq!(
            validate_course(&form("M1", &"a".repeat(101), "10")),
            Err("course_name_too_long")
        );
        assert!(validate_course(&form("M1", &"a".repeat(100), "10")).is_ok());
        assert_eq!(
            validate_course(&form(&"C".repeat(21), "Algebra", "10")),
            Err("course_code_too_long")
        );

        let mut long_schedule = form("M1", "Algebra", "10");
        long_schedule.schedule = "Mon ".repeat(30);
        assert_eq!(validate_course(&long_schedule), Err("course_schedule_too_long"));
    }

    #[test]
    fn zero_capacity_is_allowed() {
        assert_eq!(validate_course(&form("M1", "Closed", "0")).unwrap().capacity, 0);
    }

    #[test]
    fn prerequisites_skip_duplicates_and_reject_self() {
        let course = Uuid::new_v4();
        let other = Uuid::new_v4();
        let fields = vec![
            ("prerequisite".to_string(), other.to_string()),
            ("prerequisite".to_string(), other.to_string()),
            ("ignored".to_string(), "x".to_string()),
        ];
        assert_eq!(parse_prerequisites(course, &fields), Ok(vec![other]));

        let own = vec![("prerequisite".to_string(), course.to_string())];
        assert_eq!(parse_prerequisites(course, &own), Err("prerequisite_invalid"));
        assert_eq!(parse_prerequisites(course, &[]), Ok(vec![]));
    }

    #[test]
    fn course_redirect_targets_edit_page_when_updating() {
        let id = Uuid::new_v4();
        let redirect = course_redirect(Some(id), "status=course_saved");
        let response = axum::response::IntoResponse::into_response(redirect);
        let location = response.headers()["location"].to_str().unwrap().to_string();
        assert_eq!(location, format!("/admin/courses/{id}?status=course_saved"));
    }

    mod database {
        use super::*;
        use crate::test_support;

        fn update(id: Uuid, capacity: i32) -> CourseInput {
            CourseInput {
                id: Some(id),
                code: format!("UPD{}", Uuid::new_v4().simple()),
                name: "Algebra".into(),
                description: String::new(),
                teacher_id: None,
                schedule: String::new(),
                capacity,
            }
        }

        async fn capacity_of(pool: &PgPool, id: Uuid) -> i32 {
            sqlx::query_scalar("SELECT capacity FROM courses WHERE id = $1")
                .bind(id)
                .fetch_one(pool)
                .await
                .unwrap()
        }

        #[tokio::test]
        async fn capacity_cannot_drop_below_approved_seats() {
            let Some(pool) = test_support::pool().await else { return };
            let course = test_support::course(&pool, None, 30).await;
            for status in ["approved", "approved", "pending"] {
                let (student, _) = test_support::user(&pool, "student").await;
                test_support::enrollment(&pool, student, course, status).await;
            }

            assert_eq!(
                store_course(&pool, &update(course, 1)).await,
                Err("course_capacity_below_approved")
            );
            assert_eq!(capacity_of(&pool, course).await, 30);

            assert_eq!(store_course(&pool, &update(course, 2)).await, Ok(()));
            assert_eq!(capacity_of(&pool, course).await, 2);
        }

        #[tokio::test]
        async fn updating_missing_course_reports_not_found() {
            let Some(pool) = test_support::pool().await else { return };
            assert_eq!(
                store_course(&pool, &update(Uuid::new_v4(), 5)).await,
                Err("course_not_found")
            );
        }
    }
}
