//! Postgres fixtures for tests that exercise transactional behaviour.
//!
//! Tests connect to `DATABASE_URL` and skip themselves when it is unset. Every fixture
//! row carries fresh UUIDs so tests can share one database.

use sqlx::{PgPool, postgres::PgPoolOptions};
use uuid::Uuid;

pub async fn pool() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping database test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect to test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    Some(pool)
}

fn unique(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// Inserts an active user and returns its id and username.
pub async fn user(pool: &PgPool, role: &str) -> (Uuid, String) {
    let id = Uuid::new_v4();
    let username = unique(role);
    sqlx::query(
        "INSERT INTO users (id, username, email, password_hash, role) VALUES ($1, $2, $3, 'x', $4)",
    )
    .bind(id)
    .bind(&username)
    .bind(format!("{username}@example.com"))
    .bind(role)
    .execute(pool)
    .await
    .expect("insert user");
    (id, username)
}

pub async fn course(pool: &PgPool, teacher_id: Option<Uuid>, capacity: i32) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO courses (id, name, code, teacher_id, capacity) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind(unique("Course"))
    .bind(unique("C"))
    .bind(teacher_id)
    .bind(capacity)
    .execute(pool)
    .await
    .expect("insert course");
    id
}

pub async fn enrollment(pool: &PgPool, student_id: Uuid, course_id: Uuid, status: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO enrollments (id, student_id, course_id, status) VALUES ($1, $2, $3, $4)")
        .bind(id)
        .bind(student_id)
        .bind(course_id)
        .bind(status)
        .execute(pool)
        .await
        .expect("insert enrollment");
    id
}

pub async fn enrollment_status(pool: &PgPool, enrollment_id: Uuid) -> String {
    sqlx::query_scalar("SELECT status FROM enrollments WHERE id = $1")
        .bind(enrollment_id)
        .fetch_one(pool)
        .await
        .expect("fetch enrollment status")
}
