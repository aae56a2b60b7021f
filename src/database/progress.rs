use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument, warn};

use crate::database::curriculum::{course_id_for_lesson, get_curriculum};
use crate::error::AppError;
use crate::models::{Course, DbCourse, DbProgress, Progress};
use crate::progress::{Enrollment, ProgressSummary, next_lesson};

/// Lesson ids must belong to the course they are reported under.
async fn ensure_lesson_in_course(
    pool: &Pool<Sqlite>,
    course_id: i64,
    lesson_id: i64,
) -> Result<(), AppError> {
    let owner = course_id_for_lesson(pool, lesson_id).await?;
    if owner != course_id {
        warn!(course_id, lesson_id, owner, "Lesson reported under foreign course");
        return Err(AppError::Validation("Invalid request".to_string()));
    }
    Ok(())
}

/// Idempotent: a second call refreshes `completed_at` and leaves one row.
#[instrument(skip(pool))]
pub async fn mark_lesson_complete(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
    lesson_id: i64,
) -> Result<Progress, AppError> {
    info!("Marking lesson complete");
    ensure_lesson_in_course(pool, course_id, lesson_id).await?;

    let now = Utc::now().naive_utc();
    let row = sqlx::query_as::<_, DbProgress>(
        "INSERT INTO progress (user_id, lesson_id, completed, completed_at, updated_at)
         VALUES (?, ?, TRUE, ?, ?)
         ON CONFLICT (user_id, lesson_id) DO UPDATE
         SET completed = TRUE, completed_at = excluded.completed_at, updated_at = excluded.updated_at
         RETURNING user_id, lesson_id, completed, completed_at",
    )
    .bind(user_id)
    .bind(lesson_id)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(Progress::from(row))
}

/// Clears the completion flag but keeps the row. No row means nothing to do.
#[instrument(skip(pool))]
pub async fn mark_lesson_incomplete(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
    lesson_id: i64,
) -> Result<Progress, AppError> {
    info!("Marking lesson incomplete");
    ensure_lesson_in_course(pool, course_id, lesson_id).await?;

    let row = sqlx::query_as::<_, DbProgress>(
        "UPDATE progress
         SET completed = FALSE, completed_at = NULL, updated_at = ?
         WHERE user_id = ? AND lesson_id = ?
         RETURNING user_id, lesson_id, completed, completed_at",
    )
    .bind(Utc::now().naive_utc())
    .bind(user_id)
    .bind(lesson_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Progress::from).unwrap_or(Progress {
        user_id,
        lesson_id,
        completed: false,
        completed_at: None,
    }))
}

#[instrument(skip(pool))]
pub async fn get_progress(
    pool: &Pool<Sqlite>,
    user_id: i64,
    lesson_id: i64,
) -> Result<Option<Progress>, AppError> {
    let row = sqlx::query_as::<_, DbProgress>(
        "SELECT user_id, lesson_id, completed, completed_at FROM progress
         WHERE user_id = ? AND lesson_id = ?",
    )
    .bind(user_id)
    .bind(lesson_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Progress::from))
}

#[instrument(skip(pool))]
pub async fn completed_lesson_ids(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
) -> Result<HashSet<i64>, AppError> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT p.lesson_id FROM progress p
         JOIN lessons l ON l.id = p.lesson_id
         JOIN sections s ON s.id = l.section_id
         WHERE p.user_id = ? AND s.course_id = ? AND p.completed = TRUE",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(ids.into_iter().collect())
}

#[instrument(skip(pool))]
pub async fn get_course_progress(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
) -> Result<ProgressSummary, AppError> {
    let curriculum = get_curriculum(pool, course_id).await?;
    let completed = completed_lesson_ids(pool, user_id, course_id).await?;
    Ok(ProgressSummary::for_curriculum(&curriculum, &completed))
}

/// Courses the user has any progress row in, most recently active first.
#[instrument(skip(pool))]
pub async fn get_enrollments(pool: &Pool<Sqlite>, user_id: i64) -> Result<Vec<Enrollment>, AppError> {
    info!("Loading enrollments");
    let courses = sqlx::query_as::<_, DbCourse>(
        "SELECT c.id, c.title, c.description, c.thumbnail_url, c.category_id, c.created_at, c.updated_at
         FROM courses c
         JOIN sections s ON s.course_id = c.id
         JOIN lessons l ON l.section_id = s.id
         JOIN progress p ON p.lesson_id = l.id
         WHERE p.user_id = ?
         GROUP BY c.id
         ORDER BY MAX(p.updated_at) DESC, c.id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(Course::from)
    .collect::<Vec<_>>();

    let mut enrollments = Vec::with_capacity(courses.len());
    for course in courses {
        let curriculum = get_curriculum(pool, course.id).await?;
        let completed = completed_lesson_ids(pool, user_id, course.id).await?;

        let last_completed_at: Option<NaiveDateTime> = sqlx::query_scalar(
            "SELECT MAX(p.completed_at) FROM progress p
             JOIN lessons l ON l.id = p.lesson_id
             JOIN sections s ON s.id = l.section_id
             WHERE p.user_id = ? AND s.course_id = ? AND p.completed = TRUE",
        )
        .bind(user_id)
        .bind(course.id)
        .fetch_one(pool)
        .await?;

        enrollments.push(Enrollment {
            progress: ProgressSummary::for_curriculum(&curriculum, &completed),
            next_lesson: next_lesson(&curriculum, &completed).cloned(),
            last_completed_at: last_completed_at
                .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc)),
            course,
        });
    }

    Ok(enrollments)
}
