use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::curriculum::{CourseCurriculum, CourseDetail};
use crate::database::catalog::{get_category, get_course, get_tags_for_course};
use crate::error::AppError;
use crate::models::{Lesson, Section};

const SECTION_COLUMNS: &str = r#"id, course_id, title, description, "order""#;
const LESSON_COLUMNS: &str = r#"id, section_id, title, description, youtube_video_id, "order""#;

#[derive(Debug, Clone)]
pub struct LessonInput<'a> {
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub youtube_video_id: &'a str,
}

// Sections

#[instrument(skip(pool))]
pub async fn get_section(pool: &Pool<Sqlite>, id: i64) -> Result<Section, AppError> {
    sqlx::query_as::<_, Section>(&format!(
        "SELECT {} FROM sections WHERE id = ?",
        SECTION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Section with id {} not found", id)))
}

/// Appends a section at `max(order) + 1` of its course. The position is
/// computed inside the insert so concurrent appends cannot pick the same slot.
#[instrument(skip(pool))]
pub async fn create_section(
    pool: &Pool<Sqlite>,
    course_id: i64,
    title: &str,
    description: Option<&str>,
) -> Result<Section, AppError> {
    info!("Creating section");
    get_course(pool, course_id).await?;

    let section = sqlx::query_as::<_, Section>(&format!(
        r#"INSERT INTO sections (course_id, title, description, "order")
           SELECT ?, ?, ?, COALESCE(MAX("order"), 0) + 1 FROM sections WHERE course_id = ?
           RETURNING {}"#,
        SECTION_COLUMNS
    ))
    .bind(course_id)
    .bind(title)
    .bind(description)
    .bind(course_id)
    .fetch_one(pool)
    .await
    .map_err(|e| AppError::from_write(e, "Section position"))?;

    info!(section_id = section.id, order = section.order, "Section created");
    Ok(section)
}

/// Returns the owning course id.
#[instrument(skip(pool))]
pub async fn update_section(
    pool: &Pool<Sqlite>,
    id: i64,
    title: &str,
    description: Option<&str>,
) -> Result<i64, AppError> {
    info!("Updating section");
    let course_id: Option<i64> = sqlx::query_scalar(
        "UPDATE sections SET title = ?, description = ? WHERE id = ? RETURNING course_id",
    )
    .bind(title)
    .bind(description)
    .bind(id)
    .fetch_optional(pool)
    .await?;

    course_id.ok_or_else(|| AppError::NotFound(format!("Section with id {} not found", id)))
}

/// Lessons and their progress rows go with the section. Remaining sections
/// keep their orders; gaps are allowed.
#[instrument(skip(pool))]
pub async fn delete_section(pool: &Pool<Sqlite>, id: i64) -> Result<i64, AppError> {
    info!("Deleting section");
    let course_id: Option<i64> =
        sqlx::query_scalar("DELETE FROM sections WHERE id = ? RETURNING course_id")
            .bind(id)
            .fetch_optional(pool)
            .await?;

    course_id.ok_or_else(|| AppError::NotFound(format!("Section with id {} not found", id)))
}

#[instrument(skip(pool))]
pub async fn course_id_for_section(pool: &Pool<Sqlite>, section_id: i64) -> Result<i64, AppError> {
    get_section(pool, section_id).await.map(|s| s.course_id)
}

// Lessons

/// Appends a lesson at `max(order) + 1` of its section.
#[instrument(skip(pool))]
pub async fn create_lesson(
    pool: &Pool<Sqlite>,
    section_id: i64,
    input: LessonInput<'_>,
) -> Result<Lesson, AppError> {
    info!("Creating lesson");
    get_section(pool, section_id).await?;

    let lesson = sqlx::query_as::<_, Lesson>(&format!(
        r#"INSERT INTO lessons (section_id, title, description, youtube_video_id, "order")
           SELECT ?, ?, ?, ?, COALESCE(MAX("order"), 0) + 1 FROM lessons WHERE section_id = ?
           RETURNING {}"#,
        LESSON_COLUMNS
    ))
    .bind(section_id)
    .bind(input.title)
    .bind(input.description)
    .bind(input.youtube_video_id)
    .bind(section_id)
    .fetch_one(pool)
    .await
    .map_err(|e| AppError::from_write(e, "Lesson position"))?;

    info!(lesson_id = lesson.id, order = lesson.order, "Lesson created");
    Ok(lesson)
}

/// Returns the owning course id.
#[instrument(skip(pool))]
pub async fn update_lesson(
    pool: &Pool<Sqlite>,
    id: i64,
    input: LessonInput<'_>,
) -> Result<i64, AppError> {
    info!("Updating lesson");
    let section_id: Option<i64> = sqlx::query_scalar(
        "UPDATE lessons SET title = ?, description = ?, youtube_video_id = ? WHERE id = ?
         RETURNING section_id",
    )
    .bind(input.title)
    .bind(input.description)
    .bind(input.youtube_video_id)
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match section_id {
        Some(section_id) => course_id_for_section(pool, section_id).await,
        None => Err(AppError::NotFound(format!("Lesson with id {} not found", id))),
    }
}

/// Returns the owning course id.
#[instrument(skip(pool))]
pub async fn delete_lesson(pool: &Pool<Sqlite>, id: i64) -> Result<i64, AppError> {
    info!("Deleting lesson");
    let course_id = course_id_for_lesson(pool, id).await?;

    sqlx::query("DELETE FROM lessons WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(course_id)
}

#[instrument(skip(pool))]
pub async fn course_id_for_lesson(pool: &Pool<Sqlite>, lesson_id: i64) -> Result<i64, AppError> {
    let course_id: Option<i64> = sqlx::query_scalar(
        "SELECT s.course_id FROM lessons l JOIN sections s ON s.id = l.section_id WHERE l.id = ?",
    )
    .bind(lesson_id)
    .fetch_optional(pool)
    .await?;

    course_id.ok_or_else(|| AppError::NotFound(format!("Lesson with id {} not found", lesson_id)))
}

// Assembled views

#[instrument(skip(pool))]
pub async fn get_curriculum(pool: &Pool<Sqlite>, course_id: i64) -> Result<CourseCurriculum, AppError> {
    info!("Loading curriculum");
    let course = get_course(pool, course_id).await?;

    let sections = sqlx::query_as::<_, Section>(&format!(
        r#"SELECT {} FROM sections WHERE course_id = ? ORDER BY "order""#,
        SECTION_COLUMNS
    ))
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    let lessons = sqlx::query_as::<_, Lesson>(
        r#"SELECT l.id, l.section_id, l.title, l.description, l.youtube_video_id, l."order"
           FROM lessons l
           JOIN sections s ON s.id = l.section_id
           WHERE s.course_id = ?
           ORDER BY s."order", l."order""#,
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(CourseCurriculum::assemble(course, sections, lessons))
}

#[instrument(skip(pool))]
pub async fn get_course_detail(pool: &Pool<Sqlite>, course_id: i64) -> Result<CourseDetail, AppError> {
    let curriculum = get_curriculum(pool, course_id).await?;

    let category = match curriculum.course.category_id {
        Some(id) => Some(get_category(pool, id).await?),
        None => None,
    };
    let tags = get_tags_for_course(pool, course_id).await?;

    Ok(CourseDetail::new(curriculum, category, tags))
}
