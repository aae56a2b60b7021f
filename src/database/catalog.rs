use std::collections::HashMap;

use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::{AdminStats, Category, Course, CourseListing, DbCourse, Tag};

const COURSE_COLUMNS: &str =
    "c.id, c.title, c.description, c.thumbnail_url, c.category_id, c.created_at, c.updated_at";

#[derive(Debug, Clone)]
pub struct CourseInput<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub thumbnail_url: Option<&'a str>,
    pub category_id: i64,
    pub tag_ids: &'a [i64],
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CourseFilter {
    pub category_id: Option<i64>,
    pub tag_id: Option<i64>,
}

// Categories

#[instrument(skip(pool))]
pub async fn get_all_categories(pool: &Pool<Sqlite>) -> Result<Vec<Category>, AppError> {
    info!("Getting all categories");
    let rows = sqlx::query_as::<_, Category>(
        "SELECT id, name, description FROM categories ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[instrument(skip(pool))]
pub async fn get_category(pool: &Pool<Sqlite>, id: i64) -> Result<Category, AppError> {
    sqlx::query_as::<_, Category>("SELECT id, name, description FROM categories WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Category with id {} not found", id)))
}

#[instrument(skip(pool))]
pub async fn create_category(
    pool: &Pool<Sqlite>,
    name: &str,
    description: Option<&str>,
) -> Result<i64, AppError> {
    info!("Creating category");
    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM categories WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Err(AppError::Conflict(format!(
            "Category '{}' already exists",
            name
        )));
    }

    let res = sqlx::query("INSERT INTO categories (name, description) VALUES (?, ?)")
        .bind(name)
        .bind(description)
        .execute(pool)
        .await
        .map_err(|e| AppError::from_write(e, "Category"))?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn update_category(
    pool: &Pool<Sqlite>,
    id: i64,
    name: &str,
    description: Option<&str>,
) -> Result<(), AppError> {
    info!("Updating category");
    let existing: Option<i64> =
        sqlx::query_scalar("SELECT id FROM categories WHERE name = ? AND id != ?")
            .bind(name)
            .bind(id)
            .fetch_optional(pool)
            .await?;

    if existing.is_some() {
        return Err(AppError::Conflict(format!(
            "Category '{}' already exists",
            name
        )));
    }

    let res = sqlx::query("UPDATE categories SET name = ?, description = ? WHERE id = ?")
        .bind(name)
        .bind(description)
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| AppError::from_write(e, "Category"))?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Category with id {} not found",
            id
        )));
    }

    Ok(())
}

/// Refuses while any course still points at the category.
#[instrument(skip(pool))]
pub async fn delete_category(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting category");
    let course_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM courses WHERE category_id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;

    if course_count > 0 {
        return Err(AppError::Conflict(format!(
            "Cannot delete category: {} course(s) still use it",
            course_count
        )));
    }

    let res = sqlx::query("DELETE FROM categories WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Category with id {} not found",
            id
        )));
    }

    Ok(())
}

// Tags

#[instrument(skip(pool))]
pub async fn get_all_tags(pool: &Pool<Sqlite>) -> Result<Vec<Tag>, AppError> {
    info!("Getting all tags");
    let rows = sqlx::query_as::<_, Tag>("SELECT id, name FROM tags ORDER BY name")
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

#[instrument(skip(pool))]
pub async fn create_tag(pool: &Pool<Sqlite>, name: &str) -> Result<i64, AppError> {
    info!("Creating tag");
    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM tags WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Err(AppError::Conflict(format!("Tag '{}' already exists", name)));
    }

    let res = sqlx::query("INSERT INTO tags (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await
        .map_err(|e| AppError::from_write(e, "Tag"))?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn update_tag(pool: &Pool<Sqlite>, id: i64, name: &str) -> Result<(), AppError> {
    info!("Updating tag");
    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM tags WHERE name = ? AND id != ?")
        .bind(name)
        .bind(id)
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Err(AppError::Conflict(format!("Tag '{}' already exists", name)));
    }

    let res = sqlx::query("UPDATE tags SET name = ? WHERE id = ?")
        .bind(name)
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| AppError::from_write(e, "Tag"))?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Tag with id {} not found", id)));
    }

    Ok(())
}

/// Detaches the tag from every course, then removes it.
#[instrument(skip(pool))]
pub async fn delete_tag(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting tag");
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM course_tags WHERE tag_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let res = sqlx::query("DELETE FROM tags WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    if res.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(AppError::NotFound(format!("Tag with id {} not found", id)));
    }

    tx.commit().await?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_tags_for_course(pool: &Pool<Sqlite>, course_id: i64) -> Result<Vec<Tag>, AppError> {
    let rows = sqlx::query_as::<_, Tag>(
        "SELECT t.id, t.name FROM tags t
         JOIN course_tags ct ON ct.tag_id = t.id
         WHERE ct.course_id = ?
         ORDER BY t.name",
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

// Courses

#[instrument(skip(pool))]
pub async fn get_course(pool: &Pool<Sqlite>, id: i64) -> Result<Course, AppError> {
    info!("Getting course");
    let row = sqlx::query_as::<_, DbCourse>(&format!(
        "SELECT {} FROM courses c WHERE c.id = ?",
        COURSE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(course) => Ok(Course::from(course)),
        _ => Err(AppError::NotFound(format!("Course with id {} not found", id))),
    }
}

/// Catalog listing, newest first, with category and tags attached.
#[instrument(skip(pool))]
pub async fn list_courses(
    pool: &Pool<Sqlite>,
    filter: CourseFilter,
) -> Result<Vec<CourseListing>, AppError> {
    info!("Listing courses");
    let mut query = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {} FROM courses c WHERE 1 = 1",
        COURSE_COLUMNS
    ));

    if let Some(category_id) = filter.category_id {
        query.push(" AND c.category_id = ").push_bind(category_id);
    }

    if let Some(tag_id) = filter.tag_id {
        query
            .push(" AND EXISTS (SELECT 1 FROM course_tags ct WHERE ct.course_id = c.id AND ct.tag_id = ")
            .push_bind(tag_id)
            .push(")");
    }

    query.push(" ORDER BY c.created_at DESC, c.id DESC");

    let courses: Vec<Course> = query
        .build_query_as::<DbCourse>()
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(Course::from)
        .collect();

    let categories: HashMap<i64, Category> = get_all_categories(pool)
        .await?
        .into_iter()
        .map(|c| (c.id, c))
        .collect();

    let tag_rows: Vec<(i64, i64, String)> = sqlx::query_as(
        "SELECT ct.course_id, t.id, t.name FROM course_tags ct
         JOIN tags t ON t.id = ct.tag_id
         ORDER BY t.name",
    )
    .fetch_all(pool)
    .await?;

    let mut tags_by_course: HashMap<i64, Vec<Tag>> = HashMap::new();
    for (course_id, id, name) in tag_rows {
        tags_by_course
            .entry(course_id)
            .or_default()
            .push(Tag { id, name });
    }

    Ok(courses
        .into_iter()
        .map(|course| CourseListing {
            category: course
                .category_id
                .and_then(|id| categories.get(&id).cloned()),
            tags: tags_by_course.remove(&course.id).unwrap_or_default(),
            course,
        })
        .collect())
}

async fn ensure_category_exists(pool: &Pool<Sqlite>, category_id: i64) -> Result<(), AppError> {
    match get_category(pool, category_id).await {
        Ok(_) => Ok(()),
        Err(AppError::NotFound(_)) => Err(AppError::Validation(format!(
            "Category with id {} does not exist",
            category_id
        ))),
        Err(e) => Err(e),
    }
}

/// Only a dangling tag id is the caller's fault; anything else is a storage failure.
fn tag_link_error(tag_id: i64, err: sqlx::Error) -> AppError {
    match err {
        sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
            AppError::Validation(format!("Tag with id {} does not exist", tag_id))
        }
        other => AppError::Database(other),
    }
}

#[instrument(skip(pool))]
pub async fn create_course(pool: &Pool<Sqlite>, input: CourseInput<'_>) -> Result<i64, AppError> {
    info!("Creating course");
    ensure_category_exists(pool, input.category_id).await?;

    let mut tx = pool.begin().await?;

    let res = sqlx::query(
        "INSERT INTO courses (title, description, thumbnail_url, category_id) VALUES (?, ?, ?, ?)",
    )
    .bind(input.title)
    .bind(input.description)
    .bind(input.thumbnail_url)
    .bind(input.category_id)
    .execute(&mut *tx)
    .await?;

    let course_id = res.last_insert_rowid();

    for tag_id in input.tag_ids {
        sqlx::query("INSERT OR IGNORE INTO course_tags (course_id, tag_id) VALUES (?, ?)")
            .bind(course_id)
            .bind(tag_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| tag_link_error(*tag_id, e))?;
    }

    tx.commit().await?;
    Ok(course_id)
}

/// Updates the course fields and replaces its tag set.
#[instrument(skip(pool))]
pub async fn update_course(
    pool: &Pool<Sqlite>,
    id: i64,
    input: CourseInput<'_>,
) -> Result<(), AppError> {
    info!("Updating course");
    ensure_category_exists(pool, input.category_id).await?;

    let mut tx = pool.begin().await?;

    let res = sqlx::query(
        "UPDATE courses
         SET title = ?, description = ?, thumbnail_url = ?, category_id = ?, updated_at = CURRENT_TIMESTAMP
         WHERE id = ?",
    )
    .bind(input.title)
    .bind(input.description)
    .bind(input.thumbnail_url)
    .bind(input.category_id)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if res.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(AppError::NotFound(format!("Course with id {} not found", id)));
    }

    sqlx::query("DELETE FROM course_tags WHERE course_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    for tag_id in input.tag_ids {
        sqlx::query("INSERT OR IGNORE INTO course_tags (course_id, tag_id) VALUES (?, ?)")
            .bind(id)
            .bind(tag_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| tag_link_error(*tag_id, e))?;
    }

    tx.commit().await?;
    Ok(())
}

/// Sections, lessons, tag links and progress go with the course.
#[instrument(skip(pool))]
pub async fn delete_course(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting course");
    let res = sqlx::query("DELETE FROM courses WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Course with id {} not found", id)));
    }

    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_admin_stats(pool: &Pool<Sqlite>) -> Result<AdminStats, AppError> {
    info!("Counting catalog");
    let (courses, sections, lessons, categories, tags): (i64, i64, i64, i64, i64) =
        sqlx::query_as(
            "SELECT
                (SELECT COUNT(*) FROM courses),
                (SELECT COUNT(*) FROM sections),
                (SELECT COUNT(*) FROM lessons),
                (SELECT COUNT(*) FROM categories),
                (SELECT COUNT(*) FROM tags)",
        )
        .fetch_one(pool)
        .await?;

    Ok(AdminStats {
        courses,
        sections,
        lessons,
        categories,
        tags,
    })
}
