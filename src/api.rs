use rocket::Responder;
use rocket::State;
use rocket::http::{CookieJar, Status};
use rocket::response::Redirect;
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use tracing::info;
use validator::Validate;

use crate::auth::{AdminUser, Permission, Role, SESSION_COOKIE, User, UserSession};
use crate::cache::ViewCache;
use crate::config::AppConfig;
use crate::curriculum::{CourseDetail, LessonAccess, LessonView, lesson_access};
use crate::database::{
    CourseFilter, CourseInput, LessonInput, authenticate_user, completed_lesson_ids,
    course_id_for_lesson, course_id_for_section, create_category, create_course, create_lesson,
    create_section, create_tag, create_user, create_user_session, delete_category, delete_course,
    delete_lesson, delete_section, delete_tag, get_admin_stats, get_all_categories, get_all_tags,
    get_course_detail, get_course_progress, get_progress, get_curriculum, get_enrollments, invalidate_session,
    list_courses, mark_lesson_complete, mark_lesson_incomplete, update_category, update_course,
    update_lesson, update_section, update_tag,
};
use crate::error::AppError;
use crate::models::{AdminStats, Category, CourseListing, Lesson, Progress, Section, Tag};
use crate::ordering::{Direction, MoveOutcome, OrderedTable, move_item};
use crate::progress::{Enrollment, ProgressSummary};
use crate::validation::{
    ApiError, AppErrorExt, JsonValidateExt, ToValidationResponse, ValidationResponse,
    validate_not_blank, validate_video_id,
};

// Session and account

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(custom(function = "validate_not_blank"))]
    username: String,
    #[validate(custom(function = "validate_not_blank"))]
    password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<UserData>,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UserData {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub role: String,
    pub can_manage_content: bool,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            role: user.role.to_string(),
            can_manage_content: user.has_permission(Permission::ManageCurriculum),
            username: user.username,
            display_name: user.display_name,
        }
    }
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Json<LoginResponse>, ApiError> {
    use chrono::Utc;
    use rocket::http::{Cookie, SameSite};

    let validated = login.validate_custom()?;

    match authenticate_user(db, &validated.username, &validated.password)
        .await
        .validate_custom()?
    {
        Some(user) => {
            let token = UserSession::generate_token();
            let expires_at = Utc::now() + chrono::Duration::hours(config.session_hours);

            create_user_session(db, user.id, &token, expires_at.naive_utc())
                .await
                .validate_custom()?;

            let cookie = Cookie::build((SESSION_COOKIE, token))
                .same_site(SameSite::Lax)
                .http_only(true)
                .max_age(rocket::time::Duration::hours(config.session_hours));
            cookies.add_private(cookie);

            Ok(Json(LoginResponse {
                success: true,
                user: Some(UserData::from(user)),
                error: None,
            }))
        }
        None => Ok(Json(LoginResponse {
            success: false,
            user: None,
            error: Some("Invalid username or password".to_string()),
        })),
    }
}

#[post("/logout")]
pub async fn api_logout(cookies: &CookieJar<'_>, db: &State<Pool<Sqlite>>) -> Status {
    let token = cookies
        .get_private(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string());

    if let Some(token) = token {
        if let Err(e) = invalidate_session(db, &token).await {
            e.log_and_record("Logout");
        }
    }

    cookies.remove_private(rocket::http::Cookie::build(SESSION_COOKIE));

    Status::Ok
}

#[get("/me")]
pub async fn api_me(user: User) -> Json<UserData> {
    Json(UserData::from(user))
}

#[derive(Deserialize, Validate)]
pub struct RegistrationRequest {
    #[validate(length(min = 3, max = 64, message = "Username must be 3 to 64 characters"))]
    username: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    password: String,
    #[validate(custom(function = "validate_not_blank"))]
    display_name: Option<String>,
}

/// Self-registration always yields a learner.
#[post("/register", data = "<registration>")]
pub async fn api_register(
    registration: Json<RegistrationRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<UserData>>, ApiError> {
    let validated = registration.validate_custom()?;

    let id = create_user(
        db,
        &validated.username,
        &validated.password,
        Role::Learner,
        validated.display_name.as_deref(),
    )
    .await
    .map_err(|e| match e {
        AppError::Conflict(_) => Custom(
            Status::Conflict,
            Json(ValidationResponse::with_error(
                "username",
                "Username already exists",
            )),
        ),
        other => other.to_validation_response(),
    })?;

    info!(user_id = id, "Learner registered");

    Ok(Custom(
        Status::Created,
        Json(UserData {
            id,
            display_name: validated
                .display_name
                .unwrap_or_else(|| validated.username.clone()),
            username: validated.username,
            role: Role::Learner.to_string(),
            can_manage_content: false,
        }),
    ))
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

// Public catalog

fn listing_key(base: &str, filter: &CourseFilter) -> String {
    let mut params = Vec::new();
    if let Some(category) = filter.category_id {
        params.push(format!("category={}", category));
    }
    if let Some(tag) = filter.tag_id {
        params.push(format!("tag={}", tag));
    }

    if params.is_empty() {
        base.to_string()
    } else {
        format!("{}?{}", base, params.join("&"))
    }
}

#[get("/courses?<category>&<tag>")]
pub async fn api_list_courses(
    category: Option<i64>,
    tag: Option<i64>,
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<Json<Vec<CourseListing>>, ApiError> {
    let filter = CourseFilter {
        category_id: category,
        tag_id: tag,
    };

    let courses = cache
        .get_or_load(&listing_key("/courses", &filter), || {
            list_courses(db, filter)
        })
        .await
        .validate_custom()?;

    Ok(Json(courses))
}

#[derive(Serialize, Deserialize)]
pub struct CoursePage {
    #[serde(flatten)]
    pub detail: CourseDetail,
    pub progress: Option<ProgressSummary>,
    pub completed_lesson_ids: Vec<i64>,
}

#[get("/courses/<id>")]
pub async fn api_get_course(
    id: i64,
    user: Option<User>,
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<Json<CoursePage>, ApiError> {
    let detail = cache
        .get_or_load(&format!("/courses/{}", id), || get_course_detail(db, id))
        .await
        .validate_custom()?;

    let (progress, completed_lesson_ids) = match user {
        Some(user) => {
            let completed = completed_lesson_ids(db, user.id, id)
                .await
                .validate_custom()?;
            let summary = ProgressSummary::for_curriculum(&detail.curriculum, &completed);
            let mut ids: Vec<i64> = completed.into_iter().collect();
            ids.sort_unstable();
            (Some(summary), ids)
        }
        None => (None, Vec::new()),
    };

    Ok(Json(CoursePage {
        detail,
        progress,
        completed_lesson_ids,
    }))
}

#[derive(Serialize, Deserialize)]
pub struct LessonPage {
    #[serde(flatten)]
    pub view: LessonView,
    pub completed: bool,
}

#[derive(Responder)]
pub enum LessonResponse {
    Page(Json<LessonPage>),
    Login(Redirect),
}

/// Anonymous visitors are sent to the login page for anything past the
/// first lesson of the course.
#[get("/courses/<course_id>/lessons/<lesson_id>")]
pub async fn api_get_lesson(
    course_id: i64,
    lesson_id: i64,
    user: Option<User>,
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<LessonResponse, ApiError> {
    let view = cache
        .get_or_load(
            &format!("/courses/{}/lessons/{}", course_id, lesson_id),
            || async move {
                let curriculum = get_curriculum(db, course_id).await?;
                LessonView::build(curriculum, lesson_id).ok_or_else(|| {
                    AppError::NotFound(format!(
                        "Lesson {} not found in course {}",
                        lesson_id, course_id
                    ))
                })
            },
        )
        .await
        .validate_custom()?;

    if lesson_access(user.is_some(), view.is_first_lesson()) == LessonAccess::RequiresLogin {
        info!(course_id, lesson_id, "Anonymous access past first lesson");
        return Ok(LessonResponse::Login(Redirect::to("/login")));
    }

    let completed = match &user {
        Some(user) => get_progress(db, user.id, lesson_id)
            .await
            .validate_custom()?
            .is_some_and(|progress| progress.completed),
        None => false,
    };

    Ok(LessonResponse::Page(Json(LessonPage { view, completed })))
}

#[get("/categories")]
pub async fn api_list_categories(
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<Json<Vec<Category>>, ApiError> {
    let categories = cache
        .get_or_load("/categories", || get_all_categories(db))
        .await
        .validate_custom()?;
    Ok(Json(categories))
}

#[get("/tags")]
pub async fn api_list_tags(
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<Json<Vec<Tag>>, ApiError> {
    let tags = cache
        .get_or_load("/tags", || get_all_tags(db))
        .await
        .validate_custom()?;
    Ok(Json(tags))
}

// Learner progress

#[derive(Serialize, Deserialize)]
pub struct ProgressResponse {
    pub progress: Progress,
    pub summary: ProgressSummary,
}

#[post("/courses/<course_id>/lessons/<lesson_id>/complete")]
pub async fn api_mark_complete(
    course_id: i64,
    lesson_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let progress = mark_lesson_complete(db, user.id, course_id, lesson_id)
        .await
        .validate_custom()?;
    let summary = get_course_progress(db, user.id, course_id)
        .await
        .validate_custom()?;

    Ok(Json(ProgressResponse { progress, summary }))
}

#[delete("/courses/<course_id>/lessons/<lesson_id>/complete")]
pub async fn api_mark_incomplete(
    course_id: i64,
    lesson_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let progress = mark_lesson_incomplete(db, user.id, course_id, lesson_id)
        .await
        .validate_custom()?;
    let summary = get_course_progress(db, user.id, course_id)
        .await
        .validate_custom()?;

    Ok(Json(ProgressResponse { progress, summary }))
}

#[get("/courses/<course_id>/progress")]
pub async fn api_course_progress(
    course_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ProgressSummary>, ApiError> {
    let summary = get_course_progress(db, user.id, course_id)
        .await
        .validate_custom()?;
    Ok(Json(summary))
}

#[get("/my-courses")]
pub async fn api_my_courses(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Enrollment>>, ApiError> {
    let enrollments = get_enrollments(db, user.id).await.validate_custom()?;
    Ok(Json(enrollments))
}

// Administration

#[derive(Serialize, Deserialize)]
pub struct AdminDashboard {
    pub username: String,
    pub role: String,
    pub stats: AdminStats,
}

#[get("/admin/stats")]
pub async fn api_admin_stats(
    admin: AdminUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<AdminDashboard>, ApiError> {
    let stats = get_admin_stats(db).await.validate_custom()?;

    Ok(Json(AdminDashboard {
        role: admin.role().to_string(),
        username: admin.0.username,
        stats,
    }))
}

#[derive(Serialize, Deserialize)]
pub struct CreatedResponse {
    pub id: i64,
}

#[derive(Deserialize, Validate)]
pub struct CourseRequest {
    #[validate(custom(function = "validate_not_blank"))]
    title: String,
    #[validate(custom(function = "validate_not_blank"))]
    description: String,
    thumbnail_url: Option<String>,
    #[validate(required(message = "Category is required"))]
    category_id: Option<i64>,
    #[serde(default)]
    tag_ids: Vec<i64>,
}

impl CourseRequest {
    fn input(&self) -> Result<CourseInput<'_>, ApiError> {
        let category_id = self.category_id.ok_or_else(|| {
            Custom(
                Status::UnprocessableEntity,
                Json(ValidationResponse::with_error(
                    "category_id",
                    "Category is required",
                )),
            )
        })?;

        Ok(CourseInput {
            title: self.title.trim(),
            description: self.description.trim(),
            thumbnail_url: self
                .thumbnail_url
                .as_deref()
                .map(str::trim)
                .filter(|url| !url.is_empty()),
            category_id,
            tag_ids: &self.tag_ids,
        })
    }
}

#[get("/admin/courses")]
pub async fn api_admin_list_courses(
    _admin: AdminUser,
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<Json<Vec<CourseListing>>, ApiError> {
    let courses = cache
        .get_or_load("/admin/courses", || list_courses(db, CourseFilter::default()))
        .await
        .validate_custom()?;
    Ok(Json(courses))
}

#[post("/admin/courses", data = "<course>")]
pub async fn api_create_course(
    course: Json<CourseRequest>,
    admin: AdminUser,
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<Custom<Json<CreatedResponse>>, ApiError> {
    let validated = course.validate_custom()?;

    let id = create_course(db, validated.input()?)
        .await
        .validate_custom()?;

    info!(course_id = id, admin_id = admin.id(), "Course created");
    cache.revalidate_course(id);

    Ok(Custom(Status::Created, Json(CreatedResponse { id })))
}

/// The edit view: the full curriculum without any learner state.
#[get("/admin/courses/<id>")]
pub async fn api_admin_get_course(
    id: i64,
    _admin: AdminUser,
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<Json<CourseDetail>, ApiError> {
    let detail = cache
        .get_or_load(&format!("/admin/courses/{}/edit", id), || {
            get_course_detail(db, id)
        })
        .await
        .validate_custom()?;
    Ok(Json(detail))
}

#[put("/admin/courses/<id>", data = "<course>")]
pub async fn api_update_course(
    id: i64,
    course: Json<CourseRequest>,
    _admin: AdminUser,
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<Status, ApiError> {
    let validated = course.validate_custom()?;

    update_course(db, id, validated.input()?)
        .await
        .validate_custom()?;

    cache.revalidate_course(id);
    Ok(Status::Ok)
}

#[delete("/admin/courses/<id>")]
pub async fn api_delete_course(
    id: i64,
    admin: AdminUser,
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<Status, ApiError> {
    delete_course(db, id).await.validate_custom()?;

    info!(course_id = id, admin_id = admin.id(), "Course deleted");
    cache.revalidate_course(id);
    Ok(Status::Ok)
}

#[derive(Deserialize, Validate)]
pub struct SectionRequest {
    #[validate(custom(function = "validate_not_blank"))]
    title: String,
    description: Option<String>,
}

#[post("/admin/courses/<course_id>/sections", data = "<section>")]
pub async fn api_create_section(
    course_id: i64,
    section: Json<SectionRequest>,
    _admin: AdminUser,
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<Custom<Json<Section>>, ApiError> {
    let validated = section.validate_custom()?;

    let section = create_section(
        db,
        course_id,
        validated.title.trim(),
        validated.description.as_deref(),
    )
    .await
    .validate_custom()?;

    cache.revalidate_course(course_id);
    Ok(Custom(Status::Created, Json(section)))
}

#[put("/admin/sections/<id>", data = "<section>")]
pub async fn api_update_section(
    id: i64,
    section: Json<SectionRequest>,
    _admin: AdminUser,
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<Status, ApiError> {
    let validated = section.validate_custom()?;

    let course_id = update_section(
        db,
        id,
        validated.title.trim(),
        validated.description.as_deref(),
    )
    .await
    .validate_custom()?;

    cache.revalidate_course(course_id);
    Ok(Status::Ok)
}

#[delete("/admin/sections/<id>")]
pub async fn api_delete_section(
    id: i64,
    _admin: AdminUser,
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<Status, ApiError> {
    let course_id = delete_section(db, id).await.validate_custom()?;

    cache.revalidate_course(course_id);
    Ok(Status::Ok)
}

#[post("/admin/sections/<id>/move/<direction>")]
pub async fn api_move_section(
    id: i64,
    direction: Direction,
    _admin: AdminUser,
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<Json<MoveOutcome>, ApiError> {
    let course_id = course_id_for_section(db, id).await.validate_custom()?;

    let outcome = move_item(db, OrderedTable::Sections, id, direction)
        .await
        .validate_custom()?;

    if outcome.success {
        cache.revalidate_course(course_id);
    }
    Ok(Json(outcome))
}

#[derive(Deserialize, Validate)]
pub struct LessonRequest {
    #[validate(custom(function = "validate_not_blank"))]
    title: String,
    description: Option<String>,
    #[validate(custom(function = "validate_video_id"))]
    youtube_video_id: String,
}

impl LessonRequest {
    fn input(&self) -> LessonInput<'_> {
        LessonInput {
            title: self.title.trim(),
            description: self.description.as_deref(),
            youtube_video_id: &self.youtube_video_id,
        }
    }
}

#[post("/admin/sections/<section_id>/lessons", data = "<lesson>")]
pub async fn api_create_lesson(
    section_id: i64,
    lesson: Json<LessonRequest>,
    _admin: AdminUser,
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<Custom<Json<Lesson>>, ApiError> {
    let validated = lesson.validate_custom()?;

    let lesson = create_lesson(db, section_id, validated.input())
        .await
        .validate_custom()?;

    let course_id = course_id_for_section(db, section_id)
        .await
        .validate_custom()?;
    cache.revalidate_course(course_id);

    Ok(Custom(Status::Created, Json(lesson)))
}

#[put("/admin/lessons/<id>", data = "<lesson>")]
pub async fn api_update_lesson(
    id: i64,
    lesson: Json<LessonRequest>,
    _admin: AdminUser,
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<Status, ApiError> {
    let validated = lesson.validate_custom()?;

    let course_id = update_lesson(db, id, validated.input())
        .await
        .validate_custom()?;

    cache.revalidate_course(course_id);
    Ok(Status::Ok)
}

#[delete("/admin/lessons/<id>")]
pub async fn api_delete_lesson(
    id: i64,
    _admin: AdminUser,
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<Status, ApiError> {
    let course_id = delete_lesson(db, id).await.validate_custom()?;

    cache.revalidate_course(course_id);
    Ok(Status::Ok)
}

#[post("/admin/lessons/<id>/move/<direction>")]
pub async fn api_move_lesson(
    id: i64,
    direction: Direction,
    _admin: AdminUser,
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<Json<MoveOutcome>, ApiError> {
    let course_id = course_id_for_lesson(db, id).await.validate_custom()?;

    let outcome = move_item(db, OrderedTable::Lessons, id, direction)
        .await
        .validate_custom()?;

    if outcome.success {
        cache.revalidate_course(course_id);
    }
    Ok(Json(outcome))
}

#[derive(Deserialize, Validate)]
pub struct CategoryRequest {
    #[validate(custom(function = "validate_not_blank"))]
    name: String,
    description: Option<String>,
}

#[post("/admin/categories", data = "<category>")]
pub async fn api_create_category(
    category: Json<CategoryRequest>,
    _admin: AdminUser,
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<Custom<Json<CreatedResponse>>, ApiError> {
    let validated = category.validate_custom()?;

    let id = create_category(db, validated.name.trim(), validated.description.as_deref())
        .await
        .validate_custom()?;

    cache.revalidate_catalog();
    Ok(Custom(Status::Created, Json(CreatedResponse { id })))
}

#[put("/admin/categories/<id>", data = "<category>")]
pub async fn api_update_category(
    id: i64,
    category: Json<CategoryRequest>,
    _admin: AdminUser,
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<Status, ApiError> {
    let validated = category.validate_custom()?;

    update_category(
        db,
        id,
        validated.name.trim(),
        validated.description.as_deref(),
    )
    .await
    .validate_custom()?;

    cache.revalidate_catalog();
    Ok(Status::Ok)
}

#[delete("/admin/categories/<id>")]
pub async fn api_delete_category(
    id: i64,
    _admin: AdminUser,
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<Status, ApiError> {
    delete_category(db, id).await.validate_custom()?;

    cache.revalidate_catalog();
    Ok(Status::Ok)
}

#[derive(Deserialize, Validate)]
pub struct TagRequest {
    #[validate(custom(function = "validate_not_blank"))]
    name: String,
}

#[post("/admin/tags", data = "<tag>")]
pub async fn api_create_tag(
    tag: Json<TagRequest>,
    _admin: AdminUser,
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<Custom<Json<CreatedResponse>>, ApiError> {
    let validated = tag.validate_custom()?;

    let id = create_tag(db, validated.name.trim())
        .await
        .validate_custom()?;

    cache.revalidate_catalog();
    Ok(Custom(Status::Created, Json(CreatedResponse { id })))
}

#[put("/admin/tags/<id>", data = "<tag>")]
pub async fn api_update_tag(
    id: i64,
    tag: Json<TagRequest>,
    _admin: AdminUser,
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<Status, ApiError> {
    let validated = tag.validate_custom()?;

    update_tag(db, id, validated.name.trim())
        .await
        .validate_custom()?;

    cache.revalidate_catalog();
    Ok(Status::Ok)
}

#[delete("/admin/tags/<id>")]
pub async fn api_delete_tag(
    id: i64,
    _admin: AdminUser,
    db: &State<Pool<Sqlite>>,
    cache: &State<ViewCache>,
) -> Result<Status, ApiError> {
    delete_tag(db, id).await.validate_custom()?;

    cache.revalidate_catalog();
    Ok(Status::Ok)
}
