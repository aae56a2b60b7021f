#[cfg(test)]
pub mod test_db {
    use crate::auth::Role;
    use crate::database::{
        CourseInput, LessonInput, create_category, create_course, create_lesson, create_section,
        create_tag, create_user,
    };
    use crate::error::AppError;
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Once;
    use std::time::Duration;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";
    pub static STANDARD_VIDEO_ID: &str = "dQw4w9WgXcQ";

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        categories: Vec<String>,
        tags: Vec<String>,
        courses: Vec<TestCourse>,
        sections: Vec<TestSection>,
        lessons: Vec<TestLesson>,
    }

    pub struct TestUser {
        pub username: String,
        pub display_name: Option<String>,
        pub role: Role,
        pub password: String,
    }

    pub struct TestCourse {
        pub title: String,
        pub category: String,
        pub tags: Vec<String>,
    }

    pub struct TestSection {
        pub course: String,
        pub title: String,
    }

    pub struct TestLesson {
        pub section: String,
        pub title: String,
        pub video_id: String,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn learner(mut self, username: &str, display_name: Option<&str>) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                display_name: display_name.map(String::from),
                role: Role::Learner,
                password: STANDARD_PASSWORD.to_string(),
            });
            self
        }

        pub fn admin(mut self, username: &str, display_name: Option<&str>) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                display_name: display_name.map(String::from),
                role: Role::Admin,
                password: STANDARD_PASSWORD.to_string(),
            });
            self
        }

        pub fn category(mut self, name: &str) -> Self {
            self.categories.push(name.to_string());
            self
        }

        pub fn tag(mut self, name: &str) -> Self {
            self.tags.push(name.to_string());
            self
        }

        /// The category is created on the fly when not declared.
        pub fn course(mut self, title: &str, category: &str, tags: &[&str]) -> Self {
            if !self.categories.iter().any(|c| c == category) {
                self.categories.push(category.to_string());
            }
            self.courses.push(TestCourse {
                title: title.to_string(),
                category: category.to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
            });
            self
        }

        /// Sections are appended in call order, so call order is curriculum order.
        pub fn section(mut self, course: &str, title: &str) -> Self {
            self.sections.push(TestSection {
                course: course.to_string(),
                title: title.to_string(),
            });
            self
        }

        pub fn lesson(mut self, section: &str, title: &str) -> Self {
            self.lessons.push(TestLesson {
                section: section.to_string(),
                title: title.to_string(),
                video_id: STANDARD_VIDEO_ID.to_string(),
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            init_logging();

            // One connection that never closes keeps the in-memory database alive
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect("sqlite::memory:")
                .await?;

            self.populate(pool).await
        }

        /// A WAL database file shared by several connections, for tests that
        /// need writers to actually contend.
        pub async fn build_file_backed(
            self,
            path: &Path,
            max_connections: u32,
        ) -> Result<TestDb, AppError> {
            init_logging();

            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_secs(30));
            let pool = SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect_with(options)
                .await?;

            self.populate(pool).await
        }

        async fn populate(self, pool: Pool<Sqlite>) -> Result<TestDb, AppError> {
            sqlx::migrate!("./migrations").run(&pool).await?;

            let mut ids = IdMaps::default();

            for user in &self.users {
                let user_id = create_user(
                    &pool,
                    &user.username,
                    &user.password,
                    user.role,
                    user.display_name.as_deref(),
                )
                .await?;
                ids.users.insert(user.username.clone(), user_id);
            }

            for name in &self.categories {
                let id = create_category(&pool, name, None).await?;
                ids.categories.insert(name.clone(), id);
            }

            for name in &self.tags {
                let id = create_tag(&pool, name).await?;
                ids.tags.insert(name.clone(), id);
            }

            for course in &self.courses {
                let tag_ids: Vec<i64> = course
                    .tags
                    .iter()
                    .filter_map(|t| ids.tags.get(t).copied())
                    .collect();
                let category_id = lookup(&ids.categories, &course.category)?;

                let id = create_course(
                    &pool,
                    CourseInput {
                        title: &course.title,
                        description: "A test course",
                        thumbnail_url: None,
                        category_id,
                        tag_ids: &tag_ids,
                    },
                )
                .await?;
                ids.courses.insert(course.title.clone(), id);
            }

            for section in &self.sections {
                let course_id = lookup(&ids.courses, &section.course)?;
                let created = create_section(&pool, course_id, &section.title, None).await?;
                ids.sections.insert(section.title.clone(), created.id);
            }

            for lesson in &self.lessons {
                let section_id = lookup(&ids.sections, &lesson.section)?;
                let created = create_lesson(
                    &pool,
                    section_id,
                    LessonInput {
                        title: &lesson.title,
                        description: None,
                        youtube_video_id: &lesson.video_id,
                    },
                )
                .await?;
                ids.lessons.insert(lesson.title.clone(), created.id);
            }

            Ok(TestDb { pool, ids })
        }
    }

    fn init_logging() {
        INIT.call_once(|| {
            let _ = env_logger::builder()
                .parse_filters("debug")
                .is_test(true)
                .try_init();
        });
    }

    #[derive(Default)]
    pub struct IdMaps {
        pub users: HashMap<String, i64>,
        pub categories: HashMap<String, i64>,
        pub tags: HashMap<String, i64>,
        pub courses: HashMap<String, i64>,
        pub sections: HashMap<String, i64>,
        pub lessons: HashMap<String, i64>,
    }

    fn lookup(map: &HashMap<String, i64>, name: &str) -> Result<i64, AppError> {
        map.get(name)
            .copied()
            .ok_or_else(|| AppError::NotFound(format!("Fixture '{}' was never declared", name)))
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub ids: IdMaps,
    }

    impl TestDb {
        pub fn user_id(&self, username: &str) -> i64 {
            self.ids.users[username]
        }

        pub fn category_id(&self, name: &str) -> i64 {
            self.ids.categories[name]
        }

        pub fn tag_id(&self, name: &str) -> i64 {
            self.ids.tags[name]
        }

        pub fn course_id(&self, title: &str) -> i64 {
            self.ids.courses[title]
        }

        pub fn section_id(&self, title: &str) -> i64 {
            self.ids.sections[title]
        }

        pub fn lesson_id(&self, title: &str) -> i64 {
            self.ids.lessons[title]
        }

        /// `(title, order)` pairs of a course's sections, sorted by order.
        pub async fn section_orders(&self, course: &str) -> Vec<(String, i64)> {
            sqlx::query_as(r#"SELECT title, "order" FROM sections WHERE course_id = ? ORDER BY "order""#)
                .bind(self.course_id(course))
                .fetch_all(&self.pool)
                .await
                .expect("Failed to read section orders")
        }

        /// `(title, order)` pairs of a section's lessons, sorted by order.
        pub async fn lesson_orders(&self, section: &str) -> Vec<(String, i64)> {
            sqlx::query_as(r#"SELECT title, "order" FROM lessons WHERE section_id = ? ORDER BY "order""#)
                .bind(self.section_id(section))
                .fetch_all(&self.pool)
                .await
                .expect("Failed to read lesson orders")
        }
    }
}

#[cfg(test)]
pub mod test_utils {
    use rocket::http::{ContentType, Cookie, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::json;

    use crate::config::AppConfig;
    use crate::init_rocket;

    use super::test_db::{TestDb, TestDbBuilder};

    /// Two users, one course with two sections of lessons and a second,
    /// empty-ish course for cross-course checks.
    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .admin("admin_user", Some("Admin User"))
            .learner("learner_user", Some("Learner User"))
            .tag("rust")
            .tag("beginner")
            .course("Rust Basics", "Programming", &["rust", "beginner"])
            .course("Cooking", "Lifestyle", &[])
            .section("Rust Basics", "Getting Started")
            .section("Rust Basics", "Ownership")
            .lesson("Getting Started", "Install")
            .lesson("Getting Started", "Hello World")
            .lesson("Getting Started", "Cargo")
            .lesson("Ownership", "Moves")
            .lesson("Ownership", "Borrows")
            .section("Cooking", "Knives")
            .lesson("Knives", "Chopping")
            .build()
            .await
            .expect("Failed to build test database")
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let rocket = init_rocket(test_db.pool.clone(), AppConfig::default());
        let client = Client::untracked(rocket)
            .await
            .expect("Failed to build rocket client");
        (client, test_db)
    }

    pub async fn login_test_user(
        client: &Client,
        username: &str,
        password: &str,
    ) -> Vec<Cookie<'static>> {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(json!({ "username": username, "password": password }).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok, "Login request failed");

        let cookies: Vec<Cookie<'static>> = response
            .cookies()
            .iter()
            .map(|c| c.clone().into_owned())
            .collect();

        assert!(!cookies.is_empty(), "Login for {} set no cookies", username);
        cookies
    }
}
