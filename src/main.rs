#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod cache;
mod config;
mod curriculum;
mod database;
mod env;
mod error;
mod models;
mod ordering;
mod progress;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;

use api::{
    api_admin_get_course, api_admin_list_courses, api_admin_stats, api_course_progress,
    api_create_category, api_create_course, api_create_lesson, api_create_section, api_create_tag,
    api_delete_category, api_delete_course, api_delete_lesson, api_delete_section, api_delete_tag,
    api_get_course, api_get_lesson, api_list_categories, api_list_courses, api_list_tags,
    api_login, api_logout, api_mark_complete, api_mark_incomplete, api_me, api_move_lesson,
    api_move_section, api_my_courses, api_register, api_update_category, api_update_course,
    api_update_lesson, api_update_section, api_update_tag, health,
};
use auth::{forbidden_api, unauthorized_api};
use cache::ViewCache;
use config::AppConfig;
use database::{clean_expired_sessions, ensure_admin};
use error::AppError;
use rocket::{Build, Rocket};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::time::Duration;
use telemetry::{TelemetryFairing, init_tracing};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("{0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[launch]
async fn rocket() -> _ {
    if let Err(e) = env::load_environment() {
        eprintln!("Failed to load environment files: {}", e);
    }

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => panic!("Invalid configuration: {}", e),
    };

    init_tracing(&config);

    let pool = match prepare_database(&config).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to prepare database: {}", e);
            panic!("Database setup failed: {}", e);
        }
    };

    spawn_session_sweeper(pool.clone());

    init_rocket(pool, config)
}

async fn prepare_database(config: &AppConfig) -> Result<SqlitePool, Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed successfully");

    if let Some((username, password)) = config.bootstrap_admin() {
        let admin_id = ensure_admin(&pool, username, password).await?;
        info!(admin_id, "Bootstrap admin ready");
    }

    Ok(pool)
}

fn spawn_session_sweeper(pool: SqlitePool) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired sessions: {}", e);
                }
            }

            tokio::time::sleep(SESSION_SWEEP_INTERVAL).await;
        }
    });
}

pub fn init_rocket(pool: SqlitePool, config: AppConfig) -> Rocket<Build> {
    info!("Starting course platform");

    let cache = ViewCache::new(Duration::from_secs(config.view_cache_ttl_secs));

    rocket::build()
        .manage(pool)
        .manage(cache)
        .manage(config)
        .mount(
            "/api",
            routes![
                health,
                api_login,
                api_logout,
                api_me,
                api_register,
                api_list_courses,
                api_get_course,
                api_get_lesson,
                api_list_categories,
                api_list_tags,
                api_mark_complete,
                api_mark_incomplete,
                api_course_progress,
                api_my_courses,
                api_admin_stats,
                api_admin_list_courses,
                api_admin_get_course,
                api_create_course,
                api_update_course,
                api_delete_course,
                api_create_section,
                api_update_section,
                api_delete_section,
                api_move_section,
                api_create_lesson,
                api_update_lesson,
                api_delete_lesson,
                api_move_lesson,
                api_create_category,
                api_update_category,
                api_delete_category,
                api_create_tag,
                api_update_tag,
                api_delete_tag,
            ],
        )
        .register("/api", catchers![unauthorized_api, forbidden_api])
        .attach(TelemetryFairing)
}
