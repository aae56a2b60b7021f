use rocket::request::FromParam;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl<'a> FromParam<'a> for Direction {
    type Error = &'a str;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        match param {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            _ => Err(param),
        }
    }
}

/// The two ordered collections of a curriculum and the column that scopes
/// their `order` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderedTable {
    Sections,
    Lessons,
}

impl OrderedTable {
    pub fn table(&self) -> &'static str {
        match self {
            OrderedTable::Sections => "sections",
            OrderedTable::Lessons => "lessons",
        }
    }

    pub fn scope_column(&self) -> &'static str {
        match self {
            OrderedTable::Sections => "course_id",
            OrderedTable::Lessons => "section_id",
        }
    }

    fn item_name(&self) -> &'static str {
        match self {
            OrderedTable::Sections => "Section",
            OrderedTable::Lessons => "Lesson",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveOutcome {
    pub success: bool,
    pub message: Option<String>,
}

impl MoveOutcome {
    pub fn moved() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn boundary(direction: Direction) -> Self {
        let message = match direction {
            Direction::Up => "Already at the top",
            Direction::Down => "Already at the bottom",
        };
        Self {
            success: false,
            message: Some(message.to_string()),
        }
    }
}

/// Swaps an item with its immediate neighbour inside its scope.
///
/// The whole exchange runs in one transaction whose first statement is a
/// write, so SQLite holds the write lock from the moment the target's order
/// is read until the swap commits. The target is parked on `-order` while the
/// neighbour takes its slot; valid orders are positive so the parked value
/// can never collide with the `(scope, order)` unique index.
#[instrument(skip(pool))]
pub async fn move_item(
    pool: &Pool<Sqlite>,
    table: OrderedTable,
    id: i64,
    direction: Direction,
) -> Result<MoveOutcome, AppError> {
    info!("Moving curriculum item");
    let name = table.table();
    let scope = table.scope_column();

    let mut tx = pool.begin().await?;

    let parked: Option<(i64, i64)> = sqlx::query_as(&format!(
        r#"UPDATE {name} SET "order" = -"order" WHERE id = ? AND "order" > 0
           RETURNING -"order", {scope}"#
    ))
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((original, scope_id)) = parked else {
        tx.rollback().await?;
        return Err(AppError::NotFound(format!(
            "{} with id {} not found",
            table.item_name(),
            id
        )));
    };

    let neighbour_sql = match direction {
        Direction::Up => format!(
            r#"SELECT id, "order" FROM {name}
               WHERE {scope} = ? AND "order" > 0 AND "order" < ?
               ORDER BY "order" DESC LIMIT 1"#
        ),
        Direction::Down => format!(
            r#"SELECT id, "order" FROM {name}
               WHERE {scope} = ? AND "order" > ?
               ORDER BY "order" ASC LIMIT 1"#
        ),
    };

    let neighbour: Option<(i64, i64)> = sqlx::query_as(&neighbour_sql)
        .bind(scope_id)
        .bind(original)
        .fetch_optional(&mut *tx)
        .await?;

    let Some((neighbour_id, neighbour_order)) = neighbour else {
        tx.rollback().await?;
        info!(order = original, "Item already at boundary");
        return Ok(MoveOutcome::boundary(direction));
    };

    let update_sql = format!(r#"UPDATE {name} SET "order" = ? WHERE id = ?"#);

    sqlx::query(&update_sql)
        .bind(original)
        .bind(neighbour_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(&update_sql)
        .bind(neighbour_order)
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    info!(
        from = original,
        to = neighbour_order,
        neighbour_id,
        "Curriculum item moved"
    );
    Ok(MoveOutcome::moved())
}
