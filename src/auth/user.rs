use rocket::http::Status;
use serde::Serialize;

use super::{Permission, Role};

#[derive(Debug, Serialize, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub display_name: String,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUser {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub role: Option<String>,
    pub display_name: Option<String>,
}

impl From<DbUser> for User {
    fn from(user: DbUser) -> Self {
        let username = user.username.unwrap_or_default();
        Self {
            id: user.id.unwrap_or_default(),
            // Unknown roles never gain admin rights
            role: user
                .role
                .as_deref()
                .and_then(|role| Role::parse(role).ok())
                .unwrap_or(Role::Learner),
            display_name: user.display_name.unwrap_or_else(|| username.clone()),
            username,
        }
    }
}

impl User {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role.has_permission(permission)
    }

    pub fn require_permission(&self, permission: Permission) -> Result<(), Status> {
        if self.role.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                username = %self.username,
                role = %self.role.as_str(),
                permission = ?permission,
                "Permission denied"
            );
            Err(Status::Forbidden)
        }
    }
}

/// A signed-in user whose stored role is `admin`. Obtaining one is the
/// `require_admin` check every content mutation goes through.
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

impl AdminUser {
    pub fn id(&self) -> i64 {
        self.0.id
    }

    pub fn role(&self) -> &Role {
        &self.0.role
    }
}

pub fn require_admin(user: User) -> Result<AdminUser, Status> {
    user.require_permission(Permission::ManageCurriculum)?;
    user.require_permission(Permission::ManageCatalog)?;
    Ok(AdminUser(user))
}
