use anyhow::Error;
use once_cell::sync::Lazy;
use rocket::serde::Serialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ViewLessons,
    TrackProgress,
    EditOwnProfile,

    ManageCatalog,
    ManageCurriculum,
    ViewAdminDashboard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Learner,
    Admin,
}

static LEARNER_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::ViewLessons);
    permissions.insert(Permission::TrackProgress);
    permissions.insert(Permission::EditOwnProfile);

    permissions
});

static ADMIN_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(LEARNER_PERMISSIONS.iter().copied());

    permissions.insert(Permission::ManageCatalog);
    permissions.insert(Permission::ManageCurriculum);
    permissions.insert(Permission::ViewAdminDashboard);

    permissions
});

impl Role {
    pub fn permissions(&self) -> &'static HashSet<Permission> {
        match self {
            Role::Learner => &LEARNER_PERMISSIONS,
            Role::Admin => &ADMIN_PERMISSIONS,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Learner => "learner",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "learner" => Ok(Role::Learner),
            "admin" => Ok(Role::Admin),
            _ => Err(Error::msg(format!("Unknown role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_inherits_learner_permissions() {
        for permission in Role::Learner.permissions() {
            assert!(Role::Admin.has_permission(*permission));
        }
    }

    #[test]
    fn test_learner_cannot_manage_content() {
        assert!(!Role::Learner.has_permission(Permission::ManageCatalog));
        assert!(!Role::Learner.has_permission(Permission::ManageCurriculum));
        assert!(Role::Learner.has_permission(Permission::TrackProgress));
    }

    #[test]
    fn test_role_round_trips_through_str() {
        assert_eq!(Role::parse("admin").unwrap(), Role::Admin);
        assert_eq!(Role::parse(Role::Learner.as_str()).unwrap(), Role::Learner);
        assert!(Role::parse("coach").is_err());
    }
}
