//! Requester identity and role checks
//!
//! Authentication happens upstream; the gateway forwards the session's
//! user id and role in trusted headers. This module turns those headers
//! into a [`Requester`] and answers the two questions handlers ask:
//! "is anyone logged in?" and "is this an admin?".

use std::fmt;
use std::str::FromStr;

use diesel::SqliteConnection;
use hyper::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::db::users;
use crate::error::GamificationError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Portal roles, ordered by privilege
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Role {
    #[default]
    User = 0,
    Admin = 1,
    SuperAdmin = 2,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::SuperAdmin => "superadmin",
        }
    }

    /// Admin and superadmin both carry admin capabilities
    pub fn is_admin(&self) -> bool {
        *self >= Role::Admin
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = GamificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            "superadmin" => Ok(Role::SuperAdmin),
            other => Err(GamificationError::Unauthorized(format!("Unknown role '{}'", other))),
        }
    }
}

/// Identity carried by request headers, before directory lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

/// Read identity headers; `None` when the request is anonymous
pub fn identity_from_headers(headers: &HeaderMap) -> Result<Option<Identity>, GamificationError> {
    let user_id = match headers.get(USER_ID_HEADER) {
        Some(value) => value
            .to_str()
            .map_err(|_| GamificationError::Unauthorized("Malformed user id header".into()))?
            .trim()
            .to_string(),
        None => return Ok(None),
    };

    if user_id.is_empty() {
        return Ok(None);
    }

    let role = match headers.get(USER_ROLE_HEADER) {
        Some(value) => value
            .to_str()
            .map_err(|_| GamificationError::Unauthorized("Malformed role header".into()))?
            .parse()?,
        None => Role::User,
    };

    Ok(Some(Identity { user_id, role }))
}

/// The current user as the gamification core sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub id: String,
    pub role: Role,
    pub category_ids: Vec<String>,
}

impl Requester {
    /// Attach category memberships from the directory
    pub fn resolve(conn: &mut SqliteConnection, identity: Identity) -> Result<Self, GamificationError> {
        let category_ids = users::categories_of(conn, &identity.user_id)?;
        Ok(Self { id: identity.user_id, role: identity.role, category_ids })
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    pub fn in_any_category(&self, category_ids: &[String]) -> bool {
        category_ids.iter().any(|c| self.category_ids.contains(c))
    }
}

pub fn require_authenticated(requester: Option<Requester>) -> Result<Requester, GamificationError> {
    requester.ok_or_else(|| GamificationError::Unauthorized("Login required".into()))
}

pub fn require_admin(requester: &Requester) -> Result<(), GamificationError> {
    if requester.is_admin() {
        Ok(())
    } else {
        Err(GamificationError::Forbidden("Admin role required".into()))
    }
}
