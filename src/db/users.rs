//! User/category directory operations
//!
//! The portal owns users and categories; this mirror answers the two
//! questions the gamification core asks: `membersOf(category)` and
//! `categoriesOf(user)`. Write helpers exist for seeding and tests.

use std::collections::HashMap;

use diesel::prelude::*;
use serde::Deserialize;

use super::diesel_schema::{user_categories, user_category_assignments, users};
use super::models::{NewCategoryAssignment, NewUser, NewUserCategory, User, UserCategory};
use crate::error::{conflict_on_unique, GamificationError};

/// Seed file shape for `portal-gamification seed`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectorySeed {
    #[serde(default)]
    pub categories: Vec<SeedCategory>,
    #[serde(default)]
    pub users: Vec<SeedUser>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedCategory {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedUser {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub category_ids: Vec<String>,
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Read Operations
// ============================================================================

pub fn get_user(conn: &mut SqliteConnection, id: &str) -> Result<Option<User>, GamificationError> {
    users::table
        .filter(users::id.eq(id))
        .select(User::as_select())
        .first(conn)
        .optional()
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))
}

pub fn user_exists(conn: &mut SqliteConnection, id: &str) -> Result<bool, GamificationError> {
    diesel::select(diesel::dsl::exists(users::table.filter(users::id.eq(id))))
        .get_result(conn)
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))
}

/// Resolve display names for a set of user ids; unknown ids are absent from the map
pub fn display_names(
    conn: &mut SqliteConnection,
    ids: &[String],
) -> Result<HashMap<String, String>, GamificationError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<(String, String)> = users::table
        .filter(users::id.eq_any(ids))
        .select((users::id, users::display_name))
        .load(conn)
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))?;

    Ok(rows.into_iter().collect())
}

pub fn get_category(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<UserCategory>, GamificationError> {
    user_categories::table
        .filter(user_categories::id.eq(id))
        .select(UserCategory::as_select())
        .first(conn)
        .optional()
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))
}

/// User ids assigned to a category
pub fn members_of(
    conn: &mut SqliteConnection,
    category_id: &str,
) -> Result<Vec<String>, GamificationError> {
    user_category_assignments::table
        .filter(user_category_assignments::category_id.eq(category_id))
        .select(user_category_assignments::user_id)
        .order(user_category_assignments::user_id.asc())
        .load(conn)
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))
}

/// De-duplicated union of the members of several categories
pub fn members_of_any(
    conn: &mut SqliteConnection,
    category_ids: &[String],
) -> Result<Vec<String>, GamificationError> {
    if category_ids.is_empty() {
        return Ok(Vec::new());
    }

    user_category_assignments::table
        .filter(user_category_assignments::category_id.eq_any(category_ids))
        .select(user_category_assignments::user_id)
        .distinct()
        .order(user_category_assignments::user_id.asc())
        .load(conn)
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))
}

/// Category ids a user belongs to
pub fn categories_of(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Vec<String>, GamificationError> {
    user_category_assignments::table
        .filter(user_category_assignments::user_id.eq(user_id))
        .select(user_category_assignments::category_id)
        .order(user_category_assignments::category_id.asc())
        .load(conn)
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))
}

// ============================================================================
// Write Operations (seeding)
// ============================================================================

pub fn upsert_user(
    conn: &mut SqliteConnection,
    id: &str,
    display_name: &str,
    email: Option<&str>,
) -> Result<User, GamificationError> {
    diesel::insert_into(users::table)
        .values(&NewUser { id, display_name, email })
        .on_conflict(users::id)
        .do_update()
        .set((users::display_name.eq(display_name), users::email.eq(email)))
        .execute(conn)
        .map_err(|e| GamificationError::Internal(format!("Insert failed: {}", e)))?;

    get_user(conn, id)?
        .ok_or_else(|| GamificationError::Internal("Failed to retrieve upserted user".into()))
}

pub fn upsert_category(
    conn: &mut SqliteConnection,
    id: &str,
    name: &str,
    is_active: bool,
) -> Result<UserCategory, GamificationError> {
    let active = i32::from(is_active);

    diesel::insert_into(user_categories::table)
        .values(&NewUserCategory { id, name, is_active: active })
        .on_conflict(user_categories::id)
        .do_update()
        .set((user_categories::name.eq(name), user_categories::is_active.eq(active)))
        .execute(conn)
        .map_err(|e| GamificationError::Internal(format!("Insert failed: {}", e)))?;

    get_category(conn, id)?
        .ok_or_else(|| GamificationError::Internal("Failed to retrieve upserted category".into()))
}

/// Assign a user to a category; a repeated assignment is a conflict
pub fn assign_category(
    conn: &mut SqliteConnection,
    user_id: &str,
    category_id: &str,
) -> Result<(), GamificationError> {
    diesel::insert_into(user_category_assignments::table)
        .values(&NewCategoryAssignment { user_id, category_id })
        .execute(conn)
        .map_err(|e| {
            conflict_on_unique(e, &format!("User {} is already in category {}", user_id, category_id))
        })?;
    Ok(())
}

/// Load a seed document; existing assignments are left untouched
pub fn apply_seed(conn: &mut SqliteConnection, seed: &DirectorySeed) -> Result<SeedSummary, GamificationError> {
    let mut summary = SeedSummary::default();

    for category in &seed.categories {
        upsert_category(conn, &category.id, &category.name, category.is_active)?;
        summary.categories += 1;
    }

    for user in &seed.users {
        upsert_user(conn, &user.id, &user.display_name, user.email.as_deref())?;
        summary.users += 1;

        let existing = categories_of(conn, &user.id)?;
        for category_id in &user.category_ids {
            if existing.contains(category_id) {
                continue;
            }
            assign_category(conn, &user.id, category_id)?;
            summary.assignments += 1;
        }
    }

    Ok(summary)
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SeedSummary {
    pub categories: usize,
    pub users: usize,
    pub assignments: usize,
}
