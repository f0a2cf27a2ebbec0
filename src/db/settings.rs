//! Gamification settings singleton
//!
//! The table holds at most one row (id = 1). Loading never creates it;
//! an absent row means "no ranking population configured".

use diesel::prelude::*;

use super::diesel_schema::gamification_settings;
use super::models::{SettingsRow, UpsertSettings};
use crate::error::GamificationError;

const SETTINGS_ROW_ID: i32 = 1;

pub fn load_settings(conn: &mut SqliteConnection) -> Result<Option<SettingsRow>, GamificationError> {
    gamification_settings::table
        .filter(gamification_settings::id.eq(SETTINGS_ROW_ID))
        .select(SettingsRow::as_select())
        .first(conn)
        .optional()
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))
}

/// Insert or replace the settings row
pub fn upsert_settings(
    conn: &mut SqliteConnection,
    values: UpsertSettings<'_>,
) -> Result<SettingsRow, GamificationError> {
    let values = UpsertSettings { id: SETTINGS_ROW_ID, ..values };

    diesel::insert_into(gamification_settings::table)
        .values(&values)
        .on_conflict(gamification_settings::id)
        .do_update()
        .set(&values)
        .execute(conn)
        .map_err(|e| GamificationError::Internal(format!("Upsert failed: {}", e)))?;

    load_settings(conn)?
        .ok_or_else(|| GamificationError::Internal("Failed to retrieve settings".into()))
}
