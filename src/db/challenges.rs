//! Challenge CRUD operations using Diesel

use diesel::prelude::*;

use super::diesel_schema::challenges;
use super::models::{ChallengeChangeset, ChallengeRow, NewChallenge};
use crate::error::GamificationError;

// ============================================================================
// Read Operations
// ============================================================================

pub fn get_challenge(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<ChallengeRow>, GamificationError> {
    challenges::table
        .filter(challenges::id.eq(id))
        .select(ChallengeRow::as_select())
        .first(conn)
        .optional()
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))
}

/// Every challenge, newest first (admin view)
pub fn list_all(conn: &mut SqliteConnection) -> Result<Vec<ChallengeRow>, GamificationError> {
    challenges::table
        .order((challenges::created_at.desc(), challenges::id.desc()))
        .select(ChallengeRow::as_select())
        .load(conn)
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))
}

/// Active challenges whose window contains `now`, in display order
pub fn list_open_at(
    conn: &mut SqliteConnection,
    now: &str,
) -> Result<Vec<ChallengeRow>, GamificationError> {
    challenges::table
        .filter(challenges::is_active.eq(1))
        .filter(challenges::start_date.le(now))
        .filter(challenges::end_date.ge(now))
        .order((
            challenges::display_order.asc(),
            challenges::created_at.asc(),
            challenges::id.asc(),
        ))
        .select(ChallengeRow::as_select())
        .load(conn)
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))
}

/// Whether any challenge uses `url` as its image, inside its description or
/// inside its evaluation config (QR code image)
pub fn url_referenced(conn: &mut SqliteConnection, url: &str) -> Result<bool, GamificationError> {
    let pattern = super::contains_pattern(url);

    diesel::select(diesel::dsl::exists(
        challenges::table.filter(
            challenges::image_url
                .eq(url)
                .or(challenges::detailed_description.like(pattern.clone()).escape('\\'))
                .or(challenges::evaluation_config_json.like(pattern).escape('\\')),
        ),
    ))
    .get_result(conn)
    .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))
}

/// Display order for a new challenge: after every existing one
pub fn next_display_order(conn: &mut SqliteConnection) -> Result<i32, GamificationError> {
    let max: Option<i32> = challenges::table
        .select(diesel::dsl::max(challenges::display_order))
        .first(conn)
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))?;

    Ok(max.map(|m| m + 1).unwrap_or(0))
}

// ============================================================================
// Write Operations
// ============================================================================

pub fn insert_challenge(
    conn: &mut SqliteConnection,
    challenge: NewChallenge<'_>,
) -> Result<ChallengeRow, GamificationError> {
    diesel::insert_into(challenges::table)
        .values(&challenge)
        .execute(conn)
        .map_err(|e| GamificationError::Internal(format!("Insert failed: {}", e)))?;

    get_challenge(conn, challenge.id)?
        .ok_or_else(|| GamificationError::Internal("Failed to retrieve created challenge".into()))
}

pub fn update_challenge(
    conn: &mut SqliteConnection,
    id: &str,
    changes: ChallengeChangeset<'_>,
) -> Result<ChallengeRow, GamificationError> {
    let updated = diesel::update(challenges::table.filter(challenges::id.eq(id)))
        .set(&changes)
        .execute(conn)
        .map_err(|e| GamificationError::Internal(format!("Update failed: {}", e)))?;

    if updated == 0 {
        return Err(GamificationError::NotFound(format!("Challenge {} not found", id)));
    }

    get_challenge(conn, id)?
        .ok_or_else(|| GamificationError::Internal("Failed to retrieve updated challenge".into()))
}

/// Delete the challenge row; dependents must already be gone
pub fn delete_challenge(conn: &mut SqliteConnection, id: &str) -> Result<bool, GamificationError> {
    let deleted = diesel::delete(challenges::table.filter(challenges::id.eq(id)))
        .execute(conn)
        .map_err(|e| GamificationError::Internal(format!("Delete failed: {}", e)))?;
    Ok(deleted > 0)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::Db;

    pub(crate) fn new_challenge<'a>(id: &'a str, title: &'a str, start: &'a str, end: &'a str) -> NewChallenge<'a> {
        NewChallenge {
            id,
            title,
            description: "desc",
            detailed_description: None,
            image_url: None,
            points: 100,
            start_date: start,
            end_date: end,
            challenge_type: "periodic",
            is_active: 1,
            evaluation_type: "none",
            evaluation_config_json: None,
            target_category_ids_json: "[]",
            display_order: 0,
            created_by: "admin",
            created_at: "2026-01-01T00:00:00Z",
            updated_at: "2026-01-01T00:00:00Z",
        }
    }

    #[test]
    fn test_open_window_filter() {
        let db = Db::open_in_memory().unwrap();

        db.with_conn(|conn| {
            insert_challenge(conn, new_challenge("c1", "Open", "2026-01-01T00:00:00Z", "2026-12-31T23:59:59Z"))?;
            insert_challenge(conn, new_challenge("c2", "Past", "2025-01-01T00:00:00Z", "2025-12-31T23:59:59Z"))?;
            let mut inactive = new_challenge("c3", "Inactive", "2026-01-01T00:00:00Z", "2026-12-31T23:59:59Z");
            inactive.is_active = 0;
            insert_challenge(conn, inactive)?;

            let open = list_open_at(conn, "2026-06-01T12:00:00Z")?;
            assert_eq!(open.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["c1"]);
            assert_eq!(list_all(conn)?.len(), 3);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_next_display_order() {
        let db = Db::open_in_memory().unwrap();

        db.with_conn(|conn| {
            assert_eq!(next_display_order(conn)?, 0);
            let mut c = new_challenge("c1", "One", "2026-01-01T00:00:00Z", "2026-12-31T23:59:59Z");
            c.display_order = 4;
            insert_challenge(conn, c)?;
            assert_eq!(next_display_order(conn)?, 5);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_url_referenced_by_challenge_assets() {
        let db = Db::open_in_memory().unwrap();
        let banner = "http://localhost:8095/files/sha256-banner";
        let qr = "http://localhost:8095/files/sha256-qr_image";

        db.with_conn(|conn| {
            let mut with_banner = new_challenge("c1", "Banner", "2026-01-01T00:00:00Z", "2026-12-31T23:59:59Z");
            with_banner.image_url = Some(banner);
            with_banner.detailed_description = Some(r#"<img src="http://localhost:8095/files/sha256-aXb">"#);
            insert_challenge(conn, with_banner)?;

            let config = format!(r#"{{"type":"qrcode","qrCodeData":"X","qrCodeImage":"{}"}}"#, qr);
            let mut with_qr = new_challenge("c2", "Scan", "2026-01-01T00:00:00Z", "2026-12-31T23:59:59Z");
            with_qr.evaluation_type = "qrcode";
            with_qr.evaluation_config_json = Some(&config);
            insert_challenge(conn, with_qr)?;

            assert!(url_referenced(conn, banner)?);
            assert!(url_referenced(conn, qr)?);
            assert!(url_referenced(conn, "http://localhost:8095/files/sha256-aXb")?);
            // `_` is literal, not a wildcard
            assert!(!url_referenced(conn, "http://localhost:8095/files/sha256-a_b")?);
            assert!(!url_referenced(conn, "http://localhost:8095/files/sha256-other")?);
            Ok(())
        })
        .unwrap();
    }
}
