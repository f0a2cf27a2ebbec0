//! Ledger service - grants, revocations and point totals
//!
//! Every path that moves points goes through [`record_grant`] so the
//! same checks apply to manual awards and challenge approvals.

use std::sync::Arc;

use diesel::SqliteConnection;
use serde::{Deserialize, Serialize};
use tracing::info;
use ts_rs::TS;

use crate::db::models::{current_timestamp, entry_types, NewPointsEntry, PointsEntry};
use crate::db::points::{self, TimeWindow};
use crate::db::{users, Db};
use crate::error::GamificationError;

use super::events::{EventBus, GamificationEvent};
use super::ranking_service::GamificationSettings;

/// Originating record of a grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantSource {
    pub source_type: String,
    pub source_id: String,
}

/// A grant or deduction about to be written
#[derive(Debug, Clone)]
pub struct Grant {
    pub user_id: String,
    pub points: i32,
    pub description: String,
    pub entry_type: String,
    pub actor_id: String,
    pub source: Option<GrantSource>,
}

/// Validate and append one ledger entry on the caller's connection
pub fn record_grant(conn: &mut SqliteConnection, grant: &Grant) -> Result<PointsEntry, GamificationError> {
    if grant.points == 0 {
        return Err(GamificationError::Validation("points must not be zero".into()));
    }
    let description = grant.description.trim();
    if description.is_empty() {
        return Err(GamificationError::Validation("description is required".into()));
    }
    if !users::user_exists(conn, &grant.user_id)? {
        return Err(GamificationError::Validation(format!("Unknown user '{}'", grant.user_id)));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = current_timestamp();

    points::insert_entry(
        conn,
        NewPointsEntry {
            id: &id,
            user_id: &grant.user_id,
            points: grant.points,
            description,
            entry_type: &grant.entry_type,
            source_type: grant.source.as_ref().map(|s| s.source_type.as_str()),
            source_id: grant.source.as_ref().map(|s| s.source_id.as_str()),
            created_by: &grant.actor_id,
            created_at: &now,
        },
    )
}

/// Admin request body for `POST /gamification/points`
#[derive(Debug, Clone, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct ManualAwardInput {
    pub user_id: String,
    pub points: i32,
    pub description: String,
}

/// Ledger entry with the actor's display name resolved
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct PointsEntryView {
    pub id: String,
    pub user_id: String,
    pub points: i32,
    pub description: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub created_by: String,
    pub created_by_name: Option<String>,
    pub created_at: String,
}

impl PointsEntryView {
    fn from_entry(entry: PointsEntry, created_by_name: Option<String>) -> Self {
        Self {
            id: entry.id,
            user_id: entry.user_id,
            points: entry.points,
            description: entry.description,
            entry_type: entry.entry_type,
            source_type: entry.source_type,
            source_id: entry.source_id,
            created_by: entry.created_by,
            created_by_name,
            created_at: entry.created_at,
        }
    }
}

/// Points extract for one user
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct PointsExtract {
    pub user_id: String,
    pub total: i64,
    /// `None` when the cycle window is not configured
    pub cycle: Option<i64>,
    pub annual: Option<i64>,
    pub entries: Vec<PointsEntryView>,
}

/// Ledger service for business logic
pub struct LedgerService {
    db: Arc<Db>,
    events: Arc<EventBus>,
}

impl LedgerService {
    pub fn new(db: Arc<Db>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn total_for(&self, user_id: &str, window: Option<&TimeWindow>) -> Result<i64, GamificationError> {
        self.db.with_conn(|conn| points::total_for(conn, user_id, window))
    }

    /// Entries most recent first, with actor names
    pub fn history(&self, user_id: &str) -> Result<Vec<PointsEntryView>, GamificationError> {
        self.db.with_conn(|conn| history_views(conn, user_id))
    }

    /// Totals for every window plus the entry history
    pub fn extract(
        &self,
        user_id: &str,
        settings: &GamificationSettings,
    ) -> Result<PointsExtract, GamificationError> {
        let cycle_window = settings.cycle_window()?;
        let annual_window = settings.annual_window()?;

        self.db.with_conn(|conn| {
            let total = points::total_for(conn, user_id, None)?;
            let cycle = match &cycle_window {
                Some(window) => Some(points::total_for(conn, user_id, Some(window))?),
                None => None,
            };
            let annual = match &annual_window {
                Some(window) => Some(points::total_for(conn, user_id, Some(window))?),
                None => None,
            };

            Ok(PointsExtract {
                user_id: user_id.to_string(),
                total,
                cycle,
                annual,
                entries: history_views(conn, user_id)?,
            })
        })
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Append an entry and announce it
    pub fn grant(&self, grant: Grant) -> Result<PointsEntry, GamificationError> {
        let entry = self.db.transaction(|conn| record_grant(conn, &grant))?;

        info!(
            user = %entry.user_id,
            points = entry.points,
            entry_type = %entry.entry_type,
            "Recorded points entry"
        );
        self.emit_granted(&entry);

        Ok(entry)
    }

    /// Manual award or deduction by an admin
    pub fn award(&self, input: ManualAwardInput, actor_id: &str) -> Result<PointsEntry, GamificationError> {
        self.grant(Grant {
            user_id: input.user_id,
            points: input.points,
            description: input.description,
            entry_type: entry_types::MANUAL.to_string(),
            actor_id: actor_id.to_string(),
            source: None,
        })
    }

    /// Hard-delete a single entry (admin correction)
    pub fn revoke(&self, entry_id: &str) -> Result<PointsEntry, GamificationError> {
        let entry = self.db.transaction(|conn| {
            let entry = points::get_entry(conn, entry_id)?
                .ok_or_else(|| GamificationError::NotFound(format!("Points entry {} not found", entry_id)))?;
            points::delete_entry(conn, entry_id)?;
            Ok(entry)
        })?;

        info!(entry = %entry.id, user = %entry.user_id, points = entry.points, "Revoked points entry");
        self.emit_revoked(&entry);

        Ok(entry)
    }

    pub(crate) fn emit_granted(&self, entry: &PointsEntry) {
        self.events.emit(GamificationEvent::PointsGranted {
            entry_id: entry.id.clone(),
            user_id: entry.user_id.clone(),
            points: entry.points,
            entry_type: entry.entry_type.clone(),
            actor_id: entry.created_by.clone(),
        });
    }

    pub(crate) fn emit_revoked(&self, entry: &PointsEntry) {
        self.events.emit(GamificationEvent::PointsRevoked {
            entry_id: entry.id.clone(),
            user_id: entry.user_id.clone(),
            points: entry.points,
        });
    }
}

fn history_views(conn: &mut SqliteConnection, user_id: &str) -> Result<Vec<PointsEntryView>, GamificationError> {
    let entries = points::history(conn, user_id)?;

    let mut actors: Vec<String> = entries.iter().map(|e| e.created_by.clone()).collect();
    actors.sort();
    actors.dedup();
    let names = users::display_names(conn, &actors)?;

    Ok(entries
        .into_iter()
        .map(|entry| {
            let name = names.get(&entry.created_by).cloned();
            PointsEntryView::from_entry(entry, name)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> LedgerService {
        let db = Arc::new(Db::open_in_memory().unwrap());
        db.with_conn(|conn| {
            users::upsert_user(conn, "admin", "Admin", None)?;
            users::upsert_user(conn, "u1", "Ana", None)?;
            Ok(())
        })
        .unwrap();
        LedgerService::new(db, Arc::new(EventBus::new()))
    }

    fn award(user_id: &str, points: i32) -> ManualAwardInput {
        ManualAwardInput { user_id: user_id.into(), points, description: "Volunteering".into() }
    }

    #[test]
    fn test_grant_rules() {
        let ledger = service();

        assert!(matches!(ledger.award(award("u1", 0), "admin"), Err(GamificationError::Validation(_))));
        assert!(matches!(ledger.award(award("ghost", 10), "admin"), Err(GamificationError::Validation(_))));

        let mut blank = award("u1", 10);
        blank.description = "  ".into();
        assert!(matches!(ledger.award(blank, "admin"), Err(GamificationError::Validation(_))));

        let entry = ledger.award(award("u1", -5), "admin").unwrap();
        assert_eq!(entry.entry_type, "manual");
        assert_eq!(ledger.total_for("u1", None).unwrap(), -5);
    }

    #[test]
    fn test_conservation_after_grants_and_revocations() {
        let ledger = service();

        let mut ids = Vec::new();
        for points in [10, 20, 30, -7] {
            ids.push(ledger.award(award("u1", points), "admin").unwrap().id);
        }
        ledger.revoke(&ids[1]).unwrap();

        assert_eq!(ledger.total_for("u1", None).unwrap(), 10 + 30 - 7);
        assert!(matches!(ledger.revoke(&ids[1]), Err(GamificationError::NotFound(_))));
    }

    #[test]
    fn test_history_resolves_actor_names() {
        let ledger = service();
        ledger.award(award("u1", 10), "admin").unwrap();
        ledger.award(award("u1", 5), "outside-system").unwrap();

        let history = ledger.history("u1").unwrap();
        assert_eq!(history.len(), 2);
        let names: Vec<_> = history.iter().map(|h| h.created_by_name.clone()).collect();
        assert!(names.contains(&Some("Admin".to_string())));
        assert!(names.contains(&None));
    }

    #[test]
    fn test_extract_without_windows() {
        let ledger = service();
        ledger.award(award("u1", 10), "admin").unwrap();

        let extract = ledger.extract("u1", &GamificationSettings::default()).unwrap();
        assert_eq!(extract.total, 10);
        assert_eq!(extract.cycle, None);
        assert_eq!(extract.entries.len(), 1);
    }
}
