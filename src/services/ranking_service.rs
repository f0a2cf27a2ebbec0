//! Ranking service - settings, eligibility and leaderboards
//!
//! ## Eligibility
//!
//! The leaderboard population is derived from category configuration,
//! never from who happens to have ledger entries:
//!
//! 1. an explicit category (admin drilling into one category)
//! 2. else the general category, when set
//! 3. else the union of enabled categories
//! 4. else nobody
//!
//! Settings are loaded once per call and passed down explicitly.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use diesel::SqliteConnection;
use serde::{Deserialize, Serialize};
use tracing::info;
use ts_rs::TS;

use crate::auth::Requester;
use crate::db::models::{current_timestamp, SettingsRow, UpsertSettings};
use crate::db::points::{self, TimeWindow};
use crate::db::{settings, users, Db};
use crate::error::GamificationError;

use super::events::{EventBus, GamificationEvent};

const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// Settings
// ============================================================================

/// Global gamification settings as exposed over the API
#[derive(Debug, Clone, Default, PartialEq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct GamificationSettings {
    pub cycle_start_date: Option<String>,
    pub cycle_end_date: Option<String>,
    pub annual_start_date: Option<String>,
    pub annual_end_date: Option<String>,
    pub general_category_id: Option<String>,
    pub enabled_category_ids: Vec<String>,
    pub updated_by: Option<String>,
    pub updated_at: Option<String>,
}

impl GamificationSettings {
    fn from_row(row: SettingsRow) -> Result<Self, GamificationError> {
        let enabled_category_ids: Vec<String> = serde_json::from_str(&row.enabled_category_ids_json)
            .map_err(|e| GamificationError::Internal(format!("Stored enabled categories are corrupt: {}", e)))?;

        Ok(Self {
            cycle_start_date: row.cycle_start_date,
            cycle_end_date: row.cycle_end_date,
            annual_start_date: row.annual_start_date,
            annual_end_date: row.annual_end_date,
            general_category_id: row.general_category_id,
            enabled_category_ids,
            updated_by: row.updated_by,
            updated_at: Some(row.updated_at),
        })
    }

    /// Load the singleton; defaults when it was never written
    pub fn load(conn: &mut SqliteConnection) -> Result<Self, GamificationError> {
        match settings::load_settings(conn)? {
            Some(row) => Self::from_row(row),
            None => Ok(Self::default()),
        }
    }

    pub fn cycle_window(&self) -> Result<Option<TimeWindow>, GamificationError> {
        date_window(self.cycle_start_date.as_deref(), self.cycle_end_date.as_deref())
    }

    pub fn annual_window(&self) -> Result<Option<TimeWindow>, GamificationError> {
        date_window(self.annual_start_date.as_deref(), self.annual_end_date.as_deref())
    }
}

/// Widen a pair of calendar dates to `[start 00:00:00, end 23:59:59]`
fn date_window(start: Option<&str>, end: Option<&str>) -> Result<Option<TimeWindow>, GamificationError> {
    match (start, end) {
        (Some(start), Some(end)) => {
            let start = parse_date(start)?;
            let end = parse_date(end)?;
            Ok(Some(TimeWindow::new(
                format!("{}T00:00:00Z", start.format(DATE_FORMAT)),
                format!("{}T23:59:59Z", end.format(DATE_FORMAT)),
            )))
        }
        _ => Ok(None),
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, GamificationError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|_| GamificationError::Validation(format!("'{}' is not a YYYY-MM-DD date", value)))
}

/// Admin request body for `PUT /gamification/settings`
#[derive(Debug, Clone, Default, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct SettingsInput {
    #[serde(default)]
    pub cycle_start_date: Option<String>,
    #[serde(default)]
    pub cycle_end_date: Option<String>,
    #[serde(default)]
    pub annual_start_date: Option<String>,
    #[serde(default)]
    pub annual_end_date: Option<String>,
    #[serde(default)]
    pub general_category_id: Option<String>,
    #[serde(default)]
    pub enabled_category_ids: Vec<String>,
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn check_date_pair(start: Option<&str>, end: Option<&str>, label: &str) -> Result<(), GamificationError> {
    match (start, end) {
        (Some(s), Some(e)) => {
            if parse_date(s)? > parse_date(e)? {
                return Err(GamificationError::Validation(format!(
                    "{} start date must not be after its end date",
                    label
                )));
            }
            Ok(())
        }
        (None, None) => Ok(()),
        _ => Err(GamificationError::Validation(format!(
            "{} window needs both a start and an end date",
            label
        ))),
    }
}

// ============================================================================
// Eligibility
// ============================================================================

/// User ids counted in a leaderboard
pub fn resolve_eligible_user_ids(
    conn: &mut SqliteConnection,
    settings: &GamificationSettings,
    explicit_category_id: Option<&str>,
) -> Result<Vec<String>, GamificationError> {
    if let Some(category_id) = explicit_category_id {
        return users::members_of(conn, category_id);
    }
    if let Some(general) = &settings.general_category_id {
        return users::members_of(conn, general);
    }
    if !settings.enabled_category_ids.is_empty() {
        return users::members_of_any(conn, &settings.enabled_category_ids);
    }
    Ok(Vec::new())
}

/// Whether a challenge targeting `target_category_ids` is visible to `requester`
pub fn challenge_visible_to(target_category_ids: &[String], requester: &Requester) -> bool {
    if requester.is_admin() {
        return true;
    }
    target_category_ids.is_empty() || requester.in_any_category(target_category_ids)
}

// ============================================================================
// Ranking
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, Default)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "gamification/")]
pub enum RankingWindow {
    #[default]
    All,
    Cycle,
    Annual,
}

impl RankingWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankingWindow::All => "all",
            RankingWindow::Cycle => "cycle",
            RankingWindow::Annual => "annual",
        }
    }
}

impl fmt::Display for RankingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RankingWindow {
    type Err = GamificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(RankingWindow::All),
            "cycle" => Ok(RankingWindow::Cycle),
            "annual" => Ok(RankingWindow::Annual),
            other => Err(GamificationError::Validation(format!(
                "Invalid ranking window: {}. Valid windows: all, cycle, annual",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct RankingEntry {
    pub position: u32,
    pub user_id: String,
    pub display_name: String,
    pub points: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct Leaderboard {
    pub window: RankingWindow,
    pub category_id: Option<String>,
    pub entries: Vec<RankingEntry>,
}

/// Points descending, then display name ascending, then id for full determinism
fn compare_rows(a: &RankingEntry, b: &RankingEntry) -> Ordering {
    b.points
        .cmp(&a.points)
        .then_with(|| a.display_name.cmp(&b.display_name))
        .then_with(|| a.user_id.cmp(&b.user_id))
}

/// Build a leaderboard on the caller's connection
pub fn rank(
    conn: &mut SqliteConnection,
    settings: &GamificationSettings,
    window: RankingWindow,
    category_filter: Option<&str>,
) -> Result<Leaderboard, GamificationError> {
    let empty = Leaderboard {
        window,
        category_id: category_filter.map(str::to_string),
        entries: Vec::new(),
    };

    let eligible = resolve_eligible_user_ids(conn, settings, category_filter)?;
    if eligible.is_empty() {
        return Ok(empty);
    }

    let bounds = match window {
        RankingWindow::All => None,
        RankingWindow::Cycle => Some(settings.cycle_window()?.ok_or_else(|| {
            GamificationError::Validation("Cycle dates are not configured".into())
        })?),
        RankingWindow::Annual => Some(settings.annual_window()?.ok_or_else(|| {
            GamificationError::Validation("Annual dates are not configured".into())
        })?),
    };

    let totals = points::totals_for_users(conn, &eligible, bounds.as_ref())?;
    let names = users::display_names(conn, &eligible)?;

    let mut entries: Vec<RankingEntry> = eligible
        .into_iter()
        .map(|user_id| RankingEntry {
            position: 0,
            display_name: names.get(&user_id).cloned().unwrap_or_else(|| user_id.clone()),
            points: totals.get(&user_id).copied().unwrap_or(0),
            user_id,
        })
        .collect();

    entries.sort_by(compare_rows);
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.position = i as u32 + 1;
    }

    Ok(Leaderboard { entries, ..empty })
}

/// Ranking service for business logic
pub struct RankingService {
    db: Arc<Db>,
    events: Arc<EventBus>,
}

impl RankingService {
    pub fn new(db: Arc<Db>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    pub fn settings(&self) -> Result<GamificationSettings, GamificationError> {
        self.db.with_conn(GamificationSettings::load)
    }

    /// Validate and replace the settings row
    pub fn update_settings(
        &self,
        input: SettingsInput,
        actor_id: &str,
    ) -> Result<GamificationSettings, GamificationError> {
        let cycle_start = normalize_optional(input.cycle_start_date);
        let cycle_end = normalize_optional(input.cycle_end_date);
        let annual_start = normalize_optional(input.annual_start_date);
        let annual_end = normalize_optional(input.annual_end_date);
        let general = normalize_optional(input.general_category_id);

        check_date_pair(cycle_start.as_deref(), cycle_end.as_deref(), "Cycle")?;
        check_date_pair(annual_start.as_deref(), annual_end.as_deref(), "Annual")?;

        let mut enabled: Vec<String> = Vec::new();
        for id in input.enabled_category_ids {
            let id = id.trim().to_string();
            if !id.is_empty() && !enabled.contains(&id) {
                enabled.push(id);
            }
        }
        let enabled_json = serde_json::to_string(&enabled)?;
        let now = current_timestamp();

        let saved = self.db.transaction(|conn| {
            for id in general.iter().chain(enabled.iter()) {
                match users::get_category(conn, id)? {
                    Some(category) if category.is_active != 0 => {}
                    Some(_) => {
                        return Err(GamificationError::Validation(format!("Category {} is inactive", id)))
                    }
                    None => return Err(GamificationError::Validation(format!("Unknown category {}", id))),
                }
            }

            let row = settings::upsert_settings(
                conn,
                UpsertSettings {
                    id: 1,
                    cycle_start_date: cycle_start.as_deref(),
                    cycle_end_date: cycle_end.as_deref(),
                    annual_start_date: annual_start.as_deref(),
                    annual_end_date: annual_end.as_deref(),
                    general_category_id: general.as_deref(),
                    enabled_category_ids_json: &enabled_json,
                    updated_by: Some(actor_id),
                    updated_at: &now,
                },
            )?;
            GamificationSettings::from_row(row)
        })?;

        info!(actor = %actor_id, "Updated gamification settings");
        self.events.emit(GamificationEvent::SettingsUpdated { actor_id: actor_id.to_string() });

        Ok(saved)
    }

    pub fn eligible_user_ids(&self, explicit_category_id: Option<&str>) -> Result<Vec<String>, GamificationError> {
        self.db.with_conn(|conn| {
            let settings = GamificationSettings::load(conn)?;
            resolve_eligible_user_ids(conn, &settings, explicit_category_id)
        })
    }

    /// Leaderboard for a window, optionally restricted to one category
    pub fn rank(&self, window: RankingWindow, category_filter: Option<&str>) -> Result<Leaderboard, GamificationError> {
        self.db.with_conn(|conn| {
            let settings = GamificationSettings::load(conn)?;
            rank(conn, &settings, window, category_filter)
        })
    }
}
