//! Business logic layer
//!
//! Services validate input, run multi-step writes in one transaction and
//! announce changes on the [`EventBus`] after commit. HTTP handlers only
//! parse requests and map results through [`response`].

pub mod challenge_service;
pub mod comment_service;
pub mod events;
pub mod ledger_service;
pub mod ranking_service;
pub mod response;
pub mod submission_service;

use std::sync::Arc;
use std::time::Duration;

use crate::db::Db;
use crate::object_store::ObjectStore;

pub use challenge_service::{
    Challenge, ChallengeDeletion, ChallengeInput, ChallengeService, DeletionConfirmation, RetractionSummary,
    SubmissionCount,
};
pub use comment_service::{CommentInput, CommentService, CommentView, LikeToggle};
pub use events::{spawn_logging_listener, EventBus, GamificationEvent};
pub use ledger_service::{Grant, GrantSource, LedgerService, ManualAwardInput, PointsEntryView, PointsExtract};
pub use ranking_service::{
    GamificationSettings, Leaderboard, RankingEntry, RankingService, RankingWindow, SettingsInput,
};
pub use submission_service::{ReviewInput, SubmissionService, SubmitRequest, Submission};

/// All services sharing one database, event bus and object store
pub struct Services {
    pub db: Arc<Db>,
    pub events: Arc<EventBus>,
    pub objects: Arc<dyn ObjectStore>,
    pub ledger: Arc<LedgerService>,
    pub ranking: RankingService,
    pub challenges: ChallengeService,
    pub submissions: SubmissionService,
    pub comments: CommentService,
}

impl Services {
    /// `object_timeout` bounds each object storage call made on a request path
    pub fn new(db: Arc<Db>, objects: Arc<dyn ObjectStore>, object_timeout: Duration) -> Self {
        let events = Arc::new(EventBus::new());
        let ledger = Arc::new(LedgerService::new(db.clone(), events.clone()));

        Self {
            ranking: RankingService::new(db.clone(), events.clone()),
            challenges: ChallengeService::new(db.clone(), events.clone(), objects.clone(), object_timeout),
            submissions: SubmissionService::new(
                db.clone(),
                events.clone(),
                ledger.clone(),
                objects.clone(),
                object_timeout,
            ),
            comments: CommentService::new(db.clone(), events.clone()),
            ledger,
            db,
            events,
            objects,
        }
    }
}
