//! Event system for gamification operations
//!
//! Services emit an event after every committed state change. The logging
//! listener turns them into an audit trail; other subscribers (cache
//! invalidation, notifications) can attach to the same bus.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

/// Gamification events emitted by services
#[derive(Debug, Clone)]
pub enum GamificationEvent {
    // Ledger events
    PointsGranted {
        entry_id: String,
        user_id: String,
        points: i32,
        entry_type: String,
        actor_id: String,
    },
    PointsRevoked {
        entry_id: String,
        user_id: String,
        points: i32,
    },

    SettingsUpdated {
        actor_id: String,
    },

    // Challenge events
    ChallengeCreated {
        id: String,
        title: String,
        evaluation_type: String,
    },
    ChallengeUpdated {
        id: String,
    },
    ChallengeDeleted {
        id: String,
        submissions_removed: usize,
        points_retracted: usize,
    },

    // Submission events
    SubmissionCreated {
        id: String,
        challenge_id: String,
        user_id: String,
        status: String,
    },
    SubmissionReviewed {
        id: String,
        status: String,
        reviewer_id: String,
    },
    SubmissionsReturned {
        challenge_id: String,
        count: usize,
    },
    FileCleanupFailed {
        url: String,
        reason: String,
    },

    // Comment events
    CommentPosted {
        id: String,
        challenge_id: String,
        parent_id: Option<String>,
    },
    CommentDeleted {
        id: String,
        deleted_by: String,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &GamificationEvent);
}

/// Event bus for broadcasting gamification events
pub struct EventBus {
    sender: broadcast::Sender<GamificationEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: GamificationEvent) {
        trace!(event = ?event, "Emitting gamification event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GamificationEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &GamificationEvent) {
        match event {
            GamificationEvent::PointsGranted { entry_id, user_id, points, entry_type, actor_id } => {
                info!(
                    entry = %entry_id,
                    user = %user_id,
                    points = points,
                    entry_type = %entry_type,
                    actor = %actor_id,
                    "Points granted"
                );
            }
            GamificationEvent::PointsRevoked { entry_id, user_id, points } => {
                info!(entry = %entry_id, user = %user_id, points = points, "Points revoked");
            }
            GamificationEvent::ChallengeDeleted { id, submissions_removed, points_retracted } => {
                info!(
                    id = %id,
                    submissions = submissions_removed,
                    retracted = points_retracted,
                    "Challenge deleted"
                );
            }
            GamificationEvent::SubmissionReviewed { id, status, reviewer_id } => {
                info!(id = %id, status = %status, reviewer = %reviewer_id, "Submission reviewed");
            }
            GamificationEvent::SubmissionsReturned { challenge_id, count } => {
                info!(challenge = %challenge_id, count = count, "Submissions returned");
            }
            GamificationEvent::FileCleanupFailed { url, reason } => {
                warn!(url = %url, reason = %reason, "File cleanup failed");
            }
            GamificationEvent::CommentDeleted { id, deleted_by } => {
                debug!(id = %id, by = %deleted_by, "Comment deleted");
            }
            _ => {
                debug!(event = ?event, "Gamification event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}
