//! End-to-end flows through the `Services` container

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use portal_gamification::auth::{Requester, Role};
use portal_gamification::db::users;
use portal_gamification::evaluation::{
    EvaluationType, FileConfig, FileRequirement, FileSubmission, RequirementKind, SubmissionData, SubmittedFile,
};
use portal_gamification::object_store::{
    DeleteOutcome, ObjectContent, ObjectInfo, ObjectMetadata, ObjectStore, StoredObject,
};
use portal_gamification::services::{
    ChallengeDeletion, ChallengeInput, CommentInput, ManualAwardInput, RankingWindow, ReviewInput, SettingsInput,
};
use portal_gamification::{BlobObjectStore, Db, GamificationError, Services};
use tempfile::TempDir;

/// Records deletes; URLs containing "broken" fail, "slow" never finishes.
/// Every `files.test` URL looks like a small stored PDF.
#[derive(Default)]
struct RecordingStore {
    deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn store(&self, data: &[u8], metadata: ObjectMetadata) -> Result<StoredObject, GamificationError> {
        let hash = BlobObjectStore::compute_hash(data);
        Ok(StoredObject {
            url: format!("http://files.test/files/{}", hash),
            hash,
            size_bytes: data.len() as u64,
            content_type: metadata.content_type,
            already_existed: false,
        })
    }

    async fn delete(&self, url: &str) -> Result<DeleteOutcome, GamificationError> {
        if url.contains("broken") {
            return Err(GamificationError::ExternalIo("bucket unavailable".into()));
        }
        if url.contains("slow") {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.deleted.lock().unwrap().push(url.to_string());
        Ok(DeleteOutcome::Deleted)
    }

    async fn get(&self, _key: &str) -> Result<Option<ObjectContent>, GamificationError> {
        Ok(None)
    }

    async fn stat(&self, url: &str) -> Result<Option<ObjectInfo>, GamificationError> {
        Ok(url.starts_with("http://files.test/files/").then(|| ObjectInfo {
            size_bytes: 1024,
            content_type: Some("application/pdf".into()),
            file_name: None,
        }))
    }
}

fn seed_directory(db: &Db) {
    db.with_conn(|conn| {
        for (id, name) in [("5", "Students"), ("6", "Teachers"), ("7", "Alumni")] {
            users::upsert_category(conn, id, name, true)?;
        }
        users::upsert_user(conn, "admin", "Admin", None)?;
        for (id, name, category) in [("u", "Ursula", "5"), ("v", "Victor", "7"), ("w", "Wanda", "6")] {
            users::upsert_user(conn, id, name, None)?;
            users::assign_category(conn, id, category)?;
        }
        Ok(())
    })
    .unwrap();
}

fn services_with(objects: Arc<dyn ObjectStore>) -> Services {
    let db = Arc::new(Db::open_in_memory().unwrap());
    seed_directory(&db);
    Services::new(db, objects, Duration::from_millis(200))
}

fn admin() -> Requester {
    Requester { id: "admin".into(), role: Role::Admin, category_ids: vec![] }
}

fn member(id: &str, category: &str) -> Requester {
    Requester { id: id.into(), role: Role::User, category_ids: vec![category.into()] }
}

fn file_challenge(title: &str) -> ChallengeInput {
    file_challenge_with(title, 100, None, vec![])
}

fn file_challenge_with(title: &str, points: i32, max_size: Option<u64>, accepted_types: Vec<String>) -> ChallengeInput {
    let mut input = ChallengeInput {
        title: title.into(),
        description: "Upload your certificate".into(),
        start_date: "2000-01-01".into(),
        end_date: "2999-12-31".into(),
        evaluation_type: EvaluationType::File,
        ..Default::default()
    };
    input.evaluation_config.file = Some(FileConfig {
        file_requirements: vec![FileRequirement {
            id: "cert".into(),
            name: "Certificate".into(),
            points,
            accepted_types,
            file_category: None,
            max_size,
            submission_type: RequirementKind::File,
            allow_multiple: false,
        }],
        max_files: 1,
    });
    input
}

fn file_payload(url: &str) -> SubmissionData {
    SubmissionData::File(FileSubmission {
        files: vec![SubmittedFile {
            requirement_id: "cert".into(),
            url: url.into(),
            name: Some("cert.pdf".into()),
            size: Some(1024),
            content_type: Some("application/pdf".into()),
            submission_type: RequirementKind::File,
        }],
    })
}

fn approve() -> ReviewInput {
    ReviewInput { status: "approved".into(), feedback: None }
}

fn deleted(outcome: ChallengeDeletion) -> portal_gamification::services::RetractionSummary {
    match outcome {
        ChallengeDeletion::Deleted(summary) => summary,
        ChallengeDeletion::RequiresConfirmation(c) => panic!("expected deletion, got confirmation {:?}", c),
    }
}

#[tokio::test]
async fn forced_delete_retracts_points_and_removes_everything() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(BlobObjectStore::new(dir.path(), "http://localhost:8095").await.unwrap());
    let s = services_with(store.clone());

    let challenge = s.challenges.create(file_challenge("Challenge A"), "admin").unwrap();
    assert_eq!(challenge.points, 100);

    let uploaded = store
        .store(b"%PDF-1.4 certificate", ObjectMetadata { content_type: Some("application/pdf".into()), file_name: None })
        .await
        .unwrap();

    let ursula = member("u", "5");
    let submission = s
        .submissions
        .submit(&ursula, &challenge.id, file_payload(&uploaded.url))
        .await
        .unwrap();
    assert_eq!(submission.status, "pending");

    s.submissions.review(&admin(), &submission.id, approve()).unwrap();
    assert_eq!(s.ledger.total_for("u", None).unwrap(), 100);

    let root = s
        .comments
        .post(&ursula, &challenge.id, CommentInput { content: "Done!".into(), parent_id: None })
        .unwrap();
    s.comments.toggle_like(&admin(), &root.id).unwrap();

    match s.challenges.delete(&challenge.id, false).await.unwrap() {
        ChallengeDeletion::RequiresConfirmation(confirmation) => {
            assert!(confirmation.requires_confirmation);
            assert_eq!(confirmation.submission_count, 1);
            assert_eq!(confirmation.challenge_title, "Challenge A");
        }
        other => panic!("expected confirmation, got {:?}", other),
    }

    let summary = deleted(s.challenges.delete(&challenge.id, true).await.unwrap());
    assert!(summary.challenge_deleted);
    assert_eq!(summary.submissions_removed, 1);
    assert_eq!(summary.points_entries_retracted, 1);
    assert_eq!(summary.points_retracted, 100);
    assert_eq!(summary.comments_removed, 1);
    assert_eq!(summary.files_deleted, 1);
    assert_eq!(summary.file_deletions_failed, 0);

    assert_eq!(s.ledger.total_for("u", None).unwrap(), 0);
    let stats = s.db.stats().unwrap();
    assert_eq!(stats.challenge_count, 0);
    assert_eq!(stats.submission_count, 0);
    assert_eq!(stats.comment_count, 0);
    assert_eq!(stats.points_entry_count, 0);
    assert!(store.get(&uploaded.hash).await.unwrap().is_none());
}

#[tokio::test]
async fn failed_file_deletes_do_not_undo_the_deletion() {
    let store = Arc::new(RecordingStore::default());
    let s = services_with(store.clone());
    let challenge = s.challenges.create(file_challenge("Certificates"), "admin").unwrap();

    let cases = [
        ("u", "5", "http://files.test/files/ok-1"),
        ("v", "7", "http://files.test/files/broken-2"),
        ("w", "6", "http://files.test/files/slow-3"),
    ];
    for (id, category, url) in cases {
        let submission = s
            .submissions
            .submit(&member(id, category), &challenge.id, file_payload(url))
            .await
            .unwrap();
        s.submissions.review(&admin(), &submission.id, approve()).unwrap();
    }

    let summary = deleted(s.challenges.delete(&challenge.id, true).await.unwrap());
    assert_eq!(summary.submissions_removed, 3);
    assert_eq!(summary.points_entries_retracted, 3);
    assert_eq!(summary.files_deleted, 1);
    assert_eq!(summary.file_deletions_failed, 2);
    assert!(summary.message.contains("2 file deletions failed"));
    let failed: Vec<_> = summary.failures.iter().map(|f| f.url.as_str()).collect();
    assert!(failed.contains(&"http://files.test/files/broken-2"));
    assert!(failed.contains(&"http://files.test/files/slow-3"));

    for user in ["u", "v", "w"] {
        assert_eq!(s.ledger.total_for(user, None).unwrap(), 0);
    }
    assert_eq!(s.db.stats().unwrap().challenge_count, 0);
    assert_eq!(store.deleted.lock().unwrap().as_slice(), ["http://files.test/files/ok-1"]);
}

#[tokio::test]
async fn shared_uploads_survive_until_unreferenced() {
    let store = Arc::new(RecordingStore::default());
    let s = services_with(store.clone());
    let first = s.challenges.create(file_challenge("First"), "admin").unwrap();
    let second = s.challenges.create(file_challenge("Second"), "admin").unwrap();

    let url = "http://files.test/files/shared";
    let ursula = member("u", "5");
    s.submissions.submit(&ursula, &first.id, file_payload(url)).await.unwrap();
    s.submissions.submit(&ursula, &second.id, file_payload(url)).await.unwrap();

    let summary = deleted(s.challenges.delete(&first.id, true).await.unwrap());
    assert_eq!(summary.files_skipped, 1);
    assert!(store.deleted.lock().unwrap().is_empty());

    let summary = deleted(s.challenges.delete(&second.id, true).await.unwrap());
    assert_eq!(summary.files_deleted, 1);
}

#[tokio::test]
async fn return_submissions_keeps_challenge_and_comments() {
    let store = Arc::new(RecordingStore::default());
    let s = services_with(store);
    let challenge = s.challenges.create(file_challenge("Keep me"), "admin").unwrap();
    let ursula = member("u", "5");

    let submission = s
        .submissions
        .submit(&ursula, &challenge.id, file_payload("http://files.test/files/a"))
        .await
        .unwrap();
    s.submissions.review(&admin(), &submission.id, approve()).unwrap();
    s.comments
        .post(&ursula, &challenge.id, CommentInput { content: "Nice".into(), parent_id: None })
        .unwrap();

    let summary = s.challenges.return_submissions(&challenge.id).await.unwrap();
    assert!(!summary.challenge_deleted);
    assert_eq!(summary.submissions_removed, 1);
    assert_eq!(summary.points_retracted, 100);
    assert_eq!(summary.message, "1 submission returned");

    assert_eq!(s.ledger.total_for("u", None).unwrap(), 0);
    assert_eq!(s.comments.list(&ursula, &challenge.id).unwrap().len(), 1);

    // The user can take part again
    let again = s
        .submissions
        .submit(&ursula, &challenge.id, file_payload("http://files.test/files/b"))
        .await
        .unwrap();
    assert_eq!(again.attempts, 1);
}

#[tokio::test]
async fn manual_award_does_not_collide_with_challenge_retraction() {
    let store = Arc::new(RecordingStore::default());
    let s = services_with(store);
    let challenge = s.challenges.create(file_challenge("Reading"), "admin").unwrap();
    let ursula = member("u", "5");

    // Same text as the challenge title, but not tied to any submission
    s.ledger
        .award(ManualAwardInput { user_id: "u".into(), points: 15, description: "Reading".into() }, "admin")
        .unwrap();
    let submission = s
        .submissions
        .submit(&ursula, &challenge.id, file_payload("http://files.test/files/r"))
        .await
        .unwrap();
    s.submissions.review(&admin(), &submission.id, approve()).unwrap();
    assert_eq!(s.ledger.total_for("u", None).unwrap(), 115);

    s.challenges.delete(&challenge.id, true).await.unwrap();
    assert_eq!(s.ledger.total_for("u", None).unwrap(), 15);
}

#[tokio::test]
async fn ranking_only_counts_enabled_categories() {
    let store = Arc::new(RecordingStore::default());
    let s = services_with(store);

    s.ranking
        .update_settings(
            SettingsInput { enabled_category_ids: vec!["5".into(), "6".into()], ..Default::default() },
            "admin",
        )
        .unwrap();
    for (user, points) in [("u", 40), ("v", 999)] {
        s.ledger
            .award(ManualAwardInput { user_id: user.into(), points, description: "Bonus".into() }, "admin")
            .unwrap();
    }

    let board = s.ranking.rank(RankingWindow::All, None).unwrap();
    let ids: Vec<_> = board.entries.iter().map(|e| e.user_id.as_str()).collect();
    assert_eq!(ids, ["u", "w"]);
    assert_eq!(board.entries[0].position, 1);
    assert_eq!(board.entries[0].points, 40);
    assert_eq!(board.entries[1].points, 0);

    // Repeated calls give the same order
    assert_eq!(s.ranking.rank(RankingWindow::All, None).unwrap(), board);
}

#[tokio::test]
async fn comment_threads_stay_two_levels_deep() {
    let store = Arc::new(RecordingStore::default());
    let s = services_with(store);
    let challenge = s.challenges.create(file_challenge("Talk"), "admin").unwrap();
    let ursula = member("u", "5");

    let root = s
        .comments
        .post(&ursula, &challenge.id, CommentInput { content: "Question".into(), parent_id: None })
        .unwrap();
    let reply = s
        .comments
        .post(&admin(), &challenge.id, CommentInput { content: "Answer".into(), parent_id: Some(root.id.clone()) })
        .unwrap();
    let nested = s.comments.post(
        &ursula,
        &challenge.id,
        CommentInput { content: "Follow-up".into(), parent_id: Some(reply.id.clone()) },
    );
    assert!(matches!(nested, Err(GamificationError::Validation(_))));

    let thread = s.comments.list(&ursula, &challenge.id).unwrap();
    assert_eq!(thread.len(), 1);
    assert_eq!(thread[0].replies.len(), 1);
    assert_eq!(thread[0].replies[0].content, "Answer");
}

#[tokio::test]
async fn approval_pays_the_points_in_force_at_review() {
    let store = Arc::new(RecordingStore::default());
    let s = services_with(store);
    let challenge = s.challenges.create(file_challenge_with("Course", 50, None, vec![]), "admin").unwrap();
    assert_eq!(challenge.points, 50);

    let ursula = member("u", "5");
    let submission = s
        .submissions
        .submit(&ursula, &challenge.id, file_payload("http://files.test/files/course"))
        .await
        .unwrap();

    let edited = s
        .challenges
        .update(&challenge.id, file_challenge_with("Course", 80, None, vec![]))
        .unwrap();
    assert_eq!(edited.points, 80);

    let approved = s.submissions.review(&admin(), &submission.id, approve()).unwrap();
    assert_eq!(approved.points, 80);
    assert_eq!(s.ledger.total_for("u", None).unwrap(), 80);

    let summary = s.challenges.return_submissions(&challenge.id).await.unwrap();
    assert_eq!(summary.points_retracted, 80);
    assert_eq!(s.ledger.total_for("u", None).unwrap(), 0);
}

#[tokio::test]
async fn upload_limits_use_stored_size_and_type() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(BlobObjectStore::new(dir.path(), "http://localhost:8095").await.unwrap());
    let s = services_with(store.clone());
    let ursula = member("u", "5");

    let sized = s
        .challenges
        .create(file_challenge_with("Small files", 100, Some(10), vec![]), "admin")
        .unwrap();
    let big = store
        .store(&[0u8; 5000], ObjectMetadata { content_type: Some("application/pdf".into()), file_name: None })
        .await
        .unwrap();

    // Size omitted by the client
    let mut payload = file_payload(&big.url);
    if let SubmissionData::File(files) = &mut payload {
        files.files[0].size = None;
    }
    let result = s.submissions.submit(&ursula, &sized.id, payload).await;
    assert!(matches!(result, Err(GamificationError::Validation(_))));

    // Size understated by the client
    let mut payload = file_payload(&big.url);
    if let SubmissionData::File(files) = &mut payload {
        files.files[0].size = Some(5);
    }
    let result = s.submissions.submit(&ursula, &sized.id, payload).await;
    assert!(matches!(result, Err(GamificationError::Validation(_))));

    // Not an object of this store, so its size is unknown
    let result = s
        .submissions
        .submit(&ursula, &sized.id, file_payload("https://elsewhere.example/tiny.pdf"))
        .await;
    assert!(matches!(result, Err(GamificationError::Validation(_))));

    let small = store
        .store(b"tiny", ObjectMetadata { content_type: Some("application/pdf".into()), file_name: None })
        .await
        .unwrap();
    let accepted = s.submissions.submit(&ursula, &sized.id, file_payload(&small.url)).await.unwrap();
    assert_eq!(accepted.status, "pending");

    // Declared as a PNG, stored as a PDF
    let images = s
        .challenges
        .create(file_challenge_with("Photos", 100, None, vec!["image/*".into()]), "admin")
        .unwrap();
    let mut payload = file_payload(&small.url);
    if let SubmissionData::File(files) = &mut payload {
        files.files[0].content_type = Some("image/png".into());
        files.files[0].name = Some("photo.png".into());
    }
    let result = s.submissions.submit(&ursula, &images.id, payload).await;
    assert!(matches!(result, Err(GamificationError::Validation(_))));

    let photo = store
        .store(b"\x89PNG", ObjectMetadata { content_type: Some("image/png".into()), file_name: Some("me.png".into()) })
        .await
        .unwrap();
    let accepted = s.submissions.submit(&ursula, &images.id, file_payload(&photo.url)).await.unwrap();
    match &accepted.submission_data {
        SubmissionData::File(files) => {
            assert_eq!(files.files[0].size, Some(4));
            assert_eq!(files.files[0].content_type.as_deref(), Some("image/png"));
            assert_eq!(files.files[0].name.as_deref(), Some("me.png"));
        }
        other => panic!("expected file payload, got {:?}", other),
    }
}

#[tokio::test]
async fn challenge_assets_survive_submission_cleanup() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(BlobObjectStore::new(dir.path(), "http://localhost:8095").await.unwrap());
    let s = services_with(store.clone());

    let banner = store
        .store(b"banner image", ObjectMetadata { content_type: Some("image/png".into()), file_name: None })
        .await
        .unwrap();
    let mut input = file_challenge("With banner");
    input.image_url = Some(banner.url.clone());
    let challenge = s.challenges.create(input, "admin").unwrap();

    // A participant hands in the challenge's own banner
    let ursula = member("u", "5");
    s.submissions.submit(&ursula, &challenge.id, file_payload(&banner.url)).await.unwrap();

    let summary = s.challenges.return_submissions(&challenge.id).await.unwrap();
    assert_eq!(summary.submissions_removed, 1);
    assert_eq!(summary.files_deleted, 0);
    assert_eq!(summary.files_skipped, 1);
    assert!(store.stat(&banner.url).await.unwrap().is_some());

    // Once the challenge is gone the object is no longer protected
    s.submissions.submit(&ursula, &challenge.id, file_payload(&banner.url)).await.unwrap();
    let summary = deleted(s.challenges.delete(&challenge.id, true).await.unwrap());
    assert_eq!(summary.files_deleted, 1);
    assert!(store.stat(&banner.url).await.unwrap().is_none());
}

#[tokio::test]
async fn points_history_is_complete() {
    let store = Arc::new(RecordingStore::default());
    let s = services_with(store);

    for i in 1..=205 {
        s.ledger
            .award(ManualAwardInput { user_id: "u".into(), points: i, description: format!("Shift {}", i) }, "admin")
            .unwrap();
    }

    let history = s.ledger.history("u").unwrap();
    assert_eq!(history.len(), 205);
    assert_eq!(history[0].description, "Shift 205");
    assert_eq!(history[204].description, "Shift 1");
    assert_eq!(s.ledger.total_for("u", None).unwrap(), (1..=205).sum::<i64>());
}
