use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::annotations::{AnnotationStore, Anomaly, Severity, Source};

/// Coalescing window between the last store mutation and the push.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(1000);

// ============================================================================
// WIRE FORMAT
// ============================================================================
//
// Mirrors the annotation backend's JSON records: stringly severity/source,
// integer tombstone flag, audit fields stamped on write-back.

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedAnnotation {
    pub annotation_id: String,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub confidence: Option<f32>,
    pub severity: Option<String>,
    pub classification: Option<String>,
    #[serde(default)]
    pub comment: String,
    pub source: String,
    /// 0 = live, anything else = tombstoned.
    #[serde(default)]
    pub deleted: u8,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub user_id: Option<String>,
}

/// Payload of one push: the full current record set plus actor and owning
/// transformer identity, addressed by inspection id. The server side treats
/// it as an idempotent full-set replace.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SaveRequest {
    pub annotations: Vec<PersistedAnnotation>,
    pub user_id: String,
    pub transformer_id: String,
}

impl PersistedAnnotation {
    pub fn from_anomaly(a: &Anomaly) -> Self {
        Self {
            annotation_id: a.id.to_string(),
            x: a.x,
            y: a.y,
            w: a.w,
            h: a.h,
            confidence: a.confidence,
            severity: a.severity.map(|s| s.label().to_string()),
            classification: a.classification.clone(),
            comment: a.comment.clone(),
            source: match a.source {
                Source::Ai => "ai".to_string(),
                Source::User => "user".to_string(),
            },
            deleted: a.deleted as u8,
            created_at: a.created_at.clone(),
            updated_at: a.updated_at.clone(),
            user_id: a.user_id.clone(),
        }
    }

    pub fn into_anomaly(self) -> Anomaly {
        Anomaly {
            // Records written by this app round-trip their uuid; foreign ids
            // get a fresh one.
            id: Uuid::parse_str(&self.annotation_id).unwrap_or_else(|_| Uuid::new_v4()),
            x: self.x,
            y: self.y,
            w: self.w,
            h: self.h,
            confidence: self.confidence,
            severity: self.severity.as_deref().and_then(Severity::parse),
            classification: self.classification,
            comment: self.comment,
            source: if self.source == "ai" { Source::Ai } else { Source::User },
            deleted: self.deleted != 0,
            user_id: self.user_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

fn unix_timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs().to_string(),
        Err(_) => "0".to_string(),
    }
}

// ============================================================================
// REPOSITORY
// ============================================================================

/// Key-value persistence keyed by inspection identity. Implementations run
/// on background threads, hence `Send + Sync`.
pub trait AnnotationRepository: Send + Sync {
    /// Returns the stored set, empty if none was ever saved.
    fn load(&self, inspection_id: &str) -> Result<Vec<PersistedAnnotation>, String>;
    /// Idempotent full-set replace.
    fn save(&self, inspection_id: &str, request: &SaveRequest) -> Result<(), String>;
}

/// File-backed repository: one JSON document per inspection under a base
/// directory.
pub struct JsonFileRepository {
    base_dir: PathBuf,
}

impl JsonFileRepository {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn path_for(&self, inspection_id: &str) -> PathBuf {
        // Inspection ids are internal identifiers; strip anything that could
        // escape the base directory.
        let safe: String = inspection_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.base_dir.join(format!("{}.json", safe))
    }
}

impl AnnotationRepository for JsonFileRepository {
    fn load(&self, inspection_id: &str) -> Result<Vec<PersistedAnnotation>, String> {
        let path = self.path_for(inspection_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        let request: SaveRequest = serde_json::from_str(&text)
            .map_err(|e| format!("Malformed annotation file {}: {}", path.display(), e))?;
        Ok(request.annotations)
    }

    fn save(&self, inspection_id: &str, request: &SaveRequest) -> Result<(), String> {
        fs::create_dir_all(&self.base_dir)
            .map_err(|e| format!("Failed to create {}: {}", self.base_dir.display(), e))?;
        let path = self.path_for(inspection_id);
        let text = serde_json::to_string_pretty(request)
            .map_err(|e| format!("Failed to serialize annotations: {}", e))?;
        fs::write(&path, text).map_err(|e| format!("Failed to write {}: {}", path.display(), e))
    }
}

// ============================================================================
// DEBOUNCED SAVE SCHEDULER
// ============================================================================

/// Token-based coalescing scheduler: each mutation issues a new token and
/// re-arms the deadline, invalidating whatever push was pending. Only the
/// newest token's timer ever fires, so there is at most one in-flight push
/// per coalescing window.
pub struct SaveDebouncer {
    window: Duration,
    token: u64,
    deadline: Option<(u64, Instant)>,
}

impl SaveDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            token: 0,
            deadline: None,
        }
    }

    /// A mutation happened: restart the window under a fresh token.
    pub fn schedule_at(&mut self, now: Instant) -> u64 {
        self.token += 1;
        self.deadline = Some((self.token, now + self.window));
        self.token
    }

    pub fn schedule(&mut self) -> u64 {
        self.schedule_at(Instant::now())
    }

    /// Consume the pending token if its window has elapsed.
    pub fn take_due(&mut self, now: Instant) -> Option<u64> {
        match self.deadline {
            Some((token, at)) if now >= at => {
                self.deadline = None;
                Some(token)
            }
            _ => None,
        }
    }

    pub fn pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Drop whatever is pending (editor close).
    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

// ============================================================================
// PERSISTENCE SYNC DRIVER
// ============================================================================

/// Result of a background load/save, polled from the UI thread each frame.
#[derive(Debug)]
pub enum SyncResult {
    Loaded {
        inspection_id: String,
        records: Vec<PersistedAnnotation>,
    },
    LoadFailed {
        inspection_id: String,
        error: String,
    },
    Saved {
        token: u64,
    },
    SaveFailed {
        token: u64,
        error: String,
    },
}

/// Loads persisted annotations on activation and pushes the current set on a
/// debounced schedule. All I/O happens on short-lived background threads;
/// results come back over an mpsc channel and never block interaction.
///
/// Ordering caveat, accepted by design: two pushes from rapid but separated
/// edits may apply remotely out of issuance order; last arrival wins.
pub struct PersistenceSync {
    repository: Arc<dyn AnnotationRepository>,
    pub debouncer: SaveDebouncer,
    user_id: String,
    sender: mpsc::Sender<SyncResult>,
    receiver: mpsc::Receiver<SyncResult>,
}

impl PersistenceSync {
    pub fn new(repository: Arc<dyn AnnotationRepository>, user_id: impl Into<String>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            repository,
            debouncer: SaveDebouncer::new(DEBOUNCE_WINDOW),
            user_id: user_id.into(),
            sender,
            receiver,
        }
    }

    /// Kick off the activation load for `inspection_id`. The result arrives
    /// through [`PersistenceSync::poll`]; a failure leaves in-memory state
    /// untouched.
    pub fn begin_load(&self, inspection_id: &str) {
        let repository = self.repository.clone();
        let sender = self.sender.clone();
        let inspection_id = inspection_id.to_string();
        std::thread::spawn(move || {
            let result = match repository.load(&inspection_id) {
                Ok(records) => SyncResult::Loaded {
                    inspection_id,
                    records,
                },
                Err(error) => SyncResult::LoadFailed {
                    inspection_id,
                    error,
                },
            };
            let _ = sender.send(result);
        });
    }

    /// A push only happens once the set is non-empty and the inspection has a
    /// durable identity.
    pub fn can_push(store: &AnnotationStore, inspection_id: Option<&str>) -> bool {
        !store.is_empty() && inspection_id.is_some_and(|id| !id.is_empty())
    }

    /// Serialize the full current set, stamping actor identity and
    /// create/update times the way the backend would.
    pub fn build_save_request(&self, store: &AnnotationStore, transformer_id: &str) -> SaveRequest {
        let now = unix_timestamp();
        let annotations = store
            .all()
            .iter()
            .map(|a| {
                let mut rec = PersistedAnnotation::from_anomaly(a);
                rec.user_id = Some(self.user_id.clone());
                rec.updated_at = Some(now.clone());
                if rec.created_at.is_none() {
                    rec.created_at = Some(now.clone());
                }
                rec
            })
            .collect();
        SaveRequest {
            annotations,
            user_id: self.user_id.clone(),
            transformer_id: transformer_id.to_string(),
        }
    }

    /// Fire the pending push if its window elapsed. Call once per frame.
    pub fn maybe_push(
        &mut self,
        store: &AnnotationStore,
        inspection_id: Option<&str>,
        transformer_id: &str,
        now: Instant,
    ) {
        let Some(token) = self.debouncer.take_due(now) else {
            return;
        };
        if !Self::can_push(store, inspection_id) {
            return;
        }
        let request = self.build_save_request(store, transformer_id);
        let inspection_id = inspection_id.unwrap_or_default().to_string();
        let repository = self.repository.clone();
        let sender = self.sender.clone();
        std::thread::spawn(move || {
            let result = match repository.save(&inspection_id, &request) {
                Ok(()) => SyncResult::Saved { token },
                Err(error) => SyncResult::SaveFailed { token, error },
            };
            let _ = sender.send(result);
        });
    }

    /// Drain finished background operations.
    pub fn poll(&mut self) -> Vec<SyncResult> {
        let mut results = Vec::new();
        while let Ok(result) = self.receiver.try_recv() {
            results.push(result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::test_support::ai_record;
    use egui::{Rect, pos2, vec2};
    use std::sync::Mutex;

    fn wait_for<T>(sync: &mut PersistenceSync, mut pick: impl FnMut(SyncResult) -> Option<T>) -> T {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            for result in sync.poll() {
                if let Some(v) = pick(result) {
                    return v;
                }
            }
            assert!(Instant::now() < deadline, "background result never arrived");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Repository that records every save it receives.
    #[derive(Default)]
    struct RecordingRepository {
        saves: Mutex<Vec<(String, SaveRequest)>>,
    }

    impl AnnotationRepository for RecordingRepository {
        fn load(&self, _inspection_id: &str) -> Result<Vec<PersistedAnnotation>, String> {
            Ok(Vec::new())
        }
        fn save(&self, inspection_id: &str, request: &SaveRequest) -> Result<(), String> {
            self.saves
                .lock()
                .map_err(|e| e.to_string())?
                .push((inspection_id.to_string(), request.clone()));
            Ok(())
        }
    }

    #[test]
    fn debouncer_coalesces_rapid_mutations() {
        let mut deb = SaveDebouncer::new(Duration::from_millis(100));
        let t0 = Instant::now();
        let first = deb.schedule_at(t0);
        // A second mutation 50 ms later invalidates the first token.
        let second = deb.schedule_at(t0 + Duration::from_millis(50));
        assert_ne!(first, second);

        // The original deadline passes without firing.
        assert_eq!(deb.take_due(t0 + Duration::from_millis(120)), None);
        // Only the newest token fires, at its own deadline.
        assert_eq!(deb.take_due(t0 + Duration::from_millis(150)), Some(second));
        // And only once.
        assert_eq!(deb.take_due(t0 + Duration::from_millis(500)), None);
        assert!(!deb.pending());
    }

    #[test]
    fn debouncer_cancel_drops_the_pending_push() {
        let mut deb = SaveDebouncer::new(Duration::from_millis(100));
        let t0 = Instant::now();
        deb.schedule_at(t0);
        deb.cancel();
        assert_eq!(deb.take_due(t0 + Duration::from_secs(1)), None);
    }

    #[test]
    fn push_skipped_for_empty_set_or_missing_identity() {
        let store = AnnotationStore::new();
        assert!(!PersistenceSync::can_push(&store, Some("insp-1")));

        let mut store = AnnotationStore::new();
        store.add_user_box(Rect::from_min_size(pos2(0.0, 0.0), vec2(20.0, 20.0)));
        assert!(!PersistenceSync::can_push(&store, None));
        assert!(!PersistenceSync::can_push(&store, Some("")));
        assert!(PersistenceSync::can_push(&store, Some("insp-1")));
    }

    #[test]
    fn elapsed_window_pushes_the_full_stamped_set() {
        let repo = Arc::new(RecordingRepository::default());
        let mut sync = PersistenceSync::new(repo.clone(), "Admin");
        let mut store = AnnotationStore::new();
        store.replace_all(vec![ai_record(1.0, 2.0, 30.0, 40.0, 0.85)]);
        store.add_user_box(Rect::from_min_size(pos2(5.0, 6.0), vec2(20.0, 20.0)));

        let t0 = Instant::now();
        sync.debouncer.schedule_at(t0);
        sync.maybe_push(&store, Some("insp-7"), "tx-3", t0 + Duration::from_secs(2));
        let token = wait_for(&mut sync, |r| match r {
            SyncResult::Saved { token } => Some(token),
            _ => None,
        });
        assert!(token > 0);

        let saves = repo.saves.lock().unwrap();
        assert_eq!(saves.len(), 1);
        let (id, request) = &saves[0];
        assert_eq!(id, "insp-7");
        assert_eq!(request.transformer_id, "tx-3");
        assert_eq!(request.user_id, "Admin");
        assert_eq!(request.annotations.len(), 2);
        for rec in &request.annotations {
            assert_eq!(rec.user_id.as_deref(), Some("Admin"));
            assert!(rec.created_at.is_some() && rec.updated_at.is_some());
        }
        assert_eq!(request.annotations[0].source, "ai");
        assert_eq!(request.annotations[1].source, "user");
    }

    #[test]
    fn unelapsed_window_does_not_push() {
        let repo = Arc::new(RecordingRepository::default());
        let mut sync = PersistenceSync::new(repo.clone(), "Admin");
        let mut store = AnnotationStore::new();
        store.add_user_box(Rect::from_min_size(pos2(0.0, 0.0), vec2(20.0, 20.0)));

        let t0 = Instant::now();
        sync.debouncer.schedule_at(t0);
        sync.maybe_push(&store, Some("insp-7"), "tx-3", t0 + Duration::from_millis(500));
        std::thread::sleep(Duration::from_millis(20));
        assert!(sync.poll().is_empty());
        assert!(repo.saves.lock().unwrap().is_empty());
        assert!(sync.debouncer.pending(), "token stays armed until its deadline");
    }

    #[test]
    fn wire_conversion_round_trips() {
        let mut original = ai_record(10.0, 20.0, 30.0, 40.0, 0.5);
        original.comment = "hot joint".to_string();
        original.deleted = true;
        let wire = PersistedAnnotation::from_anomaly(&original);
        assert_eq!(wire.source, "ai");
        assert_eq!(wire.deleted, 1);
        assert_eq!(wire.severity.as_deref(), Some("Faulty"));
        let back = wire.into_anomaly();
        assert_eq!(back, original);
    }

    #[test]
    fn json_repository_round_trips_per_inspection() {
        let base = std::env::temp_dir().join(format!("thermomark-test-{}", Uuid::new_v4()));
        let repo = JsonFileRepository::new(base.clone());

        // Nothing stored yet: empty set, not an error.
        assert_eq!(repo.load("insp-1").unwrap(), Vec::new());

        let request = SaveRequest {
            annotations: vec![PersistedAnnotation::from_anomaly(&ai_record(
                1.0, 2.0, 30.0, 40.0, 0.9,
            ))],
            user_id: "Admin".to_string(),
            transformer_id: "tx-1".to_string(),
        };
        repo.save("insp-1", &request).unwrap();
        assert_eq!(repo.load("insp-1").unwrap(), request.annotations);
        // Other inspections are unaffected.
        assert_eq!(repo.load("insp-2").unwrap(), Vec::new());

        // Saving again replaces the whole set.
        let empty = SaveRequest {
            annotations: Vec::new(),
            user_id: "Admin".to_string(),
            transformer_id: "tx-1".to_string(),
        };
        repo.save("insp-1", &empty).unwrap();
        assert_eq!(repo.load("insp-1").unwrap(), Vec::new());

        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn load_failure_is_reported_not_fatal() {
        struct FailingRepository;
        impl AnnotationRepository for FailingRepository {
            fn load(&self, _id: &str) -> Result<Vec<PersistedAnnotation>, String> {
                Err("connection refused".to_string())
            }
            fn save(&self, _id: &str, _r: &SaveRequest) -> Result<(), String> {
                Err("connection refused".to_string())
            }
        }
        let mut sync = PersistenceSync::new(Arc::new(FailingRepository), "Admin");
        sync.begin_load("insp-1");
        let error = wait_for(&mut sync, |r| match r {
            SyncResult::LoadFailed { error, .. } => Some(error),
            _ => None,
        });
        assert!(error.contains("connection refused"));
    }
}
