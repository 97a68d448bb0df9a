//! The attendance service: frames in, confirmed recognitions and sessions out.
//!
//! `process_frame` runs the pipeline end to end: the engine thread detects
//! faces and extracts embeddings, each face is scored and resolved against a
//! gallery snapshot, the stream's debouncer decides what is confirmed, and
//! confirmations are recorded as appearances in the day's sessions.

use crate::attendance::{SessionBook, SessionManager, SessionPolicy};
use crate::config::Config;
use crate::engine::{spawn_engine, EngineError, EngineHandle};
use crate::error::ServiceError;
use crate::gallery::{GallerySnapshot, GalleryStore};
use chrono::{DateTime, Local, NaiveDate};
use image::GrayImage;
use rollcall_core::backend::load_backend;
use rollcall_core::{
    score_candidates, AttendanceSession, DebouncePolicy, DebounceRegistry, FacePatch, Identity, MatchPolicy,
    Matched, Matcher, PatchTemplates, RecognitionEvent, TemplateSource, TieredMatcher,
};
use rollcall_store::{GalleryStorage, JsonStore, SessionStorage};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A confirmed recognition and the session it produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recognition {
    pub event: RecognitionEvent,
    pub session: AttendanceSession,
    pub opened: bool,
}

/// Outcome of [`AttendanceService::reencode_all`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReencodeReport {
    pub updated: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub matching: MatchPolicy,
    pub debounce: DebouncePolicy,
    pub sessions: SessionPolicy,
    pub max_faces: usize,
    /// Base for relative reference image paths.
    pub data_dir: PathBuf,
}

impl ServiceOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            matching: config.matching.clone(),
            debounce: config.debounce.clone(),
            sessions: SessionPolicy {
                face_timeout: config.face_timeout(),
                auto_close_after: config.auto_close_after(),
            },
            max_faces: config.max_faces,
            data_dir: config.data_dir.clone(),
        }
    }
}

pub struct AttendanceService {
    engine: EngineHandle,
    matcher: TieredMatcher,
    debounce_policy: DebouncePolicy,
    max_faces: usize,
    data_dir: PathBuf,
    gallery: GalleryStore,
    gallery_storage: Arc<dyn GalleryStorage>,
    gallery_gate: tokio::sync::Mutex<()>,
    sessions: Arc<SessionManager>,
    debouncers: Mutex<DebounceRegistry>,
}

impl AttendanceService {
    /// Load the backend and both documents from the configured data directory.
    pub async fn open(config: &Config) -> Result<Self, ServiceError> {
        let kind = config.backend;
        let models = config.model_paths();
        let backend = tokio::task::spawn_blocking(move || load_backend(kind, &models))
            .await?
            .map_err(EngineError::from)?;
        let engine = spawn_engine(backend)?;

        let store = Arc::new(JsonStore::new(&config.data_dir).with_migration(config.migration_policy()));
        Self::start(engine, store.clone(), store, ServiceOptions::from_config(config)).await
    }

    /// Build a service over an existing engine and storage, loading both.
    pub async fn start(
        engine: EngineHandle,
        gallery_storage: Arc<dyn GalleryStorage>,
        session_storage: Arc<dyn SessionStorage>,
        options: ServiceOptions,
    ) -> Result<Self, ServiceError> {
        let loader = Arc::clone(&session_storage);
        let records = tokio::task::spawn_blocking(move || loader.load_sessions()).await??;
        let book = SessionBook::from_sessions(options.sessions, records);
        tracing::info!(sessions = book.len(), "sessions loaded");

        let service = Self {
            engine,
            matcher: TieredMatcher::new(options.matching),
            debounce_policy: options.debounce,
            max_faces: options.max_faces.max(1),
            data_dir: options.data_dir,
            gallery: GalleryStore::default(),
            gallery_storage,
            gallery_gate: tokio::sync::Mutex::new(()),
            sessions: Arc::new(SessionManager::new(book, session_storage)),
            debouncers: Mutex::new(DebounceRegistry::new()),
        };
        service.reload_gallery().await?;
        Ok(service)
    }

    pub fn session_manager(&self) -> Arc<SessionManager> {
        Arc::clone(&self.sessions)
    }

    pub async fn process_frame(&self, stream: &str, frame: GrayImage) -> Result<Vec<Recognition>, ServiceError> {
        self.process_frame_at(stream, frame, Local::now()).await
    }

    /// Process one frame of `stream` as if captured at `now`.
    ///
    /// A frame without a recognisable face yields an empty list and resets
    /// the stream's consecutive-frame counters.
    pub async fn process_frame_at(
        &self,
        stream: &str,
        frame: GrayImage,
        now: DateTime<Local>,
    ) -> Result<Vec<Recognition>, ServiceError> {
        let observations = self.engine.analyze(frame, self.max_faces).await?;
        let snapshot = self.gallery.snapshot();

        let mut matches: Vec<Matched> = Vec::with_capacity(observations.len());
        for observation in &observations {
            let mut scores = score_candidates(&observation.embedding, &snapshot.identities);
            let templates = observation.patch.as_ref().map(|probe| PatchTemplates {
                probe,
                references: &snapshot.patches,
            });
            let decision = self
                .matcher
                .resolve(&mut scores, templates.as_ref().map(|t| t as &dyn TemplateSource));
            if let Some(m) = decision.matched() {
                tracing::debug!(
                    stream,
                    identity = %m.identity_id,
                    reason = %m.reason,
                    confidence = m.confidence,
                    "face matched"
                );
                matches.push(m.clone());
            }
        }

        let confirmations = {
            let mut registry = self.debouncers.lock().unwrap_or_else(|e| e.into_inner());
            registry.stream(stream).observe(
                &matches,
                &self.debounce_policy,
                self.matcher.policy.cosine_distance_guard,
            )
        };

        let mut recognitions = Vec::with_capacity(confirmations.len());
        for confirmation in confirmations {
            let display_name = snapshot
                .get(&confirmation.identity_id)
                .map(|i| i.display_name.clone())
                .unwrap_or_else(|| confirmation.identity_id.clone());
            let update = self
                .sessions
                .record_appearance(&confirmation.identity_id, &display_name, now);

            tracing::info!(
                stream,
                identity = %confirmation.identity_id,
                tier = ?confirmation.tier,
                frames = confirmation.consecutive,
                hours = update.session.duration_hours,
                "recognition confirmed"
            );
            recognitions.push(Recognition {
                event: RecognitionEvent {
                    identity_id: confirmation.identity_id,
                    display_name,
                    confirmed_at: now,
                    tier: confirmation.tier,
                },
                session: update.session,
                opened: update.opened,
            });
        }

        if !recognitions.is_empty() {
            self.sessions.persist().await?;
        }
        Ok(recognitions)
    }

    /// Enroll (or fully re-enroll) an identity from one image.
    pub async fn enroll(&self, identity_id: &str, display_name: &str, image: GrayImage) -> Result<Identity, ServiceError> {
        let observation = self
            .engine
            .analyze(image.clone(), 1)
            .await?
            .into_iter()
            .next()
            .ok_or(ServiceError::NoFaceDetected)?;

        let reference = self.data_dir.join(reference_file(identity_id));
        let identity = Identity {
            id: identity_id.to_string(),
            display_name: display_name.to_string(),
            embeddings: vec![observation.embedding],
            reference_image_path: Some(reference.clone()),
            enrolled_at: Some(Local::now()),
        };

        // The reference image, the snapshot and the stored gallery change together.
        let _gate = self.gallery_gate.lock().await;
        save_image(reference, image).await?;
        let next = self.gallery.snapshot().with_identity(identity.clone(), observation.patch);
        self.gallery.replace(next);
        tracing::info!(identity = identity_id, name = display_name, "identity enrolled");
        self.persist_gallery().await?;
        Ok(identity)
    }

    /// Reload identities from storage and rebuild the reference patches.
    ///
    /// Reference images go through the engine before the gallery gate is
    /// taken. Identities enrolled in the meantime are picked up under the gate.
    pub async fn reload_gallery(&self) -> Result<usize, ServiceError> {
        let analyzed = self.load_identities().await?;
        let mut patches = self.reference_patches(&analyzed).await?;

        let _gate = self.gallery_gate.lock().await;
        let identities = self.load_identities().await?;
        if identities != analyzed {
            let changed: Vec<Identity> = identities.iter().filter(|i| !analyzed.contains(i)).cloned().collect();
            patches.retain(|id, _| identities.iter().any(|i| &i.id == id && analyzed.contains(i)));
            patches.extend(self.reference_patches(&changed).await?);
        }

        let count = identities.len();
        tracing::info!(identities = count, templates = patches.len(), "gallery loaded");
        self.gallery.replace(GallerySnapshot::new(identities, patches));
        Ok(count)
    }

    /// Re-extract every identity's embedding from its reference image.
    /// Identities without a readable reference face keep their embedding, as
    /// do identities re-enrolled while the re-encode was running.
    pub async fn reencode_all(&self) -> Result<ReencodeReport, ServiceError> {
        let base = self.gallery.snapshot();
        let mut fresh = HashMap::new();
        for identity in &base.identities {
            fresh.insert(identity.id.clone(), self.analyze_reference(identity).await?);
        }

        let _gate = self.gallery_gate.lock().await;
        let current = self.gallery.snapshot();
        let mut next = GallerySnapshot::default();
        let mut report = ReencodeReport::default();

        for identity in &current.identities {
            let unchanged = base.get(&identity.id) == Some(identity);
            let mut identity = identity.clone();
            match fresh.remove(&identity.id).filter(|_| unchanged) {
                Some(Some((embedding, patch))) => {
                    identity.embeddings = vec![embedding];
                    if let Some(patch) = patch {
                        next.patches.insert(identity.id.clone(), patch);
                    }
                    report.updated.push(identity.id.clone());
                }
                analyzed => {
                    if let Some(patch) = current.patches.get(&identity.id) {
                        next.patches.insert(identity.id.clone(), patch.clone());
                    }
                    if analyzed.is_some() {
                        report.skipped.push(identity.id.clone());
                    }
                }
            }
            next.identities.push(identity);
        }

        tracing::info!(updated = report.updated.len(), skipped = report.skipped.len(), "gallery re-encoded");
        self.gallery.replace(next);
        self.persist_gallery().await?;
        Ok(report)
    }

    pub fn identities(&self) -> Vec<Identity> {
        self.gallery.snapshot().identities.clone()
    }

    pub fn sessions_for_identity(&self, identity_id: &str) -> Vec<AttendanceSession> {
        self.sessions.sessions_for_identity(identity_id)
    }

    pub fn sessions_for_date(&self, date: NaiveDate) -> Vec<AttendanceSession> {
        self.sessions.sessions_for_date(date)
    }

    pub fn present(&self) -> Vec<String> {
        self.sessions.present()
    }

    /// Called with the gallery gate held.
    async fn persist_gallery(&self) -> Result<(), ServiceError> {
        let identities = self.gallery.snapshot();
        let storage = Arc::clone(&self.gallery_storage);
        tokio::task::spawn_blocking(move || storage.save_gallery(&identities.identities)).await??;
        Ok(())
    }

    async fn load_identities(&self) -> Result<Vec<Identity>, ServiceError> {
        let storage = Arc::clone(&self.gallery_storage);
        Ok(tokio::task::spawn_blocking(move || storage.load_gallery()).await??)
    }

    async fn reference_patches(&self, identities: &[Identity]) -> Result<HashMap<String, FacePatch>, ServiceError> {
        let mut patches = HashMap::new();
        for identity in identities {
            if let Some(patch) = self.analyze_reference(identity).await?.and_then(|(_, patch)| patch) {
                patches.insert(identity.id.clone(), patch);
            }
        }
        Ok(patches)
    }

    /// Embedding and patch of the most confident face in `identity`'s
    /// reference image. `None` when there is no image, it cannot be read, or
    /// it holds no face; engine failures are errors.
    async fn analyze_reference(
        &self,
        identity: &Identity,
    ) -> Result<Option<(rollcall_core::Embedding, Option<FacePatch>)>, ServiceError> {
        let Some(path) = identity.reference_image_path.as_ref() else {
            return Ok(None);
        };
        let path = if path.is_relative() { self.data_dir.join(path) } else { path.clone() };

        let frame = match load_gray(path.clone()).await {
            Ok(frame) => frame,
            Err(ServiceError::Image { path, source }) => {
                tracing::warn!(identity = %identity.id, path = %path.display(), error = %source, "reference image unreadable");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let observation = self.engine.analyze(frame, 1).await?.into_iter().next();
        if observation.is_none() {
            tracing::warn!(identity = %identity.id, path = %path.display(), "no face in reference image");
        }
        Ok(observation.map(|o| (o.embedding, o.patch)))
    }
}

/// Relative location of an identity's reference image under the data directory.
fn reference_file(identity_id: &str) -> PathBuf {
    let safe: String = identity_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    Path::new(rollcall_store::REFERENCES_DIR).join(format!("{safe}.png"))
}

/// Decode an image file to grayscale off the async runtime.
pub async fn load_gray(path: PathBuf) -> Result<GrayImage, ServiceError> {
    tokio::task::spawn_blocking(move || match image::open(&path) {
        Ok(img) => Ok(img.to_luma8()),
        Err(source) => Err(ServiceError::Image { path, source }),
    })
    .await?
}

async fn save_image(path: PathBuf, image: GrayImage) -> Result<(), ServiceError> {
    tokio::task::spawn_blocking(move || {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| ServiceError::Image {
                path: path.clone(),
                source: image::ImageError::IoError(e),
            })?;
        }
        image
            .save_with_format(&path, image::ImageFormat::Png)
            .map_err(|source| ServiceError::Image { path, source })
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::testing::{frame, Scripted};
    use rollcall_core::ConfidenceTier;
    use rollcall_store::StoreError;

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 11, h, m, 0).unwrap()
    }

    fn options(data_dir: &Path) -> ServiceOptions {
        ServiceOptions {
            matching: MatchPolicy::default(),
            debounce: DebouncePolicy::default(),
            sessions: SessionPolicy::default(),
            max_faces: 4,
            data_dir: data_dir.to_path_buf(),
        }
    }

    async fn service(data_dir: &Path, options: ServiceOptions) -> AttendanceService {
        let engine = spawn_engine(Box::new(Scripted)).unwrap();
        let store = Arc::new(JsonStore::new(data_dir));
        AttendanceService::start(engine, store.clone(), store, options).await.unwrap()
    }

    #[tokio::test]
    async fn test_enroll_then_confirm_then_extend() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), options(dir.path())).await;

        let identity = svc.enroll("s1", "Ada", frame(10)).await.unwrap();
        assert_eq!(identity.embeddings[0].values, vec![1.0, 0.0, 0.0]);
        assert!(dir.path().join("references/s1.png").exists());

        // three consecutive frames of E plus a little noise
        assert!(svc.process_frame_at("cam", frame(11), at(9, 0)).await.unwrap().is_empty());
        assert!(svc.process_frame_at("cam", frame(11), at(9, 0)).await.unwrap().is_empty());
        let third = svc.process_frame_at("cam", frame(11), at(9, 0)).await.unwrap();
        assert_eq!(third.len(), 1);
        assert!(third[0].opened);
        assert_eq!(third[0].event.tier, ConfidenceTier::Debounced);
        assert_eq!(third[0].event.display_name, "Ada");
        assert_eq!(third[0].session.duration_hours, 0.0);

        let later = svc.process_frame_at("cam", frame(11), at(9, 30)).await.unwrap();
        assert_eq!(later.len(), 1);
        assert!(!later[0].opened);
        assert_eq!(later[0].session.duration_hours, 0.5);

        let history = svc.sessions_for_identity("s1");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].last_seen, at(9, 30));
        assert_eq!(svc.sessions_for_date(at(0, 0).date_naive()).len(), 1);
        assert_eq!(svc.present(), vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn test_no_face_frame_resets_counters() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), options(dir.path())).await;
        svc.enroll("s1", "Ada", frame(10)).await.unwrap();

        svc.process_frame_at("cam", frame(11), at(9, 0)).await.unwrap();
        svc.process_frame_at("cam", frame(11), at(9, 0)).await.unwrap();
        assert!(svc.process_frame_at("cam", frame(0), at(9, 0)).await.unwrap().is_empty());
        assert!(svc.process_frame_at("cam", frame(11), at(9, 1)).await.unwrap().is_empty());
        assert!(svc.sessions_for_identity("s1").is_empty());
    }

    #[tokio::test]
    async fn test_streams_do_not_share_counters() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), options(dir.path())).await;
        svc.enroll("s1", "Ada", frame(10)).await.unwrap();

        svc.process_frame_at("door", frame(11), at(9, 0)).await.unwrap();
        svc.process_frame_at("hall", frame(11), at(9, 0)).await.unwrap();
        svc.process_frame_at("door", frame(11), at(9, 0)).await.unwrap();
        assert!(svc.process_frame_at("hall", frame(11), at(9, 0)).await.unwrap().is_empty());
        assert_eq!(svc.process_frame_at("door", frame(11), at(9, 0)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_immediate_bypass() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path());
        opts.debounce.immediate_distance = Some(0.35);
        let svc = service(dir.path(), opts).await;
        svc.enroll("s1", "Ada", frame(10)).await.unwrap();

        let first = svc.process_frame_at("cam", frame(11), at(9, 0)).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].event.tier, ConfidenceTier::Immediate);
    }

    #[tokio::test]
    async fn test_enroll_without_face() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), options(dir.path())).await;
        assert!(matches!(
            svc.enroll("s1", "Ada", frame(0)).await,
            Err(ServiceError::NoFaceDetected)
        ));
        assert!(svc.identities().is_empty());
    }

    #[tokio::test]
    async fn test_reenroll_replaces_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), options(dir.path())).await;
        svc.enroll("s1", "Ada", frame(10)).await.unwrap();
        svc.enroll("s1", "Ada Lovelace", frame(20)).await.unwrap();

        let identities = svc.identities();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].display_name, "Ada Lovelace");

        let stored = JsonStore::new(dir.path()).load_gallery().unwrap();
        assert_eq!(stored, identities);
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path());
        opts.debounce.min_consecutive_frames = 1;
        {
            let svc = service(dir.path(), opts.clone()).await;
            svc.enroll("s1", "Ada", frame(10)).await.unwrap();
            svc.process_frame_at("cam", frame(11), at(9, 0)).await.unwrap();
        }

        let svc = service(dir.path(), opts).await;
        assert_eq!(svc.identities().len(), 1);
        assert_eq!(svc.sessions_for_identity("s1").len(), 1);
        let next = svc.process_frame_at("cam", frame(11), at(9, 15)).await.unwrap();
        assert!(!next[0].opened);
        assert_eq!(next[0].session.duration_hours, 0.25);
    }

    #[tokio::test]
    async fn test_reencode_uses_reference_images() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), options(dir.path())).await;
        svc.enroll("s1", "Ada", frame(10)).await.unwrap();

        // Overwrite the reference with a different face, then re-encode.
        frame(20).save(dir.path().join("references/s1.png")).unwrap();
        let report = svc.reencode_all().await.unwrap();
        assert_eq!(report.updated, vec!["s1".to_string()]);
        assert_eq!(svc.identities()[0].embeddings[0].values, vec![0.0, 1.0, 0.0]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_streams_share_one_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path());
        opts.debounce.min_consecutive_frames = 1;
        let svc = Arc::new(service(dir.path(), opts).await);
        svc.enroll("s1", "Ada", frame(10)).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..12u32 {
            let svc = Arc::clone(&svc);
            tasks.spawn(async move {
                let stream = format!("cam-{}", i % 3);
                svc.process_frame_at(&stream, frame(11), at(9, i)).await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            assert_eq!(joined.unwrap().unwrap().len(), 1);
        }

        let history = svc.sessions_for_identity("s1");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].first_seen, at(9, 0));
        assert_eq!(history[0].last_seen, at(9, 11));
        assert_eq!(JsonStore::new(dir.path()).load_sessions().unwrap(), history);
    }

    #[tokio::test]
    async fn test_racing_enrollments_keep_image_and_embedding_together() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), options(dir.path())).await;

        let (a, b) = tokio::join!(svc.enroll("s1", "Ada", frame(10)), svc.enroll("s1", "Ada", frame(20)));
        a.unwrap();
        b.unwrap();

        let stored = image::open(dir.path().join("references/s1.png")).unwrap().to_luma8();
        let expected = match stored.get_pixel(0, 0).0[0] {
            10 => vec![1.0, 0.0, 0.0],
            20 => vec![0.0, 1.0, 0.0],
            other => panic!("unexpected reference pixel {other}"),
        };
        assert_eq!(svc.identities()[0].embeddings[0].values, expected);
        assert_eq!(JsonStore::new(dir.path()).load_gallery().unwrap(), svc.identities());
    }

    #[tokio::test]
    async fn test_enrollment_during_reencode_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), options(dir.path())).await;
        svc.enroll("s1", "Ada", frame(10)).await.unwrap();
        frame(20).save(dir.path().join("references/s1.png")).unwrap();

        let (report, enrolled) = tokio::join!(svc.reencode_all(), svc.enroll("s2", "Bo", frame(30)));
        assert_eq!(report.unwrap().updated, vec!["s1".to_string()]);
        enrolled.unwrap();

        let identities = svc.identities();
        let ids: Vec<_> = identities.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2"]);
        assert_eq!(identities[0].embeddings[0].values, vec![0.0, 1.0, 0.0]);
        assert_eq!(JsonStore::new(dir.path()).load_gallery().unwrap(), identities);
    }

    #[tokio::test]
    async fn test_reload_picks_up_stored_gallery() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), options(dir.path())).await;
        svc.enroll("s1", "Ada", frame(10)).await.unwrap();

        let other = service(dir.path(), options(dir.path())).await;
        other.enroll("s2", "Bo", frame(20)).await.unwrap();

        assert_eq!(svc.reload_gallery().await.unwrap(), 2);
        assert_eq!(svc.identities(), other.identities());
    }

    #[test]
    fn test_reference_file_is_sanitized() {
        assert_eq!(reference_file("../s 1"), PathBuf::from("references/___s_1.png"));
    }

    struct Unwritable;

    impl SessionStorage for Unwritable {
        fn load_sessions(&self) -> Result<Vec<AttendanceSession>, StoreError> {
            Ok(Vec::new())
        }

        fn save_sessions(&self, _sessions: &[AttendanceSession]) -> Result<(), StoreError> {
            Err(StoreError::Io {
                path: "attendance.json".into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path());
        opts.debounce.min_consecutive_frames = 1;
        let engine = spawn_engine(Box::new(Scripted)).unwrap();
        let svc = AttendanceService::start(engine, Arc::new(JsonStore::new(dir.path())), Arc::new(Unwritable), opts)
            .await
            .unwrap();
        svc.enroll("s1", "Ada", frame(10)).await.unwrap();

        let result = svc.process_frame_at("cam", frame(11), at(9, 0)).await;
        assert!(matches!(result, Err(ServiceError::Persistence(_))));
        assert_eq!(svc.sessions_for_identity("s1").len(), 1);
    }
}
