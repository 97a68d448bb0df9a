//! Attendance sessions: one record per identity per calendar day.
//!
//! A session opens at the first confirmed appearance of the day and every
//! later appearance moves `last_seen` forward, capped at `auto_close_after`
//! past the first one. Separately, a live-presence map tracks who has been
//! seen within the face timeout; the sweeper prunes it.

use crate::error::ServiceError;
use chrono::{DateTime, Duration, Local, NaiveDate};
use rollcall_core::AttendanceSession;
use rollcall_store::SessionStorage;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionPolicy {
    pub face_timeout: Duration,
    pub auto_close_after: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            face_timeout: Duration::minutes(5),
            auto_close_after: Duration::hours(8),
        }
    }
}

/// The session after an appearance was recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionUpdate {
    pub session: AttendanceSession,
    /// True when this appearance created the day's session.
    pub opened: bool,
}

/// Session records and live presence. Not synchronized; see [`SessionManager`].
#[derive(Debug, Default)]
pub struct SessionBook {
    policy: SessionPolicy,
    sessions: HashMap<(String, NaiveDate), AttendanceSession>,
    presence: HashMap<String, DateTime<Local>>,
}

impl SessionBook {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Rebuild from persisted records. A duplicate `(identity, date)` is
    /// folded into the first, keeping the widest span.
    pub fn from_sessions(policy: SessionPolicy, records: Vec<AttendanceSession>) -> Self {
        let mut book = Self::new(policy);
        for record in records {
            let key = (record.identity_id.clone(), record.date);
            match book.sessions.get_mut(&key) {
                Some(existing) => {
                    tracing::warn!(identity = %record.identity_id, date = %record.date, "duplicate session record merged");
                    existing.first_seen = existing.first_seen.min(record.first_seen);
                    existing.extend_to(record.last_seen);
                }
                None => {
                    book.sessions.insert(key, record);
                }
            }
        }
        book
    }

    pub fn record_appearance(&mut self, identity_id: &str, display_name: &str, now: DateTime<Local>) -> SessionUpdate {
        let seen = self.presence.entry(identity_id.to_string()).or_insert(now);
        *seen = (*seen).max(now);

        let key = (identity_id.to_string(), now.date_naive());
        if let Some(session) = self.sessions.get_mut(&key) {
            let cap = session.first_seen + self.policy.auto_close_after;
            session.extend_to(now.min(cap));
            return SessionUpdate {
                session: session.clone(),
                opened: false,
            };
        }

        let session = AttendanceSession::open(identity_id, display_name, now);
        tracing::info!(identity = identity_id, name = display_name, date = %session.date, "session opened");
        self.sessions.insert(key, session.clone());
        SessionUpdate { session, opened: true }
    }

    /// Drop `identity_id` from the live-presence set. Session records are
    /// left as they are; returns whether the identity was present.
    pub fn force_close(&mut self, identity_id: &str, at: DateTime<Local>) -> bool {
        let was_present = self.presence.remove(identity_id).is_some();
        if was_present {
            tracing::debug!(identity = identity_id, at = %at, "presence closed");
        }
        was_present
    }

    /// Drop every identity not seen within the face timeout. Returns the
    /// dropped ids, sorted.
    pub fn sweep(&mut self, now: DateTime<Local>) -> Vec<String> {
        let timeout = self.policy.face_timeout;
        let mut expired: Vec<String> = self
            .presence
            .iter()
            .filter(|(_, &seen)| now - seen > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        expired.sort();
        for id in &expired {
            self.force_close(id, now);
        }
        expired
    }

    /// Every session of `identity_id`, oldest date first.
    pub fn sessions_for_identity(&self, identity_id: &str) -> Vec<AttendanceSession> {
        let mut found: Vec<_> = self
            .sessions
            .values()
            .filter(|s| s.identity_id == identity_id)
            .cloned()
            .collect();
        found.sort_by_key(|s| s.date);
        found
    }

    /// Every session on `date`, earliest arrival first.
    pub fn sessions_for_date(&self, date: NaiveDate) -> Vec<AttendanceSession> {
        let mut found: Vec<_> = self.sessions.values().filter(|s| s.date == date).cloned().collect();
        found.sort_by(|a, b| a.first_seen.cmp(&b.first_seen).then_with(|| a.identity_id.cmp(&b.identity_id)));
        found
    }

    /// Identities currently present, sorted.
    pub fn present(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.presence.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// All sessions in a stable order, for persistence.
    pub fn snapshot(&self) -> Vec<AttendanceSession> {
        let mut all: Vec<_> = self.sessions.values().cloned().collect();
        all.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then_with(|| a.first_seen.cmp(&b.first_seen))
                .then_with(|| a.identity_id.cmp(&b.identity_id))
        });
        all
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Thread-safe owner of the [`SessionBook`] and its storage.
///
/// The book lock is held only for in-memory read-modify-write. Persisting
/// takes the snapshot under the lock and writes it outside, behind a gate
/// that orders writers so the newest snapshot is always written last.
pub struct SessionManager {
    book: Mutex<SessionBook>,
    storage: Arc<dyn SessionStorage>,
    persist_gate: tokio::sync::Mutex<()>,
}

impl SessionManager {
    pub fn new(book: SessionBook, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            book: Mutex::new(book),
            storage,
            persist_gate: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionBook> {
        self.book.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_appearance(&self, identity_id: &str, display_name: &str, now: DateTime<Local>) -> SessionUpdate {
        self.lock().record_appearance(identity_id, display_name, now)
    }

    pub fn force_close(&self, identity_id: &str, at: DateTime<Local>) -> bool {
        self.lock().force_close(identity_id, at)
    }

    pub fn sweep(&self, now: DateTime<Local>) -> Vec<String> {
        self.lock().sweep(now)
    }

    pub fn sessions_for_identity(&self, identity_id: &str) -> Vec<AttendanceSession> {
        self.lock().sessions_for_identity(identity_id)
    }

    pub fn sessions_for_date(&self, date: NaiveDate) -> Vec<AttendanceSession> {
        self.lock().sessions_for_date(date)
    }

    pub fn present(&self) -> Vec<String> {
        self.lock().present()
    }

    /// Write the current sessions to storage.
    pub async fn persist(&self) -> Result<(), ServiceError> {
        let _gate = self.persist_gate.lock().await;
        let snapshot = self.lock().snapshot();
        let storage = Arc::clone(&self.storage);
        tokio::task::spawn_blocking(move || storage.save_sessions(&snapshot)).await??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rollcall_store::{JsonStore, StoreError};

    fn at(d: u32, h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, d, h, m, 0).unwrap()
    }

    fn book() -> SessionBook {
        SessionBook::new(SessionPolicy::default())
    }

    #[test]
    fn test_first_appearance_opens() {
        let mut book = book();
        let update = book.record_appearance("s1", "Ada", at(11, 9, 0));
        assert!(update.opened);
        assert_eq!(update.session.first_seen, at(11, 9, 0));
        assert_eq!(update.session.last_seen, at(11, 9, 0));
        assert_eq!(update.session.duration_hours, 0.0);
        assert_eq!(book.present(), vec!["s1".to_string()]);
    }

    #[test]
    fn test_repeated_appearance_is_idempotent() {
        let mut book = book();
        book.record_appearance("s1", "Ada", at(11, 9, 0));
        let a = book.record_appearance("s1", "Ada", at(11, 9, 30));
        let b = book.record_appearance("s1", "Ada", at(11, 9, 30));
        assert!(!b.opened);
        assert_eq!(a.session, b.session);
        assert_eq!(book.len(), 1);
        assert_eq!(b.session.duration_hours, 0.5);
    }

    #[test]
    fn test_last_seen_never_moves_back() {
        let mut book = book();
        book.record_appearance("s1", "Ada", at(11, 9, 0));
        book.record_appearance("s1", "Ada", at(11, 10, 0));
        let update = book.record_appearance("s1", "Ada", at(11, 9, 15));
        assert_eq!(update.session.last_seen, at(11, 10, 0));
        assert_eq!(update.session.duration_hours, 1.0);
    }

    #[test]
    fn test_span_is_capped() {
        let mut book = book();
        book.record_appearance("s1", "Ada", at(11, 8, 0));
        let update = book.record_appearance("s1", "Ada", at(11, 18, 0));
        assert_eq!(update.session.last_seen, at(11, 16, 0));
        assert_eq!(update.session.duration_hours, 8.0);
    }

    #[test]
    fn test_new_day_opens_new_session() {
        let mut book = book();
        book.record_appearance("s1", "Ada", at(11, 9, 0));
        let update = book.record_appearance("s1", "Ada", at(12, 9, 0));
        assert!(update.opened);

        let history = book.sessions_for_identity("s1");
        assert_eq!(history.len(), 2);
        assert!(history[0].date < history[1].date);
    }

    #[test]
    fn test_sessions_for_date_ordered_by_arrival() {
        let mut book = book();
        book.record_appearance("late", "Lee", at(11, 10, 0));
        book.record_appearance("early", "Eve", at(11, 8, 0));
        book.record_appearance("other-day", "Oz", at(12, 7, 0));

        let day: Vec<_> = book
            .sessions_for_date(at(11, 0, 0).date_naive())
            .into_iter()
            .map(|s| s.identity_id)
            .collect();
        assert_eq!(day, vec!["early", "late"]);
    }

    #[test]
    fn test_sweep_drops_presence_but_keeps_last_seen() {
        let mut book = book();
        book.record_appearance("s1", "Ada", at(11, 9, 0));
        book.record_appearance("s2", "Bo", at(11, 9, 8));

        let dropped = book.sweep(at(11, 9, 10));
        assert_eq!(dropped, vec!["s1".to_string()]);
        assert_eq!(book.present(), vec!["s2".to_string()]);
        assert_eq!(book.sessions_for_identity("s1")[0].last_seen, at(11, 9, 0));
    }

    #[test]
    fn test_force_close_leaves_records() {
        let mut book = book();
        book.record_appearance("s1", "Ada", at(11, 9, 0));
        assert!(book.force_close("s1", at(11, 9, 1)));
        assert!(!book.force_close("s1", at(11, 9, 2)));
        assert_eq!(book.sessions_for_identity("s1").len(), 1);
    }

    #[test]
    fn test_from_sessions_merges_duplicates() {
        let mut a = AttendanceSession::open("s1", "Ada", at(11, 9, 0));
        a.extend_to(at(11, 10, 0));
        let mut b = AttendanceSession::open("s1", "Ada", at(11, 8, 0));
        b.extend_to(at(11, 8, 30));

        let book = SessionBook::from_sessions(SessionPolicy::default(), vec![a, b]);
        let sessions = book.snapshot();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].first_seen, at(11, 8, 0));
        assert_eq!(sessions[0].last_seen, at(11, 10, 0));
        assert_eq!(sessions[0].duration_hours, 2.0);
    }

    struct Broken;

    impl SessionStorage for Broken {
        fn load_sessions(&self) -> Result<Vec<AttendanceSession>, StoreError> {
            Ok(Vec::new())
        }

        fn save_sessions(&self, _sessions: &[AttendanceSession]) -> Result<(), StoreError> {
            Err(StoreError::Io {
                path: "attendance.json".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            })
        }
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_memory_state() {
        let manager = SessionManager::new(book(), Arc::new(Broken));
        manager.record_appearance("s1", "Ada", at(11, 9, 0));

        let result = manager.persist().await;
        assert!(matches!(result, Err(ServiceError::Persistence(_))));
        assert_eq!(manager.sessions_for_identity("s1").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appearances_and_sweeps_keep_one_session() {
        let manager = Arc::new(SessionManager::new(book(), Arc::new(Broken)));
        manager.record_appearance("s1", "Ada", at(11, 9, 0));

        let mut tasks = tokio::task::JoinSet::new();
        for i in 1..=40u32 {
            let recorder = Arc::clone(&manager);
            tasks.spawn(async move {
                recorder.record_appearance("s1", "Ada", at(11, 9, 0) + Duration::minutes(i as i64));
            });
            let sweeper = Arc::clone(&manager);
            tasks.spawn(async move {
                sweeper.sweep(at(11, 9, 0) + Duration::minutes(i as i64));
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        let sessions = manager.sessions_for_identity("s1");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].first_seen, at(11, 9, 0));
        assert_eq!(sessions[0].last_seen, at(11, 9, 40));
        assert_eq!(sessions[0].duration_hours, 0.67);
    }

    #[tokio::test]
    async fn test_persist_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonStore::new(dir.path()));
        let manager = SessionManager::new(book(), store.clone());
        manager.record_appearance("s1", "Ada", at(11, 9, 0));
        manager.record_appearance("s1", "Ada", at(11, 9, 45));
        manager.persist().await.unwrap();

        let reloaded = SessionBook::from_sessions(SessionPolicy::default(), store.load_sessions().unwrap());
        assert_eq!(reloaded.sessions_for_identity("s1"), manager.sessions_for_identity("s1"));
        assert_eq!(reloaded.sessions_for_identity("s1")[0].duration_hours, 0.75);
    }
}
