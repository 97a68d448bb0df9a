//! Reading current documents and migrating the older flat formats.
//!
//! Two legacy layouts exist for attendance: a list of login/logout records
//! (one per visit, possibly several per day) and a map from date to
//! first/last timestamps. Both collapse into one session per identity per
//! day, keeping the earliest first appearance and the latest last one.

use crate::json::MigrationPolicy;
use crate::{StoreError, SCHEMA_VERSION};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use rollcall_core::types::duration_hours;
use rollcall_core::{AttendanceSession, Embedding, Identity};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

pub(crate) struct Loaded<T> {
    pub items: Vec<T>,
    /// True when the file was in a legacy layout and must be rewritten.
    pub migrated: bool,
}

#[derive(Deserialize)]
struct GalleryDocument {
    identities: Vec<Identity>,
}

#[derive(Deserialize)]
struct SessionDocument {
    sessions: Vec<AttendanceSession>,
}

/// Ids were written as strings by some tools and as numbers by others.
#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyId {
    Text(String),
    Number(i64),
}

impl LegacyId {
    fn into_string(self) -> String {
        match self {
            LegacyId::Text(s) => s,
            LegacyId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct LegacyStudent {
    student_id: LegacyId,
    name: String,
    #[serde(default)]
    encoding: Vec<f32>,
    #[serde(default)]
    photo_path: Option<PathBuf>,
}

#[derive(Deserialize)]
struct LegacyVisit {
    student_id: LegacyId,
    #[serde(default)]
    name: Option<String>,
    login_time: String,
    #[serde(default)]
    logout_time: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Deserialize)]
struct LegacyDay {
    student_id: LegacyId,
    first_timestamp: String,
    last_timestamp: String,
}

fn parse<T: DeserializeOwned>(value: Value, path: &Path) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn check_version(value: &Value, path: &Path) -> Result<bool, StoreError> {
    let Some(version) = value.get("version") else {
        return Ok(false);
    };
    match version.as_u64() {
        Some(v) if v == SCHEMA_VERSION as u64 => Ok(true),
        Some(v) => Err(StoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: v.min(u32::MAX as u64) as u32,
        }),
        None => Err(StoreError::UnsupportedVersion { path: path.to_path_buf(), found: 0 }),
    }
}

pub(crate) fn gallery_from_value(value: Value, path: &Path) -> Result<Loaded<Identity>, StoreError> {
    if check_version(&value, path)? || !value.is_array() {
        let doc: GalleryDocument = parse(value, path)?;
        return Ok(Loaded { items: doc.identities, migrated: false });
    }

    let students: Vec<LegacyStudent> = parse(value, path)?;
    let mut identities: Vec<Identity> = Vec::with_capacity(students.len());

    for student in students {
        let identity = Identity {
            id: student.student_id.into_string(),
            display_name: student.name,
            embeddings: if student.encoding.is_empty() {
                Vec::new()
            } else {
                vec![Embedding::new(student.encoding)]
            },
            reference_image_path: student.photo_path,
            enrolled_at: None,
        };
        // Re-registration appended a second record; the later one wins.
        match identities.iter_mut().find(|i| i.id == identity.id) {
            Some(existing) => *existing = identity,
            None => identities.push(identity),
        }
    }

    Ok(Loaded { items: identities, migrated: true })
}

pub(crate) fn sessions_from_value(
    value: Value,
    path: &Path,
    now: DateTime<Local>,
    policy: &MigrationPolicy,
    names: &HashMap<String, String>,
) -> Result<Loaded<AttendanceSession>, StoreError> {
    if check_version(&value, path)? {
        let doc: SessionDocument = parse(value, path)?;
        return Ok(Loaded { items: doc.sessions, migrated: false });
    }

    let mut merger = Merger::new(names);
    match value {
        Value::Array(_) => {
            let visits: Vec<LegacyVisit> = parse(value, path)?;
            for visit in visits {
                merger.add_visit(visit, now, policy);
            }
        }
        Value::Object(_) => {
            let days: BTreeMap<String, Vec<LegacyDay>> = parse(value, path)?;
            for (date, records) in days {
                for record in records {
                    merger.add_day(&date, record);
                }
            }
        }
        other => {
            let doc: SessionDocument = parse(other, path)?;
            return Ok(Loaded { items: doc.sessions, migrated: false });
        }
    }

    Ok(Loaded { items: merger.finish(), migrated: true })
}

/// Accumulates legacy records into one session per `(identity, date)`.
struct Merger<'a> {
    names: &'a HashMap<String, String>,
    sessions: BTreeMap<(String, NaiveDate), AttendanceSession>,
}

impl<'a> Merger<'a> {
    fn new(names: &'a HashMap<String, String>) -> Self {
        Self { names, sessions: BTreeMap::new() }
    }

    fn add_visit(&mut self, visit: LegacyVisit, now: DateTime<Local>, policy: &MigrationPolicy) {
        let id = visit.student_id.into_string();
        let Some(login) = parse_timestamp(&visit.login_time) else {
            tracing::warn!(identity = %id, login = %visit.login_time, "skipping legacy visit with unreadable login time");
            return;
        };

        let logout = visit
            .logout_time
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(parse_timestamp);
        let last = match logout {
            Some(logout) => logout.max(login),
            None => close_open_visit(login, now, policy),
        };

        let date = visit
            .date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok())
            .unwrap_or_else(|| login.date_naive());

        self.merge(id, visit.name, date, login, last);
    }

    fn add_day(&mut self, date: &str, record: LegacyDay) {
        let id = record.student_id.into_string();
        let (Some(first), Some(last)) = (
            parse_timestamp(&record.first_timestamp),
            parse_timestamp(&record.last_timestamp),
        ) else {
            tracing::warn!(identity = %id, date, "skipping legacy day record with unreadable timestamps");
            return;
        };
        let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").unwrap_or_else(|_| first.date_naive());
        self.merge(id, None, date, first, last.max(first));
    }

    fn merge(
        &mut self,
        id: String,
        name: Option<String>,
        date: NaiveDate,
        first: DateTime<Local>,
        last: DateTime<Local>,
    ) {
        let display_name = name
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.names.get(&id).cloned())
            .unwrap_or_else(|| id.clone());

        self.sessions
            .entry((id.clone(), date))
            .and_modify(|s| {
                s.first_seen = s.first_seen.min(first);
                s.last_seen = s.last_seen.max(last);
            })
            .or_insert_with(|| AttendanceSession {
                identity_id: id,
                display_name,
                date,
                first_seen: first,
                last_seen: last,
                duration_hours: 0.0,
            });
    }

    fn finish(self) -> Vec<AttendanceSession> {
        let mut sessions: Vec<_> = self
            .sessions
            .into_values()
            .map(|mut s| {
                s.duration_hours = duration_hours(s.first_seen, s.last_seen);
                s
            })
            .collect();
        sessions.sort_by(|a, b| a.date.cmp(&b.date).then(a.first_seen.cmp(&b.first_seen)));
        sessions
    }
}

/// Recent open visits stay open; older ones close after the maximum span,
/// never later than `now`.
fn close_open_visit(login: DateTime<Local>, now: DateTime<Local>, policy: &MigrationPolicy) -> DateTime<Local> {
    if now - login <= policy.reopen_window {
        login
    } else {
        (login + policy.auto_close_after).min(now).max(login)
    }
}

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// RFC 3339, or a naive ISO-ish timestamp interpreted in local time.
fn parse_timestamp(raw: &str) -> Option<DateTime<Local>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Local));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| naive.and_local_timezone(Local).earliest())
}
