//! Spool directory frame source.
//!
//! Cameras (or whatever feeds them) drop still images into
//! `<spool>/<stream>/`. Each poll picks up every image, oldest name first,
//! runs it through the service and deletes it.

use crate::service::{load_gray, AttendanceService};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

const FRAME_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// One image waiting in the spool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoolFrame {
    pub stream: String,
    pub path: PathBuf,
}

/// List pending frames, grouped by stream and sorted by file name.
pub fn pending_frames(spool: &Path) -> std::io::Result<Vec<SpoolFrame>> {
    let mut frames = Vec::new();
    for entry in std::fs::read_dir(spool)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let stream = entry.file_name().to_string_lossy().into_owned();
        for file in std::fs::read_dir(entry.path())? {
            let path = file?.path();
            if is_frame(&path) {
                frames.push(SpoolFrame {
                    stream: stream.clone(),
                    path,
                });
            }
        }
    }
    frames.sort_by(|a, b| a.stream.cmp(&b.stream).then_with(|| a.path.cmp(&b.path)));
    Ok(frames)
}

fn is_frame(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| FRAME_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

/// Poll `spool` every `interval` until `shutdown` flips to `true`.
pub async fn watch_spool(
    service: Arc<AttendanceService>,
    spool: PathBuf,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = tokio::fs::create_dir_all(&spool).await {
        tracing::error!(path = %spool.display(), error = %e, "cannot create spool directory");
        return;
    }
    tracing::info!(path = %spool.display(), "watching spool");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                drain(&service, &spool).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!("spool watcher stopped");
}

/// Process and remove every pending frame. Returns how many were handled.
pub async fn drain(service: &AttendanceService, spool: &Path) -> usize {
    let dir = spool.to_path_buf();
    let frames = match tokio::task::spawn_blocking(move || pending_frames(&dir)).await {
        Ok(Ok(frames)) => frames,
        Ok(Err(e)) => {
            tracing::warn!(path = %spool.display(), error = %e, "cannot list spool");
            return 0;
        }
        Err(e) => {
            tracing::error!(error = %e, "spool listing task failed");
            return 0;
        }
    };

    for frame in &frames {
        match load_gray(frame.path.clone()).await {
            Ok(image) => match service.process_frame(&frame.stream, image).await {
                Ok(recognitions) => {
                    for r in &recognitions {
                        tracing::info!(
                            stream = %frame.stream,
                            identity = %r.event.identity_id,
                            name = %r.event.display_name,
                            opened = r.opened,
                            hours = r.session.duration_hours,
                            "attendance recorded"
                        );
                    }
                }
                Err(e) => tracing::warn!(stream = %frame.stream, path = %frame.path.display(), error = %e, "frame failed"),
            },
            Err(e) => tracing::warn!(path = %frame.path.display(), error = %e, "unreadable frame dropped"),
        }

        if let Err(e) = tokio::fs::remove_file(&frame.path).await {
            tracing::warn!(path = %frame.path.display(), error = %e, "cannot remove processed frame");
        }
    }
    frames.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::SessionPolicy;
    use crate::engine::spawn_engine;
    use crate::service::ServiceOptions;
    use crate::testing::{frame, Scripted};
    use rollcall_core::{DebouncePolicy, MatchPolicy};
    use rollcall_store::JsonStore;
    use std::fs;

    #[test]
    fn test_pending_frames_by_stream() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("door")).unwrap();
        fs::create_dir_all(dir.path().join("hall")).unwrap();
        fs::write(dir.path().join("door/0002.jpg"), b"x").unwrap();
        fs::write(dir.path().join("door/0001.PNG"), b"x").unwrap();
        fs::write(dir.path().join("door/notes.txt"), b"x").unwrap();
        fs::write(dir.path().join("hall/0001.jpeg"), b"x").unwrap();
        fs::write(dir.path().join("stray.jpg"), b"x").unwrap();

        let frames = pending_frames(dir.path()).unwrap();
        let names: Vec<_> = frames
            .iter()
            .map(|f| format!("{}/{}", f.stream, f.path.file_name().unwrap().to_string_lossy()))
            .collect();
        assert_eq!(names, vec!["door/0001.PNG", "door/0002.jpg", "hall/0001.jpeg"]);
    }

    #[test]
    fn test_missing_spool_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(pending_frames(&dir.path().join("absent")).is_err());
    }

    #[tokio::test]
    async fn test_drain_processes_and_removes_frames() {
        let data = tempfile::tempdir().unwrap();
        let spool = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonStore::new(data.path()));
        let options = ServiceOptions {
            matching: MatchPolicy::default(),
            debounce: DebouncePolicy {
                min_consecutive_frames: 2,
                ..DebouncePolicy::default()
            },
            sessions: SessionPolicy::default(),
            max_faces: 1,
            data_dir: data.path().to_path_buf(),
        };
        let engine = spawn_engine(Box::new(Scripted)).unwrap();
        let service = AttendanceService::start(engine, store.clone(), store, options).await.unwrap();
        service.enroll("s1", "Ada", frame(10)).await.unwrap();

        let door = spool.path().join("door");
        fs::create_dir_all(&door).unwrap();
        frame(11).save(door.join("0001.png")).unwrap();
        frame(11).save(door.join("0002.png")).unwrap();
        fs::write(door.join("0003.jpg"), b"not an image").unwrap();

        assert_eq!(drain(&service, spool.path()).await, 3);
        assert!(pending_frames(spool.path()).unwrap().is_empty());
        assert_eq!(service.sessions_for_identity("s1").len(), 1);
        assert_eq!(service.present(), vec!["s1".to_string()]);
    }
}
