use image::GrayImage;
use rollcall_core::backend::observe_faces;
use rollcall_core::{BackendError, FaceBackend, FaceObservation};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from the service to the engine thread.
enum EngineRequest {
    Analyze {
        frame: GrayImage,
        max_faces: usize,
        reply: oneshot::Sender<Result<Vec<FaceObservation>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    backend: &'static str,
}

impl EngineHandle {
    /// Detect up to `max_faces` faces in `frame` and extract their embeddings.
    pub async fn analyze(&self, frame: GrayImage, max_faces: usize) -> Result<Vec<FaceObservation>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Analyze {
                frame,
                max_faces,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend
    }
}

/// Spawn the engine on a dedicated OS thread that owns `backend`.
///
/// ONNX sessions need `&mut` access, so every inference is funnelled through
/// one request loop; callers queue on the channel instead of a lock.
pub fn spawn_engine(mut backend: Box<dyn FaceBackend>) -> Result<EngineHandle, EngineError> {
    let name = backend.name();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!(backend = name, "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Analyze {
                        frame,
                        max_faces,
                        reply,
                    } => {
                        let result = observe_faces(backend.as_mut(), &frame, max_faces).map_err(EngineError::from);
                        if let Ok(faces) = &result {
                            tracing::debug!(
                                width = frame.width(),
                                height = frame.height(),
                                faces = faces.len(),
                                "frame analysed"
                            );
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, backend: name })
}
