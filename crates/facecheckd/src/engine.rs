use facecheck_core::{decode_image, DecodeError, Embedding, EncoderError, FaceEncoder};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("image {index} could not be decoded: {source}")]
    Decode {
        index: usize,
        #[source]
        source: DecodeError,
    },
    #[error("no face detected in image {index}")]
    NoFaceDetected { index: usize },
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error("failed to start engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Encode {
        images: Vec<String>,
        reply: oneshot::Sender<Result<Vec<Embedding>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Decode every base64 image, then return the first face embedding of each,
    /// in the same order.
    pub async fn encode(&self, images: Vec<String>) -> Result<Vec<Embedding>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Encode {
                images,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// False once the engine thread has exited and requests can only fail.
    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Single-image form of [`encode`](Self::encode).
    pub async fn encode_one(&self, image: String) -> Result<Embedding, EngineError> {
        self.encode(vec![image])
            .await?
            .into_iter()
            .next()
            .ok_or(EngineError::NoFaceDetected { index: 0 })
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The encoder is moved onto the thread and used for every request; requests
/// are served one at a time in arrival order. The thread exits once every
/// [`EngineHandle`] has been dropped.
pub fn spawn_engine<E>(mut encoder: E, queue_depth: usize) -> Result<EngineHandle, EngineError>
where
    E: FaceEncoder + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));

    std::thread::Builder::new()
        .name("facecheck-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Encode { images, reply } => {
                        let result = run_encode(&mut encoder, &images);
                        if let Err(err) = &result {
                            tracing::debug!(error = %err, images = images.len(), "encode failed");
                        }
                        // Caller may have gone away; nothing to do then.
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

/// Decode all images first so a malformed payload is reported before any
/// inference runs, then take the first embedding per image.
fn run_encode<E: FaceEncoder>(
    encoder: &mut E,
    images: &[String],
) -> Result<Vec<Embedding>, EngineError> {
    let decoded = images
        .iter()
        .enumerate()
        .map(|(index, b64)| decode_image(b64).map_err(|source| EngineError::Decode { index, source }))
        .collect::<Result<Vec<_>, _>>()?;

    let mut embeddings = Vec::with_capacity(decoded.len());
    for (index, image) in decoded.iter().enumerate() {
        let first = encoder.first_face_encoding(image)?;
        tracing::debug!(
            index,
            width = image.width(),
            height = image.height(),
            found = first.is_some(),
            "encoded image"
        );
        embeddings.push(first.ok_or(EngineError::NoFaceDetected { index })?);
    }

    Ok(embeddings)
}
