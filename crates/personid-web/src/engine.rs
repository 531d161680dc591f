use personid_core::annotate::AnnotateError;
use personid_core::{
    AnalyzerError, Annotator, FaceAnalyzer, IdentifyError, Identifier, OnnxAnalyzer, Report, Roster, RosterConfig,
    RosterError,
};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model load failed: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("roster error: {0}")]
    Roster(#[from] RosterError),
    #[error("font error: {0}")]
    Font(#[from] AnnotateError),
    #[error(transparent)]
    Identify(#[from] IdentifyError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Identify {
        upload: PathBuf,
        output: PathBuf,
        reply: oneshot::Sender<Result<Report, IdentifyError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Identify everyone in a saved upload and write the annotated copy to `output`.
    pub async fn identify(&self, upload: PathBuf, output: PathBuf) -> Result<Report, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Identify {
                upload,
                output,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// What the engine was started with, for `/status`.
#[derive(Debug, Clone)]
pub struct EngineInfo {
    pub references: Vec<String>,
    pub threshold: f32,
    pub policy: personid_core::MatchPolicy,
}

/// Load both ONNX models, encode the roster, load the label font and start
/// the engine thread. Fails fast if any of them is unavailable.
pub fn load_engine(config: &Config) -> Result<(EngineHandle, EngineInfo), EngineError> {
    let scrfd_path = config.scrfd_model_path();
    let arcface_path = config.arcface_model_path();
    let mut analyzer = OnnxAnalyzer::load(&scrfd_path, &arcface_path)?;
    tracing::info!(scrfd = %scrfd_path, arcface = %arcface_path, "face models loaded");

    let roster_config = match &config.roster_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading roster");
            RosterConfig::from_file(path)?
        }
        None => RosterConfig::default(),
    };
    let roster = Roster::build(&roster_config, &mut analyzer)?;
    tracing::info!(references = ?roster.names(), "roster encoded");

    let annotator = Annotator::load(config.font_path.as_deref())?;
    let identifier = Identifier::new(roster, config.match_policy, config.similarity_threshold, annotator);

    let info = EngineInfo {
        references: identifier.roster().names(),
        threshold: identifier.threshold(),
        policy: identifier.policy(),
    };
    let handle = spawn_engine(analyzer, identifier)?;
    Ok((handle, info))
}

/// Spawn the engine on a dedicated OS thread.
///
/// The analyzer and identifier move onto the thread; requests are served one
/// at a time in arrival order.
pub fn spawn_engine<A>(mut analyzer: A, identifier: Identifier) -> Result<EngineHandle, EngineError>
where
    A: FaceAnalyzer + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("personid-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Identify { upload, output, reply } => {
                        tracing::debug!(upload = %upload.display(), "identify request");
                        let result = identifier.identify_file(&mut analyzer, &upload, &output);
                        if let Err(e) = &result {
                            tracing::warn!(upload = %upload.display(), error = %e, "identify failed");
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
