use os_api::OsError;

/// Errors raised inside the engine.
///
/// None of these are fatal: detection errors are recovered by a fallback path, per-process
/// errors are reported and skipped, and loop faults trigger a backoff.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The platform topology query failed or returned nothing.
    #[error("processor topology query unavailable: {0}")]
    DetectionUnavailable(String),

    /// A generated topology disagrees with the OS logical processor count.
    #[error("generated {generated} logical processors but the OS reports {reported}")]
    ClassificationMismatch { generated: usize, reported: usize },

    /// The OS refused to change a process or thread.
    #[error("access denied for pid {pid}: {reason}")]
    AffinityDenied { pid: u32, reason: String },

    /// The process exited between discovery and action.
    #[error("process {0} exited before it could be updated")]
    ProcessVanished(u32),

    /// An unexpected failure inside a monitoring tick.
    #[error("monitor tick failed: {0}")]
    LoopFault(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Os(OsError),
}

impl EngineError {
    /// Maps a platform failure for `pid` onto the engine taxonomy.
    pub fn from_os(pid: u32, err: OsError) -> Self {
        match err {
            OsError::Denied { reason, .. } => EngineError::AffinityDenied { pid, reason },
            OsError::Vanished { .. } => EngineError::ProcessVanished(pid),
            other => EngineError::Os(other),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
