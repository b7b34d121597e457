/// Failure of a single platform call.
///
/// The two variants the scheduling loop cares about are `Denied` (protected or elevated
/// target) and `Vanished` (the process or thread exited between discovery and the call).
#[derive(Debug, thiserror::Error)]
pub enum OsError {
    #[error("access denied for {target} {id}: {reason}")]
    Denied {
        target: &'static str,
        id: u32,
        reason: String,
    },

    #[error("{target} {id} no longer exists")]
    Vanished { target: &'static str, id: u32 },

    #[error("affinity mask is empty")]
    EmptyMask,

    #[error("not supported on this platform: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
