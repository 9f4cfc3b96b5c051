use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors from reactor provisioning. Each OS-level failure carries the
/// operation that failed and the errno it failed with; once any setup step
/// fails the reactor is unusable and must be torn down.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("{op} failed (errno {errno})")]
    Os { op: &'static str, errno: i32 },

    #[error("network interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("ring size {0} is not a power of two")]
    RingSize(u32),

    #[error("frame pool of {frames} frames cannot cover {needed} fill + tx frames")]
    FrameBudget { frames: u32, needed: u64 },

    #[error("tx ring size {size} exceeds the tx free-list capacity {capacity}")]
    TxPoolCapacity { size: u32, capacity: usize },

    #[error("loading classifier object {path}: {source}")]
    ProgramLoad {
        path: PathBuf,
        #[source]
        source: aya::EbpfError,
    },

    #[error("classifier program {0} not found in object")]
    ProgramNotFound(String),

    #[error("classifier program: {0}")]
    Program(#[from] aya::programs::ProgramError),

    #[error("destination map {0} not found in object")]
    MapNotFound(String),

    #[error("destination map: {0}")]
    Map(#[from] aya::maps::MapError),
}

impl SetupError {
    /// OS error for `op` with the calling thread's current errno.
    pub(crate) fn os(op: &'static str) -> Self {
        Self::Os {
            op,
            errno: last_errno(),
        }
    }
}

pub(crate) fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}
