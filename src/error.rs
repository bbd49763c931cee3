use crate::{fabric::FabricError, memory::BufferError};
use thiserror::Error;

/// Every way a benchmark run can fail
///
/// All of them are fatal. The `Display` text is the diagnostic printed after
/// the `Error: ` prefix on the reporting process.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("This program requires exactly {expected} cooperating processes (got {actual})")]
    ProcessCount { expected: usize, actual: usize },

    #[error("Missing argument. Use HtoH, HtoD, DtoH, or DtoD")]
    MissingMode,

    #[error("Invalid argument '{0}'. Use HtoH, HtoD, DtoH, or DtoD")]
    InvalidMode(String),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error("buffer allocation failed on rank {0}")]
    PeerAllocation(usize),

    #[error(transparent)]
    Fabric(#[from] FabricError),

    #[error("cannot write report: {0}")]
    Report(#[source] std::io::Error),
}

/// Error classes a run can end with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad process count or command line, detected before any allocation
    Usage,
    /// Host or device allocation failure before the sweep
    Resource,
    /// Send, receive, barrier or bootstrap failure, or a lost output stream
    Transport,
}

impl BenchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BenchError::ProcessCount { .. }
            | BenchError::MissingMode
            | BenchError::InvalidMode(_)
            | BenchError::InvalidOption(_) => ErrorKind::Usage,
            BenchError::Buffer(_) | BenchError::PeerAllocation(_) => ErrorKind::Resource,
            BenchError::Fabric(FabricError::Buffer(_)) => ErrorKind::Resource,
            BenchError::Fabric(_) | BenchError::Report(_) => ErrorKind::Transport,
        }
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> u8 {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::Placement;

    #[test]
    fn test_usage_messages() {
        assert_eq!(
            BenchError::MissingMode.to_string(),
            "Missing argument. Use HtoH, HtoD, DtoH, or DtoD"
        );
        assert_eq!(
            BenchError::InvalidMode("XtoY".into()).to_string(),
            "Invalid argument 'XtoY'. Use HtoH, HtoD, DtoH, or DtoD"
        );
        assert_eq!(
            BenchError::ProcessCount {
                expected: 2,
                actual: 3
            }
            .to_string(),
            "This program requires exactly 2 cooperating processes (got 3)"
        );
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(BenchError::MissingMode.kind(), ErrorKind::Usage);
        assert_eq!(BenchError::PeerAllocation(1).kind(), ErrorKind::Resource);

        let alloc = BufferError::AllocationFailed {
            placement: Placement::Device,
            bytes: 64,
            reason: "out of memory".into(),
        };
        assert_eq!(BenchError::from(alloc).kind(), ErrorKind::Resource);

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer gone");
        assert_eq!(
            BenchError::from(FabricError::from(io)).kind(),
            ErrorKind::Transport
        );
    }

    #[test]
    fn test_every_error_exits_with_one() {
        assert_eq!(BenchError::MissingMode.exit_code(), 1);
        assert_eq!(BenchError::PeerAllocation(1).exit_code(), 1);
    }
}
