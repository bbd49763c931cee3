//! # Memory Placement
//!
//! Transfer modes, process roles and the policy that maps a `(mode, role)`
//! pair to the memory space the process's buffer must live in.
//!
//! | Mode | Initiator | Target |
//! |------|-----------|--------|
//! | `HtoH` | Host | Host |
//! | `HtoD` | Host | Device |
//! | `DtoH` | Device | Host |
//! | `DtoD` | Device | Device |

use crate::error::BenchError;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Where the sender's and the receiver's buffers live for a whole run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum TransferMode {
    #[serde(rename = "HtoH")]
    HostToHost,
    #[serde(rename = "HtoD")]
    HostToDevice,
    #[serde(rename = "DtoH")]
    DeviceToHost,
    #[serde(rename = "DtoD")]
    DeviceToDevice,
}

impl TransferMode {
    /// Every mode, in the order they are usually listed
    pub const ALL: [TransferMode; 4] = [
        TransferMode::HostToHost,
        TransferMode::HostToDevice,
        TransferMode::DeviceToHost,
        TransferMode::DeviceToDevice,
    ];

    /// The command-line token selecting this mode
    pub fn token(&self) -> &'static str {
        match self {
            TransferMode::HostToHost => "HtoH",
            TransferMode::HostToDevice => "HtoD",
            TransferMode::DeviceToHost => "DtoH",
            TransferMode::DeviceToDevice => "DtoD",
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for TransferMode {
    type Err = BenchError;

    /// Tokens are matched exactly, including case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransferMode::ALL
            .into_iter()
            .find(|mode| mode.token() == s)
            .ok_or_else(|| BenchError::InvalidMode(s.to_string()))
    }
}

/// The part a process plays in the transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sends, times and reports. Always rank 0.
    Initiator,
    /// Receives. Always rank 1.
    Target,
}

impl Role {
    /// Map a rank of the two-process world to its role
    pub fn from_rank(rank: usize) -> Option<Role> {
        match rank {
            0 => Some(Role::Initiator),
            1 => Some(Role::Target),
            _ => None,
        }
    }

    pub fn rank(&self) -> usize {
        match self {
            Role::Initiator => 0,
            Role::Target => 1,
        }
    }

    /// Rank of the process on the other side of the transfer
    pub fn peer_rank(&self) -> usize {
        match self {
            Role::Initiator => Role::Target.rank(),
            Role::Target => Role::Initiator.rank(),
        }
    }

    /// Name of the buffer this role owns, used in diagnostics
    pub fn buffer_name(&self) -> &'static str {
        match self {
            Role::Initiator => "send buffer",
            Role::Target => "recv buffer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Target => write!(f, "target"),
        }
    }
}

/// Memory space a buffer resides in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Placement {
    Host,
    Device,
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Host => write!(f, "host"),
            Placement::Device => write!(f, "device"),
        }
    }
}

/// Decide where the buffer of the process playing `role` lives under `mode`
pub fn resolve(mode: TransferMode, role: Role) -> Placement {
    use Placement::{Device, Host};

    match (mode, role) {
        (TransferMode::HostToHost, _) => Host,
        (TransferMode::HostToDevice, Role::Initiator) => Host,
        (TransferMode::HostToDevice, Role::Target) => Device,
        (TransferMode::DeviceToHost, Role::Initiator) => Device,
        (TransferMode::DeviceToHost, Role::Target) => Host,
        (TransferMode::DeviceToDevice, _) => Device,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_matches_placement_table() {
        let expected = [
            (TransferMode::HostToHost, Placement::Host, Placement::Host),
            (TransferMode::HostToDevice, Placement::Host, Placement::Device),
            (TransferMode::DeviceToHost, Placement::Device, Placement::Host),
            (TransferMode::DeviceToDevice, Placement::Device, Placement::Device),
        ];

        for (mode, initiator, target) in expected {
            assert_eq!(resolve(mode, Role::Initiator), initiator, "initiator for {}", mode);
            assert_eq!(resolve(mode, Role::Target), target, "target for {}", mode);
        }
    }

    #[test]
    fn test_mode_tokens_round_trip() {
        for mode in TransferMode::ALL {
            assert_eq!(mode.token().parse::<TransferMode>().unwrap(), mode);
            assert_eq!(mode.to_string(), mode.token());
        }
    }

    #[test]
    fn test_mode_serializes_as_its_token() {
        // the JSON report names modes exactly as the command line does
        for mode in TransferMode::ALL {
            assert_eq!(serde_json::to_value(mode).unwrap(), mode.token());
        }
    }

    #[test]
    fn test_mode_parsing_is_exact() {
        for bad in ["XtoY", "htoh", "HTOH", " HtoH", "HtoH ", "", "HtoDtoH"] {
            match bad.parse::<TransferMode>() {
                Err(BenchError::InvalidMode(token)) => assert_eq!(token, bad),
                other => panic!("expected InvalidMode for {:?}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_roles_from_rank() {
        assert_eq!(Role::from_rank(0), Some(Role::Initiator));
        assert_eq!(Role::from_rank(1), Some(Role::Target));
        assert_eq!(Role::from_rank(2), None);
        assert_eq!(Role::Initiator.peer_rank(), 1);
        assert_eq!(Role::Target.peer_rank(), 0);
    }
}
