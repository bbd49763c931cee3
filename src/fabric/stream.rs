use super::{Fabric, FabricError};
use crate::memory::MessageBuffer;
use async_trait::async_trait;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Bytes in a frame header: kind (1) + little-endian length (8)
const HEADER_LEN: usize = 9;

/// Payloads up to this size are written together with their header
const COALESCE_LIMIT: usize = 64 * 1024;

/// World size of a stream fabric; a stream has exactly two ends
const STREAM_WORLD_SIZE: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FrameKind {
    Data,
    Barrier,
    Status,
}

impl FrameKind {
    fn to_byte(self) -> u8 {
        match self {
            FrameKind::Data => 1,
            FrameKind::Barrier => 2,
            FrameKind::Status => 3,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(FrameKind::Data),
            2 => Some(FrameKind::Barrier),
            3 => Some(FrameKind::Status),
            _ => None,
        }
    }
}

/// Header preceding every frame on the stream
///
/// For data frames `len` is the payload length. Barrier frames carry no
/// payload and `len` 0. Status frames carry the sender's status in `len`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FrameHeader {
    kind: FrameKind,
    len: u64,
}

impl FrameHeader {
    fn encode(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0] = self.kind.to_byte();
        bytes[1..].copy_from_slice(&self.len.to_le_bytes());
        bytes
    }

    fn decode(bytes: &[u8; HEADER_LEN]) -> Result<Self, FabricError> {
        let kind = FrameKind::from_byte(bytes[0]).ok_or_else(|| FabricError::Protocol {
            expected: "a frame header".to_string(),
            received: format!("unknown frame kind {:#04x}", bytes[0]),
        })?;
        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[1..]);
        Ok(Self {
            kind,
            len: u64::from_le_bytes(len),
        })
    }
}

/// Two-party fabric over an ordered, reliable byte stream
///
/// Works over TCP and Unix sockets as well as `tokio::io::duplex` pairs.
/// Device-resident buffers go through the buffer's own host bounce memory.
pub struct StreamFabric<S> {
    stream: S,
    rank: usize,
    epoch: Instant,
    frame: Vec<u8>,
    name: &'static str,
}

impl<S> StreamFabric<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a connected stream; `rank` is 0 on one end and 1 on the other
    pub fn new(stream: S, rank: usize) -> Self {
        Self {
            stream,
            rank,
            epoch: Instant::now(),
            frame: Vec::with_capacity(HEADER_LEN + COALESCE_LIMIT),
            name: "stream",
        }
    }

    /// Set the name reported in logs
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    fn check_peer(&self, rank: usize) -> Result<(), FabricError> {
        if rank == self.rank || rank >= STREAM_WORLD_SIZE {
            return Err(FabricError::InvalidRank {
                rank,
                size: STREAM_WORLD_SIZE,
            });
        }
        Ok(())
    }

    async fn read_header(&mut self) -> Result<FrameHeader, FabricError> {
        let mut bytes = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut bytes).await?;
        FrameHeader::decode(&bytes)
    }

    async fn expect_header(&mut self, kind: FrameKind, len: u64) -> Result<(), FabricError> {
        let header = self.read_header().await?;
        if header.kind != kind || header.len != len {
            return Err(FabricError::Protocol {
                expected: format!("{:?} frame of {} bytes", kind, len),
                received: format!("{:?} frame of {} bytes", header.kind, header.len),
            });
        }
        Ok(())
    }
}

async fn write_frame<S>(
    stream: &mut S,
    scratch: &mut Vec<u8>,
    header: FrameHeader,
    payload: &[u8],
) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let header = header.encode();
    if payload.len() <= COALESCE_LIMIT {
        scratch.clear();
        scratch.extend_from_slice(&header);
        scratch.extend_from_slice(payload);
        stream.write_all(scratch).await?;
    } else {
        stream.write_all(&header).await?;
        stream.write_all(payload).await?;
    }
    stream.flush().await
}

#[async_trait(?Send)]
impl<S> Fabric for StreamFabric<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        STREAM_WORLD_SIZE
    }

    async fn send(
        &mut self,
        buffer: &mut MessageBuffer,
        len: usize,
        dest: usize,
    ) -> Result<(), FabricError> {
        self.check_peer(dest)?;
        let payload = buffer.outbound(len)?;
        let header = FrameHeader {
            kind: FrameKind::Data,
            len: len as u64,
        };
        write_frame(&mut self.stream, &mut self.frame, header, payload).await?;
        trace!("Sent {} bytes to rank {}", len, dest);
        Ok(())
    }

    async fn receive(
        &mut self,
        buffer: &mut MessageBuffer,
        len: usize,
        source: usize,
    ) -> Result<(), FabricError> {
        self.check_peer(source)?;
        self.expect_header(FrameKind::Data, len as u64).await?;

        self.stream.read_exact(buffer.inbound(len)?).await?;
        buffer.land(len)?;
        trace!("Received {} bytes from rank {}", len, source);
        Ok(())
    }

    async fn barrier(&mut self) -> Result<(), FabricError> {
        let header = FrameHeader {
            kind: FrameKind::Barrier,
            len: 0,
        };
        write_frame(&mut self.stream, &mut self.frame, header, &[]).await?;
        self.expect_header(FrameKind::Barrier, 0).await
    }

    async fn all_succeeded(&mut self, ok: bool) -> Result<bool, FabricError> {
        let header = FrameHeader {
            kind: FrameKind::Status,
            len: u64::from(ok),
        };
        write_frame(&mut self.stream, &mut self.frame, header, &[]).await?;

        let peer = self.read_header().await?;
        if peer.kind != FrameKind::Status {
            return Err(FabricError::Protocol {
                expected: "Status frame".to_string(),
                received: format!("{:?} frame", peer.kind),
            });
        }
        debug!("Status agreement: local {}, peer {}", ok, peer.len != 0);
        Ok(ok && peer.len != 0)
    }

    fn wtime(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    async fn shutdown(&mut self) -> Result<(), FabricError> {
        match self.stream.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
