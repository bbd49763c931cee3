//! # Two-Process Launcher
//!
//! Brings up a stream fabric between rank 0 and rank 1. Rank 0 listens,
//! spawns rank 1 as a child process of the same executable (unless
//! `--no-spawn` is given) and accepts its connection. Rank 1 connects back
//! with retries until the connect timeout expires.
//!
//! The child is killed if rank 0 is dropped before the run completes, so a
//! failed run never leaves a stray peer behind.

use super::{Fabric, FabricError, StreamFabric};
use crate::cli::{Args, FabricKind};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Delay between connection attempts of the joining rank
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// How long rank 0 waits for its peer to exit after a failed run
const PEER_EXIT_GRACE: Duration = Duration::from_secs(5);

/// A connected fabric together with the peer process this rank spawned
pub struct Launch {
    fabric: Box<dyn Fabric>,
    peer: Option<Child>,
}

impl Launch {
    /// Connect this process to its peer according to `args`
    pub async fn bootstrap(args: &Args) -> Result<Self, FabricError> {
        match args.local_rank() {
            0 => Self::initiate(args).await,
            1 => Self::join(args).await,
            rank => Err(FabricError::InvalidRank {
                rank,
                size: crate::defaults::WORLD_SIZE,
            }),
        }
    }

    /// Wrap an already connected fabric
    pub fn from_fabric(fabric: Box<dyn Fabric>) -> Self {
        Self { fabric, peer: None }
    }

    pub fn fabric(&mut self) -> &mut dyn Fabric {
        self.fabric.as_mut()
    }

    /// Tear the fabric down and reap the peer process
    ///
    /// After a successful run the peer must exit cleanly too; a non-zero
    /// peer exit is reported as a failure. After a failed run the peer gets
    /// a short grace period and is killed if it is still running.
    pub async fn finish(self, succeeded: bool) -> Result<(), FabricError> {
        let Launch { mut fabric, peer } = self;
        let shutdown = fabric.shutdown().await;
        drop(fabric);

        let Some(mut child) = peer else {
            return shutdown;
        };

        if succeeded {
            let status = child.wait().await?;
            if !status.success() {
                return Err(FabricError::Bootstrap(format!(
                    "peer process exited with {}",
                    status
                )));
            }
            debug!("Peer process exited cleanly");
            return shutdown;
        }

        match timeout(PEER_EXIT_GRACE, child.wait()).await {
            Ok(status) => debug!("Peer process exited after failure: {:?}", status),
            Err(_) => {
                warn!("Peer process still running after {:?}, killing it", PEER_EXIT_GRACE);
                let _ = child.kill().await;
            }
        }
        Ok(())
    }

    async fn initiate(args: &Args) -> Result<Self, FabricError> {
        let limit = Duration::from_secs(args.connect_timeout);
        match args.fabric {
            FabricKind::Tcp => {
                let listener = TcpListener::bind(&args.listen).await?;
                let endpoint = connect_address(listener.local_addr()?).to_string();
                info!("Rank 0 listening on {}", endpoint);

                let mut peer = spawn_peer(args, &endpoint)?;
                let (stream, from) = await_peer(limit, listener.accept(), &mut peer).await?;
                configure_tcp(&stream, args.socket_buffer_size)?;
                debug!("Rank 1 connected from {}", from);

                Ok(Self {
                    fabric: Box::new(StreamFabric::new(stream, 0).with_name("tcp")),
                    peer,
                })
            }
            #[cfg(unix)]
            FabricKind::Unix => {
                let path = args
                    .socket_path
                    .clone()
                    .unwrap_or_else(crate::utils::unique_socket_path);
                let (listener, socket_file) = SocketFile::bind(path)?;
                let endpoint = socket_file.path().to_string_lossy().into_owned();
                info!("Rank 0 listening on {}", endpoint);

                let mut peer = spawn_peer(args, &endpoint)?;
                let accepted = await_peer(limit, listener.accept(), &mut peer).await;
                drop(socket_file);
                let (stream, _) = accepted?;
                configure_buffers(socket2::SockRef::from(&stream), args.socket_buffer_size)?;
                debug!("Rank 1 connected on {}", endpoint);

                Ok(Self {
                    fabric: Box::new(StreamFabric::new(stream, 0).with_name("unix")),
                    peer,
                })
            }
            #[cfg(feature = "mpi")]
            FabricKind::Mpi => Err(FabricError::Bootstrap(
                "the MPI fabric is started by mpirun, not by the launcher".to_string(),
            )),
        }
    }

    async fn join(args: &Args) -> Result<Self, FabricError> {
        let endpoint = args.connect.as_deref().ok_or_else(|| {
            FabricError::Bootstrap("rank 1 needs the initiator endpoint (--connect)".to_string())
        })?;
        let limit = Duration::from_secs(args.connect_timeout);

        match args.fabric {
            FabricKind::Tcp => {
                let stream = connect_with_retry(endpoint, limit, || TcpStream::connect(endpoint)).await?;
                configure_tcp(&stream, args.socket_buffer_size)?;
                debug!("Rank 1 connected to {}", endpoint);
                Ok(Self {
                    fabric: Box::new(StreamFabric::new(stream, 1).with_name("tcp")),
                    peer: None,
                })
            }
            #[cfg(unix)]
            FabricKind::Unix => {
                use tokio::net::UnixStream;

                let stream = connect_with_retry(endpoint, limit, || UnixStream::connect(endpoint)).await?;
                configure_buffers(socket2::SockRef::from(&stream), args.socket_buffer_size)?;
                debug!("Rank 1 connected to {}", endpoint);
                Ok(Self {
                    fabric: Box::new(StreamFabric::new(stream, 1).with_name("unix")),
                    peer: None,
                })
            }
            #[cfg(feature = "mpi")]
            FabricKind::Mpi => Err(FabricError::Bootstrap(
                "the MPI fabric is started by mpirun, not by the launcher".to_string(),
            )),
        }
    }
}

/// Path of a bound Unix listener, unlinked on drop
///
/// Every exit from the bootstrap, including a failed spawn, takes the
/// socket file with it.
#[cfg(unix)]
#[derive(Debug)]
struct SocketFile(std::path::PathBuf);

#[cfg(unix)]
impl SocketFile {
    /// Bind a listener at `path`, replacing a stale socket from an earlier run
    fn bind(path: std::path::PathBuf) -> Result<(tokio::net::UnixListener, Self), FabricError> {
        clear_stale_socket(&path)?;
        let listener = tokio::net::UnixListener::bind(&path)?;
        Ok((listener, Self(path)))
    }

    fn path(&self) -> &std::path::Path {
        &self.0
    }
}

#[cfg(unix)]
impl Drop for SocketFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            debug!("Cannot remove {}: {}", self.0.display(), e);
        }
    }
}

/// Remove a leftover socket at `path`; refuse to touch anything else
#[cfg(unix)]
fn clear_stale_socket(path: &std::path::Path) -> Result<(), FabricError> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            debug!("Removing stale socket {}", path.display());
            std::fs::remove_file(path)?;
            Ok(())
        }
        Ok(_) => Err(FabricError::Bootstrap(format!(
            "{} exists and is not a socket",
            path.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Start rank 1 as a child process joining through `endpoint`
fn spawn_peer(args: &Args, endpoint: &str) -> Result<Option<Child>, FabricError> {
    if args.no_spawn {
        info!(
            "Waiting for rank 1 to be started with --rank 1 --connect {}",
            endpoint
        );
        return Ok(None);
    }

    let exe = std::env::current_exe()
        .map_err(|e| FabricError::Bootstrap(format!("cannot locate own executable: {}", e)))?;

    let mut cmd = Command::new(&exe);
    cmd.args(args.peer_arguments(endpoint))
        .stdin(Stdio::null())
        // only rank 0 writes the report
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    debug!("Spawning rank 1: {}", exe.display());
    let child = cmd
        .spawn()
        .map_err(|e| FabricError::Bootstrap(format!("cannot spawn rank 1: {}", e)))?;
    Ok(Some(child))
}

/// Wait for `accept` to complete, the timeout to expire, or the spawned
/// peer to exit before connecting, whichever happens first
async fn await_peer<T>(
    limit: Duration,
    accept: impl Future<Output = std::io::Result<T>>,
    peer: &mut Option<Child>,
) -> Result<T, FabricError> {
    let exited = async {
        match peer.as_mut() {
            Some(child) => child.wait().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        accepted = timeout(limit, accept) => match accepted {
            Ok(connection) => Ok(connection?),
            Err(_) => Err(FabricError::Bootstrap(format!(
                "peer did not connect within {:?}",
                limit
            ))),
        },
        status = exited => Err(FabricError::Bootstrap(match status {
            Ok(status) => format!("peer process exited with {} before connecting", status),
            Err(e) => format!("lost track of peer process: {}", e),
        })),
    }
}

/// Call `connect` until it succeeds or `limit` has passed
async fn connect_with_retry<T, F, Fut>(
    endpoint: &str,
    limit: Duration,
    mut connect: F,
) -> Result<T, FabricError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    let started = Instant::now();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match connect().await {
            Ok(stream) => return Ok(stream),
            Err(e) if started.elapsed() < limit => {
                debug!("Connection attempt {} to {} failed: {}", attempts, endpoint, e);
                sleep(CONNECT_RETRY_DELAY).await;
            }
            Err(e) => {
                return Err(FabricError::Bootstrap(format!(
                    "cannot connect to {} after {} attempts: {}",
                    endpoint, attempts, e
                )))
            }
        }
    }
}

/// Address the peer should dial for a listener bound to `local`
///
/// A wildcard bind is reachable through loopback on the same port.
fn connect_address(local: SocketAddr) -> SocketAddr {
    match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), local.port())
        }
        _ => local,
    }
}

fn configure_tcp(stream: &TcpStream, buffer_size: Option<usize>) -> Result<(), FabricError> {
    let socket = socket2::SockRef::from(stream);
    socket.set_nodelay(true)?;
    configure_buffers(socket, buffer_size)
}

fn configure_buffers(socket: socket2::SockRef<'_>, buffer_size: Option<usize>) -> Result<(), FabricError> {
    if let Some(size) = buffer_size {
        socket.set_recv_buffer_size(size)?;
        socket.set_send_buffer_size(size)?;
    }
    Ok(())
}
