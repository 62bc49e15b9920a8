// ============================================================
// Layer 6 — Collective Transports
// ============================================================
// Implementations of the domain Collective trait.
//
// All of them use a star topology: rank 0 ("root") receives
// every peer's buffer, reduces, and sends the result back.
// That is O(world_size) traffic on the root, which is fine for
// the handful of processes this driver is meant for.
//
//   LocalCollective    world of one; nothing to exchange
//   TcpCollective      one OS process per rank, rendezvous at
//                      MASTER_ADDR:MASTER_PORT
//   ChannelCollective  ranks as threads of one test process,
//                      connected by crossbeam channels
//
// Ordering contract (shared by all three): every rank issues
// the same sequence of calls with buffers of the same length.
// A length mismatch is reported as a transport error instead
// of silently corrupting parameters.
//
// TCP wire format, one frame per buffer:
//
//   ┌────────────────────┬──────────────────────────────┐
//   │ len: u64 (LE)      │ len × f32 (LE)               │
//   └────────────────────┴──────────────────────────────┘
//
// Handshake, peer → root, once after connecting:
//
//   ┌──────────────┬──────────────┬────────────────────┐
//   │ magic: u32   │ rank: u32    │ world_size: u32    │
//   └──────────────┴──────────────┴────────────────────┘
//   (all LE; magic = "MDDP")
//
// A connection that does not complete a valid handshake within
// HANDSHAKE_TIMEOUT is logged and dropped; the root keeps
// accepting until every real peer has joined.
//
// Reference: Ring/star all-reduce as used by NCCL and Gloo
//            Rust Book §16 (Message Passing)

#[cfg(test)]
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::{
    io::{ErrorKind, Read, Write},
    net::{TcpListener, TcpStream},
    thread,
    time::{Duration, Instant},
};

use crate::domain::error::{TrainError, TrainResult};
use crate::domain::identity::ProcessIdentity;
use crate::domain::traits::Collective;

const RENDEZVOUS_POLL: Duration = Duration::from_millis(100);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const HANDSHAKE_MAGIC: u32 = u32::from_le_bytes(*b"MDDP");
const HANDSHAKE_LEN: usize = 12;

// ─── LocalCollective ──────────────────────────────────────────────────────────
/// The collective of a single process. Averaging over one rank is identity.
#[derive(Debug, Default)]
pub struct LocalCollective;

impl Collective for LocalCollective {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn all_reduce_mean(&mut self, _buffer: &mut [f32]) -> TrainResult<()> {
        Ok(())
    }

    fn broadcast_from_root(&mut self, _buffer: &mut [f32]) -> TrainResult<()> {
        Ok(())
    }
}

// ─── Shared reduction helpers ─────────────────────────────────────────────────
fn check_len(expected: usize, got: usize, from_rank: usize) -> TrainResult<()> {
    if expected != got {
        return Err(TrainError::transport(format!(
            "rank {from_rank} sent {got} values, expected {expected}; ranks are out of step"
        )));
    }
    Ok(())
}

fn accumulate(sum: &mut [f32], other: &[f32]) {
    for (s, o) in sum.iter_mut().zip(other) {
        *s += *o;
    }
}

fn scale(buffer: &mut [f32], world_size: usize) {
    let inv = 1.0 / world_size as f32;
    for v in buffer.iter_mut() {
        *v *= inv;
    }
}

// ─── ChannelCollective ────────────────────────────────────────────────────────
#[cfg(test)]
enum ChannelLinks {
    Root {
        from_peers: Vec<Receiver<Vec<f32>>>,
        to_peers:   Vec<Sender<Vec<f32>>>,
    },
    Peer {
        to_root:   Sender<Vec<f32>>,
        from_root: Receiver<Vec<f32>>,
    },
}

/// Star-connected ranks living in one process (one thread per rank).
#[cfg(test)]
pub struct ChannelCollective {
    rank:       usize,
    world_size: usize,
    links:      ChannelLinks,
}

#[cfg(test)]
impl ChannelCollective {
    /// Build a fully wired group. Element `i` belongs to rank `i`.
    pub fn group(world_size: usize) -> Vec<ChannelCollective> {
        assert!(world_size > 0, "world size must be positive");

        let mut from_peers = Vec::with_capacity(world_size - 1);
        let mut to_peers   = Vec::with_capacity(world_size - 1);
        let mut peers      = Vec::with_capacity(world_size - 1);

        for rank in 1..world_size {
            let (up_tx, up_rx)     = unbounded();
            let (down_tx, down_rx) = unbounded();
            from_peers.push(up_rx);
            to_peers.push(down_tx);
            peers.push(ChannelCollective {
                rank,
                world_size,
                links: ChannelLinks::Peer { to_root: up_tx, from_root: down_rx },
            });
        }

        let root = ChannelCollective {
            rank: 0,
            world_size,
            links: ChannelLinks::Root { from_peers, to_peers },
        };

        std::iter::once(root).chain(peers).collect()
    }
}

#[cfg(test)]
fn disconnected(rank: usize) -> TrainError {
    TrainError::transport(format!("channel to rank {rank} closed"))
}

#[cfg(test)]
impl Collective for ChannelCollective {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce_mean(&mut self, buffer: &mut [f32]) -> TrainResult<()> {
        match &self.links {
            ChannelLinks::Root { from_peers, to_peers } => {
                let mut sum = buffer.to_vec();
                for (i, rx) in from_peers.iter().enumerate() {
                    let part = rx.recv().map_err(|_| disconnected(i + 1))?;
                    check_len(sum.len(), part.len(), i + 1)?;
                    accumulate(&mut sum, &part);
                }
                scale(&mut sum, self.world_size);
                for (i, tx) in to_peers.iter().enumerate() {
                    tx.send(sum.clone()).map_err(|_| disconnected(i + 1))?;
                }
                buffer.copy_from_slice(&sum);
            }
            ChannelLinks::Peer { to_root, from_root } => {
                to_root.send(buffer.to_vec()).map_err(|_| disconnected(0))?;
                let mean = from_root.recv().map_err(|_| disconnected(0))?;
                check_len(buffer.len(), mean.len(), 0)?;
                buffer.copy_from_slice(&mean);
            }
        }
        Ok(())
    }

    fn broadcast_from_root(&mut self, buffer: &mut [f32]) -> TrainResult<()> {
        match &self.links {
            ChannelLinks::Root { to_peers, .. } => {
                for (i, tx) in to_peers.iter().enumerate() {
                    tx.send(buffer.to_vec()).map_err(|_| disconnected(i + 1))?;
                }
            }
            ChannelLinks::Peer { from_root, .. } => {
                let data = from_root.recv().map_err(|_| disconnected(0))?;
                check_len(buffer.len(), data.len(), 0)?;
                buffer.copy_from_slice(&data);
            }
        }
        Ok(())
    }
}

// ─── TcpCollective ────────────────────────────────────────────────────────────
enum TcpLinks {
    /// Streams ordered by peer rank (index 0 = rank 1)
    Root { peers: Vec<TcpStream> },
    Peer { root: TcpStream },
}

/// One process per rank; rank 0 listens, everybody else dials in.
pub struct TcpCollective {
    rank:       usize,
    world_size: usize,
    links:      Option<TcpLinks>,
}

impl TcpCollective {
    /// Join the rendezvous at `address` according to `identity`.
    pub fn rendezvous(
        identity: &ProcessIdentity,
        address:  &str,
        timeout:  Duration,
    ) -> TrainResult<Self> {
        if identity.global_rank() == 0 {
            let listener = TcpListener::bind(address).map_err(|e| {
                TrainError::transport(format!("rank 0 cannot listen on {address}: {e}"))
            })?;
            Self::accept_peers(listener, identity.world_size(), timeout)
        } else {
            Self::dial_root(address, identity.global_rank(), identity.world_size(), timeout)
        }
    }

    /// Root side: accept `world_size - 1` peers on an already bound listener.
    pub fn accept_peers(
        listener:   TcpListener,
        world_size: usize,
        timeout:    Duration,
    ) -> TrainResult<Self> {
        listener.set_nonblocking(true)?;
        let deadline = Instant::now() + timeout;
        let mut slots: Vec<Option<TcpStream>> = (1..world_size).map(|_| None).collect();
        let mut joined = 0usize;

        while joined < world_size - 1 {
            match listener.accept() {
                Ok((mut stream, addr)) => {
                    let rank = match admit_peer(&mut stream, world_size) {
                        Ok(rank) => rank,
                        Err(e) => {
                            tracing::warn!("Ignoring connection from {}: {}", addr, e);
                            continue;
                        }
                    };
                    let slot = &mut slots[rank - 1];
                    if slot.is_some() {
                        tracing::warn!("Ignoring second connection for rank {} from {}", rank, addr);
                        continue;
                    }
                    *slot = Some(stream);
                    joined += 1;
                    tracing::debug!("Rank {} joined from {} ({}/{})", rank, addr, joined, world_size - 1);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(TrainError::transport(format!(
                            "rendezvous timed out: {joined} of {} peers joined",
                            world_size - 1
                        )));
                    }
                    thread::sleep(RENDEZVOUS_POLL);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let peers = slots.into_iter().flatten().collect();
        Ok(Self { rank: 0, world_size, links: Some(TcpLinks::Root { peers }) })
    }

    /// Peer side: keep dialing the root until it answers or the deadline passes.
    pub fn dial_root(
        address:    &str,
        rank:       usize,
        world_size: usize,
        timeout:    Duration,
    ) -> TrainResult<Self> {
        let deadline = Instant::now() + timeout;
        let mut stream = loop {
            match TcpStream::connect(address) {
                Ok(s) => break s,
                Err(e) if Instant::now() < deadline => {
                    tracing::trace!("Rank {} waiting for root at {}: {}", rank, address, e);
                    thread::sleep(RENDEZVOUS_POLL);
                }
                Err(e) => {
                    return Err(TrainError::transport(format!(
                        "rank {rank} could not reach root at {address}: {e}"
                    )))
                }
            }
        };
        stream.set_nodelay(true)?;

        let mut hello = [0u8; HANDSHAKE_LEN];
        hello[..4].copy_from_slice(&HANDSHAKE_MAGIC.to_le_bytes());
        hello[4..8].copy_from_slice(&(rank as u32).to_le_bytes());
        hello[8..].copy_from_slice(&(world_size as u32).to_le_bytes());
        stream.write_all(&hello)?;

        Ok(Self { rank, world_size, links: Some(TcpLinks::Peer { root: stream }) })
    }

    fn links(&mut self) -> TrainResult<&mut TcpLinks> {
        self.links
            .as_mut()
            .ok_or_else(|| TrainError::transport("collective already shut down"))
    }
}

/// Validate an accepted connection and return the peer's rank (1..world_size).
fn admit_peer(stream: &mut TcpStream, world_size: usize) -> TrainResult<usize> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;

    let mut hello = [0u8; HANDSHAKE_LEN];
    stream.read_exact(&mut hello)?;
    let word = |i: usize| u32::from_le_bytes([hello[i], hello[i + 1], hello[i + 2], hello[i + 3]]);

    if word(0) != HANDSHAKE_MAGIC {
        return Err(TrainError::transport("not a training peer (bad handshake magic)"));
    }
    let (rank, their_world) = (word(4) as usize, word(8) as usize);
    if their_world != world_size {
        return Err(TrainError::transport(format!(
            "peer reports world size {their_world}, expected {world_size}"
        )));
    }
    if rank == 0 || rank >= world_size {
        return Err(TrainError::transport(format!("peer announced invalid rank {rank}")));
    }

    // Collectives block without a deadline once the group is formed
    stream.set_read_timeout(None)?;
    stream.set_nodelay(true)?;
    Ok(rank)
}

fn write_frame(stream: &mut TcpStream, values: &[f32]) -> TrainResult<()> {
    let mut bytes = Vec::with_capacity(8 + values.len() * 4);
    bytes.extend_from_slice(&(values.len() as u64).to_le_bytes());
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    stream.write_all(&bytes)?;
    Ok(())
}

fn read_frame(stream: &mut TcpStream, expected: usize, from_rank: usize) -> TrainResult<Vec<f32>> {
    let mut len = [0u8; 8];
    stream.read_exact(&mut len)?;
    check_len(expected, u64::from_le_bytes(len) as usize, from_rank)?;

    let mut bytes = vec![0u8; expected * 4];
    stream.read_exact(&mut bytes)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

impl Collective for TcpCollective {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce_mean(&mut self, buffer: &mut [f32]) -> TrainResult<()> {
        let world_size = self.world_size;
        match self.links()? {
            TcpLinks::Root { peers } => {
                let mut sum = buffer.to_vec();
                for (i, peer) in peers.iter_mut().enumerate() {
                    let part = read_frame(peer, sum.len(), i + 1)?;
                    accumulate(&mut sum, &part);
                }
                scale(&mut sum, world_size);
                for peer in peers.iter_mut() {
                    write_frame(peer, &sum)?;
                }
                buffer.copy_from_slice(&sum);
            }
            TcpLinks::Peer { root } => {
                write_frame(root, buffer)?;
                let mean = read_frame(root, buffer.len(), 0)?;
                buffer.copy_from_slice(&mean);
            }
        }
        Ok(())
    }

    fn broadcast_from_root(&mut self, buffer: &mut [f32]) -> TrainResult<()> {
        match self.links()? {
            TcpLinks::Root { peers } => {
                for peer in peers.iter_mut() {
                    write_frame(peer, buffer)?;
                }
            }
            TcpLinks::Peer { root } => {
                let data = read_frame(root, buffer.len(), 0)?;
                buffer.copy_from_slice(&data);
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) -> TrainResult<()> {
        // Dropping the streams closes the sockets
        self.links.take();
        Ok(())
    }
}
