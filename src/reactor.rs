//! Reactor lifecycle and steady-state loop.
//!
//! One reactor owns one AF_XDP socket bound to one interface queue, the UMEM
//! frame pool behind it, the four rings, and the registered packet handler.
//! The caller drives [`Reactor::run_once`] from its own loop on one thread;
//! the kernel plays the counterpart producer/consumer on each ring. Several
//! reactors (one per destination index) may run on distinct pinned threads;
//! they share no userspace state.

use std::os::fd::RawFd;
use std::path::PathBuf;
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

use heapless::Deque;
use log::{debug, info, warn};
use thiserror::Error;

use crate::builder::{BuildError, FrameBuilder};
use crate::error::{last_errno, SetupError};
use crate::frame::FramePool;
use crate::packet::Packet;
use crate::redirect::RedirectProgram;
use crate::ring::{ConsumerRing, ProducerRing, XdpDesc};
use crate::runtime::{LatencyProbe, ReactorStats};
use crate::xdp::{self, UmemConfig, XdpSocket};

/// Upper bound on the tx free list; `UmemConfig::tx_size` may not exceed it.
pub const TX_POOL_CAPACITY: usize = 1024;

/// One handler invocation per this many is latency-sampled.
const LATENCY_SAMPLE_INTERVAL: u64 = 1024;

#[derive(Clone, Debug)]
pub struct ReactorConfig {
    /// Interface whose receive hook the classifier attaches to.
    pub interface: String,
    /// Hardware queue to bind the socket to.
    pub queue_id: u32,
    /// Pre-compiled classifier object, loaded by path at setup.
    pub program_path: PathBuf,
    /// Program name inside the object.
    pub program_name: String,
    /// Destination-map slot this reactor serves.
    pub socket_index: u32,
    pub umem: UmemConfig,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            interface: "lo".to_string(),
            queue_id: 0,
            program_path: PathBuf::from("xsk_pass_kern.o"),
            program_name: "xsk_pass".to_string(),
            socket_index: 0,
            umem: UmemConfig::default(),
        }
    }
}

/// Errors a packet handler may surface. They are logged and contained; the
/// reactor keeps running and the frame is recycled either way.
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("frame too short for {0} header")]
    Truncated(&'static str),
    #[error("frame is not an IPv4/UDP request")]
    NotUdp,
    #[error("no free tx frame available")]
    NoTxFrame,
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum TxError {
    #[error("tx ring full")]
    RingFull,
    #[error("tx kick failed (errno {0})")]
    Kick(i32),
    #[error("response frame already submitted")]
    AlreadySent,
}

pub type PacketHandler =
    Box<dyn FnMut(Packet<'_>, &mut TxQueue) -> Result<(), PacketError> + Send>;

/// Transmit side handed to the packet handler: the tx producer ring plus a
/// free list over the reserved tx frame range of the UMEM.
///
/// Response frames are built in place in a free slot and published as tx
/// descriptors; the kernel hands the offsets back through the completion
/// ring once sent.
pub struct TxQueue {
    ring: ProducerRing<XdpDesc>,
    free: Deque<u64, TX_POOL_CAPACITY>,
    umem_base: *mut u8,
    frame_size: u32,
    fd: RawFd,
    stats: Arc<ReactorStats>,
}

unsafe impl Send for TxQueue {}

impl TxQueue {
    fn new(
        ring: ProducerRing<XdpDesc>,
        offsets: impl Iterator<Item = u64>,
        umem_base: *mut u8,
        frame_size: u32,
        fd: RawFd,
        stats: Arc<ReactorStats>,
    ) -> Self {
        let mut free = Deque::new();
        for offset in offsets {
            if free.push_back(offset).is_err() {
                break;
            }
        }
        Self {
            ring,
            free,
            umem_base,
            frame_size,
            fd,
            stats,
        }
    }

    /// Frames currently available to build responses into.
    #[inline(always)]
    pub fn free_frames(&self) -> usize {
        self.free.len()
    }

    /// Take a free tx frame and start building into it. `None` when every
    /// tx frame is in flight.
    pub fn reserve(&mut self) -> Option<ResponseFrame<'_>> {
        let offset = self.free.pop_front()?;
        let buf = unsafe {
            core::slice::from_raw_parts_mut(
                self.umem_base.add(offset as usize),
                self.frame_size as usize,
            )
        };
        Some(ResponseFrame {
            builder: FrameBuilder::new(buf),
            offset,
            queue: self,
            sent: false,
        })
    }

    /// Return a completed tx offset to the free list.
    fn release(&mut self, offset: u64) {
        if self.free.push_back(offset).is_err() {
            // The free list is sized for the whole tx pool; overflow means
            // the kernel completed an offset twice.
            warn!("completion for unexpected frame offset {offset} dropped");
        }
    }

    /// Nudge the kernel to service the tx ring. Transient queue pressure is
    /// not an error; the descriptors stay published.
    fn kick(&self) -> Result<(), TxError> {
        let rc = unsafe {
            libc::sendto(
                self.fd,
                core::ptr::null(),
                0,
                libc::MSG_DONTWAIT,
                core::ptr::null(),
                0,
            )
        };
        if rc < 0 {
            let errno = last_errno();
            if !matches!(errno, libc::EAGAIN | libc::EBUSY | libc::ENOBUFS) {
                return Err(TxError::Kick(errno));
            }
        }
        Ok(())
    }
}

/// A tx frame being built. Submit with [`Self::send`]; dropping an unsent
/// frame returns its slot to the free list.
pub struct ResponseFrame<'a> {
    builder: FrameBuilder<'a>,
    offset: u64,
    queue: &'a mut TxQueue,
    sent: bool,
}

impl ResponseFrame<'_> {
    pub fn append_ethernet(&mut self, ethertype: u16) -> Result<(), BuildError> {
        self.builder.append_ethernet(ethertype)
    }

    pub fn append_ipv4(
        &mut self,
        saddr: std::net::Ipv4Addr,
        daddr: std::net::Ipv4Addr,
        payload_len: u16,
    ) -> Result<(), BuildError> {
        self.builder.append_ipv4(saddr, daddr, payload_len)
    }

    pub fn append_udp(&mut self, sport: u16, dport: u16, payload_len: u16) -> Result<(), BuildError> {
        self.builder.append_udp(sport, dport, payload_len)
    }

    pub fn append_bytes(&mut self, src: &[u8]) -> Result<(), BuildError> {
        self.builder.append_bytes(src)
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.builder.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.builder.is_empty()
    }

    /// View over the bytes built so far.
    pub fn as_packet(&self) -> Packet<'_> {
        self.builder.as_packet()
    }

    /// Publish the built frame on the tx ring and kick the kernel. On a
    /// full ring the frame slot is preserved and returns to the free list
    /// when this value drops.
    pub fn send(&mut self) -> Result<(), TxError> {
        if self.sent {
            return Err(TxError::AlreadySent);
        }
        let desc = XdpDesc::new(self.offset, self.builder.len() as u32);
        if !self.queue.ring.push(desc) {
            return Err(TxError::RingFull);
        }
        self.sent = true;
        self.queue.stats.tx_frames.inc();
        self.queue.kick()
    }
}

impl Drop for ResponseFrame<'_> {
    fn drop(&mut self) {
        if !self.sent {
            let _ = self.queue.free.push_back(self.offset);
        }
    }
}

/// Everything provisioned by setup. Dropping it unmaps the rings, releases
/// the frame pool, and closes the socket.
struct DataPath {
    umem: FramePool,
    fill: ProducerRing<u64>,
    completion: ConsumerRing<u64>,
    rx: ConsumerRing<XdpDesc>,
    tx: TxQueue,
    socket: XdpSocket,
}

pub struct Reactor {
    config: ReactorConfig,
    handler: Option<PacketHandler>,
    redirect: Option<RedirectProgram>,
    datapath: Option<DataPath>,
    stats: Arc<ReactorStats>,
    latency: LatencyProbe,
}

impl Reactor {
    pub fn new(config: ReactorConfig) -> Self {
        Self {
            config,
            handler: None,
            redirect: None,
            datapath: None,
            stats: Arc::new(ReactorStats::new()),
            latency: LatencyProbe::new(LATENCY_SAMPLE_INTERVAL),
        }
    }

    #[inline(always)]
    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    #[inline(always)]
    pub fn stats(&self) -> &ReactorStats {
        &self.stats
    }

    /// Whether setup has completed and not been torn down.
    #[inline(always)]
    pub fn is_set_up(&self) -> bool {
        self.datapath.is_some()
    }

    /// Register the packet handler. Must happen before the loop starts; the
    /// handler is the single owner of per-packet application logic.
    pub fn on_packet<F>(&mut self, handler: F)
    where
        F: FnMut(Packet<'_>, &mut TxQueue) -> Result<(), PacketError> + Send + 'static,
    {
        self.handler = Some(Box::new(handler));
    }

    /// Provision the full data path. Any failing step is fatal; everything
    /// already provisioned is released before returning the error.
    pub fn setup(&mut self) -> Result<(), SetupError> {
        self.config.umem.validate()?;
        if self.config.umem.tx_size as usize > TX_POOL_CAPACITY {
            return Err(SetupError::TxPoolCapacity {
                size: self.config.umem.tx_size,
                capacity: TX_POOL_CAPACITY,
            });
        }

        xdp::raise_memlock_limit()?;
        let ifindex = xdp::resolve_ifindex(&self.config.interface)?;

        let mut redirect = RedirectProgram::load_and_attach(
            &self.config.program_path,
            &self.config.program_name,
            &self.config.interface,
        )?;

        let socket = XdpSocket::open()?;
        let umem = FramePool::allocate(self.config.umem.frame_count, self.config.umem.frame_size)?;
        socket.register_umem(&umem)?;
        socket.configure_ring_sizes(&self.config.umem)?;

        let offsets = socket.mmap_offsets()?;
        let mut fill = socket.map_fill_ring(self.config.umem.fill_size, &offsets.fr)?;
        let completion =
            socket.map_completion_ring(self.config.umem.completion_size, &offsets.cr)?;
        let rx = socket.map_rx_ring(self.config.umem.rx_size, &offsets.rx)?;
        let tx_ring = socket.map_tx_ring(self.config.umem.tx_size, &offsets.tx)?;

        // Seed the fill ring with the first fill_size frames so the kernel
        // has receive buffers from the moment we bind.
        let frame_size = u64::from(self.config.umem.frame_size);
        let seeded = self.config.umem.fill_size;
        let Some(start) = fill.reserve(seeded) else {
            return Err(SetupError::Os {
                op: "fill ring seed",
                errno: libc::ENOSPC,
            });
        };
        for i in 0..seeded {
            fill.write(start.wrapping_add(i), u64::from(i) * frame_size);
        }
        fill.publish(seeded);

        // The next tx_size frames are the tx pool; they never enter the
        // fill ring, so the two ranges stay disjoint.
        let tx_pool_base = u64::from(seeded) * frame_size;
        let tx = TxQueue::new(
            tx_ring,
            (0..self.config.umem.tx_size).map(|i| tx_pool_base + u64::from(i) * frame_size),
            umem.base_ptr(),
            umem.frame_size(),
            socket.fd(),
            Arc::clone(&self.stats),
        );

        socket.bind(ifindex, self.config.queue_id)?;
        redirect.register_socket(self.config.socket_index, socket.fd())?;

        info!(
            "reactor up: iface={} queue={} slot={} frames={}x{}B fill/comp/rx/tx={}/{}/{}/{}",
            self.config.interface,
            self.config.queue_id,
            self.config.socket_index,
            self.config.umem.frame_count,
            self.config.umem.frame_size,
            self.config.umem.fill_size,
            self.config.umem.completion_size,
            self.config.umem.rx_size,
            self.config.umem.tx_size,
        );

        self.redirect = Some(redirect);
        self.datapath = Some(DataPath {
            umem,
            fill,
            completion,
            rx,
            tx,
            socket,
        });
        Ok(())
    }

    /// One non-blocking processing step: at most one rx descriptor, then a
    /// completion drain. Returns whether any work was done.
    pub fn run_once(&mut self) -> bool {
        let Some(dp) = self.datapath.as_mut() else {
            return false;
        };
        let mut did_work = false;

        // Never dequeue rx without a fill slot to recycle into; under a
        // burst with a saturated fill ring the descriptor stays queued until
        // capacity is re-offered.
        if dp.fill.free_capacity() > 0 {
            if let Some(desc) = dp.rx.pop() {
                did_work = true;
                self.stats.rx_frames.inc();
                match dp.umem.frame(desc.addr, desc.len) {
                    Some(bytes) => {
                        if let Some(handler) = self.handler.as_mut() {
                            let clock = self.latency.start_sample();
                            let packet = Packet::new(bytes);
                            if let Err(err) = handler(packet, &mut dp.tx) {
                                self.stats.handler_errors.inc();
                                warn!("packet handler error: {err}");
                            }
                            if let Some(clock) = clock {
                                debug!("handler latency: {} ns", clock.stop().nanos);
                            }
                        }
                    }
                    None => {
                        warn!(
                            "rx descriptor outside frame pool: addr={} len={}",
                            desc.addr, desc.len
                        );
                    }
                }
                let recycled = dp.fill.push(desc.addr);
                debug_assert!(recycled, "fill capacity was checked before rx dequeue");
                self.stats.fill_recycled.inc();
            }
        }

        // Return completed tx frames to the free list.
        let completed = dp.completion.available();
        for _ in 0..completed {
            if let Some(offset) = dp.completion.pop() {
                dp.tx.release(offset);
                self.stats.completions.inc();
                did_work = true;
            }
        }

        // Order this tick's ring effects before the next.
        fence(Ordering::SeqCst);
        did_work
    }

    /// Detach the classifier and release the data path. Safe to call any
    /// number of times, at any stage of initialization.
    pub fn shutdown(&mut self) {
        if let Some(redirect) = self.redirect.take() {
            drop(redirect);
            info!("classifier detached from {}", self.config.interface);
        }
        if let Some(dp) = self.datapath.take() {
            debug!("closing socket fd {}", dp.socket.fd());
            drop(dp);
            info!("socket closed, rings and frame pool released");
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::sim::spsc_pair;

    #[test]
    fn run_once_without_setup_is_a_prompt_no_op() {
        let mut reactor = Reactor::new(ReactorConfig::default());
        reactor.on_packet(|_packet, _tx| panic!("handler must not run without a data path"));
        assert!(!reactor.run_once());
        assert_eq!(reactor.stats().rx_frames.get(), 0);
    }

    #[test]
    fn shutdown_is_idempotent_on_an_uninitialized_reactor() {
        let mut reactor = Reactor::new(ReactorConfig::default());
        assert!(!reactor.is_set_up());
        reactor.shutdown();
        reactor.shutdown();
        assert!(!reactor.is_set_up());
        // Drop runs shutdown a third time.
    }

    #[test]
    fn default_config_matches_the_deployment_shape() {
        let config = ReactorConfig::default();
        assert_eq!(config.interface, "lo");
        assert_eq!(config.queue_id, 0);
        assert_eq!(config.program_name, "xsk_pass");
        assert_eq!(config.socket_index, 0);
        assert!(config.umem.tx_size as usize <= TX_POOL_CAPACITY);
    }

    fn test_tx_queue(
        frames: u32,
        ring_size: u32,
    ) -> (TxQueue, crate::ring::ConsumerRing<XdpDesc>, crate::frame::FramePool) {
        let pool = FramePool::allocate(frames, 2048).expect("test pool");
        let (ring, kernel_side) = spsc_pair::<XdpDesc>(ring_size);
        let tx = TxQueue::new(
            ring,
            (0..u64::from(frames)).map(|i| i * 2048),
            pool.base_ptr(),
            pool.frame_size(),
            -1, // no real socket behind the kick
            Arc::new(ReactorStats::new()),
        );
        (tx, kernel_side, pool)
    }

    #[test]
    fn dropping_an_unsent_response_frame_returns_its_slot() {
        let (mut tx, _kernel, _pool) = test_tx_queue(4, 8);
        assert_eq!(tx.free_frames(), 4);
        {
            let mut frame = tx.reserve().expect("free frame");
            frame.append_bytes(&[1, 2, 3]).unwrap();
            // Dropped without send.
        }
        assert_eq!(tx.free_frames(), 4);
    }

    #[test]
    fn send_publishes_descriptor_and_surfaces_kick_failure() {
        let (mut tx, mut kernel, _pool) = test_tx_queue(4, 8);
        let mut frame = tx.reserve().expect("free frame");
        frame.append_bytes(&[0xaa; 42]).unwrap();
        // The descriptor is published even though the kick fails on the
        // closed fd; the kernel-side view must see it.
        let err = frame.send().unwrap_err();
        assert!(matches!(err, TxError::Kick(errno) if errno == libc::EBADF));
        drop(frame);
        assert_eq!(tx.free_frames(), 3, "sent frame must stay in flight");

        let desc = kernel.pop().expect("published descriptor");
        assert_eq!(desc.addr, 0);
        assert_eq!(desc.len, 42);

        // The completion path hands the offset back.
        tx.release(desc.addr);
        assert_eq!(tx.free_frames(), 4);
    }

    #[test]
    fn full_tx_ring_fails_send_and_preserves_the_frame() {
        let (mut tx, _kernel, _pool) = test_tx_queue(8, 4);
        // Saturate the ring: the simulated kernel never consumes.
        for _ in 0..4 {
            let mut frame = tx.reserve().expect("free frame");
            frame.append_bytes(&[0; 10]).unwrap();
            let _ = frame.send();
        }
        assert_eq!(tx.free_frames(), 4);

        let mut frame = tx.reserve().expect("free frame");
        frame.append_bytes(&[0; 10]).unwrap();
        assert!(matches!(frame.send(), Err(TxError::RingFull)));
        drop(frame);
        // The failed frame's slot is back in the free list.
        assert_eq!(tx.free_frames(), 4);
    }

    #[test]
    fn reserve_exhausts_and_recovers_with_completions() {
        let (mut tx, _kernel, _pool) = test_tx_queue(2, 8);
        let offsets: Vec<u64> = (0..2)
            .map(|_| {
                let mut frame = tx.reserve().expect("free frame");
                frame.append_bytes(&[1]).unwrap();
                let offset = frame.offset;
                let _ = frame.send();
                offset
            })
            .collect();
        assert!(tx.reserve().is_none(), "all tx frames in flight");

        for offset in offsets {
            tx.release(offset);
        }
        assert!(tx.reserve().is_some());
    }
}
