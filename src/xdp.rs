//! AF_XDP socket plumbing.
//!
//! AF_XDP sockets bypass the kernel's `sk_buff` receive path: the driver
//! DMA-writes frames straight into a userspace memory region (UMEM) and the
//! two sides trade frame ownership through four mmap'd rings:
//!
//!   NIC DMA → UMEM frame pool → fill ring        (user hands free frames in)
//!                             → rx ring          (kernel delivers received frames)
//!                             → tx ring          (user submits frames to send)
//!                             → completion ring  (kernel returns sent frames)
//!
//! This module owns the raw socket ABI: option constants, the `repr(C)`
//! structs the kernel expects, UMEM registration, ring sizing, the
//! `XDP_MMAP_OFFSETS` dance, and the per-ring mmaps that become the typed
//! views in [`crate::ring`].

use std::ffi::CString;
use std::os::fd::RawFd;
use std::sync::atomic::AtomicU32;

use crate::error::SetupError;
use crate::frame::FramePool;
use crate::ring::{ConsumerRing, ProducerRing, XdpDesc};

pub const AF_XDP: i32 = 44;
pub const SOL_XDP: i32 = 283;

// SOL_XDP socket options.
const XDP_MMAP_OFFSETS: i32 = 1;
const XDP_RX_RING: i32 = 2;
const XDP_TX_RING: i32 = 3;
const XDP_UMEM_REG: i32 = 4;
const XDP_UMEM_FILL_RING: i32 = 5;
const XDP_UMEM_COMPLETION_RING: i32 = 6;

// mmap pgoff cookies selecting which ring a map call refers to.
const XDP_PGOFF_RX_RING: i64 = 0;
const XDP_PGOFF_TX_RING: i64 = 0x8000_0000;
const XDP_UMEM_PGOFF_FILL_RING: i64 = 0x1_0000_0000;
const XDP_UMEM_PGOFF_COMPLETION_RING: i64 = 0x1_8000_0000;

/// UMEM registration descriptor (`struct xdp_umem_reg`).
#[repr(C)]
struct XdpUmemReg {
    addr: u64,
    len: u64,
    chunk_size: u32,
    headroom: u32,
    flags: u32,
}

/// Per-ring field offsets within that ring's mmap (`struct xdp_ring_offset`).
/// The `flags` member requires a 5.4+ kernel, which AF_XDP deployments have.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct XdpRingOffset {
    pub producer: u64,
    pub consumer: u64,
    pub desc: u64,
    pub flags: u64,
}

/// `struct xdp_mmap_offsets`: one offset block per ring.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct XdpMmapOffsets {
    pub rx: XdpRingOffset,
    pub tx: XdpRingOffset,
    pub fr: XdpRingOffset,
    pub cr: XdpRingOffset,
}

/// `struct sockaddr_xdp`.
#[repr(C)]
struct SockaddrXdp {
    sxdp_family: u16,
    sxdp_flags: u16,
    sxdp_ifindex: u32,
    sxdp_queue_id: u32,
    sxdp_shared_umem_fd: u32,
}

const _: () = assert!(core::mem::size_of::<SockaddrXdp>() == 16);
const _: () = assert!(core::mem::size_of::<XdpMmapOffsets>() == 128);

/// UMEM geometry and ring sizes. All ring sizes must be powers of two.
#[derive(Clone, Copy, Debug)]
pub struct UmemConfig {
    /// Number of frame slots in the pool.
    pub frame_count: u32,
    /// Size of each frame slot in bytes; must cover MTU plus L2 headers.
    pub frame_size: u32,
    pub fill_size: u32,
    pub completion_size: u32,
    pub rx_size: u32,
    pub tx_size: u32,
}

impl Default for UmemConfig {
    fn default() -> Self {
        Self {
            frame_count: 131_072,
            frame_size: 2048,
            fill_size: 1024,
            completion_size: 1024,
            rx_size: 1024,
            tx_size: 1024,
        }
    }
}

impl UmemConfig {
    /// Total pool size in bytes.
    #[inline(always)]
    pub fn total_size(&self) -> usize {
        self.frame_count as usize * self.frame_size as usize
    }

    pub fn validate(&self) -> Result<(), SetupError> {
        for size in [
            self.fill_size,
            self.completion_size,
            self.rx_size,
            self.tx_size,
        ] {
            if !size.is_power_of_two() {
                return Err(SetupError::RingSize(size));
            }
        }
        // The fill seed and the reserved tx pool partition the frame range;
        // both must fit.
        let needed = u64::from(self.fill_size) + u64::from(self.tx_size);
        if u64::from(self.frame_count) < needed {
            return Err(SetupError::FrameBudget {
                frames: self.frame_count,
                needed,
            });
        }
        Ok(())
    }
}

/// Raise the locked-memory rlimit to infinity so UMEM pinning and BPF map
/// creation cannot fail on the default limit.
pub fn raise_memlock_limit() -> Result<(), SetupError> {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    if unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) } != 0 {
        return Err(SetupError::os("setrlimit(RLIMIT_MEMLOCK)"));
    }
    Ok(())
}

/// Resolve an interface name to its kernel index.
pub fn resolve_ifindex(name: &str) -> Result<u32, SetupError> {
    let c_name =
        CString::new(name).map_err(|_| SetupError::InterfaceNotFound(name.to_string()))?;
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if index == 0 {
        return Err(SetupError::InterfaceNotFound(name.to_string()));
    }
    Ok(index)
}

/// An open AF_XDP socket. Ring maps borrow its fd; the fd closes on drop.
pub struct XdpSocket {
    fd: RawFd,
}

unsafe impl Send for XdpSocket {}

impl XdpSocket {
    pub fn open() -> Result<Self, SetupError> {
        let fd = unsafe { libc::socket(AF_XDP, libc::SOCK_RAW, 0) };
        if fd < 0 {
            return Err(SetupError::os("socket(AF_XDP)"));
        }
        Ok(Self { fd })
    }

    #[inline(always)]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Register the frame pool as this socket's UMEM.
    pub fn register_umem(&self, pool: &FramePool) -> Result<(), SetupError> {
        let reg = XdpUmemReg {
            addr: pool.base_ptr() as u64,
            len: pool.len() as u64,
            chunk_size: pool.frame_size(),
            headroom: 0,
            flags: 0,
        };
        self.set_option(
            XDP_UMEM_REG,
            &reg as *const _ as *const libc::c_void,
            core::mem::size_of::<XdpUmemReg>(),
            "setsockopt(XDP_UMEM_REG)",
        )
    }

    /// Size all four rings. The kernel allocates them on the next mmap.
    pub fn configure_ring_sizes(&self, config: &UmemConfig) -> Result<(), SetupError> {
        self.set_ring_size(XDP_UMEM_FILL_RING, config.fill_size, "setsockopt(XDP_UMEM_FILL_RING)")?;
        self.set_ring_size(
            XDP_UMEM_COMPLETION_RING,
            config.completion_size,
            "setsockopt(XDP_UMEM_COMPLETION_RING)",
        )?;
        self.set_ring_size(XDP_RX_RING, config.rx_size, "setsockopt(XDP_RX_RING)")?;
        self.set_ring_size(XDP_TX_RING, config.tx_size, "setsockopt(XDP_TX_RING)")?;
        Ok(())
    }

    /// Ask the kernel where each ring's counters and descriptor array live
    /// within that ring's mmap.
    pub fn mmap_offsets(&self) -> Result<XdpMmapOffsets, SetupError> {
        let mut offsets = XdpMmapOffsets::default();
        let mut optlen = core::mem::size_of::<XdpMmapOffsets>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockopt(
                self.fd,
                SOL_XDP,
                XDP_MMAP_OFFSETS,
                &mut offsets as *mut _ as *mut libc::c_void,
                &mut optlen,
            )
        };
        if rc != 0 {
            return Err(SetupError::os("getsockopt(XDP_MMAP_OFFSETS)"));
        }
        Ok(offsets)
    }

    pub fn map_fill_ring(
        &self,
        size: u32,
        offsets: &XdpRingOffset,
    ) -> Result<ProducerRing<u64>, SetupError> {
        unsafe {
            self.map_producer_ring(size, offsets, XDP_UMEM_PGOFF_FILL_RING, "mmap(fill ring)")
        }
    }

    pub fn map_completion_ring(
        &self,
        size: u32,
        offsets: &XdpRingOffset,
    ) -> Result<ConsumerRing<u64>, SetupError> {
        unsafe {
            self.map_consumer_ring(
                size,
                offsets,
                XDP_UMEM_PGOFF_COMPLETION_RING,
                "mmap(completion ring)",
            )
        }
    }

    pub fn map_rx_ring(
        &self,
        size: u32,
        offsets: &XdpRingOffset,
    ) -> Result<ConsumerRing<XdpDesc>, SetupError> {
        unsafe { self.map_consumer_ring(size, offsets, XDP_PGOFF_RX_RING, "mmap(rx ring)") }
    }

    pub fn map_tx_ring(
        &self,
        size: u32,
        offsets: &XdpRingOffset,
    ) -> Result<ProducerRing<XdpDesc>, SetupError> {
        unsafe { self.map_producer_ring(size, offsets, XDP_PGOFF_TX_RING, "mmap(tx ring)") }
    }

    /// Bind to one hardware queue of one interface. After this the kernel
    /// starts honoring the fill ring.
    pub fn bind(&self, ifindex: u32, queue_id: u32) -> Result<(), SetupError> {
        let addr = SockaddrXdp {
            sxdp_family: AF_XDP as u16,
            sxdp_flags: 0,
            sxdp_ifindex: ifindex,
            sxdp_queue_id: queue_id,
            sxdp_shared_umem_fd: 0,
        };
        let rc = unsafe {
            libc::bind(
                self.fd,
                &addr as *const _ as *const libc::sockaddr,
                core::mem::size_of::<SockaddrXdp>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(SetupError::os("bind(AF_XDP)"));
        }
        Ok(())
    }

    fn set_ring_size(&self, option: i32, size: u32, op: &'static str) -> Result<(), SetupError> {
        let value = size as i32;
        self.set_option(
            option,
            &value as *const _ as *const libc::c_void,
            core::mem::size_of::<i32>(),
            op,
        )
    }

    fn set_option(
        &self,
        option: i32,
        value: *const libc::c_void,
        len: usize,
        op: &'static str,
    ) -> Result<(), SetupError> {
        let rc = unsafe {
            libc::setsockopt(self.fd, SOL_XDP, option, value, len as libc::socklen_t)
        };
        if rc != 0 {
            return Err(SetupError::os(op));
        }
        Ok(())
    }

    /// Map one ring region and carve out its counter and descriptor
    /// pointers. The map covers `offsets.desc` bytes of header plus the
    /// descriptor array.
    unsafe fn map_region<T>(
        &self,
        size: u32,
        offsets: &XdpRingOffset,
        pgoff: i64,
        op: &'static str,
    ) -> Result<RingPtrs<T>, SetupError> {
        let map_len = offsets.desc as usize + size as usize * core::mem::size_of::<T>();
        let base = libc::mmap(
            core::ptr::null_mut(),
            map_len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_POPULATE,
            self.fd,
            pgoff as libc::off_t,
        );
        if base == libc::MAP_FAILED {
            return Err(SetupError::os(op));
        }
        let bytes = base as *mut u8;
        Ok(RingPtrs {
            base,
            map_len,
            producer: bytes.add(offsets.producer as usize) as *mut AtomicU32,
            consumer: bytes.add(offsets.consumer as usize) as *mut AtomicU32,
            desc: bytes.add(offsets.desc as usize) as *mut T,
        })
    }

    unsafe fn map_producer_ring<T: Copy>(
        &self,
        size: u32,
        offsets: &XdpRingOffset,
        pgoff: i64,
        op: &'static str,
    ) -> Result<ProducerRing<T>, SetupError> {
        let ptrs = self.map_region::<T>(size, offsets, pgoff, op)?;
        Ok(ProducerRing::from_kernel_map(
            ptrs.base,
            ptrs.map_len,
            ptrs.producer,
            ptrs.consumer,
            ptrs.desc,
            size,
        ))
    }

    unsafe fn map_consumer_ring<T: Copy>(
        &self,
        size: u32,
        offsets: &XdpRingOffset,
        pgoff: i64,
        op: &'static str,
    ) -> Result<ConsumerRing<T>, SetupError> {
        let ptrs = self.map_region::<T>(size, offsets, pgoff, op)?;
        Ok(ConsumerRing::from_kernel_map(
            ptrs.base,
            ptrs.map_len,
            ptrs.producer,
            ptrs.consumer,
            ptrs.desc,
            size,
        ))
    }
}

struct RingPtrs<T> {
    base: *mut libc::c_void,
    map_len: usize,
    producer: *mut AtomicU32,
    consumer: *mut AtomicU32,
    desc: *mut T,
}

impl Drop for XdpSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
