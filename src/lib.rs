//! Kernel-bypass UDP packet processing over AF_XDP.
//!
//! An XDP classifier attached at the driver's receive hook inspects inbound
//! frames, hashes the cache-protocol key they carry, and steers each one to
//! a per-CPU AF_XDP socket. A userspace [`reactor::Reactor`] owns the shared
//! UMEM frame pool and the four SPSC rings, hands received frames zero-copy
//! to a registered handler, and re-injects built responses:
//!
//!   NIC → driver rx → classifier → rx ring → handler(Packet) → tx ring → NIC
//!                                     │                           │
//!                              fill ring (frame offsets in)  completion ring
//!                                                           (frame offsets back)
//!
//! Frame ownership moves only as offsets through the rings; a frame's bytes
//! are touched exclusively by whichever side holds its offset.

pub mod affinity;
pub mod builder;
pub mod classifier;
pub mod error;
pub mod frame;
pub mod hash;
pub mod packet;
pub mod reactor;
pub mod redirect;
pub mod ring;
pub mod runtime;
pub mod wire;
pub mod xdp;
