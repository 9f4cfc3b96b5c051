use bytemuck::Pod;

use crate::hash::key_hash;
use crate::wire::{CacheRequestHdr, EthernetHdr, Ipv4Hdr, UdpHdr, ETHERTYPE_IPV4, IPPROTO_UDP};

/// Size of the destination map the kernel program redirects through. The
/// classifier reduces the key hash modulo this value, so two frames with the
/// same key always land on the same socket slot.
pub const MAX_DESTINATIONS: u32 = 64;

/// Outcome of classifying one raw frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Hand the frame to the normal network stack untouched.
    Pass,
    /// Discard the frame.
    Drop,
    /// Steer the frame to the given destination-map index.
    Redirect(u32),
}

/// Userspace rendition of the in-kernel classifier.
///
/// Walks Ethernet → IPv4 → UDP → cache request header → key under the same
/// bounds discipline the BPF verifier forces on the kernel program: every
/// field read is preceded by an explicit end check, and any failure degrades
/// to `Pass` so the frame flows to the normal stack unchanged. No allocation,
/// no per-flow state.
pub fn classify(frame: &[u8]) -> Verdict {
    let Some(eth) = header_at::<EthernetHdr>(frame, 0) else {
        return Verdict::Pass;
    };
    if eth.ethertype() != ETHERTYPE_IPV4 {
        return Verdict::Pass;
    }

    let mut offset = EthernetHdr::SIZE;
    let Some(ip) = header_at::<Ipv4Hdr>(frame, offset) else {
        return Verdict::Pass;
    };
    // Fast path assumes a 20-byte header; frames carrying IP options go to
    // the normal stack.
    if ip.ihl() != 5 {
        return Verdict::Pass;
    }
    if ip.protocol() != IPPROTO_UDP {
        return Verdict::Pass;
    }
    offset += Ipv4Hdr::SIZE;

    if header_at::<UdpHdr>(frame, offset).is_none() {
        return Verdict::Pass;
    }
    offset += UdpHdr::SIZE;

    let Some(request) = header_at::<CacheRequestHdr>(frame, offset) else {
        return Verdict::Pass;
    };
    offset += CacheRequestHdr::SIZE;

    let key_start = offset + usize::from(request.extras_len);
    let key_end = key_start + usize::from(request.key_len());
    let Some(key) = frame.get(key_start..key_end) else {
        return Verdict::Pass;
    };

    Verdict::Redirect(key_hash(key) % MAX_DESTINATIONS)
}

/// Destination-map index for a bare key, bypassing the header walk. Lets the
/// receive path double-check that a delivered frame was steered to the slot
/// this reactor serves.
#[inline(always)]
pub fn destination_index(key: &[u8]) -> u32 {
    key_hash(key) % MAX_DESTINATIONS
}

/// Bounds-checked header cast at `offset`. Returns `None` whenever the
/// header would read past the end of the frame.
#[inline(always)]
fn header_at<T: Pod>(frame: &[u8], offset: usize) -> Option<&T> {
    let end = offset.checked_add(core::mem::size_of::<T>())?;
    let bytes = frame.get(offset..end)?;
    bytemuck::try_from_bytes(bytes).ok()
}
