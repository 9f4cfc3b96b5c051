#![no_std]
#![no_main]

use core::mem;

use aya_ebpf::{
    bindings::xdp_action,
    macros::{map, xdp},
    maps::XskMap,
    programs::XdpContext,
};

const MAX_DESTINATIONS: u32 = 64;
/// The cache protocol caps keys at 250 bytes; longer claims are malformed
/// and also give the verifier a loop bound.
const MAX_KEY_LEN: usize = 250;

const ETHERTYPE_IPV4: u16 = 0x0800;
const IPPROTO_UDP: u8 = 17;

const HASH_SEED: u32 = 1;
const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

#[map(name = "xsks_map")]
static XSKS_MAP: XskMap = XskMap::with_max_entries(MAX_DESTINATIONS, 0);

#[repr(C)]
struct EthHdr {
    dst: [u8; 6],
    src: [u8; 6],
    ethertype: u16,
}

#[repr(C)]
struct IpHdr {
    version_ihl: u8,
    tos: u8,
    tot_len: u16,
    id: u16,
    frag_off: u16,
    ttl: u8,
    protocol: u8,
    check: u16,
    saddr: u32,
    daddr: u32,
}

#[repr(C)]
struct UdpHdr {
    source: u16,
    dest: u16,
    len: u16,
    check: u16,
}

#[repr(C)]
struct ReqHdr {
    magic: u8,
    opcode: u8,
    key_len: u16,
    extras_len: u8,
    data_type: u8,
    vbucket_id: u16,
    body_len: u32,
    opaque: u32,
    cas: u64,
}

/// Bounds-checked pointer into the frame; every read goes through this so
/// the verifier sees an explicit end check before each access.
#[inline(always)]
unsafe fn ptr_at<T>(ctx: &XdpContext, offset: usize) -> Option<*const T> {
    let start = ctx.data();
    let end = ctx.data_end();
    if start + offset + mem::size_of::<T>() > end {
        return None;
    }
    Some((start + offset) as *const T)
}

/// Hashing variant: walk Ethernet → IPv4 → UDP → cache request header, hash
/// the key, and steer the frame to `xsks_map[hash % MAX_DESTINATIONS]`. Any
/// bounds failure passes the frame to the normal stack.
#[xdp]
pub fn xsk_redirect(ctx: XdpContext) -> u32 {
    try_redirect(&ctx).unwrap_or(xdp_action::XDP_PASS)
}

#[inline(always)]
fn try_redirect(ctx: &XdpContext) -> Option<u32> {
    let eth = unsafe { &*ptr_at::<EthHdr>(ctx, 0)? };
    if u16::from_be(eth.ethertype) != ETHERTYPE_IPV4 {
        return None;
    }
    let mut offset = mem::size_of::<EthHdr>();

    let ip = unsafe { &*ptr_at::<IpHdr>(ctx, offset)? };
    if ip.version_ihl & 0x0f != 5 {
        return None;
    }
    if ip.protocol != IPPROTO_UDP {
        return None;
    }
    offset += mem::size_of::<IpHdr>();

    unsafe { ptr_at::<UdpHdr>(ctx, offset)? };
    offset += mem::size_of::<UdpHdr>();

    let request = unsafe { &*ptr_at::<ReqHdr>(ctx, offset)? };
    offset += mem::size_of::<ReqHdr>();

    let key_off = offset + request.extras_len as usize;
    let key_len = u16::from_be(request.key_len) as usize;
    if key_len > MAX_KEY_LEN {
        return None;
    }

    let hash = key_hash(ctx, key_off, key_len)?;
    XSKS_MAP.redirect(hash % MAX_DESTINATIONS, 0).ok()
}

/// MurmurHash3_x86_32 over the key bytes, accumulating little-endian blocks
/// one byte at a time so the loop stays verifier-bounded.
#[inline(always)]
fn key_hash(ctx: &XdpContext, key_off: usize, key_len: usize) -> Option<u32> {
    let mut h: u32 = HASH_SEED;
    let mut k: u32 = 0;
    let mut shift: u32 = 0;

    let mut i = 0;
    while i < MAX_KEY_LEN {
        if i >= key_len {
            break;
        }
        let byte = unsafe { *ptr_at::<u8>(ctx, key_off + i)? } as u32;
        k |= byte << shift;
        shift += 8;
        if shift == 32 {
            k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
            h ^= k;
            h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
            k = 0;
            shift = 0;
        }
        i += 1;
    }
    if shift != 0 {
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
    }

    h ^= key_len as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    Some(h)
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
