use std::net::Ipv4Addr;

use bytemuck::{Pod, Zeroable};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// POD wire headers designed for pointer casts on the receive path and
/// `as_bytes` copies on the build path.
///
/// All multi-byte fields are explicitly encoded as network-order (big-endian)
/// byte arrays, so every struct has alignment 1 and can be cast at any offset
/// within a frame. Accessor methods convert to host order.
pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const IPPROTO_UDP: u8 = 17;

/// Binary cache protocol magic bytes.
pub const MAGIC_REQUEST: u8 = 0x80;
pub const MAGIC_RESPONSE: u8 = 0x81;

/// The cache protocol caps keys at 250 bytes.
pub const MAX_KEY_LEN: usize = 250;

/// 14-byte Ethernet II header.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, FromBytes, AsBytes, FromZeroes)]
pub struct EthernetHdr {
    pub dst_mac: [u8; 6],
    pub src_mac: [u8; 6],
    ethertype_be: [u8; 2],
}

const _: () = assert!(core::mem::size_of::<EthernetHdr>() == 14);

impl EthernetHdr {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    /// Header with zeroed MAC addresses, which is what the response builder
    /// emits (loopback policy; real MACs are the driver's concern).
    #[inline]
    pub fn zero_mac(ethertype: u16) -> Self {
        Self {
            dst_mac: [0; 6],
            src_mac: [0; 6],
            ethertype_be: ethertype.to_be_bytes(),
        }
    }

    #[inline(always)]
    pub fn ethertype(&self) -> u16 {
        u16::from_be_bytes(self.ethertype_be)
    }
}

/// 20-byte IPv4 header, fixed IHL=5. Options are not modeled; the classifier
/// passes frames with IHL != 5 to the normal stack.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, FromBytes, AsBytes, FromZeroes)]
pub struct Ipv4Hdr {
    version_ihl: u8,
    tos: u8,
    total_len_be: [u8; 2],
    id_be: [u8; 2],
    frag_off_be: [u8; 2],
    ttl: u8,
    protocol: u8,
    checksum_be: [u8; 2],
    saddr_be: [u8; 4],
    daddr_be: [u8; 4],
}

const _: () = assert!(core::mem::size_of::<Ipv4Hdr>() == 20);

/// version=4, IHL=5.
const VERSION_IHL_NO_OPTIONS: u8 = 0x45;
/// Don't-fragment bit in the flags/fragment-offset word.
const FLAG_DF: u16 = 0x4000;

impl Ipv4Hdr {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    /// UDP datagram header with the response builder's fixed identity
    /// constants: id 0xdead, DF set, TTL 0x40, header checksum filled in.
    /// `payload_len` is the length of everything after this header.
    #[inline]
    pub fn for_udp(saddr: Ipv4Addr, daddr: Ipv4Addr, payload_len: u16) -> Self {
        let mut hdr = Self {
            version_ihl: VERSION_IHL_NO_OPTIONS,
            tos: 0,
            total_len_be: (Self::SIZE as u16 + payload_len).to_be_bytes(),
            id_be: 0xdead_u16.to_be_bytes(),
            frag_off_be: FLAG_DF.to_be_bytes(),
            ttl: 0x40,
            protocol: IPPROTO_UDP,
            checksum_be: [0; 2],
            saddr_be: saddr.octets(),
            daddr_be: daddr.octets(),
        };
        hdr.checksum_be = ipv4_header_checksum(hdr.as_bytes()).to_be_bytes();
        hdr
    }

    #[inline(always)]
    pub fn version(&self) -> u8 {
        self.version_ihl >> 4
    }

    /// Header length in 32-bit words.
    #[inline(always)]
    pub fn ihl(&self) -> u8 {
        self.version_ihl & 0x0f
    }

    #[inline(always)]
    pub fn total_len(&self) -> u16 {
        u16::from_be_bytes(self.total_len_be)
    }

    #[inline(always)]
    pub fn id(&self) -> u16 {
        u16::from_be_bytes(self.id_be)
    }

    #[inline(always)]
    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    #[inline(always)]
    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    #[inline(always)]
    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes(self.checksum_be)
    }

    #[inline(always)]
    pub fn saddr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.saddr_be)
    }

    #[inline(always)]
    pub fn daddr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.daddr_be)
    }
}

/// RFC 1071 ones'-complement checksum over a 20-byte IPv4 header whose
/// checksum field is still zero.
pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
    debug_assert_eq!(header.len() % 2, 0);
    let mut sum: u32 = 0;
    for word in header.chunks_exact(2) {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// 8-byte UDP header. The checksum stays zero: RFC 768 allows it for IPv4,
/// and the receive path never verifies it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, FromBytes, AsBytes, FromZeroes)]
pub struct UdpHdr {
    sport_be: [u8; 2],
    dport_be: [u8; 2],
    len_be: [u8; 2],
    checksum_be: [u8; 2],
}

const _: () = assert!(core::mem::size_of::<UdpHdr>() == 8);

impl UdpHdr {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    /// `payload_len` is the length of the data after this header.
    #[inline]
    pub fn new(sport: u16, dport: u16, payload_len: u16) -> Self {
        Self {
            sport_be: sport.to_be_bytes(),
            dport_be: dport.to_be_bytes(),
            len_be: (Self::SIZE as u16 + payload_len).to_be_bytes(),
            checksum_be: [0; 2],
        }
    }

    #[inline(always)]
    pub fn sport(&self) -> u16 {
        u16::from_be_bytes(self.sport_be)
    }

    #[inline(always)]
    pub fn dport(&self) -> u16 {
        u16::from_be_bytes(self.dport_be)
    }

    #[inline(always)]
    pub fn len(&self) -> u16 {
        u16::from_be_bytes(self.len_be)
    }

    #[inline(always)]
    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes(self.checksum_be)
    }
}

/// 24-byte binary cache protocol request header. The key follows the header
/// and `extras_len` bytes of extras; `body_len` covers extras + key + value.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, FromBytes, AsBytes, FromZeroes)]
pub struct CacheRequestHdr {
    pub magic: u8,
    pub opcode: u8,
    key_len_be: [u8; 2],
    pub extras_len: u8,
    pub data_type: u8,
    vbucket_id_be: [u8; 2],
    body_len_be: [u8; 4],
    opaque_be: [u8; 4],
    cas_be: [u8; 8],
}

const _: () = assert!(core::mem::size_of::<CacheRequestHdr>() == 24);

impl CacheRequestHdr {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    #[inline]
    pub fn request(opcode: u8, key_len: u16, extras_len: u8, body_len: u32) -> Self {
        Self {
            magic: MAGIC_REQUEST,
            opcode,
            key_len_be: key_len.to_be_bytes(),
            extras_len,
            data_type: 0,
            vbucket_id_be: [0; 2],
            body_len_be: body_len.to_be_bytes(),
            opaque_be: [0; 4],
            cas_be: [0; 8],
        }
    }

    #[inline(always)]
    pub fn key_len(&self) -> u16 {
        u16::from_be_bytes(self.key_len_be)
    }

    #[inline(always)]
    pub fn vbucket_id(&self) -> u16 {
        u16::from_be_bytes(self.vbucket_id_be)
    }

    #[inline(always)]
    pub fn body_len(&self) -> u32 {
        u32::from_be_bytes(self.body_len_be)
    }

    #[inline(always)]
    pub fn opaque(&self) -> u32 {
        u32::from_be_bytes(self.opaque_be)
    }

    #[inline(always)]
    pub fn cas(&self) -> u64 {
        u64::from_be_bytes(self.cas_be)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_header_constants_and_checksum() {
        let hdr = Ipv4Hdr::for_udp(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            13, // 8-byte UDP header + 5 payload bytes
        );
        assert_eq!(hdr.version(), 4);
        assert_eq!(hdr.ihl(), 5);
        assert_eq!(hdr.total_len(), 33);
        assert_eq!(hdr.id(), 0xdead);
        assert_eq!(hdr.ttl(), 0x40);
        assert_eq!(hdr.protocol(), IPPROTO_UDP);
        // Independently computed RFC 1071 sum for exactly this header.
        assert_eq!(hdr.checksum(), 0x481c);

        // Re-summing a header with the checksum in place must yield 0xffff.
        let mut sum: u32 = 0;
        for word in hdr.as_bytes().chunks_exact(2) {
            sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
        }
        while sum > 0xffff {
            sum = (sum & 0xffff) + (sum >> 16);
        }
        assert_eq!(sum, 0xffff);
    }

    #[test]
    fn ipv4_checksum_second_vector() {
        let hdr = Ipv4Hdr::for_udp(
            Ipv4Addr::new(192, 168, 69, 2),
            Ipv4Addr::new(192, 168, 69, 1),
            28,
        );
        assert_eq!(hdr.total_len(), 48);
        assert_eq!(hdr.checksum(), 0x50bb);
    }

    #[test]
    fn udp_header_lengths() {
        let hdr = UdpHdr::new(11211, 4096, 100);
        assert_eq!(hdr.sport(), 11211);
        assert_eq!(hdr.dport(), 4096);
        assert_eq!(hdr.len(), 108);
        assert_eq!(hdr.checksum(), 0);
    }

    #[test]
    fn cache_header_casts_back_from_wire_bytes() {
        let hdr = CacheRequestHdr::request(0x00, 5, 4, 9);
        let raw = bytemuck::bytes_of(&hdr);
        let parsed = CacheRequestHdr::ref_from(raw).expect("24-byte header must cast");
        assert_eq!(parsed.magic, MAGIC_REQUEST);
        assert_eq!(parsed.key_len(), 5);
        assert_eq!(parsed.extras_len, 4);
        assert_eq!(parsed.body_len(), 9);
        assert_eq!(parsed.cas(), 0);
    }

    #[test]
    fn ethernet_zero_mac() {
        let hdr = EthernetHdr::zero_mac(ETHERTYPE_IPV4);
        assert_eq!(hdr.dst_mac, [0; 6]);
        assert_eq!(hdr.src_mac, [0; 6]);
        assert_eq!(hdr.ethertype(), 0x0800);
    }
}
