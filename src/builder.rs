use std::net::Ipv4Addr;

use thiserror::Error;
use zerocopy::AsBytes;

use crate::packet::Packet;
use crate::wire::{EthernetHdr, Ipv4Hdr, UdpHdr};

/// Bounded append-only builder that lays a response down into a frame slot.
///
/// The builder never writes past the slot: every append checks remaining
/// capacity first and fails without touching the buffer. Header contents
/// (zeroed MACs, fixed IPv4 identity, zero UDP checksum) come from the
/// constructors in [`crate::wire`].
pub struct FrameBuilder<'a> {
    buf: &'a mut [u8],
    len: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("frame overflow: appending {needed} bytes with {remaining} of {capacity} left")]
    Overflow {
        needed: usize,
        remaining: usize,
        capacity: usize,
    },
}

impl<'a> FrameBuilder<'a> {
    #[inline]
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0 }
    }

    /// Bytes written so far.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.len
    }

    /// 14-byte Ethernet header with zeroed MAC addresses.
    pub fn append_ethernet(&mut self, ethertype: u16) -> Result<(), BuildError> {
        self.append_raw(EthernetHdr::zero_mac(ethertype).as_bytes())
    }

    /// 20-byte IPv4/UDP header; `payload_len` counts everything after it
    /// (UDP header included). The header checksum is computed, the rest of
    /// the identity fields are fixed.
    pub fn append_ipv4(
        &mut self,
        saddr: Ipv4Addr,
        daddr: Ipv4Addr,
        payload_len: u16,
    ) -> Result<(), BuildError> {
        self.append_raw(Ipv4Hdr::for_udp(saddr, daddr, payload_len).as_bytes())
    }

    /// 8-byte UDP header; `payload_len` counts the data after it. Checksum
    /// stays zero (valid for IPv4; offload is not assumed).
    pub fn append_udp(
        &mut self,
        sport: u16,
        dport: u16,
        payload_len: u16,
    ) -> Result<(), BuildError> {
        self.append_raw(UdpHdr::new(sport, dport, payload_len).as_bytes())
    }

    /// Copy `src` verbatim.
    pub fn append_bytes(&mut self, src: &[u8]) -> Result<(), BuildError> {
        self.append_raw(src)
    }

    /// Read-only view over everything built so far.
    #[inline]
    pub fn as_packet(&self) -> Packet<'_> {
        Packet::new(&self.buf[..self.len])
    }

    fn append_raw(&mut self, bytes: &[u8]) -> Result<(), BuildError> {
        let remaining = self.remaining();
        if bytes.len() > remaining {
            return Err(BuildError::Overflow {
                needed: bytes.len(),
                remaining,
                capacity: self.buf.len(),
            });
        }
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{ETHERTYPE_IPV4, IPPROTO_UDP};
    use zerocopy::FromBytes;

    #[test]
    fn builds_a_complete_udp_frame() {
        let payload = b"value";
        let mut slot = [0u8; 2048];
        let mut builder = FrameBuilder::new(&mut slot);

        let udp_len = (UdpHdr::SIZE + payload.len()) as u16;
        builder.append_ethernet(ETHERTYPE_IPV4).unwrap();
        builder
            .append_ipv4(
                Ipv4Addr::new(10, 0, 0, 2),
                Ipv4Addr::new(10, 0, 0, 1),
                udp_len,
            )
            .unwrap();
        builder
            .append_udp(11211, 40000, payload.len() as u16)
            .unwrap();
        builder.append_bytes(payload).unwrap();

        assert_eq!(
            builder.len(),
            EthernetHdr::SIZE + Ipv4Hdr::SIZE + UdpHdr::SIZE + payload.len()
        );

        let packet = builder.as_packet();
        let bytes = packet.bytes();
        let eth = EthernetHdr::ref_from(&bytes[..EthernetHdr::SIZE]).unwrap();
        assert_eq!(eth.ethertype(), ETHERTYPE_IPV4);
        assert_eq!(eth.dst_mac, [0; 6]);

        let ip =
            Ipv4Hdr::ref_from(&bytes[EthernetHdr::SIZE..EthernetHdr::SIZE + Ipv4Hdr::SIZE])
                .unwrap();
        assert_eq!(ip.protocol(), IPPROTO_UDP);
        assert_eq!(ip.total_len() as usize, Ipv4Hdr::SIZE + UdpHdr::SIZE + payload.len());
        assert_eq!(ip.saddr(), Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(ip.daddr(), Ipv4Addr::new(10, 0, 0, 1));
        assert_ne!(ip.checksum(), 0);

        let udp_off = EthernetHdr::SIZE + Ipv4Hdr::SIZE;
        let udp = UdpHdr::ref_from(&bytes[udp_off..udp_off + UdpHdr::SIZE]).unwrap();
        assert_eq!(udp.sport(), 11211);
        assert_eq!(udp.dport(), 40000);
        assert_eq!(udp.len() as usize, UdpHdr::SIZE + payload.len());

        assert_eq!(&bytes[udp_off + UdpHdr::SIZE..], payload);
    }

    #[test]
    fn overflow_is_rejected_and_leaves_state_intact() {
        let mut slot = [0u8; 16];
        let mut builder = FrameBuilder::new(&mut slot);
        builder.append_bytes(&[0xaa; 10]).unwrap();

        let err = builder.append_bytes(&[0xbb; 7]).unwrap_err();
        assert_eq!(
            err,
            BuildError::Overflow {
                needed: 7,
                remaining: 6,
                capacity: 16,
            }
        );
        // Failed append must not have written anything.
        assert_eq!(builder.len(), 10);
        assert_eq!(builder.as_packet().bytes(), &[0xaa; 10]);

        builder.append_bytes(&[0xbb; 6]).unwrap();
        assert_eq!(builder.remaining(), 0);
    }

    #[test]
    fn ethernet_header_does_not_fit_in_a_tiny_slot() {
        let mut slot = [0u8; 10];
        let mut builder = FrameBuilder::new(&mut slot);
        assert!(builder.append_ethernet(ETHERTYPE_IPV4).is_err());
        assert_eq!(builder.len(), 0);
    }
}
