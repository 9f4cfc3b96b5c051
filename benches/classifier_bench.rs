use std::net::Ipv4Addr;

use bytemuck::bytes_of;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use xsk_reactor::classifier::{classify, Verdict};
use xsk_reactor::hash::key_hash;
use xsk_reactor::wire::{
    CacheRequestHdr, EthernetHdr, Ipv4Hdr, UdpHdr, ETHERTYPE_ARP, ETHERTYPE_IPV4,
};

fn cache_request_frame(key: &[u8]) -> Vec<u8> {
    let udp_payload = CacheRequestHdr::SIZE + key.len();
    let mut frame = Vec::new();
    frame.extend_from_slice(bytes_of(&EthernetHdr::zero_mac(ETHERTYPE_IPV4)));
    frame.extend_from_slice(bytes_of(&Ipv4Hdr::for_udp(
        Ipv4Addr::new(10, 0, 0, 1),
        Ipv4Addr::new(10, 0, 0, 2),
        (UdpHdr::SIZE + udp_payload) as u16,
    )));
    frame.extend_from_slice(bytes_of(&UdpHdr::new(40000, 11211, udp_payload as u16)));
    frame.extend_from_slice(bytes_of(&CacheRequestHdr::request(
        0x00,
        key.len() as u16,
        0,
        key.len() as u32,
    )));
    frame.extend_from_slice(key);
    frame
}

fn bench_classifier(c: &mut Criterion) {
    let mut group = c.benchmark_group("classifier");

    let key = b"user:profile:12345";
    let redirect_frame = cache_request_frame(key);
    assert!(matches!(classify(&redirect_frame), Verdict::Redirect(_)));
    group.bench_function("classify_redirect", |b| {
        b.iter(|| classify(black_box(&redirect_frame)))
    });

    let mut arp_frame = Vec::new();
    arp_frame.extend_from_slice(bytes_of(&EthernetHdr::zero_mac(ETHERTYPE_ARP)));
    arp_frame.extend_from_slice(&[0u8; 46]);
    group.bench_function("classify_pass", |b| {
        b.iter(|| classify(black_box(&arp_frame)))
    });

    group.bench_function("key_hash", |b| b.iter(|| key_hash(black_box(key))));

    group.finish();
}

criterion_group!(benches, bench_classifier);
criterion_main!(benches);
