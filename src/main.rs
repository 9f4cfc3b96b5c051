#[cfg(target_os = "linux")]
mod daemon {
    use std::sync::atomic::{AtomicBool, Ordering};

    use log::{debug, info, warn};
    use zerocopy::FromBytes;

    use xsk_reactor::affinity;
    use xsk_reactor::classifier;
    use xsk_reactor::packet::Packet;
    use xsk_reactor::reactor::{PacketError, Reactor, ReactorConfig, TxQueue};
    use xsk_reactor::wire::{
        CacheRequestHdr, EthernetHdr, Ipv4Hdr, UdpHdr, ETHERTYPE_IPV4, IPPROTO_UDP,
    };

    static STOP: AtomicBool = AtomicBool::new(false);

    extern "C" fn on_signal(_sig: libc::c_int) {
        STOP.store(true, Ordering::Relaxed);
    }

    fn install_signal_handlers() {
        let handler = on_signal as extern "C" fn(libc::c_int);
        unsafe {
            libc::signal(libc::SIGINT, handler as libc::sighandler_t);
            libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
        }
    }

    fn config_from_env() -> ReactorConfig {
        let mut config = ReactorConfig::default();
        if let Ok(iface) = std::env::var("XSK_IFACE") {
            config.interface = iface;
        }
        if let Some(queue) = env_parse("XSK_QUEUE") {
            config.queue_id = queue;
        }
        if let Ok(path) = std::env::var("XSK_PROG") {
            config.program_path = path.into();
        }
        if let Ok(name) = std::env::var("XSK_PROG_NAME") {
            config.program_name = name;
        }
        if let Some(slot) = env_parse("XSK_SLOT") {
            config.socket_index = slot;
        }
        config
    }

    fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
        std::env::var(name).ok().and_then(|v| v.parse().ok())
    }

    /// Echo responder: replies to every steered UDP datagram with its own
    /// payload, addresses and ports swapped.
    fn echo_handler(packet: Packet<'_>, tx: &mut TxQueue) -> Result<(), PacketError> {
        let eth = EthernetHdr::ref_from_prefix(packet.bytes())
            .ok_or(PacketError::Truncated("ethernet"))?;
        if eth.ethertype() != ETHERTYPE_IPV4 {
            return Err(PacketError::NotUdp);
        }

        let ip_view = packet.trim_front(EthernetHdr::SIZE);
        let ip = Ipv4Hdr::ref_from_prefix(ip_view.bytes()).ok_or(PacketError::Truncated("ipv4"))?;
        if ip.ihl() != 5 || ip.protocol() != IPPROTO_UDP {
            return Err(PacketError::NotUdp);
        }

        let udp_view = ip_view.trim_front(Ipv4Hdr::SIZE);
        let udp = UdpHdr::ref_from_prefix(udp_view.bytes()).ok_or(PacketError::Truncated("udp"))?;
        let payload_view = udp_view.trim_front(UdpHdr::SIZE);
        let payload_len = usize::from(udp.len())
            .saturating_sub(UdpHdr::SIZE)
            .min(payload_view.len());
        let payload = &payload_view.bytes()[..payload_len];

        // Sanity-check the steering: the key of a well-formed request must
        // hash to the slot this reactor serves.
        if let Some(request) = CacheRequestHdr::ref_from_prefix(payload) {
            let key_start = CacheRequestHdr::SIZE + usize::from(request.extras_len);
            let key_end = key_start + usize::from(request.key_len());
            if let Some(key) = payload.get(key_start..key_end) {
                debug!(
                    "opcode {:#04x} key \"{}\" steers to slot {}",
                    request.opcode,
                    String::from_utf8_lossy(key),
                    classifier::destination_index(key),
                );
            }
        }

        let mut response = tx.reserve().ok_or(PacketError::NoTxFrame)?;
        response.append_ethernet(ETHERTYPE_IPV4)?;
        response.append_ipv4(
            ip.daddr(),
            ip.saddr(),
            (UdpHdr::SIZE + payload.len()) as u16,
        )?;
        response.append_udp(udp.dport(), udp.sport(), payload.len() as u16)?;
        response.append_bytes(payload)?;
        response.send()?;
        Ok(())
    }

    pub fn run() {
        env_logger::init();
        install_signal_handlers();

        let config = config_from_env();
        let slot = env_parse("XSK_CORE").unwrap_or(config.socket_index);
        match affinity::pin_to_slot(slot) {
            Some(core) => info!("reactor slot {slot} pinned to core {core}"),
            None => warn!(
                "CPU pinning for slot {slot} unavailable ({} cores online)",
                affinity::online_cores()
            ),
        }

        let mut reactor = Reactor::new(config);
        reactor.on_packet(echo_handler);
        if let Err(err) = reactor.setup() {
            log::error!("reactor setup failed: {err}");
            std::process::exit(1);
        }

        info!("processing on {} (ctrl-c to stop)", reactor.config().interface);
        let mut last_logged = 0u64;
        let mut idle_spins = 0u32;
        while !STOP.load(Ordering::Relaxed) {
            if reactor.run_once() {
                idle_spins = 0;
            } else {
                idle_spins += 1;
                if idle_spins >= 1024 {
                    idle_spins = 0;
                    std::thread::yield_now();
                } else {
                    std::hint::spin_loop();
                }
            }

            let snap = reactor.stats().snapshot();
            if snap.rx_frames != last_logged && snap.rx_frames % 100_000 == 0 {
                last_logged = snap.rx_frames;
                info!(
                    "stats: rx={} tx={} completions={} recycled={} handler_errors={}",
                    snap.rx_frames,
                    snap.tx_frames,
                    snap.completions,
                    snap.fill_recycled,
                    snap.handler_errors,
                );
            }
        }

        reactor.shutdown();
        let snap = reactor.stats().snapshot();
        info!(
            "final stats: rx={} tx={} completions={} recycled={} handler_errors={}",
            snap.rx_frames,
            snap.tx_frames,
            snap.completions,
            snap.fill_recycled,
            snap.handler_errors,
        );
    }
}

#[cfg(target_os = "linux")]
fn main() {
    daemon::run();
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("AF_XDP kernel bypass requires Linux.");
}
