#![no_std]
#![no_main]

use aya_ebpf::{
    bindings::xdp_action,
    macros::{map, xdp},
    maps::XskMap,
    programs::XdpContext,
};

/// Destination map shared with userspace; each reactor publishes its socket
/// fd into the slot it serves.
#[map(name = "xsks_map")]
static XSKS_MAP: XskMap = XskMap::with_max_entries(64, 0);

/// Pass-through variant: steer every frame to slot 0. Frames the map cannot
/// redirect (no socket registered yet) flow to the normal stack.
#[xdp]
pub fn xsk_pass(ctx: XdpContext) -> u32 {
    let _ = ctx;
    XSKS_MAP.redirect(0, 0).unwrap_or(xdp_action::XDP_PASS)
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
