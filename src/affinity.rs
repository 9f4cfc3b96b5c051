/// Map a destination slot onto one of the online cores and pin the calling
/// thread there. Destination slots outnumber cores on small machines, so
/// slots wrap around the online set. Returns the chosen core id, `None`
/// when enumeration or pinning is unavailable.
pub fn pin_to_slot(slot: u32) -> Option<usize> {
    let cores = core_affinity::get_core_ids()?;
    if cores.is_empty() {
        return None;
    }
    let core = cores[slot as usize % cores.len()];
    core_affinity::set_for_current(core).then_some(core.id)
}

/// Cores visible to the scheduler, 0 when enumeration is unavailable.
pub fn online_cores() -> usize {
    core_affinity::get_core_ids().map_or(0, |cores| cores.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_slots_resolve_to_the_same_core() {
        let cores = online_cores();
        if cores == 0 {
            return;
        }
        // Slot `cores` wraps back onto slot 0's core, so both calls agree
        // (both pin to the same core, or both fail in a restricted sandbox).
        assert_eq!(pin_to_slot(0), pin_to_slot(cores as u32));
    }
}
