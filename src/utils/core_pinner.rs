use core_affinity::{get_core_ids, set_for_current, CoreId};

/// Pins the current thread to the given core if the OS reports it.
pub fn try_pin_core(core_id: usize) -> anyhow::Result<usize> {
    if let Some(core_ids) = get_core_ids() {
        if core_ids.iter().any(|c| c.id == core_id) && set_for_current(CoreId { id: core_id }) {
            return Ok(core_id);
        }
    }
    Err(anyhow::anyhow!("failed to pin core {core_id}"))
}
