use std::time::Instant;

/// Milliseconds since `start`, saturating.
pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Whether 0-based `step` publishes a preview when previewing every `every` steps.
pub(crate) fn is_preview_step(step: u32, every: u32) -> bool {
    every > 0 && (step + 1) % every == 0
}
