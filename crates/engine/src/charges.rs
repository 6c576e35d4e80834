use std::time::Duration;
use wplacer_protocol::ChargeSnapshot;

/// Whole charges available right now.
pub fn available(charges: &ChargeSnapshot) -> u32 {
    charges.count.max(0.0).floor() as u32
}

/// The limit actually in force: at least one, at most the server maximum.
pub fn effective_limit(charges: &ChargeSnapshot, charge_limit: u32) -> u32 {
    charge_limit.clamp(1, charges.max.max(1))
}

/// How many pixels may be scheduled this cycle.
pub fn budget(charges: &ChargeSnapshot, charge_limit: u32) -> usize {
    available(charges).min(effective_limit(charges, charge_limit)) as usize
}

/// False once the configured limit is met; otherwise wait while the pending
/// pixels exceed the whole charges on hand.
pub fn should_wait(charges: &ChargeSnapshot, charge_limit: u32, pixels_needed: usize) -> bool {
    let have = available(charges);
    if have >= effective_limit(charges, charge_limit) {
        return false;
    }
    pixels_needed > have as usize
}

/// Time until `min(pixels_needed, limit)` whole charges are available.
pub fn wait_time(charges: &ChargeSnapshot, charge_limit: u32, pixels_needed: usize) -> Duration {
    let limit = u64::from(effective_limit(charges, charge_limit));
    time_to_accrue(charges, (pixels_needed as u64).min(limit))
}

/// Rough time until every one of `pixels` can have been placed.
pub fn eta(charges: &ChargeSnapshot, pixels: usize) -> Duration {
    time_to_accrue(charges, pixels as u64)
}

/// Time until `target` whole charges have accrued: the rest of the charge in
/// progress plus one full interval per further charge.
pub fn time_to_accrue(charges: &ChargeSnapshot, target: u64) -> Duration {
    let have = u64::from(available(charges));
    if target <= have {
        return Duration::ZERO;
    }
    let need = target - have;

    let fraction = charges.count.max(0.0).fract();
    let recharge = charges.recharge_time_ms as f64;
    let mut ms = ((1.0 - fraction) * recharge).ceil() as u64;
    if need > 1 {
        ms += (need - 1) * charges.recharge_time_ms;
    }
    Duration::from_millis(ms)
}
