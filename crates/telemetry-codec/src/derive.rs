use types::Sample;

/// `power / voltage`, unavailable when either input is missing or voltage is zero.
pub fn ac_current(ac_power_w: Option<f64>, ac_voltage: Option<f64>) -> Option<f64> {
    match (ac_power_w, ac_voltage) {
        (Some(power), Some(voltage)) if voltage != 0.0 => Some(power / voltage),
        _ => None,
    }
}

/// Recomputes every derived field of `sample` from its own readings.
pub fn apply(sample: &mut Sample) {
    sample.extracted.phase_a.ac_current = ac_current(
        sample.important.ac_power_w,
        sample.extracted.phase_a.ac_voltage,
    );
}
