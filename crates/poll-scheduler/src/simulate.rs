use chrono::NaiveDateTime;
use rand::Rng;
use types::Sample;

/// Synthetic reading for a device with no configured id. AC current is left
/// for the calculator.
pub fn sample<R: Rng + ?Sized>(rng: &mut R, timestamp: NaiveDateTime) -> Sample {
    let mut sample = Sample::empty(timestamp);
    sample.important.reverse_energy_kwh = Some(rng.gen_range(0.0..10.0));
    sample.important.temp_c = Some(rng.gen_range(20.0..30.0));
    sample.important.ac_power_w = Some(rng.gen_range(50.0..200.0));

    let phase_a = &mut sample.extracted.phase_a;
    phase_a.ac_voltage = Some(rng.gen_range(220.0..240.0));
    phase_a.frequency = Some(rng.gen_range(49.9..50.1));

    let pv1_dc = &mut sample.extracted.pv1_dc;
    pv1_dc.dc_voltage = Some(rng.gen_range(250.0..350.0));
    pv1_dc.dc_current = Some(rng.gen_range(0.1..0.5));
    pv1_dc.dc_power = Some(rng.gen_range(50.0..150.0));
    sample
}
