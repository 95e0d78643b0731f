use std::ops::ControlFlow;
use std::sync::mpsc;

use anyhow::Result;
use waverave_airspy::Samples;

fn main() -> Result<()> {
    let airspy = waverave_airspy::open_first()?;

    // Configure: 10 MHz sample rate, mid-range linearity gain, and tune to
    // 915 MHz.
    airspy.set_sample_rate(10_000_000)?;
    airspy.set_linearity_gain(12)?;
    airspy.set_freq(915_000_000)?;

    // Sum up power over 64 blocks, then end the stream from the callback.
    let (done_tx, done_rx) = mpsc::channel();
    let mut blocks = 0;
    let mut count = 0;
    let mut pow_sum = 0.0;
    airspy.start(move |block| {
        if let Samples::ComplexF32(samples) = block.samples() {
            for x in samples {
                pow_sum += x.norm_sqr() as f64;
            }
            count += samples.len();
        }
        blocks += 1;
        if blocks < 64 {
            return ControlFlow::Continue(());
        }
        let _ = done_tx.send(pow_sum / count as f64);
        ControlFlow::Break(())
    })?;

    let mean_power = done_rx.recv()?;
    airspy.stop()?;

    // Print out our measurement
    let average_power = mean_power.log10() * 10.;
    println!("Average Power = {average_power} dbFS");
    Ok(())
}
