use std::io::Write;
use std::sync::{Arc, atomic};
use std::time::Duration;

use anyhow::Result;
use waverave_airspy::{HostBridge, SampleType};

fn main() -> Result<()> {
    // Stop on the first line of input
    let stop_rx = Arc::new(atomic::AtomicBool::new(false));
    let stop_tx = stop_rx.clone();
    std::thread::spawn(move || {
        let _ = std::io::stdin().read_line(&mut String::new());
        stop_tx.store(true, atomic::Ordering::Release);
    });

    // Open up a file for buffered writing.
    let mut args = std::env::args();
    args.next();
    let file_name = args.next().unwrap_or_else(|| String::from("./rx.bin"));
    let mut file = std::io::BufWriter::new(std::fs::File::create(&file_name)?);

    // Open up the receiver
    let airspy = waverave_airspy::open_first()?;

    // Configure: 16-bit IQ at 2.5 MHz, packed transfers, bias tee off, and
    // tune to 915 MHz.
    airspy.set_sample_type(SampleType::Int16Iq)?;
    airspy.set_packing(true)?;
    airspy.set_sample_rate(2_500_000)?;
    airspy.set_sensitivity_gain(10)?;
    airspy.set_rf_bias(false)?;
    airspy.set_freq(915_000_000)?;

    // Hand blocks from the streaming thread to this one.
    let bridge = HostBridge::new(32, airspy.buffer_size() * 4);
    airspy.start(bridge.callback())?;

    println!("Receiving to {file_name}, press enter to stop");
    let mut dropped = 0;
    while !stop_rx.load(atomic::Ordering::Acquire) {
        let Ok(block) = bridge.recv_timeout(Duration::from_millis(100)) else {
            continue;
        };
        dropped += block.dropped_samples();
        file.write_all(block.bytes())?;
        bridge.recycle(block);
    }

    airspy.stop()?;
    file.flush()?;
    println!("Done, {dropped} samples dropped");
    Ok(())
}
