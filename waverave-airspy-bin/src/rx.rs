use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use color_eyre::eyre::{Context, eyre};
use crossbeam_channel::RecvTimeoutError;
use tracing::{info, warn};
use waverave_airspy::{Airspy, HostBridge};

use crate::os_signal::Quit;

/// How long the writer waits on a block before checking whether to quit.
const WRITER_POLL: Duration = Duration::from_millis(100);

/// Receive samples to a file or to stdout.
#[derive(Args, Debug)]
pub struct Cmd {
    #[command(flatten)]
    params: crate::config::RadioParams,

    /// Number of blocks buffered between the receiver and the writer.
    #[arg(short = 'B', long, default_value_t = 32)]
    blocks: usize,

    /// Number of samples to transfer (default is unlimited).
    #[arg(short = 'n', long = "samples")]
    num_samples: Option<u64>,

    /// Record data to a file. Omit for stdout.
    #[arg(default_value_t)]
    filename: String,
}

impl Cmd {
    pub async fn cmd(&self, rf: Airspy) -> color_eyre::Result<()> {
        self.params
            .configure(&rf)
            .wrap_err("Failed configuring the receiver")?;
        info!(
            sample_type = %rf.sample_type(),
            packing = rf.packing_enabled(),
            "Receiver configured"
        );

        // Float output can take up to 8/3 bytes per raw byte with packing on;
        // bigger blocks just grow their buffer.
        let bridge = Arc::new(HostBridge::new(self.blocks, rf.buffer_size() * 3));
        rf.start(bridge.callback())
            .wrap_err("Failed to start streaming")?;

        let quit = crate::os_signal::quit_watch().await;
        let writer = {
            let bridge = bridge.clone();
            let quit = quit.clone();
            let filename = self.filename.clone();
            let max = self.num_samples;
            tokio::task::spawn_blocking(move || write_file(&bridge, &filename, max, &quit))
        };

        // Wait for a quit request, or for the stream to end on its own.
        let mut poll = tokio::time::interval(Duration::from_millis(250));
        loop {
            tokio::select! {
                _ = quit.quit() => break,
                _ = poll.tick() => {
                    if !rf.is_streaming() {
                        warn!("Receiver stopped streaming");
                        quit.cancel();
                        break;
                    }
                }
            }
        }

        let stop = rf.stop();
        let stats = tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .map_err(|_| eyre!("File writer didn't finish in time"))?
            .wrap_err("File writer panicked")?;
        stop.wrap_err("Failed to stop streaming")?;
        let stats = stats?;

        if stats.dropped > 0 {
            warn!("Dropped samples: {}", stats.dropped);
        }
        if bridge.host_dropped() > 0 {
            warn!("Samples lost to a slow writer: {}", bridge.host_dropped());
        }
        info!(samples = stats.written, "Receive finished");

        rf.close().wrap_err("Failed to close the receiver")?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct WriteStats {
    written: u64,
    dropped: u64,
}

fn write_file(
    bridge: &HostBridge,
    filename: &str,
    max_samples: Option<u64>,
    quit: &Quit,
) -> color_eyre::Result<WriteStats> {
    let mut writer: Box<dyn Write> = if filename.is_empty() {
        Box::new(std::io::BufWriter::new(std::io::stdout().lock()))
    } else {
        let file = std::fs::File::create(filename)
            .wrap_err_with(|| format!("Couldn't create {filename}"))?;
        Box::new(std::io::BufWriter::new(file))
    };

    let mut stats = WriteStats::default();
    while !quit.is_cancelled() {
        let block = match bridge.recv_timeout(WRITER_POLL) {
            Ok(block) => block,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        stats.dropped += block.dropped_samples();

        // Trim the last block down to the requested sample count.
        let mut bytes = block.bytes();
        let mut count = block.sample_count() as u64;
        if let Some(max) = max_samples {
            let left = max - stats.written;
            if count > left && count > 0 {
                let per_sample = bytes.len() as u64 / count;
                bytes = &bytes[..(left * per_sample) as usize];
                count = left;
            }
        }

        let res = writer.write_all(bytes);
        bridge.recycle(block);
        if let Err(e) = res {
            quit.cancel();
            return Err(e).wrap_err("Failed writing samples");
        }
        stats.written += count;

        if max_samples.is_some_and(|max| stats.written >= max) {
            quit.cancel();
            break;
        }
    }

    writer.flush().wrap_err("Failed flushing output")?;
    Ok(stats)
}
