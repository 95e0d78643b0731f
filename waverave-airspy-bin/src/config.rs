use clap::{Args, ValueEnum};
use color_eyre::eyre::{Context, eyre};
use waverave_airspy::{Airspy, RfPort, SampleType};

/// Sample formats selectable from the command line.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum SampleFormat {
    #[default]
    Float32Iq,
    Float32Real,
    Int16Iq,
    Int16Real,
    Uint16Real,
    Raw,
}

impl From<SampleFormat> for SampleType {
    fn from(value: SampleFormat) -> Self {
        match value {
            SampleFormat::Float32Iq => SampleType::Float32Iq,
            SampleFormat::Float32Real => SampleType::Float32Real,
            SampleFormat::Int16Iq => SampleType::Int16Iq,
            SampleFormat::Int16Real => SampleType::Int16Real,
            SampleFormat::Uint16Real => SampleType::Uint16Real,
            SampleFormat::Raw => SampleType::Raw,
        }
    }
}

#[derive(Args, Debug)]
pub struct RadioParams {
    /// Frequency in Hz. Airspy receivers tune 24-1800 MHz.
    #[arg(short, long)]
    freq_hz: Option<u64>,

    /// Sample rate in Hz. Defaults to the receiver's first supported rate.
    #[arg(short = 'r', long = "rate")]
    sample_rate_hz: Option<u32>,

    /// Output sample format.
    #[arg(short = 't', long = "type", value_enum, default_value_t)]
    sample_type: SampleFormat,

    /// Pack samples into 12 bits on the USB link.
    #[arg(short, long)]
    packing: bool,

    /// Combined gain along the linearity curve, 0-21.
    #[arg(long, conflicts_with = "sensitivity")]
    linearity: Option<u8>,

    /// Combined gain along the sensitivity curve, 0-21.
    #[arg(long)]
    sensitivity: Option<u8>,

    /// LNA gain, 0-14.
    #[arg(short = 'l', long = "lna")]
    lna_gain: Option<u8>,

    /// Mixer gain, 0-15.
    #[arg(short = 'm', long = "mixer")]
    mixer_gain: Option<u8>,

    /// VGA (IF) gain, 0-15.
    #[arg(short = 'g', long = "vga")]
    vga_gain: Option<u8>,

    /// LNA automatic gain control.
    #[arg(long = "lna_agc")]
    lna_agc: Option<bool>,

    /// Mixer automatic gain control.
    #[arg(long = "mixer_agc")]
    mixer_agc: Option<bool>,

    /// Antenna port power (bias tee).
    #[arg(short, long = "bias")]
    bias_tee: Option<bool>,

    /// RF input port, 0-2. HydraSDR only.
    #[arg(long = "port")]
    rf_port: Option<u8>,

    /// Reference clock error in ppm. Corrects the tuning frequency only; the
    /// sample rate is passed through as given.
    #[arg(short = 'C', long)]
    ppm: Option<i32>,
}

impl RadioParams {
    fn manual_gain(&self) -> bool {
        self.lna_gain.is_some()
            || self.mixer_gain.is_some()
            || self.vga_gain.is_some()
            || self.lna_agc.is_some()
            || self.mixer_agc.is_some()
    }

    pub fn configure(&self, rf: &Airspy) -> color_eyre::Result<()> {
        if (self.linearity.is_some() || self.sensitivity.is_some()) && self.manual_gain() {
            return Err(eyre!(
                "Combined gain (linearity/sensitivity) can't be mixed with individual gain settings"
            ));
        }

        // Sample type first: it decides how the sample rate is interpreted.
        rf.set_sample_type(self.sample_type.into())
            .wrap_err("Failed setting sample type")?;
        rf.set_packing(self.packing)
            .wrap_err("Failed setting sample packing")?;

        let sample_rate_hz = match self.sample_rate_hz {
            Some(rate) => rate,
            None => rf
                .sample_rates()
                .first()
                .copied()
                .ok_or_else(|| eyre!("Receiver reported no sample rates"))?,
        };
        rf.set_sample_rate(sample_rate_hz)
            .wrap_err("Failed setting sample rate")?;

        if let Some(freq_hz) = self.freq_hz {
            let freq_hz = ppm_corrected(freq_hz, self.ppm.unwrap_or(0));
            rf.set_freq(freq_hz).wrap_err("Failed setting frequency")?;
        }

        if let Some(index) = self.linearity {
            rf.set_linearity_gain(index)
                .wrap_err("Failed setting linearity gain")?;
        }
        if let Some(index) = self.sensitivity {
            rf.set_sensitivity_gain(index)
                .wrap_err("Failed setting sensitivity gain")?;
        }

        if let Some(agc) = self.lna_agc {
            rf.set_lna_agc(agc).wrap_err("Failed setting LNA AGC")?;
        }
        if let Some(agc) = self.mixer_agc {
            rf.set_mixer_agc(agc).wrap_err("Failed setting mixer AGC")?;
        }
        if let Some(gain) = self.lna_gain {
            rf.set_lna_gain(gain).wrap_err("Failed setting LNA gain")?;
        }
        if let Some(gain) = self.mixer_gain {
            rf.set_mixer_gain(gain)
                .wrap_err("Failed setting mixer gain")?;
        }
        if let Some(gain) = self.vga_gain {
            rf.set_vga_gain(gain).wrap_err("Failed setting VGA gain")?;
        }

        if let Some(bias) = self.bias_tee {
            rf.set_rf_bias(bias).wrap_err("Failed setting bias tee")?;
        }

        if let Some(port) = self.rf_port {
            let port =
                RfPort::from_u8(port).ok_or_else(|| eyre!("port valid range is 0-2, but got {port}"))?;
            rf.set_rf_port(port).wrap_err("Failed selecting RF port")?;
        }

        Ok(())
    }
}

/// Scale a frequency to undo a reference clock that runs `ppm` fast.
fn ppm_corrected(freq_hz: u64, ppm: i32) -> u64 {
    (freq_hz as i128 * (1_000_000 - ppm as i128) / 1_000_000) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ppm_scales_frequency() {
        assert_eq!(ppm_corrected(100_000_000, 0), 100_000_000);
        assert_eq!(ppm_corrected(100_000_000, 10), 99_999_000);
        assert_eq!(ppm_corrected(1_000_000_000, -5), 1_000_005_000);
    }
}
