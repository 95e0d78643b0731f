//! Combined gain curves.
//!
//! The R820T tuner has three separate gain stages (LNA, mixer, VGA). The
//! combined gain setters pick all three from a single 0-21 index, using one of
//! two hand-tuned curves: one that favors linearity, one that favors
//! sensitivity. Tables are stored from highest gain to lowest, so index `i`
//! reads entry `21 - i`.

/// Highest index accepted by the combined gain setters.
pub const GAIN_INDEX_MAX: u8 = 21;
const GAIN_STEPS: usize = GAIN_INDEX_MAX as usize + 1;

/// Which combined gain curve to use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GainCurve {
    /// Keep the front end linear, leaning on the VGA for gain.
    Linearity,
    /// Maximize sensitivity, leaning on the LNA and mixer for gain.
    Sensitivity,
}

/// Gain values for each of the three stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GainStages {
    /// VGA gain, 0-15.
    pub vga: u8,
    /// Mixer gain, 0-15.
    pub mixer: u8,
    /// LNA gain, 0-14.
    pub lna: u8,
}

const LINEARITY_VGA: [u8; GAIN_STEPS] = [
    13, 12, 11, 11, 11, 11, 11, 10, 10, 10, 10, 10, 10, 10, 10, 10, 9, 8, 7, 6, 5, 4,
];
const LINEARITY_MIXER: [u8; GAIN_STEPS] = [
    12, 12, 11, 9, 8, 7, 6, 6, 5, 0, 0, 1, 0, 0, 2, 2, 1, 1, 1, 1, 0, 0,
];
const LINEARITY_LNA: [u8; GAIN_STEPS] = [
    14, 14, 14, 13, 12, 10, 9, 9, 8, 9, 8, 6, 5, 3, 1, 0, 0, 0, 0, 0, 0, 0,
];

const SENSITIVITY_VGA: [u8; GAIN_STEPS] = [
    13, 12, 11, 10, 9, 8, 7, 6, 5, 5, 5, 5, 5, 4, 4, 4, 4, 4, 4, 4, 4, 4,
];
const SENSITIVITY_MIXER: [u8; GAIN_STEPS] = [
    12, 12, 12, 12, 11, 10, 10, 9, 9, 8, 7, 4, 4, 4, 3, 2, 2, 1, 0, 0, 0, 0,
];
const SENSITIVITY_LNA: [u8; GAIN_STEPS] = [
    14, 14, 14, 14, 14, 14, 14, 14, 14, 13, 12, 12, 9, 9, 8, 7, 6, 5, 3, 2, 1, 0,
];

impl GainCurve {
    /// Look up the stage gains for a combined gain index. Out-of-range indices
    /// are clamped to [`GAIN_INDEX_MAX`].
    pub fn stages(self, index: u8) -> GainStages {
        let entry = (GAIN_INDEX_MAX - index.min(GAIN_INDEX_MAX)) as usize;
        let (vga, mixer, lna) = match self {
            Self::Linearity => (&LINEARITY_VGA, &LINEARITY_MIXER, &LINEARITY_LNA),
            Self::Sensitivity => (&SENSITIVITY_VGA, &SENSITIVITY_MIXER, &SENSITIVITY_LNA),
        };
        GainStages {
            vga: vga[entry],
            mixer: mixer[entry],
            lna: lna[entry],
        }
    }
}

impl std::fmt::Display for GainCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linearity => f.write_str("linearity"),
            Self::Sensitivity => f.write_str("sensitivity"),
        }
    }
}
