//! Real-to-complex conversion.
//!
//! The ADC samples a real IF signal centered at a quarter of the sample rate.
//! The converter removes DC, mixes the band down by Fs/4 (a sign/phase pattern
//! over groups of four samples), and runs the even samples through a half-band
//! FIR while the odd samples go through a matching delay line. The result is
//! `n / 2` interleaved I/Q pairs, written over the first `n` input slots.
//!
//! Only the even taps of the half-band kernel are used. The odd taps are zero
//! apart from the center one, which is folded into the Fs/4 mixing step.
//!
//! Filter state carries across calls, so a stream can be fed through in
//! blocks of any multiple of 4 samples.

use crate::Error;

/// The 47-tap half-band kernel used by default for float samples.
#[allow(clippy::excessive_precision)]
pub const HB_KERNEL_F32: [f32; 47] = [
    -0.000998606272947510,
    0.0,
    0.001695637278417295,
    0.0,
    -0.003054430179754289,
    0.0,
    0.005055504379767936,
    0.0,
    -0.007901319195893647,
    0.0,
    0.011873357051047719,
    0.0,
    -0.017411159379930066,
    0.0,
    0.025304817427568772,
    0.0,
    -0.037225225204559217,
    0.0,
    0.057533286997004301,
    0.0,
    -0.102327462004259350,
    0.0,
    0.317034472508947400,
    0.5,
    0.317034472508947400,
    0.0,
    -0.102327462004259350,
    0.0,
    0.057533286997004301,
    0.0,
    -0.037225225204559217,
    0.0,
    0.025304817427568772,
    0.0,
    -0.017411159379930066,
    0.0,
    0.011873357051047719,
    0.0,
    -0.007901319195893647,
    0.0,
    0.005055504379767936,
    0.0,
    -0.003054430179754289,
    0.0,
    0.001695637278417295,
    0.0,
    -0.000998606272947510,
];

/// The same half-band kernel in Q15 fixed point, used for 16-bit samples.
pub const HB_KERNEL_I16: [i16; 47] = [
    -33, 0, 56, 0, -100, 0, 166, 0, -259, 0, 389, 0, -571, 0, 829, 0, -1220, 0, 1885, 0, -3353, 0,
    10389, 16384, 10389, 0, -3353, 0, 1885, 0, -1220, 0, 829, 0, -571, 0, 389, 0, -259, 0, 166, 0,
    -100, 0, 56, 0, -33,
];

const F32_QUEUE_FACTOR: usize = 32;
const I16_QUEUE_FACTOR: usize = 16;
const DC_SCALE: f32 = 0.01;
const DC_POLE_Q15: i32 = 32100;

fn check_kernel(len: usize) -> Result<(), Error> {
    if len < 3 || len % 2 == 0 {
        return Err(Error::InvalidParameter(
            "half-band kernel must have an odd length of at least 3",
        ));
    }
    Ok(())
}

/// Float-domain IQ converter.
#[derive(Clone, Debug)]
pub struct IqConverterF32 {
    avg: f32,
    hbc: f32,
    len: usize,
    fir_index: usize,
    delay_index: usize,
    fir_kernel: Vec<f32>,
    fir_queue: Vec<f32>,
    delay_line: Vec<f32>,
}

impl Default for IqConverterF32 {
    fn default() -> Self {
        Self::build(&HB_KERNEL_F32)
    }
}

impl IqConverterF32 {
    /// Build a converter from an odd-length half-band kernel.
    pub fn new(kernel: &[f32]) -> Result<Self, Error> {
        check_kernel(kernel.len())?;
        Ok(Self::build(kernel))
    }

    fn build(kernel: &[f32]) -> Self {
        let len = kernel.len() / 2 + 1;
        Self {
            avg: 0.0,
            hbc: kernel[kernel.len() / 2],
            len,
            fir_index: 0,
            delay_index: 0,
            fir_kernel: kernel.iter().step_by(2).copied().collect(),
            fir_queue: vec![0.0; len * F32_QUEUE_FACTOR],
            delay_line: vec![0.0; len / 2],
        }
    }

    /// Clear all filter state without reallocating.
    pub fn reset(&mut self) {
        self.avg = 0.0;
        self.fir_index = 0;
        self.delay_index = 0;
        self.fir_queue.fill(0.0);
        self.delay_line.fill(0.0);
    }

    /// Convert `samples.len()` real samples into half as many interleaved I/Q
    /// pairs, in place.
    pub fn process(&mut self, samples: &mut [f32]) {
        let mut avg = self.avg;
        for s in samples.iter_mut() {
            *s -= avg;
            avg += DC_SCALE * *s;
        }
        self.avg = avg;

        let hbc = self.hbc;
        for quad in samples.chunks_exact_mut(4) {
            quad[0] = -quad[0];
            quad[1] = -quad[1] * hbc;
            quad[3] *= hbc;
        }

        self.fir(samples);
        if samples.len() > 1 {
            self.delay(&mut samples[1..]);
        }
    }

    fn fir(&mut self, samples: &mut [f32]) {
        let len = self.len;
        let mut index = self.fir_index;
        for s in samples.iter_mut().step_by(2) {
            let queue = &mut self.fir_queue[index..index + len];
            queue[0] = *s;
            *s = queue.iter().zip(&self.fir_kernel).map(|(q, k)| q * k).sum();
            if index == 0 {
                index = len * (F32_QUEUE_FACTOR - 1);
                self.fir_queue.copy_within(0..len - 1, index + 1);
            } else {
                index -= 1;
            }
        }
        self.fir_index = index;
    }

    fn delay(&mut self, samples: &mut [f32]) {
        let mut index = self.delay_index;
        for s in samples.iter_mut().step_by(2) {
            std::mem::swap(&mut self.delay_line[index], s);
            index += 1;
            if index >= self.delay_line.len() {
                index = 0;
            }
        }
        self.delay_index = index;
    }
}

/// Fixed-point IQ converter for 16-bit samples.
#[derive(Clone, Debug)]
pub struct IqConverterI16 {
    len: usize,
    fir_index: usize,
    delay_index: usize,
    old_x: i16,
    old_y: i16,
    old_e: i32,
    fir_kernel: Vec<i32>,
    fir_queue: Vec<i32>,
    delay_line: Vec<i16>,
}

impl Default for IqConverterI16 {
    fn default() -> Self {
        Self::build(&HB_KERNEL_I16)
    }
}

impl IqConverterI16 {
    /// Build a converter from an odd-length Q15 half-band kernel.
    pub fn new(kernel: &[i16]) -> Result<Self, Error> {
        check_kernel(kernel.len())?;
        Ok(Self::build(kernel))
    }

    fn build(kernel: &[i16]) -> Self {
        let len = kernel.len() / 2 + 1;
        Self {
            len,
            fir_index: 0,
            delay_index: 0,
            old_x: 0,
            old_y: 0,
            old_e: 0,
            fir_kernel: kernel.iter().step_by(2).map(|&k| k as i32).collect(),
            fir_queue: vec![0; len * I16_QUEUE_FACTOR],
            delay_line: vec![0; len / 2],
        }
    }

    /// Clear all filter state without reallocating.
    pub fn reset(&mut self) {
        self.fir_index = 0;
        self.delay_index = 0;
        self.old_x = 0;
        self.old_y = 0;
        self.old_e = 0;
        self.fir_queue.fill(0);
        self.delay_line.fill(0);
    }

    /// Convert `samples.len()` real samples into half as many interleaved I/Q
    /// pairs, in place.
    pub fn process(&mut self, samples: &mut [i16]) {
        // First-order DC blocker, with the rounding error fed back.
        let (mut old_x, mut old_y, mut old_e) = (self.old_x, self.old_y, self.old_e);
        for s in samples.iter_mut() {
            let x = *s;
            let w = x.wrapping_sub(old_x);
            let u = old_e + old_y as i32 * DC_POLE_Q15;
            let step = (u >> 15) as i16;
            let y = w.wrapping_add(step);
            old_e = u - ((step as i32) << 15);
            old_x = x;
            old_y = y;
            *s = y;
        }
        (self.old_x, self.old_y, self.old_e) = (old_x, old_y, old_e);

        for quad in samples.chunks_exact_mut(4) {
            quad[0] = quad[0].wrapping_neg();
            quad[1] = ((-(quad[1] as i32)) >> 1) as i16;
            quad[3] >>= 1;
        }

        self.fir(samples);
        if samples.len() > 1 {
            self.delay(&mut samples[1..]);
        }
    }

    fn fir(&mut self, samples: &mut [i16]) {
        let len = self.len;
        let mut index = self.fir_index;
        for s in samples.iter_mut().step_by(2) {
            let queue = &mut self.fir_queue[index..index + len];
            queue[0] = *s as i32;
            let acc = queue
                .iter()
                .zip(&self.fir_kernel)
                .fold(0i32, |acc, (q, k)| acc.wrapping_add(q.wrapping_mul(*k)));
            *s = (acc >> 15) as i16;
            if index == 0 {
                index = len * (I16_QUEUE_FACTOR - 1);
                self.fir_queue.copy_within(0..len - 1, index + 1);
            } else {
                index -= 1;
            }
        }
        self.fir_index = index;
    }

    fn delay(&mut self, samples: &mut [i16]) {
        let mut index = self.delay_index;
        for s in samples.iter_mut().step_by(2) {
            std::mem::swap(&mut self.delay_line[index], s);
            index += 1;
            if index >= self.delay_line.len() {
                index = 0;
            }
        }
        self.delay_index = index;
    }
}

/// The pair of converters a device carries, one per numeric domain.
#[derive(Clone, Debug, Default)]
pub(crate) struct IqConverters {
    pub(crate) f32: IqConverterF32,
    pub(crate) i16: IqConverterI16,
}

impl IqConverters {
    pub(crate) fn reset(&mut self) {
        self.f32.reset();
        self.i16.reset();
    }
}
