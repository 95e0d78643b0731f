//! Raw sample decoding.
//!
//! The ADC produces 12-bit unsigned samples with a mid-scale offset of 2048.
//! They arrive either one per little-endian 16-bit word, or packed eight to
//! every three little-endian 32-bit words when packing is enabled. This module
//! turns a raw transfer buffer into one of the [`SampleType`] representations.

use num_complex::Complex;

use crate::consts::{SAMPLE_OFFSET, SAMPLE_SCALE, SAMPLE_SHIFT};
use crate::iqconverter::IqConverters;

/// Complex 16-bit signed data.
pub type ComplexI16 = Complex<i16>;
/// Complex 32-bit float data.
pub type ComplexF32 = Complex<f32>;

/// Output sample representation.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SampleType {
    /// Complex float samples at half the ADC rate.
    #[default]
    Float32Iq = 0,
    /// Real float samples, centered and scaled to +/-1.0.
    Float32Real = 1,
    /// Complex 16-bit samples at half the ADC rate.
    Int16Iq = 2,
    /// Real 16-bit signed samples, centered and left-aligned.
    Int16Real = 3,
    /// Real 12-bit unsigned samples, as the ADC produced them.
    Uint16Real = 4,
    /// The bytes exactly as they came off the USB bus, packed or not.
    Raw = 5,
}

impl SampleType {
    /// Check if this type runs through the IQ converter.
    pub fn is_iq(self) -> bool {
        matches!(self, Self::Float32Iq | Self::Int16Iq)
    }

    /// Convert from the numeric value used by the C drivers.
    pub fn from_u8(v: u8) -> Option<Self> {
        use SampleType::*;
        Some(match v {
            0 => Float32Iq,
            1 => Float32Real,
            2 => Int16Iq,
            3 => Int16Real,
            4 => Uint16Real,
            5 => Raw,
            _ => return None,
        })
    }
}

impl std::fmt::Display for SampleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float32Iq => f.write_str("float32 IQ"),
            Self::Float32Real => f.write_str("float32 real"),
            Self::Int16Iq => f.write_str("int16 IQ"),
            Self::Int16Real => f.write_str("int16 real"),
            Self::Uint16Real => f.write_str("uint16 real"),
            Self::Raw => f.write_str("raw"),
        }
    }
}

/// A typed view of the samples in one delivered block.
#[derive(Clone, Copy, Debug)]
#[allow(missing_docs)]
pub enum Samples<'a> {
    Raw(&'a [u8]),
    U16(&'a [u16]),
    I16(&'a [i16]),
    F32(&'a [f32]),
    ComplexI16(&'a [ComplexI16]),
    ComplexF32(&'a [ComplexF32]),
}

impl<'a> Samples<'a> {
    /// Get the samples as plain bytes, in host byte order.
    pub fn bytes(self) -> &'a [u8] {
        match self {
            Self::Raw(s) => s,
            Self::U16(s) => bytemuck::cast_slice(s),
            Self::I16(s) => bytemuck::cast_slice(s),
            Self::F32(s) => bytemuck::cast_slice(s),
            Self::ComplexI16(s) => bytemuck::cast_slice(s),
            Self::ComplexF32(s) => bytemuck::cast_slice(s),
        }
    }
}

/// One block of converted samples, as handed to the streaming callback.
///
/// The storage behind it is reused as soon as the callback returns; copy out
/// anything that needs to outlive the call.
#[derive(Clone, Copy, Debug)]
pub struct SampleBlock<'a> {
    samples: Samples<'a>,
    sample_count: usize,
    dropped_samples: u64,
    sample_type: SampleType,
}

impl<'a> SampleBlock<'a> {
    /// Get the typed sample view.
    pub fn samples(&self) -> Samples<'a> {
        self.samples
    }

    /// Number of samples in the block. Complex samples count once per I/Q
    /// pair.
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Estimated number of samples lost between the previous block and this
    /// one, because the consumer fell behind.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples
    }

    /// The sample type this block was converted to.
    pub fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    /// Get the block as plain bytes, in host byte order.
    pub fn bytes(&self) -> &'a [u8] {
        self.samples.bytes()
    }
}

/// Number of samples decoded from a raw buffer of `bytes` length.
pub fn sample_count(bytes: usize, packing: bool) -> usize {
    if packing {
        ((bytes / 2) * 4) / 3
    } else {
        bytes / 2
    }
}

/// Unpack 12-bit samples, eight from every three little-endian 32-bit words.
///
/// Returns the number of samples written. Trailing bytes that don't form a
/// full 12-byte group are ignored.
pub fn unpack_samples(input: &[u8], output: &mut [u16]) -> usize {
    let mut written = 0;
    for (group, out) in input.chunks_exact(12).zip(output.chunks_exact_mut(8)) {
        let w = |i: usize| {
            u32::from_le_bytes([group[i * 4], group[i * 4 + 1], group[i * 4 + 2], group[i * 4 + 3]])
        };
        let (w0, w1, w2) = (w(0), w(1), w(2));
        out[0] = ((w0 >> 20) & 0xfff) as u16;
        out[1] = ((w0 >> 8) & 0xfff) as u16;
        out[2] = (((w0 & 0xff) << 4) | ((w1 >> 28) & 0xf)) as u16;
        out[3] = ((w1 & 0xfff_0000) >> 16) as u16;
        out[4] = ((w1 & 0xfff0) >> 4) as u16;
        out[5] = (((w1 & 0xf) << 8) | ((w2 & 0xff00_0000) >> 24)) as u16;
        out[6] = ((w2 >> 12) & 0xfff) as u16;
        out[7] = (w2 & 0xfff) as u16;
        written += 8;
    }
    written
}

/// Read unpacked samples out of little-endian 16-bit words.
pub fn le_samples(input: &[u8]) -> impl Iterator<Item = u16> + '_ {
    input
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
}

/// Center and left-align 12-bit samples into signed 16-bit values.
pub fn convert_i16(input: impl IntoIterator<Item = u16>, output: &mut [i16]) {
    for (o, i) in output.iter_mut().zip(input) {
        *o = (i as i16).wrapping_sub(SAMPLE_OFFSET).wrapping_shl(SAMPLE_SHIFT);
    }
}

/// Center and scale 12-bit samples into floats in the range +/-1.0.
pub fn convert_f32(input: impl IntoIterator<Item = u16>, output: &mut [f32]) {
    for (o, i) in output.iter_mut().zip(input) {
        *o = (i as i32 - SAMPLE_OFFSET as i32) as f32 * SAMPLE_SCALE;
    }
}

/// Working buffers for turning raw transfers into sample blocks.
pub(crate) struct ConvertBuffers {
    /// Sized for the largest possible block. Reinterpreted as 16-bit samples
    /// for the integer types.
    pub(crate) output: Vec<f32>,
    /// Only populated when packing is enabled.
    pub(crate) unpacked: Vec<u16>,
}

/// Decode one raw buffer into a sample block.
pub(crate) fn decode_block<'a>(
    raw: &'a [u8],
    bufs: &'a mut ConvertBuffers,
    iq: &mut IqConverters,
    sample_type: SampleType,
    packing: bool,
    dropped_buffers: u64,
) -> SampleBlock<'a> {
    let count = sample_count(raw.len(), packing);

    if sample_type == SampleType::Raw {
        return SampleBlock {
            samples: Samples::Raw(raw),
            sample_count: count,
            dropped_samples: dropped_buffers * count as u64,
            sample_type,
        };
    }

    let unpacked: Option<&[u16]> = if packing {
        let n = unpack_samples(raw, &mut bufs.unpacked);
        Some(&bufs.unpacked[..n])
    } else {
        None
    };
    let count = unpacked.map_or(count, |u| u.len());

    let (samples, sample_count) = match sample_type {
        SampleType::Float32Iq | SampleType::Float32Real => {
            let out = &mut bufs.output[..count];
            match unpacked {
                Some(u) => convert_f32(u.iter().copied(), out),
                None => convert_f32(le_samples(raw), out),
            }
            if sample_type.is_iq() {
                iq.f32.process(out);
                let out: &[ComplexF32] = bytemuck::cast_slice(&out[..count & !1]);
                (Samples::ComplexF32(out), count / 2)
            } else {
                (Samples::F32(out), count)
            }
        }
        SampleType::Int16Iq | SampleType::Int16Real => {
            let out: &mut [i16] = &mut bytemuck::cast_slice_mut(bufs.output.as_mut_slice())[..count];
            match unpacked {
                Some(u) => convert_i16(u.iter().copied(), out),
                None => convert_i16(le_samples(raw), out),
            }
            if sample_type.is_iq() {
                iq.i16.process(out);
                let out: &[ComplexI16] = bytemuck::cast_slice(&out[..count & !1]);
                (Samples::ComplexI16(out), count / 2)
            } else {
                (Samples::I16(out), count)
            }
        }
        SampleType::Uint16Real => {
            let out: &mut [u16] = &mut bytemuck::cast_slice_mut(bufs.output.as_mut_slice())[..count];
            match unpacked {
                Some(u) => out.copy_from_slice(u),
                None => out.iter_mut().zip(le_samples(raw)).for_each(|(o, i)| *o = i),
            }
            (Samples::U16(out), count)
        }
        SampleType::Raw => unreachable!("raw blocks are returned before conversion"),
    };

    SampleBlock {
        samples,
        sample_count,
        dropped_samples: dropped_buffers * sample_count as u64,
        sample_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(values: &[u16]) -> Vec<u8> {
        let mut out = Vec::new();
        for v in values.chunks_exact(8) {
            let v: Vec<u32> = v.iter().map(|&x| x as u32).collect();
            let w0 = (v[0] << 20) | (v[1] << 8) | (v[2] >> 4);
            let w1 = ((v[2] & 0xf) << 28) | (v[3] << 16) | (v[4] << 4) | (v[5] >> 8);
            let w2 = ((v[5] & 0xff) << 24) | (v[6] << 12) | v[7];
            for w in [w0, w1, w2] {
                out.extend_from_slice(&w.to_le_bytes());
            }
        }
        out
    }

    #[test]
    fn unpack_full_scale_ramp() {
        let ramp: Vec<u16> = (0..4096).collect();
        let packed = pack(&ramp);
        assert_eq!(packed.len(), 4096 * 3 / 2);
        let mut out = vec![0u16; 4096];
        assert_eq!(unpack_samples(&packed, &mut out), 4096);
        assert_eq!(out, ramp);
    }

    #[test]
    fn unpack_bit_layout() {
        // One group, every word with a distinct byte pattern.
        let raw = [
            0x78, 0x56, 0x34, 0x12, 0xf0, 0xde, 0xbc, 0x9a, 0x32, 0x54, 0x76, 0x98,
        ];
        let mut out = [0u16; 8];
        unpack_samples(&raw, &mut out);
        assert_eq!(
            out,
            [0x123, 0x456, 0x789, 0xabc, 0xdef, 0x098, 0x765, 0x432]
        );
    }

    #[test]
    fn conversion_centers_and_scales() {
        let input = [0u16, 2048, 4095];
        let mut i = [0i16; 3];
        convert_i16(input, &mut i);
        assert_eq!(i, [-32768, 0, 32752]);

        let mut f = [0f32; 3];
        convert_f32(input, &mut f);
        assert_eq!(f, [-1.0, 0.0, 2047.0 / 2048.0]);
    }

    #[test]
    fn packed_sample_counts() {
        assert_eq!(sample_count(262_144, false), 131_072);
        assert_eq!(sample_count(147_456, true), 98_304);
    }

    fn bufs(samples: usize) -> ConvertBuffers {
        ConvertBuffers {
            output: vec![0.0; samples],
            unpacked: vec![0; samples],
        }
    }

    #[test]
    fn decode_packed_matches_unpacked() {
        let ramp: Vec<u16> = (0..4096).collect();
        let packed = pack(&ramp);
        let plain: Vec<u8> = ramp.iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut iq = IqConverters::default();

        let mut b1 = bufs(4096);
        let a = decode_block(&packed, &mut b1, &mut iq, SampleType::Int16Real, true, 0);
        let a = a.bytes().to_vec();
        let mut b2 = bufs(4096);
        let b = decode_block(&plain, &mut b2, &mut iq, SampleType::Int16Real, false, 0);
        assert_eq!(a, b.bytes());
        assert_eq!(b.sample_count(), 4096);
    }

    #[test]
    fn decode_iq_halves_count_and_scales_drops() {
        let plain = vec![0u8; 1024];
        let mut b = bufs(512);
        let mut iq = IqConverters::default();
        let block = decode_block(&plain, &mut b, &mut iq, SampleType::Float32Iq, false, 3);
        assert_eq!(block.sample_count(), 256);
        assert_eq!(block.dropped_samples(), 3 * 256);
        match block.samples() {
            Samples::ComplexF32(s) => assert_eq!(s.len(), 256),
            other => panic!("unexpected sample view {other:?}"),
        }
    }

    #[test]
    fn decode_raw_passes_bytes_through() {
        let packed = vec![0xa5u8; 120];
        let mut b = bufs(80);
        let mut iq = IqConverters::default();
        let block = decode_block(&packed, &mut b, &mut iq, SampleType::Raw, true, 1);
        assert_eq!(block.bytes(), &packed[..]);
        assert_eq!(block.sample_count(), 80);
        assert_eq!(block.dropped_samples(), 80);
    }
}
