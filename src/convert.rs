//! Codec sample conversion.
//!
//! The driver exchanges interleaved integer words in whatever bit layout the
//! codec wires up; the user callback sees deinterleaved 32-bit floats. One
//! converter is instantiated at open for the detected (format, frames,
//! channels) triple and invoked twice per period on the real-time thread.

use std::marker::PhantomData;

/// Integer sample packing on the wire to the audio codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecFormat {
    /// 24 valid bits, left-justified in the 32-bit word.
    Int24Lj,
    /// 24 valid bits, I2S framing (MSB one clock late, LSB dropped).
    Int24I2s,
    /// 24 valid bits, right-justified, not sign-extended on the wire.
    Int24Rj,
    /// 24 valid bits, right-justified and sign-extended by the codec.
    Int24_32Rj,
    /// Full 32-bit samples.
    Int32,
}

impl CodecFormat {
    /// Maps the integer the driver reports to a format. Unknown values are
    /// a compatibility error, not a fallback.
    pub fn from_driver(value: i32) -> Option<Self> {
        match value {
            0 => Some(CodecFormat::Int24Lj),
            1 => Some(CodecFormat::Int24I2s),
            2 => Some(CodecFormat::Int24Rj),
            3 => Some(CodecFormat::Int24_32Rj),
            4 => Some(CodecFormat::Int32),
            _ => None,
        }
    }
}

/// Frames-per-period values the converter is built for.
pub(crate) const SUPPORTED_FRAMES: [usize; 7] = [8, 16, 32, 64, 128, 256, 512];
/// Codec channel counts the converter is built for.
pub(crate) const SUPPORTED_CHANNELS: [usize; 4] = [2, 4, 6, 8];

/// Bit-layout rules for one codec format. Implementations are zero-sized;
/// the converter monomorphizes over them so the per-sample ops inline.
trait FormatOps: Send + Sync + 'static {
    /// Codec word to sign-extended sample value.
    fn decode(raw: i32) -> i32;
    /// Quantized sample value to codec word.
    fn encode(sample: i32) -> i32;
    /// Decoded integer to float multiplier.
    const SCALE: f32;
    /// Float to integer multiplier (one LSB above the positive maximum, so
    /// the negative full scale lands exactly on the format minimum).
    const FULL_SCALE: f32;
    const Q_MIN: i32;
    const Q_MAX: i32;
}

const INT24_SCALE: f32 = 1.0 / 8_388_608.0;
const INT24_FULL_SCALE: f32 = 8_388_608.0;
const INT24_MIN: i32 = -8_388_608;
const INT24_MAX: i32 = 8_388_607;

struct Int24LjOps;

impl FormatOps for Int24LjOps {
    fn decode(raw: i32) -> i32 {
        raw >> 8
    }
    fn encode(sample: i32) -> i32 {
        sample << 8
    }
    const SCALE: f32 = INT24_SCALE;
    const FULL_SCALE: f32 = INT24_FULL_SCALE;
    const Q_MIN: i32 = INT24_MIN;
    const Q_MAX: i32 = INT24_MAX;
}

struct Int24I2sOps;

impl FormatOps for Int24I2sOps {
    fn decode(raw: i32) -> i32 {
        (((raw as u32) << 1) as i32) >> 8
    }
    fn encode(sample: i32) -> i32 {
        (sample << 7) & 0x7FFF_FF00
    }
    const SCALE: f32 = INT24_SCALE;
    const FULL_SCALE: f32 = INT24_FULL_SCALE;
    const Q_MIN: i32 = INT24_MIN;
    const Q_MAX: i32 = INT24_MAX;
}

struct Int24RjOps;

impl FormatOps for Int24RjOps {
    fn decode(raw: i32) -> i32 {
        (raw << 8) >> 8
    }
    fn encode(sample: i32) -> i32 {
        sample & 0x00FF_FFFF
    }
    const SCALE: f32 = INT24_SCALE;
    const FULL_SCALE: f32 = INT24_FULL_SCALE;
    const Q_MIN: i32 = INT24_MIN;
    const Q_MAX: i32 = INT24_MAX;
}

struct Int24_32RjOps;

impl FormatOps for Int24_32RjOps {
    fn decode(raw: i32) -> i32 {
        raw
    }
    fn encode(sample: i32) -> i32 {
        sample
    }
    const SCALE: f32 = INT24_SCALE;
    const FULL_SCALE: f32 = INT24_FULL_SCALE;
    const Q_MIN: i32 = INT24_MIN;
    const Q_MAX: i32 = INT24_MAX;
}

struct Int32Ops;

impl FormatOps for Int32Ops {
    fn decode(raw: i32) -> i32 {
        raw
    }
    fn encode(sample: i32) -> i32 {
        sample
    }
    const SCALE: f32 = 1.0 / 2_147_483_648.0;
    // The float cast saturates at i32::MAX, which leaves positive full scale
    // short by up to 0xFF against a true 2^31 - 1 reference.
    const FULL_SCALE: f32 = 2_147_483_648.0;
    const Q_MIN: i32 = i32::MIN;
    const Q_MAX: i32 = i32::MAX;
}

/// Converts one period between the codec's interleaved integer layout and
/// the user callback's deinterleaved float layout.
pub trait SampleConverter: Send {
    /// `dst[k*frames + n] = scale * decode(src[n*channels + k])`.
    fn codec_to_float(&self, dst: &mut [f32], src: &[i32]);
    /// Clips to [-1, 1], quantizes, packs: `dst[n*channels + k]` from
    /// `src[k*frames + n]`.
    fn float_to_codec(&self, dst: &mut [i32], src: &[f32]);
    fn frames(&self) -> usize;
    fn channels(&self) -> usize;
}

struct Converter<F: FormatOps> {
    frames: usize,
    channels: usize,
    _format: PhantomData<F>,
}

impl<F: FormatOps> SampleConverter for Converter<F> {
    fn codec_to_float(&self, dst: &mut [f32], src: &[i32]) {
        let samples = self.frames * self.channels;
        debug_assert!(dst.len() >= samples && src.len() >= samples);
        for k in 0..self.channels {
            for n in 0..self.frames {
                dst[k * self.frames + n] = F::decode(src[n * self.channels + k]) as f32 * F::SCALE;
            }
        }
    }

    fn float_to_codec(&self, dst: &mut [i32], src: &[f32]) {
        let samples = self.frames * self.channels;
        debug_assert!(dst.len() >= samples && src.len() >= samples);
        for n in 0..self.frames {
            for k in 0..self.channels {
                let x = src[k * self.frames + n].clamp(-1.0, 1.0);
                let q = ((x * F::FULL_SCALE) as i32).clamp(F::Q_MIN, F::Q_MAX);
                dst[n * self.channels + k] = F::encode(q);
            }
        }
    }

    fn frames(&self) -> usize {
        self.frames
    }

    fn channels(&self) -> usize {
        self.channels
    }
}

/// Builds the converter for the detected triple, or `None` when the
/// combination is not supported.
pub fn converter_for(
    format: CodecFormat,
    frames: usize,
    channels: usize,
) -> Option<Box<dyn SampleConverter>> {
    if !SUPPORTED_FRAMES.contains(&frames) || !SUPPORTED_CHANNELS.contains(&channels) {
        return None;
    }
    let converter: Box<dyn SampleConverter> = match format {
        CodecFormat::Int24Lj => {
            Box::new(Converter::<Int24LjOps> { frames, channels, _format: PhantomData })
        }
        CodecFormat::Int24I2s => {
            Box::new(Converter::<Int24I2sOps> { frames, channels, _format: PhantomData })
        }
        CodecFormat::Int24Rj => {
            Box::new(Converter::<Int24RjOps> { frames, channels, _format: PhantomData })
        }
        CodecFormat::Int24_32Rj => {
            Box::new(Converter::<Int24_32RjOps> { frames, channels, _format: PhantomData })
        }
        CodecFormat::Int32 => {
            Box::new(Converter::<Int32Ops> { frames, channels, _format: PhantomData })
        }
    };
    Some(converter)
}

/// Wire word holding the format's positive full scale, used by tests and by
/// callers validating peak levels.
pub fn full_scale_word(format: CodecFormat) -> i32 {
    match format {
        CodecFormat::Int24Lj => Int24LjOps::encode(INT24_MAX),
        CodecFormat::Int24I2s => Int24I2sOps::encode(INT24_MAX),
        CodecFormat::Int24Rj => Int24RjOps::encode(INT24_MAX),
        CodecFormat::Int24_32Rj => INT24_MAX,
        CodecFormat::Int32 => i32::MAX,
    }
}

/// Wire word holding the format's negative full scale.
pub fn min_scale_word(format: CodecFormat) -> i32 {
    match format {
        CodecFormat::Int24Lj => Int24LjOps::encode(INT24_MIN),
        CodecFormat::Int24I2s => Int24I2sOps::encode(INT24_MIN),
        CodecFormat::Int24Rj => Int24RjOps::encode(INT24_MIN),
        CodecFormat::Int24_32Rj => INT24_MIN,
        CodecFormat::Int32 => i32::MIN,
    }
}

/// Every format the converter understands, in driver enum order.
pub const ALL_FORMATS: [CodecFormat; 5] = [
    CodecFormat::Int24Lj,
    CodecFormat::Int24I2s,
    CodecFormat::Int24Rj,
    CodecFormat::Int24_32Rj,
    CodecFormat::Int32,
];
