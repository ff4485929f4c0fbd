//! G.711 Audio Codec Implementation
//!
//! G.711 is a narrowband audio codec that provides toll-quality audio at 64 kbit/s.
//! It includes two companding laws:
//! - μ-law (PCMU): Used primarily in North America and Japan
//! - A-law (PCMA): Used in Europe and rest of the world
//!
//! Encoding uses the segment search of the ITU reference; decoding is a
//! table lookup.

use crate::domain::audio::AudioEncoding;
use bytes::{Bytes, BytesMut};

/// μ-law decompression lookup table
const ULAW_DECODE: [i16; 256] = [
    -32124, -31100, -30076, -29052, -28028, -27004, -25980, -24956,
    -23932, -22908, -21884, -20860, -19836, -18812, -17788, -16764,
    -15996, -15484, -14972, -14460, -13948, -13436, -12924, -12412,
    -11900, -11388, -10876, -10364, -9852, -9340, -8828, -8316,
    -7932, -7676, -7420, -7164, -6908, -6652, -6396, -6140,
    -5884, -5628, -5372, -5116, -4860, -4604, -4348, -4092,
    -3900, -3772, -3644, -3516, -3388, -3260, -3132, -3004,
    -2876, -2748, -2620, -2492, -2364, -2236, -2108, -1980,
    -1884, -1820, -1756, -1692, -1628, -1564, -1500, -1436,
    -1372, -1308, -1244, -1180, -1116, -1052, -988, -924,
    -876, -844, -812, -780, -748, -716, -684, -652,
    -620, -588, -556, -524, -492, -460, -428, -396,
    -372, -356, -340, -324, -308, -292, -276, -260,
    -244, -228, -212, -196, -180, -164, -148, -132,
    -120, -112, -104, -96, -88, -80, -72, -64,
    -56, -48, -40, -32, -24, -16, -8, 0,
    32124, 31100, 30076, 29052, 28028, 27004, 25980, 24956,
    23932, 22908, 21884, 20860, 19836, 18812, 17788, 16764,
    15996, 15484, 14972, 14460, 13948, 13436, 12924, 12412,
    11900, 11388, 10876, 10364, 9852, 9340, 8828, 8316,
    7932, 7676, 7420, 7164, 6908, 6652, 6396, 6140,
    5884, 5628, 5372, 5116, 4860, 4604, 4348, 4092,
    3900, 3772, 3644, 3516, 3388, 3260, 3132, 3004,
    2876, 2748, 2620, 2492, 2364, 2236, 2108, 1980,
    1884, 1820, 1756, 1692, 1628, 1564, 1500, 1436,
    1372, 1308, 1244, 1180, 1116, 1052, 988, 924,
    876, 844, 812, 780, 748, 716, 684, 652,
    620, 588, 556, 524, 492, 460, 428, 396,
    372, 356, 340, 324, 308, 292, 276, 260,
    244, 228, 212, 196, 180, 164, 148, 132,
    120, 112, 104, 96, 88, 80, 72, 64,
    56, 48, 40, 32, 24, 16, 8, 0,
];

/// A-law decompression lookup table
const ALAW_DECODE: [i16; 256] = [
    -5504, -5248, -6016, -5760, -4480, -4224, -4992, -4736,
    -7552, -7296, -8064, -7808, -6528, -6272, -7040, -6784,
    -2752, -2624, -3008, -2880, -2240, -2112, -2496, -2368,
    -3776, -3648, -4032, -3904, -3264, -3136, -3520, -3392,
    -22016, -20992, -24064, -23040, -17920, -16896, -19968, -18944,
    -30208, -29184, -32256, -31232, -26112, -25088, -28160, -27136,
    -11008, -10496, -12032, -11520, -8960, -8448, -9984, -9472,
    -15104, -14592, -16128, -15616, -13056, -12544, -14080, -13568,
    -344, -328, -376, -360, -280, -264, -312, -296,
    -472, -456, -504, -488, -408, -392, -440, -424,
    -88, -72, -120, -104, -24, -8, -56, -40,
    -216, -200, -248, -232, -152, -136, -184, -168,
    -1376, -1312, -1504, -1440, -1120, -1056, -1248, -1184,
    -1888, -1824, -2016, -1952, -1632, -1568, -1760, -1696,
    -688, -656, -752, -720, -560, -528, -624, -592,
    -944, -912, -1008, -976, -816, -784, -880, -848,
    5504, 5248, 6016, 5760, 4480, 4224, 4992, 4736,
    7552, 7296, 8064, 7808, 6528, 6272, 7040, 6784,
    2752, 2624, 3008, 2880, 2240, 2112, 2496, 2368,
    3776, 3648, 4032, 3904, 3264, 3136, 3520, 3392,
    22016, 20992, 24064, 23040, 17920, 16896, 19968, 18944,
    30208, 29184, 32256, 31232, 26112, 25088, 28160, 27136,
    11008, 10496, 12032, 11520, 8960, 8448, 9984, 9472,
    15104, 14592, 16128, 15616, 13056, 12544, 14080, 13568,
    344, 328, 376, 360, 280, 264, 312, 296,
    472, 456, 504, 488, 408, 392, 440, 424,
    88, 72, 120, 104, 24, 8, 56, 40,
    216, 200, 248, 232, 152, 136, 184, 168,
    1376, 1312, 1504, 1440, 1120, 1056, 1248, 1184,
    1888, 1824, 2016, 1952, 1632, 1568, 1760, 1696,
    688, 656, 752, 720, 560, 528, 624, 592,
    944, 912, 1008, 976, 816, 784, 880, 848,
];

/// Segment end points for μ-law (14-bit magnitude)
const SEG_UEND: [i32; 8] = [0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF, 0x1FFF];

/// Segment end points for A-law (13-bit magnitude)
const SEG_AEND: [i32; 8] = [0x1F, 0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF];

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 8159;

/// G.711 companding law
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum G711Law {
    /// μ-law (PCMU)
    MuLaw,
    /// A-law (PCMA)
    ALaw,
}

impl G711Law {
    /// Law used by `encoding`, if it is a G.711 encoding
    pub fn for_encoding(encoding: AudioEncoding) -> Option<Self> {
        match encoding {
            AudioEncoding::MuLaw => Some(G711Law::MuLaw),
            AudioEncoding::ALaw => Some(G711Law::ALaw),
            AudioEncoding::Pcm16 => None,
        }
    }

    /// Get codec name
    pub fn name(&self) -> &'static str {
        match self {
            G711Law::MuLaw => "PCMU",
            G711Law::ALaw => "PCMA",
        }
    }

    /// Encoded byte for digital silence
    pub fn silence(&self) -> u8 {
        match self {
            G711Law::MuLaw => 0xFF,
            G711Law::ALaw => 0xD5,
        }
    }

    pub fn encode_sample(&self, sample: i16) -> u8 {
        match self {
            G711Law::MuLaw => linear_to_ulaw(sample),
            G711Law::ALaw => linear_to_alaw(sample),
        }
    }

    pub fn decode_sample(&self, byte: u8) -> i16 {
        match self {
            G711Law::MuLaw => ULAW_DECODE[byte as usize],
            G711Law::ALaw => ALAW_DECODE[byte as usize],
        }
    }

    /// Encode PCM samples
    pub fn encode(&self, pcm: &[i16]) -> Bytes {
        let mut output = BytesMut::with_capacity(pcm.len());
        output.extend(pcm.iter().map(|&s| self.encode_sample(s)));
        output.freeze()
    }

    /// Decode to PCM samples
    pub fn decode(&self, payload: &[u8]) -> Vec<i16> {
        payload.iter().map(|&b| self.decode_sample(b)).collect()
    }

    /// Re-encode a payload from `self` into `target` without leaving G.711
    pub fn transcode(&self, target: G711Law, payload: &[u8]) -> Bytes {
        if *self == target {
            return Bytes::copy_from_slice(payload);
        }
        let mut output = BytesMut::with_capacity(payload.len());
        output.extend(
            payload
                .iter()
                .map(|&b| target.encode_sample(self.decode_sample(b))),
        );
        output.freeze()
    }
}

fn segment(value: i32, table: &[i32; 8]) -> usize {
    table.iter().position(|&end| value <= end).unwrap_or(8)
}

fn linear_to_ulaw(sample: i16) -> u8 {
    let mut pcm = (sample as i32) >> 2;
    let mask: u8 = if pcm < 0 {
        pcm = -pcm;
        0x7F
    } else {
        0xFF
    };

    let pcm = pcm.min(ULAW_CLIP) + (ULAW_BIAS >> 2);
    let seg = segment(pcm, &SEG_UEND);
    if seg >= 8 {
        return 0x7F ^ mask;
    }

    let uval = ((seg as i32) << 4) | ((pcm >> (seg + 1)) & 0x0F);
    (uval as u8) ^ mask
}

fn linear_to_alaw(sample: i16) -> u8 {
    let mut pcm = (sample as i32) >> 3;
    let mask: u8 = if pcm >= 0 {
        0xD5
    } else {
        pcm = -pcm - 1;
        0x55
    };

    let seg = segment(pcm, &SEG_AEND);
    if seg >= 8 {
        return 0x7F ^ mask;
    }

    let mantissa = if seg < 2 {
        (pcm >> 1) & 0x0F
    } else {
        (pcm >> seg) & 0x0F
    };
    let aval = ((seg as i32) << 4) | mantissa;
    (aval as u8) ^ mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_law_for_encoding() {
        assert_eq!(G711Law::for_encoding(AudioEncoding::MuLaw), Some(G711Law::MuLaw));
        assert_eq!(G711Law::for_encoding(AudioEncoding::ALaw), Some(G711Law::ALaw));
        assert_eq!(G711Law::for_encoding(AudioEncoding::Pcm16), None);
    }

    #[test]
    fn test_pcmu_encode_decode() {
        let original: Vec<i16> = vec![0, 1000, -1000, 5000, -5000, 10000, -10000];
        let encoded = G711Law::MuLaw.encode(&original);
        let decoded = G711Law::MuLaw.decode(&encoded);

        // Lossy, but within one quantization step
        assert_eq!(original.len(), decoded.len());
        for (orig, dec) in original.iter().zip(decoded.iter()) {
            let diff = (orig - dec).abs();
            assert!(diff < 500, "Difference too large: {} vs {}", orig, dec);
        }
    }

    #[test]
    fn test_pcma_encode_decode() {
        let original: Vec<i16> = vec![0, 5000, -5000, 10000, -10000, 20000, -20000];
        let encoded = G711Law::ALaw.encode(&original);
        let decoded = G711Law::ALaw.decode(&encoded);

        assert_eq!(original.len(), decoded.len());
        assert!(decoded[0].abs() < 500, "Silence decode error");
        for (orig, dec) in original.iter().zip(decoded.iter()).skip(1) {
            assert_eq!(orig.signum(), dec.signum());
            let ratio = dec.abs() as f64 / orig.abs() as f64;
            assert!(ratio > 0.9 && ratio < 1.1, "{} -> {}", orig, dec);
        }
    }

    #[test]
    fn test_full_scale_does_not_overflow() {
        for law in [G711Law::MuLaw, G711Law::ALaw] {
            let encoded = law.encode(&[i16::MAX, i16::MIN]);
            let decoded = law.decode(&encoded);
            assert!(decoded[0] > 30000, "{:?}: {}", law, decoded[0]);
            assert!(decoded[1] < -30000, "{:?}: {}", law, decoded[1]);
        }
    }

    #[test]
    fn test_silence_bytes() {
        assert_eq!(G711Law::MuLaw.encode_sample(0), G711Law::MuLaw.silence());
        assert_eq!(G711Law::ALaw.encode_sample(0), G711Law::ALaw.silence());
        assert_eq!(G711Law::MuLaw.decode_sample(0xFF), 0);
    }

    #[test]
    fn test_decoded_values_re_encode_to_same_byte() {
        for byte in 0..=255u8 {
            let alaw = G711Law::ALaw.decode_sample(byte);
            assert_eq!(G711Law::ALaw.encode_sample(alaw), byte, "A-law {:#04x}", byte);

            // 0x7F is negative zero and encodes back as positive zero
            if byte != 0x7F {
                let ulaw = G711Law::MuLaw.decode_sample(byte);
                assert_eq!(G711Law::MuLaw.encode_sample(ulaw), byte, "μ-law {:#04x}", byte);
            }
        }
    }

    #[test]
    fn test_transcode_between_laws() {
        let pcm: Vec<i16> = vec![0, 1200, -1200, 8000, -8000];
        let ulaw = G711Law::MuLaw.encode(&pcm);
        let alaw = G711Law::MuLaw.transcode(G711Law::ALaw, &ulaw);
        assert_eq!(alaw.len(), ulaw.len());

        let back = G711Law::ALaw.decode(&alaw);
        for (orig, dec) in pcm.iter().zip(back.iter()) {
            assert!((orig - dec).abs() < 400, "{} vs {}", orig, dec);
        }
        assert_eq!(G711Law::MuLaw.transcode(G711Law::MuLaw, &ulaw), ulaw);
    }
}
