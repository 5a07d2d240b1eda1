use serde::{Deserialize, Serialize};

/// PCM audio format metadata.
///
/// 16-bit little-endian PCM is the only encoding required for interop;
/// sample-format conversion itself lives outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// 16-bit mono PCM at the given sample rate.
    pub fn pcm16_mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * u32::from(self.channels) * u32::from(self.bits_per_sample) / 8
    }

    /// A buffer of silence covering the given number of milliseconds.
    pub fn silence(&self, millis: u32) -> Vec<u8> {
        vec![0; (self.bytes_per_second() * millis / 1000) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_mono_byte_rate() {
        let format = AudioFormat::pcm16_mono(16_000);

        assert_eq!(format.bytes_per_second(), 32_000);
        assert_eq!(format.silence(100).len(), 3_200);
    }
}
