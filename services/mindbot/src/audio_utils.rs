use anyhow::{Result, ensure};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Sample rates a WebSocket client may declare at join time.
pub const SUPPORTED_CLIENT_RATES: std::ops::RangeInclusive<u32> = 8000..=48000;

/// Samples per resampler chunk at the input rate (10 ms at 16 kHz).
const CHUNK_SIZE: usize = 160;

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,                     // No cutoff frequency, pass all frequencies
        PolynomialDegree::Cubic, // Cubic interpolation for quality
        chunk_size,
        1, // 1 channel (mono)
    )?;
    Ok(resampler)
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Streaming mono PCM16 resampler.
///
/// Input is buffered until a full chunk is available, so arbitrary frame
/// sizes can be pushed. Call [`PcmResampler::flush`] at the end of a stream.
pub struct PcmResampler {
    inner: FastFixedIn<f32>,
    pending: Vec<f32>,
}

impl PcmResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        ensure!(
            SUPPORTED_CLIENT_RATES.contains(&from_rate) && SUPPORTED_CLIENT_RATES.contains(&to_rate),
            "Unsupported sample rate conversion {from_rate} Hz -> {to_rate} Hz"
        );
        Ok(Self {
            inner: create_resampler(from_rate as f64, to_rate as f64, CHUNK_SIZE)?,
            pending: Vec::with_capacity(CHUNK_SIZE),
        })
    }

    /// `None` when no conversion is needed.
    pub fn between(from_rate: u32, to_rate: u32) -> Result<Option<Self>> {
        if from_rate == to_rate {
            return Ok(None);
        }
        Self::new(from_rate, to_rate).map(Some)
    }

    pub fn push(&mut self, samples: &[i16]) -> Result<Vec<i16>> {
        self.pending.extend(convert_i16_to_f32(samples));
        let mut out = Vec::new();
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let input = vec![self.pending.drain(..needed).collect::<Vec<f32>>()];
            let processed = self.inner.process(&input[..], None)?;
            out.extend(processed.iter().flat_map(|channel| convert_f32_to_i16(channel)));
        }
        Ok(out)
    }

    /// Resamples whatever is still buffered, zero-padding the last chunk.
    pub fn flush(&mut self) -> Result<Vec<i16>> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }
        let input = vec![std::mem::take(&mut self.pending)];
        let processed = self.inner.process_partial(Some(&input[..]), None)?;
        Ok(processed
            .iter()
            .flat_map(|channel| convert_f32_to_i16(channel))
            .collect())
    }

    /// Resamples one complete utterance.
    pub fn convert(&mut self, samples: &[i16]) -> Result<Vec<i16>> {
        let mut out = self.push(samples)?;
        out.extend(self.flush()?);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_create_resampler() {
        assert!(create_resampler(16000.0, 24000.0, 1024).is_ok());
        assert!(create_resampler(24000.0, 24000.0, 1024).is_ok());
        assert!(create_resampler(48000.0, 16000.0, 1024).is_ok());
    }

    #[test]
    fn test_convert_f32_to_i16() {
        let input = vec![1.0f32, -1.0f32, 0.0f32, 0.5f32];
        let result = convert_f32_to_i16(&input);

        assert_eq!(result[0], i16::MAX);
        // -1.0 * 32767 = -32767, not i16::MIN (-32768)
        assert_eq!(result[1], -32767);
        assert_eq!(result[2], 0);

        let result = convert_f32_to_i16(&[2.0f32, -2.0f32]);
        assert_eq!(result, vec![i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_convert_i16_to_f32() {
        let result = convert_i16_to_f32(&[i16::MIN, 0i16, 16384i16]);
        assert_abs_diff_eq!(result[0], -1.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[1], 0.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[2], 0.5, epsilon = 0.0001);
    }

    #[test]
    fn test_same_rate_needs_no_resampler() {
        assert!(PcmResampler::between(16000, 16000).unwrap().is_none());
        assert!(PcmResampler::between(48000, 16000).unwrap().is_some());
    }

    #[test]
    fn test_unsupported_rates_are_rejected() {
        assert!(PcmResampler::new(4000, 16000).is_err());
        assert!(PcmResampler::new(16000, 96000).is_err());
    }

    #[test]
    fn test_upsampling_length() {
        let mut resampler = PcmResampler::new(16000, 24000).unwrap();
        let input = vec![1000i16; 1600];
        let output = resampler.convert(&input).unwrap();
        assert_abs_diff_eq!(output.len() as f64, 2400.0, epsilon = 240.0);
    }

    #[test]
    fn test_small_frames_are_buffered() {
        let mut resampler = PcmResampler::new(48000, 16000).unwrap();
        assert!(resampler.push(&[0i16; 10]).unwrap().is_empty());
        let mut total = 0;
        for _ in 0..48 {
            total += resampler.push(&[0i16; 100]).unwrap().len();
        }
        total += resampler.flush().unwrap().len();
        assert_abs_diff_eq!(total as f64, 1603.0, epsilon = 60.0);
        assert!(resampler.flush().unwrap().is_empty());
    }
}
