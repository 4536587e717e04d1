/// Converts device frames to the 16-bit wire format, one frame at a time.
///
/// When the source rate differs from the target, this is nearest-neighbor
/// decimation: no anti-aliasing filter is applied, so content above the
/// target Nyquist frequency aliases. That is a known fidelity limitation of
/// the wire format, accepted for speech capture.
pub struct Decimator {
    source_rate: u32,
    target_rate: u32,
}

impl Decimator {
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        Self {
            source_rate,
            target_rate,
        }
    }

    /// Resample one frame. Equal rates map 1:1 (clamp, scale, cast); unequal
    /// rates pick source index `floor(i * ratio)` for an output of length
    /// `ceil(len / ratio)`.
    pub fn resample(&self, input: &[f32]) -> Vec<i16> {
        if input.is_empty() {
            return Vec::new();
        }
        if self.source_rate == self.target_rate {
            return input.iter().map(|s| quantize(*s)).collect();
        }

        let ratio = self.source_rate as f64 / self.target_rate as f64;
        let out_len = (input.len() as f64 / ratio).ceil() as usize;
        (0..out_len)
            .map(|i| {
                let src = ((i as f64 * ratio).floor() as usize).min(input.len() - 1);
                quantize(input[src])
            })
            .collect()
    }
}

fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_rates_preserve_length() {
        let decim = Decimator::new(16_000, 16_000);
        let input = vec![0.0f32; 320];
        assert_eq!(decim.resample(&input).len(), 320);
    }

    #[test]
    fn test_equal_rates_scale_and_clamp() {
        let decim = Decimator::new(16_000, 16_000);
        let output = decim.resample(&[0.0, 0.5, -0.5, 1.0, -1.0, 2.0, -2.0]);
        assert_eq!(output, vec![0, 16383, -16383, 32767, -32767, 32767, -32767]);
    }

    #[test]
    fn test_decimation_ratio_48k_to_16k() {
        let decim = Decimator::new(48_000, 16_000);
        let input = vec![0.0f32; 4800];
        assert_eq!(decim.resample(&input).len(), 1600);
    }

    #[test]
    fn test_decimation_picks_floor_index() {
        let decim = Decimator::new(48_000, 16_000);
        // input[i] = i / 10000, so output[i] should equal quantize(input[3*i])
        let input: Vec<f32> = (0..30).map(|i| i as f32 / 10_000.0).collect();
        let output = decim.resample(&input);
        assert_eq!(output.len(), 10);
        for (i, sample) in output.iter().enumerate() {
            let expected = (input[3 * i] * i16::MAX as f32) as i16;
            assert_eq!(*sample, expected, "mismatch at output index {i}");
        }
    }

    #[test]
    fn test_decimation_non_integer_ratio() {
        let decim = Decimator::new(44_100, 16_000);
        // 441 / (44100/16000) = 160 exactly
        let input = vec![0.25f32; 441];
        assert_eq!(decim.resample(&input).len(), 160);
    }

    #[test]
    fn test_upsampling_repeats_nearest() {
        let decim = Decimator::new(8_000, 16_000);
        let output = decim.resample(&[1.0, -1.0]);
        assert_eq!(output, vec![32767, 32767, -32767, -32767]);
    }

    #[test]
    fn test_empty_input_yields_empty_output() {
        let decim = Decimator::new(48_000, 16_000);
        assert!(decim.resample(&[]).is_empty());
    }
}
