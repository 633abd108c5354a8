use anyhow::Context;
use ringbuf::HeapRb;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::io::Cursor;

/// Sample rate of raw PCM16 returned by the speech endpoint.
pub const SPEECH_PCM16_SAMPLE_RATE: f64 = 24000.0;

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Splits samples into fixed-size chunks, zero-padding the last one.
pub fn split_for_chunks(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples
        .chunks(chunk_size)
        .map(|chunk| {
            let mut chunk = chunk.to_vec();
            chunk.resize(chunk_size, 0.0);
            chunk
        })
        .collect()
}

/// Runs `samples` through a mono resampler. Chunks the resampler rejects are
/// logged and dropped.
pub fn resample(resampler: &mut FastFixedIn<f32>, samples: &[f32]) -> Vec<f32> {
    let chunk_size = resampler.input_frames_next();
    let mut out = Vec::with_capacity(samples.len());
    for chunk in split_for_chunks(samples, chunk_size) {
        match resampler.process(&[chunk.as_slice()], None) {
            Ok(mut channels) => {
                if let Some(channel) = channels.pop() {
                    out.extend(channel);
                }
            }
            Err(e) => tracing::warn!("Failed to resample chunk: {e}"),
        }
    }
    out
}

/// Creates a new ring buffer on the heap for shared audio data.
pub fn shared_buffer(size: usize) -> HeapRb<f32> {
    HeapRb::new(size)
}

/// Averages interleaved frames down to a single channel.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels > 1 {
        data.chunks(channels)
            .map(|c| c.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        data.to_vec()
    }
}

/// Interprets little-endian PCM16 bytes as samples in `[-1.0, 1.0]`.
/// A trailing odd byte is ignored.
pub fn pcm16_le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| {
            let v = i16::from_le_bytes([chunk[0], chunk[1]]);
            (v as f32 / 32768.0).clamp(-1.0, 1.0)
        })
        .collect()
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Encodes mono samples as a 16-bit PCM WAV file in memory.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> anyhow::Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("Failed to start WAV encoding")?;
        for sample in convert_f32_to_i16(samples) {
            writer.write_sample(sample)?;
        }
        writer.finalize().context("Failed to finish WAV encoding")?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_frames() {
        let stereo = [0.5, -0.5, 1.0, 0.0, 0.25, 0.25];
        assert_eq!(downmix(&stereo, 2), vec![0.0, 0.5, 0.25]);
        assert_eq!(downmix(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }

    #[test]
    fn pcm16_bytes_decode_to_normalized_samples() {
        let bytes = [0x00, 0x00, 0x00, 0x40, 0x00, 0x80, 0x7f];
        let samples = pcm16_le_to_f32(&bytes);
        assert_eq!(samples, vec![0.0, 0.5, -1.0]);
    }

    #[test]
    fn last_chunk_is_zero_padded() {
        let chunks = split_for_chunks(&[1.0, 2.0, 3.0], 2);
        assert_eq!(chunks, vec![vec![1.0, 2.0], vec![3.0, 0.0]]);
    }

    #[test]
    fn wav_encoding_carries_rate_and_samples() -> anyhow::Result<()> {
        let bytes = encode_wav(&[0.0, 0.5, -0.5, 1.0], 16_000)?;
        assert_eq!(&bytes[..4], b"RIFF");

        let reader = hound::WavReader::new(Cursor::new(bytes))?;
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.into_samples::<i16>().collect::<Result<_, _>>()?;
        assert_eq!(samples, vec![0, 16383, -16383, i16::MAX]);
        Ok(())
    }

    #[test]
    fn resampling_doubles_the_rate() -> anyhow::Result<()> {
        let mut resampler = create_resampler(24_000.0, 48_000.0, 240)?;
        let out = resample(&mut resampler, &vec![0.0; 2400]);
        assert!(out.len() >= 4000 && out.len() <= 5000, "got {}", out.len());
        Ok(())
    }
}
