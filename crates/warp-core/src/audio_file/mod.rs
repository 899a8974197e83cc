//! WAV decoding and encoding
//!
//! Input may be 8/16/24/32-bit integer or 32-bit float PCM with any channel
//! count; output is always 32-bit float at the segment's sample rate.

use std::io::{Cursor, Read};
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::error::{WarpError, WarpResult};
use crate::types::{AudioSegment, Sample};

/// Decode a WAV stream into a planar segment
pub fn decode_wav<R: Read>(reader: R) -> WarpResult<AudioSegment> {
    let reader = WavReader::new(reader).map_err(decode_error)?;
    let spec = reader.spec();
    let channel_count = spec.channels as usize;
    if channel_count == 0 {
        return Err(WarpError::Decode("WAV header declares no channels".to_string()));
    }

    let interleaved: Vec<Sample> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(decode_error)?,
        SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(WarpError::Decode(format!(
                    "unsupported integer sample width: {} bits",
                    spec.bits_per_sample
                )));
            }
            let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f64;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| (v as f64 * scale) as Sample))
                .collect::<Result<_, _>>()
                .map_err(decode_error)?
        }
    };

    // A truncated final frame is dropped rather than rejected
    let whole = interleaved.len() - interleaved.len() % channel_count;
    let segment = AudioSegment::from_interleaved(&interleaved[..whole], channel_count, spec.sample_rate)
        .map_err(|e| WarpError::Decode(e.to_string()))?;

    log::debug!(
        "Decoded WAV: {} frames x {} ch at {} Hz ({} bit {:?})",
        segment.len(),
        channel_count,
        spec.sample_rate,
        spec.bits_per_sample,
        spec.sample_format
    );
    Ok(segment)
}

/// Decode WAV bytes held in memory (e.g. a server response body)
pub fn decode_wav_bytes(bytes: &[u8]) -> WarpResult<AudioSegment> {
    decode_wav(Cursor::new(bytes))
}

/// Read a WAV file from disk
pub fn read_wav(path: &Path) -> WarpResult<AudioSegment> {
    let file = std::fs::File::open(path)?;
    decode_wav(std::io::BufReader::new(file))
}

fn float_spec(segment: &AudioSegment) -> WarpResult<WavSpec> {
    let channels = u16::try_from(segment.channel_count())
        .map_err(|_| WarpError::InvalidInput(format!("too many channels: {}", segment.channel_count())))?;
    Ok(WavSpec {
        channels,
        sample_rate: segment.sample_rate(),
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    })
}

/// Encode a segment as 32-bit float WAV bytes
pub fn encode_wav_bytes(segment: &AudioSegment) -> WarpResult<Vec<u8>> {
    let spec = float_spec(segment)?;
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).map_err(encode_error)?;
        for s in segment.to_interleaved() {
            writer.write_sample(s).map_err(encode_error)?;
        }
        writer.finalize().map_err(encode_error)?;
    }
    Ok(cursor.into_inner())
}

/// Write a segment to disk as 32-bit float WAV
pub fn write_wav(path: &Path, segment: &AudioSegment) -> WarpResult<()> {
    let spec = float_spec(segment)?;
    let mut writer = WavWriter::create(path, spec).map_err(encode_error)?;
    for s in segment.to_interleaved() {
        writer.write_sample(s).map_err(encode_error)?;
    }
    writer.finalize().map_err(encode_error)?;
    log::info!(
        "Wrote {:?}: {} frames x {} ch",
        path,
        segment.len(),
        segment.channel_count()
    );
    Ok(())
}

fn decode_error(e: hound::Error) -> WarpError {
    match e {
        hound::Error::IoError(io) if io.kind() != std::io::ErrorKind::UnexpectedEof => WarpError::Io(io),
        other => WarpError::Decode(other.to_string()),
    }
}

fn encode_error(e: hound::Error) -> WarpError {
    match e {
        hound::Error::IoError(io) => WarpError::Io(io),
        other => WarpError::InvalidInput(format!("cannot encode WAV: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int16_wav(channels: u16, samples: &[i16]) -> Vec<u8> {
        let spec = WavSpec {
            channels,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_int16_stereo() {
        let bytes = int16_wav(2, &[16384, -16384, 32767, 0]);
        let segment = decode_wav_bytes(&bytes).unwrap();

        assert_eq!(segment.sample_rate(), 22050);
        assert_eq!(segment.channel_count(), 2);
        assert_eq!(segment.len(), 2);
        assert_eq!(segment.channel(0)[0], 0.5);
        assert_eq!(segment.channel(1)[0], -0.5);
        assert!((segment.channel(0)[1] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_float_bytes_roundtrip() {
        let segment = AudioSegment::new(vec![vec![0.25, -0.75, 1.0]], 48000).unwrap();
        let bytes = encode_wav_bytes(&segment).unwrap();
        assert_eq!(decode_wav_bytes(&bytes).unwrap(), segment);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let segment = AudioSegment::new(vec![vec![0.1; 64], vec![-0.1; 64]], 44100).unwrap();

        write_wav(&path, &segment).unwrap();
        assert_eq!(read_wav(&path).unwrap(), segment);
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let result = decode_wav_bytes(b"definitely not a riff header");
        assert!(matches!(result, Err(WarpError::Decode(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = read_wav(Path::new("/nonexistent/input.wav"));
        assert!(matches!(result, Err(WarpError::Io(_))));
    }
}
