mod backend;
mod runner;

use std::path::Path;

pub use backend::{MidiRecord, OfflineBackend, OfflineBlock, RenderedBlock, cv_samples};
pub use runner::OfflineRunner;

/// Writes mono CV samples as a 32-bit float WAV file.
pub fn write_cv_wav(samples: &[f32], sample_rate: u32, path: &Path) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;

    for &sample in samples {
        writer.write_sample(sample)?;
    }

    writer.finalize()?;
    Ok(())
}
