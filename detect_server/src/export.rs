//! Exporter capability: converting the baseline model into the optimized on-device format.
//!
use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use common::Notice;
use tract_onnx::prelude::*;

use crate::{config::AppConfig, nn::nnef};

/// Converts a model file into another on-disk format.
pub trait Exporter: Send + Sync {
    fn export(&self, baseline: &Path, output: &Path) -> Result<()>;
}

/// Writes ONNX models as decluttered NNEF directories that load without ONNX translation.
pub struct NnefExporter {
    input_size: u32,
}

impl NnefExporter {
    pub fn new(input_size: u32) -> Self {
        Self { input_size }
    }
}

impl Exporter for NnefExporter {
    fn export(&self, baseline: &Path, output: &Path) -> Result<()> {
        if !baseline.is_file() {
            bail!("baseline model {} not found", baseline.display());
        }

        let size = self.input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(baseline)
            .with_context(|| format!("failed to load ONNX model from {}", baseline.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_typed()
            .context("failed to type model")?
            .into_decluttered()
            .context("failed to declutter model")?;

        // Previous exports are replaced
        if output.exists() {
            fs::remove_dir_all(output)
                .with_context(|| format!("failed to remove previous export {}", output.display()))?;
        }

        nnef()
            .write_to_dir(&model, output)
            .with_context(|| format!("failed to write NNEF model to {}", output.display()))?;

        Ok(())
    }
}

/// Export the configured baseline model and describe the outcome for the user.
pub fn export_model(exporter: &dyn Exporter, config: &AppConfig) -> Notice {
    let baseline = config.baseline_model_path();
    let output = config.optimized_model_path();
    log::info!(
        "Exporting {} to {}",
        baseline.display(),
        output.display()
    );

    match exporter.export(&baseline, &output) {
        Ok(()) => {
            log::info!("Export to {} done", output.display());
            Notice::success(format!(
                "Model exported successfully to '{}'!",
                output.display()
            ))
        }
        Err(e) => {
            log::error!("Export failed: {e:#}");
            Notice::error(format!("Export failed: {e:#}"))
        }
    }
}

#[cfg(test)]
mod test {

    use common::Level;

    use super::*;
    use crate::{config::OPTIMIZED_MODEL_DIR, fakes::FakeExporter};

    #[test]
    fn success_names_output_directory() {
        let config = AppConfig::default();
        let notice = export_model(&FakeExporter::default(), &config);

        assert_eq!(notice.level, Level::Success);
        assert!(notice.text.contains(OPTIMIZED_MODEL_DIR));
    }

    #[test]
    fn failure_is_reported() {
        let notice = export_model(&FakeExporter::failing(), &AppConfig::default());

        assert_eq!(notice.level, Level::Error);
        assert!(notice.text.starts_with("Export failed: "));
    }

    #[test]
    fn missing_baseline_fails_export() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = AppConfig {
            model_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let notice = export_model(&NnefExporter::new(640), &config);

        assert_eq!(notice.level, Level::Error);
        assert!(notice.text.contains("not found"));
        assert!(!config.optimized_model_path().exists());
        Ok(())
    }
}
