//! Building models and moving their weights to and from checkpoint files

use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;
use std::path::{Path, PathBuf};

use super::Architecture;
use crate::compute::ComputeContext;
use crate::{GalshapeError, Result};

/// File burn writes for a checkpoint path: `.mpk` appended, never substituted
/// for whatever follows the last dot of the stem
pub fn checkpoint_file(path: &Path) -> PathBuf {
    if path.extension().is_some_and(|ext| ext == "mpk") {
        return path.to_path_buf();
    }
    let mut name = path.as_os_str().to_os_string();
    name.push(".mpk");
    PathBuf::from(name)
}

/// Build `architecture` on the primary device, wrapped for the configured
/// device set, and restore weights from `path` when given.
///
/// With `strict` a restored module whose parameter count differs from the
/// fresh one is an error; otherwise the mismatch is only logged.
pub fn load_model<B, A>(
    architecture: &A,
    context: &ComputeContext<B>,
    path: Option<&Path>,
    strict: bool,
) -> Result<A::Model>
where
    B: Backend,
    A: Architecture<B>,
{
    let model = context.wrap(architecture.init(context.device()));
    match path {
        Some(path) => restore(model, path, context.device(), strict),
        None => Ok(model),
    }
}

/// Load a checkpoint record into an existing module
pub fn restore<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
    device: &B::Device,
    strict: bool,
) -> Result<M> {
    let file = checkpoint_file(path);
    if !file.exists() {
        return Err(GalshapeError::Checkpoint {
            path: file,
            message: "file not found".to_string(),
        });
    }

    let expected = model.num_params();
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let model = model
        .load_file(file.clone(), &recorder, device)
        .map_err(|e| GalshapeError::Checkpoint {
            path: file.clone(),
            message: e.to_string(),
        })?;

    let found = model.num_params();
    if found != expected {
        let message = format!("expected {} parameters, checkpoint has {}", expected, found);
        if strict {
            return Err(GalshapeError::Checkpoint {
                path: file,
                message,
            });
        }
        log::warn!("Loading {} non-strictly: {}", file.display(), message);
    }

    log::info!("Restored {} parameters from {}", found, file.display());
    Ok(model)
}

/// Persist a module's weights; returns the file actually written
pub fn save_model<B: Backend, M: Module<B>>(model: &M, path: &Path) -> Result<PathBuf> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    let file = checkpoint_file(path);
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(file.clone(), &recorder)
        .map_err(|e| GalshapeError::Checkpoint {
            path: file.clone(),
            message: e.to_string(),
        })?;

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CaliNet, CaliNetConfig};
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, Tensor};

    type TestBackend = NdArray<f32>;

    fn config(hidden: usize) -> CaliNetConfig {
        CaliNetConfig {
            input_dim: 3,
            output_dim: 1,
            hidden,
            dropout: 0.0,
        }
    }

    #[test]
    fn test_round_trip_gives_identical_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let context = ComputeContext::<TestBackend>::single(Default::default());

        let original = load_model(&config(8), &context, None, true).unwrap();
        let path = dir.path().join("nested").join("cali0");
        let written = save_model(&original, &path).unwrap();
        assert!(written.exists());
        assert_eq!(written.extension().unwrap(), "mpk");

        let restored = load_model(&config(8), &context, Some(&path), true).unwrap();

        let input =
            Tensor::<TestBackend, 2>::random([4, 3], Distribution::Default, context.device());
        let a = original.forward(input.clone()).into_data().to_vec::<f32>().unwrap();
        let b = restored.forward(input).into_data().to_vec::<f32>().unwrap();
        assert_eq!(a.len(), 4);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-6, "{} != {}", x, y);
        }
    }

    #[test]
    fn test_checkpoint_file_appends_extension() {
        assert_eq!(
            checkpoint_file(Path::new("model/net3")),
            PathBuf::from("model/net3.mpk")
        );
        assert_eq!(
            checkpoint_file(Path::new("model/run_lr0.01_3")),
            PathBuf::from("model/run_lr0.01_3.mpk")
        );
        assert_eq!(
            checkpoint_file(Path::new("model/net3.mpk")),
            PathBuf::from("model/net3.mpk")
        );
    }

    #[test]
    fn test_dotted_name_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let context = ComputeContext::<TestBackend>::single(Default::default());
        let model = load_model(&config(8), &context, None, true).unwrap();

        let path = dir.path().join("run_lr0.01_7");
        let written = save_model(&model, &path).unwrap();
        assert_eq!(written, dir.path().join("run_lr0.01_7.mpk"));
        assert!(written.exists());
        assert!(!dir.path().join("run_lr0.mpk").exists());

        let restored = load_model(&config(8), &context, Some(&path), true).unwrap();
        assert_eq!(restored.num_params(), model.num_params());
    }

    #[test]
    fn test_missing_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let context = ComputeContext::<TestBackend>::single(Default::default());
        let result = load_model(&config(8), &context, Some(&dir.path().join("absent")), true);
        assert!(matches!(result, Err(GalshapeError::Checkpoint { .. })));
    }

    #[test]
    fn test_corrupt_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken");
        std::fs::write(checkpoint_file(&path), b"not a record").unwrap();

        let context = ComputeContext::<TestBackend>::single(Default::default());
        let result = load_model(&config(8), &context, Some(&path), false);
        assert!(matches!(result, Err(GalshapeError::Checkpoint { .. })));
    }

    #[test]
    fn test_strict_parameter_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let context = ComputeContext::<TestBackend>::single(Default::default());

        let small: CaliNet<TestBackend> = load_model(&config(8), &context, None, true).unwrap();
        let path = dir.path().join("small");
        save_model(&small, &path).unwrap();

        let strict = load_model(&config(16), &context, Some(&path), true);
        assert!(matches!(strict, Err(GalshapeError::Checkpoint { .. })));

        let lenient = load_model(&config(16), &context, Some(&path), false).unwrap();
        assert_eq!(lenient.num_params(), small.num_params());
    }
}
