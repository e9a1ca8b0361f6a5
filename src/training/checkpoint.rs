//! Per-epoch checkpoint naming and retention

use burn::module::Module;
use burn::tensor::backend::Backend;
use std::path::{Path, PathBuf};

use crate::model::loader::{checkpoint_file, save_model};
use crate::training::metrics::LossHistory;
use crate::{Monitor, Result, Retention, TrainConfig};

/// Name of the loss history written next to the checkpoints
pub const LOSS_HISTORY_FILE: &str = "training_loss.fits";

/// Writes one checkpoint per epoch and prunes old ones by policy
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    model_path: String,
    model_name: String,
    retention: Retention,
    monitor: Monitor,
    saved: Vec<usize>,
}

impl CheckpointManager {
    pub fn new(model_path: &str, model_name: &str, retention: Retention, monitor: Monitor) -> Self {
        CheckpointManager {
            model_path: model_path.to_string(),
            model_name: model_name.to_string(),
            retention,
            monitor,
            saved: Vec::new(),
        }
    }

    pub fn from_config(config: &TrainConfig) -> Self {
        Self::new(
            &config.model_path,
            &config.model_name,
            config.checkpoint_retention,
            config.monitor(),
        )
    }

    /// `{model_path}{model_name}{epoch}`, plain concatenation
    pub fn path_for(&self, epoch: usize) -> PathBuf {
        PathBuf::from(format!("{}{}{}", self.model_path, self.model_name, epoch))
    }

    /// `{model_path}/training_loss.fits`
    pub fn loss_history_path(&self) -> PathBuf {
        Path::new(&self.model_path).join(LOSS_HISTORY_FILE)
    }

    /// Epochs whose checkpoint currently exists
    pub fn saved(&self) -> &[usize] {
        &self.saved
    }

    /// Save the model for `epoch`, then apply the retention policy.
    /// `history` must already include this epoch's losses.
    pub fn save<B: Backend, M: Module<B>>(
        &mut self,
        model: &M,
        epoch: usize,
        history: &LossHistory,
    ) -> Result<PathBuf> {
        let file = save_model(model, &self.path_for(epoch))?;
        log::debug!("Saved checkpoint {}", file.display());
        self.saved.push(epoch);

        let best = history.best_epoch(self.monitor);
        for stale in prune_set(&self.saved, self.retention, best) {
            let stale_file = checkpoint_file(&self.path_for(stale));
            if stale_file.exists() {
                std::fs::remove_file(&stale_file)?;
                log::debug!("Removed checkpoint {}", stale_file.display());
            }
            self.saved.retain(|&epoch| epoch != stale);
        }

        Ok(file)
    }
}

/// Saved epochs the policy drops, given the best epoch so far
fn prune_set(saved: &[usize], retention: Retention, best: Option<usize>) -> Vec<usize> {
    match retention {
        Retention::KeepAll => Vec::new(),
        Retention::KeepLast(keep) => {
            let drop = saved.len().saturating_sub(keep);
            saved[..drop].to_vec()
        }
        Retention::KeepBest => match best {
            Some(best) if saved.contains(&best) => {
                saved.iter().copied().filter(|&epoch| epoch != best).collect()
            }
            // nothing comparable yet; keep only the newest
            _ => {
                let drop = saved.len().saturating_sub(1);
                saved[..drop].to_vec()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::nn::{Linear, LinearConfig};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_naming() {
        let manager = CheckpointManager::new(
            "./model/",
            "test_model",
            Retention::KeepAll,
            Monitor::TrainLoss,
        );
        assert_eq!(manager.path_for(3), PathBuf::from("./model/test_model3"));
        assert_eq!(
            manager.loss_history_path(),
            PathBuf::from("./model/training_loss.fits")
        );
    }

    #[test]
    fn test_prune_sets() {
        let saved = [0, 1, 2, 3];
        assert!(prune_set(&saved, Retention::KeepAll, Some(1)).is_empty());
        assert_eq!(prune_set(&saved, Retention::KeepLast(2), None), vec![0, 1]);
        assert!(prune_set(&saved, Retention::KeepLast(5), None).is_empty());
        assert_eq!(prune_set(&saved, Retention::KeepBest, Some(1)), vec![0, 2, 3]);
        assert_eq!(prune_set(&saved, Retention::KeepBest, None), vec![0, 1, 2]);
    }

    fn run_epochs(retention: Retention, valid: &[f64]) -> (tempfile::TempDir, CheckpointManager) {
        run_named("net", retention, valid)
    }

    fn run_named(
        name: &str,
        retention: Retention,
        valid: &[f64],
    ) -> (tempfile::TempDir, CheckpointManager) {
        let dir = tempfile::tempdir().unwrap();
        let model_path = format!("{}/", dir.path().display());
        let mut manager = CheckpointManager::new(&model_path, name, retention, Monitor::ValidLoss);

        let model: Linear<TestBackend> = LinearConfig::new(2, 1).init(&Default::default());
        let mut history = LossHistory::new();
        for (epoch, &loss) in valid.iter().enumerate() {
            history.record_epoch(1.0, loss);
            manager.save(&model, epoch, &history).unwrap();
        }
        (dir, manager)
    }

    fn files(dir: &tempfile::TempDir) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_keep_all() {
        let (dir, manager) = run_epochs(Retention::KeepAll, &[0.5, 0.4, 0.6]);
        assert_eq!(manager.saved(), &[0, 1, 2]);
        assert_eq!(files(&dir), vec!["net0.mpk", "net1.mpk", "net2.mpk"]);
    }

    #[test]
    fn test_keep_last() {
        let (dir, manager) = run_epochs(Retention::KeepLast(2), &[0.5, 0.4, 0.6]);
        assert_eq!(manager.saved(), &[1, 2]);
        assert_eq!(files(&dir), vec!["net1.mpk", "net2.mpk"]);
    }

    #[test]
    fn test_keep_best() {
        let (dir, manager) = run_epochs(Retention::KeepBest, &[0.5, 0.4, 0.6]);
        assert_eq!(manager.saved(), &[1]);
        assert_eq!(files(&dir), vec!["net1.mpk"]);
    }

    #[test]
    fn test_dotted_name_keeps_one_file_per_epoch() {
        let (dir, manager) = run_named("run_lr0.01_", Retention::KeepAll, &[0.5, 0.4, 0.6]);
        assert_eq!(manager.saved(), &[0, 1, 2]);
        assert_eq!(
            files(&dir),
            vec!["run_lr0.01_0.mpk", "run_lr0.01_1.mpk", "run_lr0.01_2.mpk"]
        );
    }

    #[test]
    fn test_dotted_name_keep_last() {
        let (dir, manager) =
            run_named("run_lr0.01_", Retention::KeepLast(2), &[0.5, 0.4, 0.6, 0.3]);
        assert_eq!(manager.saved(), &[2, 3]);
        assert_eq!(files(&dir), vec!["run_lr0.01_2.mpk", "run_lr0.01_3.mpk"]);
    }
}
