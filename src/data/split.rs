//! Train/validation partitioning of a dataset's index range

use burn::data::dataset::transform::PartialDataset;
use burn::data::dataset::Dataset;
use std::ops::Range;
use std::sync::Arc;

use crate::{GalshapeError, Result};

/// Disjoint validation/training ranges covering `0..len` exactly once.
///
/// Validation takes the first `floor(fraction * len)` indices, training the
/// remainder. The order is deterministic; any shuffling happens later in the
/// batch provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSplit {
    pub train: Range<usize>,
    pub valid: Range<usize>,
}

impl DataSplit {
    pub fn new(len: usize, validation_fraction: f64) -> Result<Self> {
        if !validation_fraction.is_finite() || !(0.0..1.0).contains(&validation_fraction) {
            return Err(GalshapeError::Config(format!(
                "validation fraction must be in [0, 1), got {}",
                validation_fraction
            )));
        }

        let split = (validation_fraction * len as f64).floor() as usize;
        Ok(DataSplit {
            train: split..len,
            valid: 0..split,
        })
    }

    pub fn train_len(&self) -> usize {
        self.train.len()
    }

    pub fn valid_len(&self) -> usize {
        self.valid.len()
    }

    /// Require both ranges to start and end on group boundaries
    pub fn check_aligned(&self, group_size: usize) -> Result<()> {
        if group_size == 0 {
            return Err(GalshapeError::Config("group size must be > 0".to_string()));
        }
        let misaligned = [self.valid.start, self.valid.end, self.train.end]
            .iter()
            .any(|boundary| boundary % group_size != 0);
        if misaligned {
            return Err(GalshapeError::Config(format!(
                "split {:?}/{:?} does not fall on groups of {} samples",
                self.valid, self.train, group_size
            )));
        }
        Ok(())
    }

    /// Views of the two subsets over the same underlying dataset
    pub fn apply<D, I>(
        &self,
        dataset: Arc<D>,
    ) -> (PartialDataset<Arc<D>, I>, PartialDataset<Arc<D>, I>)
    where
        D: Dataset<I>,
        I: Clone + Send + Sync,
    {
        let train = PartialDataset::new(dataset.clone(), self.train.start, self.train.end);
        let valid = PartialDataset::new(dataset, self.valid.start, self.valid.end);
        (train, valid)
    }
}

/// Number of batches a provider yields for `len` items
pub fn batch_count(len: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        0
    } else {
        len.div_ceil(batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::data::dataset::InMemDataset;

    #[test]
    fn test_split_sizes() {
        let split = DataSplit::new(100, 0.1).unwrap();
        assert_eq!(split.valid_len(), 10);
        assert_eq!(split.train_len(), 90);
        assert_eq!(split.valid, 0..10);
        assert_eq!(split.train, 10..100);
    }

    #[test]
    fn test_split_partitions_every_length() {
        for len in [0usize, 1, 7, 33, 250] {
            for fraction in [0.0, 0.05, 0.1, 0.5, 0.99] {
                let split = DataSplit::new(len, fraction).unwrap();
                let expected = (fraction * len as f64).floor() as usize;
                assert_eq!(split.valid_len(), expected);
                assert_eq!(split.train_len() + split.valid_len(), len);

                let all: Vec<usize> = split.valid.clone().chain(split.train.clone()).collect();
                assert_eq!(all, (0..len).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn test_rejects_degenerate_fraction() {
        assert!(DataSplit::new(10, 1.0).is_err());
        assert!(DataSplit::new(10, 1.5).is_err());
        assert!(DataSplit::new(10, -0.1).is_err());
        assert!(DataSplit::new(10, f64::NAN).is_err());
    }

    #[test]
    fn test_group_alignment() {
        let split = DataSplit::new(40, 0.25).unwrap();
        // valid 0..10, train 10..40
        assert!(split.check_aligned(5).is_ok());
        assert!(split.check_aligned(2).is_ok());
        assert!(split.check_aligned(4).is_err());
        assert!(split.check_aligned(3).is_err());
    }

    #[test]
    fn test_apply_views_share_dataset() {
        let dataset = Arc::new(InMemDataset::new((0..20).collect::<Vec<i32>>()));
        let split = DataSplit::new(dataset.len(), 0.25).unwrap();
        let (train, valid) = split.apply(dataset);

        assert_eq!(valid.len(), 5);
        assert_eq!(train.len(), 15);
        assert_eq!(valid.get(0), Some(0));
        assert_eq!(train.get(0), Some(5));
        assert_eq!(train.get(14), Some(19));
        assert_eq!(train.get(15), None);
    }

    #[test]
    fn test_batch_count() {
        assert_eq!(batch_count(10, 4), 3);
        assert_eq!(batch_count(8, 4), 2);
        assert_eq!(batch_count(0, 4), 0);
    }
}
