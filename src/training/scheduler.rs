//! Learning-rate reduction when a monitored loss stops improving

use crate::SchedulerConfig;

/// Minimise-mode plateau scheduler with a relative improvement threshold.
///
/// After each epoch the monitored loss is passed to [`step`](Self::step). Once
/// more than `patience` consecutive epochs fail to beat the best loss by the
/// relative `threshold`, the rate is multiplied by `factor` (floored at
/// `min_lr`) and `cooldown` epochs pass before bad epochs count again.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    lr: f64,
    factor: f64,
    patience: usize,
    threshold: f64,
    cooldown: usize,
    min_lr: f64,
    eps: f64,
    best: f64,
    num_bad_epochs: usize,
    cooldown_counter: usize,
    epoch: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(initial_lr: f64) -> Self {
        let defaults = SchedulerConfig::default();
        ReduceLrOnPlateau {
            lr: initial_lr,
            factor: defaults.factor,
            patience: defaults.patience,
            threshold: defaults.threshold,
            cooldown: defaults.cooldown,
            min_lr: defaults.min_lr,
            eps: defaults.eps,
            best: f64::INFINITY,
            num_bad_epochs: 0,
            cooldown_counter: 0,
            epoch: 0,
        }
    }

    pub fn from_config(initial_lr: f64, config: &SchedulerConfig) -> Self {
        Self::new(initial_lr)
            .with_factor(config.factor)
            .with_patience(config.patience)
            .with_threshold(config.threshold)
            .with_cooldown(config.cooldown)
            .with_min_lr(config.min_lr)
            .with_eps(config.eps)
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = patience;
        self
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Relative improvement a loss must make over the best to count
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: usize) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_min_lr(mut self, min_lr: f64) -> Self {
        self.min_lr = min_lr;
        self
    }

    /// Reductions smaller than `eps` are skipped
    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    /// Current learning rate
    pub fn lr(&self) -> f64 {
        self.lr
    }

    /// Best loss seen so far
    pub fn best(&self) -> f64 {
        self.best
    }

    /// Record one epoch's loss and return the rate for the next epoch
    pub fn step(&mut self, metric: f64) -> f64 {
        self.epoch += 1;

        if metric < self.best * (1.0 - self.threshold) {
            self.best = metric;
            self.num_bad_epochs = 0;
        } else {
            self.num_bad_epochs += 1;
        }

        if self.cooldown_counter > 0 {
            self.cooldown_counter -= 1;
            self.num_bad_epochs = 0;
        }

        if self.num_bad_epochs > self.patience {
            self.reduce();
            self.cooldown_counter = self.cooldown;
            self.num_bad_epochs = 0;
        }

        self.lr
    }

    fn reduce(&mut self) {
        let new_lr = (self.lr * self.factor).max(self.min_lr);
        if self.lr - new_lr > self.eps {
            log::info!(
                "Epoch {}: reducing learning rate from {:.4e} to {:.4e}",
                self.epoch,
                self.lr,
                new_lr
            );
            self.lr = new_lr;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_reduces_after_patience_plus_one_bad_epochs() {
        let mut sched = ReduceLrOnPlateau::new(0.1).with_patience(2).with_factor(0.5);

        sched.step(1.0);
        sched.step(1.0);
        sched.step(1.0);
        assert!(approx_eq(sched.lr(), 0.1), "two bad epochs within patience");

        sched.step(1.0);
        assert!(approx_eq(sched.lr(), 0.05), "third bad epoch reduces: {}", sched.lr());
    }

    #[test]
    fn test_improvement_resets_counter() {
        let mut sched = ReduceLrOnPlateau::new(0.1).with_patience(1);

        for loss in [5.0, 5.0, 4.0, 4.0, 3.0, 3.0] {
            sched.step(loss);
        }
        assert!(approx_eq(sched.lr(), 0.1));
        assert!(approx_eq(sched.best(), 3.0));
    }

    #[test]
    fn test_relative_threshold() {
        let mut sched = ReduceLrOnPlateau::new(0.1).with_patience(0);

        sched.step(1.0);
        // within 1e-4 of the best does not count as an improvement
        sched.step(0.99995);
        assert!(approx_eq(sched.lr(), 0.01));
        assert!(approx_eq(sched.best(), 1.0));
    }

    #[test]
    fn test_min_lr_floor() {
        let mut sched = ReduceLrOnPlateau::new(0.001)
            .with_patience(0)
            .with_min_lr(1e-4);

        sched.step(1.0);
        sched.step(1.0);
        assert!(approx_eq(sched.lr(), 1e-4));

        sched.step(1.0);
        sched.step(1.0);
        assert!(approx_eq(sched.lr(), 1e-4), "should not go below min_lr");
    }

    #[test]
    fn test_cooldown_suspends_counting() {
        let mut sched = ReduceLrOnPlateau::new(1.0)
            .with_patience(0)
            .with_factor(0.5)
            .with_cooldown(2);

        sched.step(1.0);
        sched.step(1.0);
        assert!(approx_eq(sched.lr(), 0.5));

        // two cooldown epochs
        sched.step(1.0);
        sched.step(1.0);
        assert!(approx_eq(sched.lr(), 0.5));

        sched.step(1.0);
        assert!(approx_eq(sched.lr(), 0.25));
    }

    #[test]
    fn test_default_settings() {
        let mut sched = ReduceLrOnPlateau::new(0.01);
        sched.step(1.0);
        for _ in 0..10 {
            sched.step(1.0);
        }
        assert!(approx_eq(sched.lr(), 0.01));

        sched.step(1.0);
        assert!((sched.lr() - 0.001).abs() < 1e-15);
    }
}
