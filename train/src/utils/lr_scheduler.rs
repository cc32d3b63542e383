use crate::common::*;

/// The learning rate schedule that decays by a fixed factor at given epochs.
///
/// The displayed learning rate is the optimizer learning rate scaled by
/// `display_factor` and decays along with it.
#[derive(Debug, Clone)]
pub struct LrScheduler {
    lr: f64,
    gamma: f64,
    decay_epochs: Vec<usize>,
    display_factor: f64,
}

impl LrScheduler {
    pub fn new(init_lr: f64, gamma: f64, decay_epochs: &[usize]) -> Result<Self> {
        ensure!(init_lr > 0.0, "initial learning rate must be positive");
        ensure!(gamma > 0.0, "gamma must be positive");

        Ok(Self {
            lr: init_lr,
            gamma,
            decay_epochs: decay_epochs.to_vec(),
            display_factor: 1.0,
        })
    }

    pub fn display_factor(mut self, factor: f64) -> Self {
        self.display_factor = factor;
        self
    }

    /// Applies the decays of epochs before `epoch`.
    pub fn replay(mut self, epoch: usize) -> Self {
        (0..epoch).for_each(|epoch| {
            self.start_epoch(epoch);
        });
        self
    }

    /// Updates the learning rate at the start of an epoch and returns it.
    pub fn start_epoch(&mut self, epoch: usize) -> f64 {
        let count = self
            .decay_epochs
            .iter()
            .filter(|&&decay_epoch| decay_epoch == epoch)
            .count();
        self.lr *= self.gamma.powi(count as i32);
        self.lr
    }

    /// The current learning rate of the optimizer.
    pub fn lr(&self) -> f64 {
        self.lr
    }

    /// The current learning rate shown in logs.
    pub fn display_lr(&self) -> f64 {
        self.lr * self.display_factor
    }
}
