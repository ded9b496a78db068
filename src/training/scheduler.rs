use serde::{Deserialize, Serialize};

/// Step decay at fixed epochs: the rate is multiplied by `gamma` each time
/// the epoch counter reaches a milestone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiStepLr {
    base_lr: f64,
    milestones: Vec<usize>,
    gamma: f64,
    last_epoch: usize,
}

impl MultiStepLr {
    pub fn new(base_lr: f64, milestones: Vec<usize>, gamma: f64) -> Self {
        let mut milestones = milestones;
        milestones.sort_unstable();
        Self {
            base_lr,
            milestones,
            gamma,
            last_epoch: 0,
        }
    }

    /// Milestones 75, 150 and 225 with a tenfold decay.
    pub fn cifar(base_lr: f64) -> Self {
        Self::new(base_lr, vec![75, 150, 225], 0.1)
    }

    /// No milestones; the rate never changes.
    pub fn constant(lr: f64) -> Self {
        Self::new(lr, Vec::new(), 1.0)
    }

    pub fn lr(&self) -> f64 {
        let drops = self
            .milestones
            .iter()
            .filter(|&&milestone| milestone <= self.last_epoch)
            .count();
        self.base_lr * self.gamma.powi(drops as i32)
    }

    /// Advances one epoch; returns `true` when a milestone was crossed.
    pub fn step(&mut self) -> bool {
        self.last_epoch += 1;
        self.milestones.contains(&self.last_epoch)
    }

    pub fn last_epoch(&self) -> usize {
        self.last_epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_drops_at_each_milestone() {
        let mut scheduler = MultiStepLr::cifar(0.1);
        let mut drops = Vec::new();

        for epoch in 1..=300 {
            if scheduler.step() {
                drops.push(epoch);
            }
        }

        assert_eq!(drops, vec![75, 150, 225]);
        assert!((scheduler.lr() - 1e-4).abs() < 1e-12);
    }

    #[test]
    fn rate_is_constant_between_milestones() {
        let mut scheduler = MultiStepLr::new(1.0, vec![2], 0.5);
        assert_eq!(scheduler.lr(), 1.0);
        assert!(!scheduler.step());
        assert_eq!(scheduler.lr(), 1.0);
        assert!(scheduler.step());
        assert_eq!(scheduler.lr(), 0.5);
        assert!(!scheduler.step());
        assert_eq!(scheduler.lr(), 0.5);
    }

    #[test]
    fn state_survives_json() {
        let mut scheduler = MultiStepLr::cifar(0.1);
        for _ in 0..80 {
            scheduler.step();
        }

        let json = serde_json::to_string(&scheduler).unwrap();
        let restored: MultiStepLr = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, scheduler);
        assert_eq!(restored.last_epoch(), 80);
    }
}
