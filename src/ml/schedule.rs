/// Step decay: the rate is multiplied by `gamma` at every milestone epoch.
#[derive(Debug, Clone)]
pub struct MultiStepLr {
    init:       f64,
    milestones: Vec<usize>,
    gamma:      f64,
}

impl MultiStepLr {
    pub fn new(init: f64, milestones: &[usize], gamma: f64) -> Self {
        let mut milestones = milestones.to_vec();
        milestones.sort_unstable();
        Self { init, milestones, gamma }
    }

    /// Learning rate for a 0-based epoch.
    pub fn lr(&self, epoch: usize) -> f64 {
        let passed = self.milestones.iter().filter(|&&m| m <= epoch).count();
        self.init * self.gamma.powi(passed as i32)
    }
}
