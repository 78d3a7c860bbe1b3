use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Attention configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tuning for the attention scheduler.
///
/// The admission threshold for low-priority items is
/// `base_threshold − arousal_weight · arousal`, so high arousal lets
/// weaker impulses through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionConfig {
    #[serde(default = "d_initial_arousal")]
    pub initial_arousal: f64,

    /// Arousal never decays below this floor.
    #[serde(default = "d_arousal_floor")]
    pub arousal_floor: f64,

    #[serde(default = "d_base_threshold")]
    pub base_threshold: f64,

    #[serde(default = "d_arousal_weight")]
    pub arousal_weight: f64,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            initial_arousal: d_initial_arousal(),
            arousal_floor: d_arousal_floor(),
            base_threshold: d_base_threshold(),
            arousal_weight: d_arousal_weight(),
        }
    }
}

impl AttentionConfig {
    /// Salience admission threshold at the given arousal level.
    pub fn admission_threshold(&self, arousal: f64) -> f64 {
        self.base_threshold - self.arousal_weight * arousal
    }
}

fn d_initial_arousal() -> f64 {
    0.3
}

fn d_arousal_floor() -> f64 {
    0.1
}

fn d_base_threshold() -> f64 {
    0.6
}

fn d_arousal_weight() -> f64 {
    0.3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_linear_in_arousal() {
        let cfg = AttentionConfig::default();
        assert!((cfg.admission_threshold(1.0) - 0.3).abs() < 1e-9);
        assert!((cfg.admission_threshold(0.1) - 0.57).abs() < 1e-9);
    }
}
