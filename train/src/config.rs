//! Training program configuration format.

use crate::common::*;
use sipn::{dataset::DatasetConfig, loss::TripletMining, model::SipnConfig};

/// The main training configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The learning rate decay factor.
    pub gamma: R64,
    /// Epochs at whose start the learning rate is multiplied by `gamma`.
    #[serde(default = "default_decay_epochs")]
    pub decay_epochs: Vec<usize>,
    /// The momentum of SGD.
    #[serde(default = "default_momentum")]
    pub momentum: R64,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: R64,
    /// The learning rate multiplier when Adam is chosen.
    #[serde(default = "default_adam_lr_factor")]
    pub adam_lr_factor: R64,
    /// The random seed of weight initialization and sampling.
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub triplet: TripletConfig,
    /// Parameters whose names start with any of these prefixes are not trained.
    #[serde(default)]
    pub frozen_prefixes: Vec<String>,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub model: SipnConfig,
    /// If set, write loss curves as tensorboard events.
    #[serde(default = "default_tensorboard")]
    pub tensorboard: bool,
    /// If set, the detection losses of negative images are also optimized.
    #[serde(default)]
    pub negative_detection_loss: bool,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;

        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json5") | Some("json") => json5::from_str(&text)?,
            _ => serde_yaml::from_str(&text)?,
        };
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.gamma > 0.0, "gamma must be positive");
        ensure!(self.adam_lr_factor > 0.0, "adam_lr_factor must be positive");
        ensure!(
            self.triplet.margin >= 0.0,
            "triplet margin must be non-negative"
        );
        Ok(())
    }
}

/// Triplet loss options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TripletConfig {
    pub margin: R64,
    pub mining: TripletMining,
}

impl Default for TripletConfig {
    fn default() -> Self {
        Self {
            margin: r64(0.2),
            mining: TripletMining::Hard,
        }
    }
}

fn default_decay_epochs() -> Vec<usize> {
    vec![2, 4]
}

fn default_momentum() -> R64 {
    r64(0.9)
}

fn default_weight_decay() -> R64 {
    r64(1e-4)
}

fn default_adam_lr_factor() -> R64 {
    r64(0.1)
}

fn default_tensorboard() -> bool {
    true
}
