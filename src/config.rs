//! JSON configuration for networks and training runs.
//!
//! A network file lists its stages in order, each tagged with `layer_type`:
//!
//! ```json
//! {
//!   "input": { "channels": 1, "rows": 6, "cols": 6 },
//!   "layers": [
//!     { "layer_type": "conv", "input": { "channels": 1, "rows": 6, "cols": 6 },
//!       "kernel_size": 3, "kernel_count": 2, "seed": 1 },
//!     { "layer_type": "process", "shape": { "channels": 2, "rows": 4, "cols": 4 },
//!       "function": "Relu" },
//!     { "layer_type": "pool", "input": { "channels": 2, "rows": 4, "cols": 4 },
//!       "pool_size": 2 },
//!     { "layer_type": "dense", "input_size": 8, "output_size": 2,
//!       "activation": "Sigmoid", "role": "Output", "loss": "MSE" }
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;

use crate::core::layers::{ConvConfig, DenseConfig, LayerRole, MapShape, PoolConfig, ProcessConfig};
use crate::core::optimizers::{ClipValue, OptimizerConfig};
use crate::prelude::*;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "layer_type", rename_all = "snake_case")]
pub enum LayerConfig {
    Conv(ConvConfig),
    Pool(PoolConfig),
    Process(ProcessConfig),
    Dense(DenseConfig),
}

impl LayerConfig {
    pub fn is_map_stage(&self) -> bool {
        !matches!(self, LayerConfig::Dense(_))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    /// Shape of the feature maps fed to the first stage.
    pub input: MapShape,
    pub layers: Vec<LayerConfig>,
}

impl NetworkConfig {
    pub fn new(input: MapShape) -> Self {
        Self { input, layers: Vec::new() }
    }

    /// Checks what can be checked without building layers: stage order and
    /// dense roles. Shape continuity is checked when the pipeline is built.
    pub fn validate(&self) -> Result<()> {
        if self.input.is_empty() {
            return Err(NNError::InvalidConfig(format!("empty network input {:?}", self.input)));
        }
        let dense: Vec<&DenseConfig> = self
            .layers
            .iter()
            .filter_map(|layer| match layer {
                LayerConfig::Dense(config) => Some(config),
                _ => None,
            })
            .collect();
        if dense.is_empty() {
            return Err(NNError::InvalidConfig(
                "network needs at least one dense layer".to_string(),
            ));
        }
        if let Some(first_dense) = self.layers.iter().position(|l| !l.is_map_stage()) {
            if self.layers[first_dense..].iter().any(LayerConfig::is_map_stage) {
                return Err(NNError::InvalidConfig(
                    "feature-map stages must come before all dense layers".to_string(),
                ));
            }
        }
        let last = dense.len() - 1;
        for (i, config) in dense.iter().enumerate() {
            let ok = match config.role {
                LayerRole::Output => i == last,
                LayerRole::Input => i == 0 && i != last,
                LayerRole::Hidden => i != last,
            };
            if !ok {
                return Err(NNError::InvalidConfig(format!(
                    "dense layer {} has role {:?}; the last dense layer must be the only Output layer",
                    i, config.role
                )));
            }
        }
        Ok(())
    }
}

fn default_workers() -> usize {
    1
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    pub optimizer: OptimizerConfig,
    /// Seed for the per-epoch shuffle. `None` draws from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl TrainingConfig {
    pub fn new(epochs: usize, batch_size: usize, optimizer: OptimizerConfig) -> Self {
        Self { epochs, batch_size, workers: default_workers(), optimizer, seed: None }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(NNError::InvalidConfig("epochs must be positive".to_string()));
        }
        if self.batch_size == 0 {
            return Err(NNError::InvalidConfig("batch_size must be positive".to_string()));
        }
        if self.workers == 0 {
            return Err(NNError::InvalidConfig("workers must be positive".to_string()));
        }
        let lr = self.optimizer.learning_rate;
        if !lr.is_finite() || lr <= 0.0 {
            return Err(NNError::InvalidConfig(format!(
                "learning_rate must be positive and finite, got {}",
                lr
            )));
        }
        for clip in [self.optimizer.gradient_clip.dw, self.optimizer.gradient_clip.db] {
            if let ClipValue::Value(limit) = clip {
                if limit.is_nan() || limit < 0.0 {
                    return Err(NNError::InvalidConfig(format!(
                        "gradient clip must be non-negative, got {}",
                        limit
                    )));
                }
            }
        }
        Ok(())
    }
}

pub fn load_network_config<P: AsRef<Path>>(path: P) -> Result<NetworkConfig> {
    let contents = fs::read_to_string(path)?;
    let config: NetworkConfig = serde_json::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

pub fn load_training_config<P: AsRef<Path>>(path: P) -> Result<TrainingConfig> {
    let contents = fs::read_to_string(path)?;
    let config: TrainingConfig = serde_json::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::activations::Activation;
    use crate::core::losses::Loss;

    #[test]
    fn test_layer_config_tag() {
        let json = r#"{ "layer_type": "dense", "input_size": 4, "output_size": 2,
                        "role": "Output", "loss": "CrossEntropy" }"#;
        let layer: LayerConfig = serde_json::from_str(json).unwrap();
        match layer {
            LayerConfig::Dense(config) => {
                assert_eq!(config.input_size, 4);
                assert_eq!(config.activation, Activation::Linear);
                assert_eq!(config.loss, Some(Loss::CrossEntropy));
                assert_eq!(config.init_range, 0.5);
            }
            other => panic!("unexpected layer {:?}", other),
        }
    }

    #[test]
    fn test_validate_stage_order() {
        let mut config = NetworkConfig::new(MapShape::new(1, 4, 4));
        config.layers.push(LayerConfig::Dense(DenseConfig::new(16, 2, Activation::Linear).output(Loss::MSE)));
        assert!(config.validate().is_ok());
        config.layers.push(LayerConfig::Process(ProcessConfig::new(MapShape::new(1, 1, 2), Activation::Relu)));
        assert!(matches!(config.validate(), Err(NNError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_roles() {
        let mut config = NetworkConfig::new(MapShape::new(1, 2, 2));
        config.layers.push(LayerConfig::Dense(DenseConfig::new(4, 3, Activation::Tanh)));
        assert!(config.validate().is_err());
        config.layers.push(LayerConfig::Dense(DenseConfig::new(3, 1, Activation::Linear).output(Loss::MSE)));
        assert!(config.validate().is_ok());
        config.layers.insert(1, LayerConfig::Dense(DenseConfig::new(3, 3, Activation::Tanh).input()));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_training_config_validation() {
        let config = TrainingConfig::new(2, 4, OptimizerConfig::sgd(0.1));
        assert!(config.validate().is_ok());
        assert_eq!(config.workers, 1);
        assert!(config.clone().workers(0).validate().is_err());
        assert!(TrainingConfig::new(0, 4, OptimizerConfig::sgd(0.1)).validate().is_err());
        assert!(TrainingConfig::new(1, 4, OptimizerConfig::sgd(-1.0)).validate().is_err());
    }
}
