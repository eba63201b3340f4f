use crate::core::activations::Activation;
use crate::core::layers::{LayerTrait, MapLayer, MapShape};
use crate::prelude::*;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProcessConfig {
    pub shape: MapShape,
    pub function: Activation,
}

impl ProcessConfig {
    pub fn new(shape: MapShape, function: Activation) -> Self {
        Self { shape, function }
    }
}

/// Applies a scalar function to every entry of every feature map.
///
/// This is where the transfer-function derivative of a conv/pool stack is
/// applied on the way back: `input_delta = f'(input) ⊙ delta`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProcessLayer {
    config: ProcessConfig,
    input: Vec<Matrix<f64>>,
    output: Vec<Matrix<f64>>,
    input_delta: Vec<Matrix<f64>>,
}

impl ProcessLayer {
    pub fn new(config: ProcessConfig) -> Result<Self> {
        if config.shape.is_empty() {
            return Err(NNError::InvalidLayerConfiguration(format!(
                "process layer needs a non-empty shape, got {:?}",
                config.shape
            )));
        }
        Ok(Self {
            input: config.shape.zeros(),
            output: config.shape.zeros(),
            input_delta: config.shape.zeros(),
            config,
        })
    }

    pub fn function(&self) -> Activation {
        self.config.function
    }
}

impl LayerTrait for ProcessLayer {
    fn typ(&self) -> String {
        format!("Process({:?})", self.config.function)
    }
}

impl MapLayer for ProcessLayer {
    fn input_shape(&self) -> MapShape {
        self.config.shape
    }

    fn output_shape(&self) -> MapShape {
        self.config.shape
    }

    fn forward(&mut self, input: &[Matrix<f64>]) -> &[Matrix<f64>] {
        if !self.config.shape.check("ProcessLayer::forward", input) {
            self.input = self.config.shape.zeros();
            self.output = self.config.shape.zeros();
            return &self.output;
        }
        self.input = input.to_vec();
        self.output = input.iter().map(|m| self.config.function.forward(m)).collect();
        &self.output
    }

    fn output(&self) -> &[Matrix<f64>] {
        &self.output
    }

    fn backward(&mut self, delta: &[Matrix<f64>]) -> &[Matrix<f64>] {
        if !self.config.shape.check("ProcessLayer::backward", delta) {
            self.input_delta = self.config.shape.zeros();
            return &self.input_delta;
        }
        let function = self.config.function;
        self.input_delta = self
            .input
            .iter()
            .zip(delta)
            .map(|(z, d)| function.backward(z, d))
            .collect();
        &self.input_delta
    }

    fn input_delta(&self) -> &[Matrix<f64>] {
        &self.input_delta
    }
}
