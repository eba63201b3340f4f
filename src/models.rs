use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::config::{LayerConfig, NetworkConfig};
use crate::core::layers::{
    ConvConfig, ConvLayer, DenseConfig, FullyConnectedLayer, LayerTrait, MapLayer, MapShape, PoolConfig, PoolLayer,
    ProcessConfig, ProcessLayer, SerializeConfig, SerializeLayer,
};
use crate::core::optimizers::{Optimization, OptimizerConfig};
use crate::dataset::Sample;
use crate::prelude::*;

/// A stage operating on feature maps, ahead of the serialize stage.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum MapStage {
    Conv(ConvLayer),
    Pool(PoolLayer),
    Process(ProcessLayer),
}

impl MapStage {
    pub fn layer(&self) -> &dyn MapLayer {
        match self {
            MapStage::Conv(layer) => layer,
            MapStage::Pool(layer) => layer,
            MapStage::Process(layer) => layer,
        }
    }

    pub fn layer_mut(&mut self) -> &mut dyn MapLayer {
        match self {
            MapStage::Conv(layer) => layer,
            MapStage::Pool(layer) => layer,
            MapStage::Process(layer) => layer,
        }
    }
}

/// Feed-forward CNN: feature-map stages, one serialize stage, then the
/// fully-connected stack ending in an output layer.
///
/// Forward and backward hand each stage a borrowed view of its neighbour's
/// buffers. Gradients accumulate across `backward` calls until `update`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Pipeline {
    input_shape: MapShape,
    stages: Vec<MapStage>,
    serializer: SerializeLayer,
    dense: Vec<FullyConnectedLayer>,
}

impl Pipeline {
    pub fn builder(input: MapShape) -> PipelineBuilder {
        PipelineBuilder { config: NetworkConfig::new(input) }
    }

    pub fn from_config(config: &NetworkConfig) -> Result<Self> {
        config.validate().map_err(|err| match err {
            NNError::InvalidConfig(msg) => NNError::InvalidLayerConfiguration(msg),
            other => other,
        })?;

        let mut shape = config.input;
        let mut stages = Vec::new();
        let mut dense: Vec<FullyConnectedLayer> = Vec::new();
        let mut serializer: Option<SerializeLayer> = None;

        for (index, layer) in config.layers.iter().enumerate() {
            let stage = match layer {
                LayerConfig::Conv(c) => MapStage::Conv(ConvLayer::new(c.clone())?),
                LayerConfig::Pool(c) => MapStage::Pool(PoolLayer::new(c.clone())?),
                LayerConfig::Process(c) => MapStage::Process(ProcessLayer::new(c.clone())?),
                LayerConfig::Dense(c) => {
                    let expected = match dense.last() {
                        Some(previous) => previous.output_size(),
                        None => {
                            let flat = SerializeLayer::new(SerializeConfig::from_shape(shape))?;
                            let size = flat.serialize_size();
                            serializer = Some(flat);
                            size
                        }
                    };
                    if c.input_size != expected {
                        return Err(NNError::InvalidLayerConfiguration(format!(
                            "layer {} expects {} inputs but receives {}",
                            index, c.input_size, expected
                        )));
                    }
                    dense.push(FullyConnectedLayer::new(c.clone())?);
                    continue;
                }
            };
            let layer = stage.layer();
            if layer.input_shape() != shape {
                return Err(NNError::InvalidLayerConfiguration(format!(
                    "layer {} ({}) expects input {:?} but receives {:?}",
                    index,
                    layer.typ(),
                    layer.input_shape(),
                    shape
                )));
            }
            shape = layer.output_shape();
            stages.push(stage);
        }

        let serializer = serializer.ok_or(NNError::EmptyModel)?;
        debug!(
            "Pipeline: {} map stages, serialize {}, {} dense layers",
            stages.len(),
            serializer.serialize_size(),
            dense.len()
        );
        Ok(Self { input_shape: config.input, stages, serializer, dense })
    }

    pub fn input_shape(&self) -> MapShape {
        self.input_shape
    }

    pub fn stages(&self) -> &[MapStage] {
        &self.stages
    }

    pub fn serializer(&self) -> &SerializeLayer {
        &self.serializer
    }

    pub fn dense_layers(&self) -> &[FullyConnectedLayer] {
        &self.dense
    }

    pub fn dense_layers_mut(&mut self) -> &mut [FullyConnectedLayer] {
        &mut self.dense
    }

    fn output_layer(&self) -> &FullyConnectedLayer {
        &self.dense[self.dense.len() - 1]
    }

    pub fn forward(&mut self, input: &[Matrix<f64>]) -> &Vector<f64> {
        for i in 0..self.stages.len() {
            let (done, rest) = self.stages.split_at_mut(i);
            let previous = match done.last() {
                Some(stage) => stage.layer().output(),
                None => input,
            };
            rest[0].layer_mut().forward(previous);
        }
        let maps = match self.stages.last() {
            Some(stage) => stage.layer().output(),
            None => input,
        };
        self.serializer.forward(maps);

        for i in 0..self.dense.len() {
            let (done, rest) = self.dense.split_at_mut(i);
            let previous = match done.last() {
                Some(layer) => layer.output(),
                None => self.serializer.output(),
            };
            rest[0].forward(previous);
        }
        self.output_layer().output()
    }

    /// Output of the last forward pass.
    pub fn output(&self) -> &Vector<f64> {
        self.output_layer().output()
    }

    pub fn predict(&mut self, input: &[Matrix<f64>]) -> Vector<f64> {
        self.forward(input).clone()
    }

    /// Loss of the last forward pass against `target`.
    pub fn loss(&self, target: &Vector<f64>) -> f64 {
        self.output_layer().loss(target)
    }

    /// Backpropagates from `target` through every stage, accumulating
    /// parameter gradients. Returns the gradient with respect to the input maps.
    pub fn backward(&mut self, target: &Vector<f64>) -> &[Matrix<f64>] {
        let last = self.dense.len() - 1;
        self.dense[last].backward_target(target);
        for i in (0..last).rev() {
            let (left, right) = self.dense.split_at_mut(i + 1);
            left[i].backward(right[0].input_delta());
        }
        self.serializer.backward(self.dense[0].input_delta());

        for i in (0..self.stages.len()).rev() {
            let (left, right) = self.stages.split_at_mut(i + 1);
            let incoming = match right.first() {
                Some(next) => next.layer().input_delta(),
                None => self.serializer.input_delta(),
            };
            left[i].layer_mut().backward(incoming);
        }
        match self.stages.first() {
            Some(stage) => stage.layer().input_delta(),
            None => self.serializer.input_delta(),
        }
    }

    /// Forward and backward on one sample. Returns its loss.
    pub fn train_sample(&mut self, sample: &Sample) -> f64 {
        self.forward(&sample.input);
        let loss = self.loss(&sample.target);
        self.backward(&sample.target);
        loss
    }

    /// Applies the mean accumulated gradient to every parametric stage.
    pub fn update(&mut self, config: &OptimizerConfig) {
        for stage in self.stages.iter_mut() {
            if let MapStage::Conv(layer) = stage {
                layer.optimize(config);
            }
        }
        for layer in self.dense.iter_mut() {
            layer.optimize(config);
        }
    }

    pub fn clear_gradients(&mut self) {
        for stage in self.stages.iter_mut() {
            if let MapStage::Conv(layer) = stage {
                layer.clear_gradients();
            }
        }
        for layer in self.dense.iter_mut() {
            layer.clear_gradients();
        }
    }

    /// Adds `other`'s accumulated gradients to this pipeline's. Both must
    /// share one architecture.
    pub fn absorb_gradients(&mut self, other: &Pipeline) {
        if !self.same_architecture(other) {
            error!("Pipeline::absorb_gradients: architectures differ");
            return;
        }
        for (mine, theirs) in self.stages.iter_mut().zip(&other.stages) {
            if let (MapStage::Conv(a), MapStage::Conv(b)) = (mine, theirs) {
                a.absorb_gradients(b);
            }
        }
        for (mine, theirs) in self.dense.iter_mut().zip(&other.dense) {
            mine.absorb_gradients(theirs);
        }
    }

    pub fn copy_parameters_from(&mut self, other: &Pipeline) {
        if !self.same_architecture(other) {
            error!("Pipeline::copy_parameters_from: architectures differ");
            return;
        }
        for (mine, theirs) in self.stages.iter_mut().zip(&other.stages) {
            if let (MapStage::Conv(a), MapStage::Conv(b)) = (mine, theirs) {
                a.copy_parameters_from(b);
            }
        }
        for (mine, theirs) in self.dense.iter_mut().zip(&other.dense) {
            mine.copy_parameters_from(theirs);
        }
    }

    fn same_architecture(&self, other: &Pipeline) -> bool {
        self.stages.len() == other.stages.len()
            && self.dense.len() == other.dense.len()
            && self
                .stages
                .iter()
                .zip(&other.stages)
                .all(|(a, b)| {
                    a.layer().typ() == b.layer().typ() && a.layer().output_shape() == b.layer().output_shape()
                })
            && self
                .dense
                .iter()
                .zip(&other.dense)
                .all(|(a, b)| a.input_size() == b.input_size() && a.output_size() == b.output_size())
    }

    pub fn parameter_count(&self) -> usize {
        let maps: usize = self.stages.iter().map(|s| s.layer().parameter_count()).sum();
        let dense: usize = self.dense.iter().map(LayerTrait::parameter_count).sum();
        maps + dense
    }

    pub fn summary(&self) -> String {
        let mut res = "\nModel Pipeline\n".to_string();
        res.push_str("-------------------------------------------------------------\n");
        res.push_str("Layer (Type)\t\t Output shape\t\t No.of params\n");
        res.push_str(&format!(
            "Input\t\t\t  ({}, {}, {})\t\t  0\n",
            self.input_shape.channels, self.input_shape.rows, self.input_shape.cols
        ));
        for stage in self.stages.iter() {
            let layer = stage.layer();
            let shape = layer.output_shape();
            res.push_str(&format!(
                "{}\t\t\t  ({}, {}, {})\t\t  {}\n",
                layer.typ(),
                shape.channels,
                shape.rows,
                shape.cols,
                layer.parameter_count()
            ));
        }
        res.push_str(&format!(
            "{}\t\t  (None, {})\t\t  0\n",
            self.serializer.typ(),
            self.serializer.serialize_size()
        ));
        for layer in self.dense.iter() {
            res.push_str(&format!(
                "{}\t\t  (None, {})\t\t  {}\n",
                layer.typ(),
                layer.output_size(),
                layer.parameter_count()
            ));
        }
        res.push_str("-------------------------------------------------------------\n");
        res.push_str(&format!("Total params: {}\n", self.parameter_count()));
        res
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let encoded: Vec<u8> = bincode::serialize(self).map_err(NNError::SerializationError)?;
        File::create(path)
            .map_err(NNError::IoError)?
            .write_all(&encoded)
            .map_err(NNError::IoError)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Pipeline> {
        let mut buffer = Vec::new();
        File::open(path)
            .map_err(NNError::IoError)?
            .read_to_end(&mut buffer)
            .map_err(NNError::IoError)?;
        let pipeline: Pipeline = bincode::deserialize(&buffer).map_err(NNError::SerializationError)?;
        if pipeline.dense.is_empty() {
            return Err(NNError::EmptyModel);
        }
        Ok(pipeline)
    }
}

/// Collects stage configs in order; `build` validates shape continuity and
/// inserts the serialize stage ahead of the first dense layer.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    config: NetworkConfig,
}

impl PipelineBuilder {
    pub fn conv(mut self, config: ConvConfig) -> Self {
        self.config.layers.push(LayerConfig::Conv(config));
        self
    }

    pub fn pool(mut self, config: PoolConfig) -> Self {
        self.config.layers.push(LayerConfig::Pool(config));
        self
    }

    pub fn process(mut self, config: ProcessConfig) -> Self {
        self.config.layers.push(LayerConfig::Process(config));
        self
    }

    pub fn dense(mut self, config: DenseConfig) -> Self {
        self.config.layers.push(LayerConfig::Dense(config));
        self
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn build(self) -> Result<Pipeline> {
        Pipeline::from_config(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::activations::Activation;
    use crate::core::layers::PoolKind;
    use crate::core::losses::Loss;

    fn small() -> Pipeline {
        let input = MapShape::new(1, 6, 6);
        Pipeline::builder(input)
            .conv(ConvConfig::new(input, 3, 2).seed(3))
            .process(ProcessConfig::new(MapShape::new(2, 4, 4), Activation::Tanh))
            .pool(PoolConfig::new(MapShape::new(2, 4, 4), 2, PoolKind::Max))
            .dense(DenseConfig::new(8, 4, Activation::Tanh).seed(4))
            .dense(DenseConfig::new(4, 1, Activation::Linear).output(Loss::MSE).seed(5))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_and_summary() {
        let pipeline = small();
        assert_eq!(pipeline.stages().len(), 3);
        assert_eq!(pipeline.serializer().serialize_size(), 8);
        // conv: 2 * (9 + 1), dense: 8*4 + 4, 4*1 + 1
        assert_eq!(pipeline.parameter_count(), 20 + 36 + 5);
        let summary = pipeline.summary();
        assert!(summary.contains("Total params: 61"));
        assert!(summary.contains("MaxPool"));
    }

    #[test]
    fn test_shape_discontinuity_is_rejected() {
        let input = MapShape::new(1, 6, 6);
        let err = Pipeline::builder(input)
            .conv(ConvConfig::new(input, 3, 2))
            .pool(PoolConfig::new(MapShape::new(1, 4, 4), 2, PoolKind::Max))
            .dense(DenseConfig::new(4, 1, Activation::Linear).output(Loss::MSE))
            .build();
        assert!(matches!(err, Err(NNError::InvalidLayerConfiguration(_))));

        let err = Pipeline::builder(input)
            .dense(DenseConfig::new(35, 1, Activation::Linear).output(Loss::MSE))
            .build();
        assert!(matches!(err, Err(NNError::InvalidLayerConfiguration(_))));
    }

    #[test]
    fn test_dense_only_pipeline() {
        let input = MapShape::new(1, 1, 2);
        let mut pipeline = Pipeline::builder(input)
            .dense(DenseConfig::new(2, 1, Activation::Linear).output(Loss::MSE))
            .build()
            .unwrap();
        pipeline.dense_layers_mut()[0].w = Matrix::from_rows(&[vec![1.0, 1.0]]).unwrap();
        let x = vec![Matrix::from_rows(&[vec![2.0, 3.0]]).unwrap()];
        assert_eq!(pipeline.forward(&x)[0], 5.0);
        let grad = pipeline.backward(&Vector::from_vec(vec![0.0]));
        assert_eq!(grad[0], Matrix::from_rows(&[vec![5.0, 5.0]]).unwrap());
    }

    #[test]
    fn test_backward_reaches_input() {
        let mut pipeline = small();
        let x = vec![Matrix::filled(6, 6, Fill::Value(0.3))];
        pipeline.forward(&x);
        let grad = pipeline.backward(&Vector::from_vec(vec![1.0]));
        assert_eq!(grad.len(), 1);
        assert_eq!(grad[0].shape(), (6, 6));
    }

    #[test]
    fn test_load_rejects_snapshot_without_dense_layers() {
        let mut pipeline = small();
        pipeline.dense.clear();
        let path = std::env::temp_dir().join(format!("rcnet_no_dense_{}.bin", std::process::id()));
        pipeline.save(&path).unwrap();
        let loaded = Pipeline::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(loaded, Err(NNError::EmptyModel)));
    }

    #[test]
    fn test_absorb_and_copy() {
        let mut a = small();
        let mut b = a.clone();
        let sample = Sample::new(vec![Matrix::filled(6, 6, Fill::Value(0.5))], Vector::from_vec(vec![1.0]));
        b.train_sample(&sample);
        a.absorb_gradients(&b);
        assert_eq!(a.dense_layers()[1].weight_delta_sum(), b.dense_layers()[1].weight_delta_sum());

        a.update(&OptimizerConfig::sgd(0.5));
        assert_ne!(a.dense_layers()[1].w, b.dense_layers()[1].w);
        b.copy_parameters_from(&a);
        assert_eq!(a.dense_layers()[1].w, b.dense_layers()[1].w);
    }
}
