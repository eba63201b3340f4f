use crate::core::layers::{LayerTrait, MapShape};
use crate::prelude::*;

/// Shapes of the maps being flattened, in concatenation order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SerializeConfig {
    pub shapes: Vec<(usize, usize)>,
}

impl SerializeConfig {
    pub fn new(shapes: Vec<(usize, usize)>) -> Self {
        Self { shapes }
    }

    pub fn from_shape(shape: MapShape) -> Self {
        Self { shapes: vec![(shape.rows, shape.cols); shape.channels] }
    }

    pub fn serialize_size(&self) -> usize {
        self.shapes.iter().map(|(r, c)| r * c).sum()
    }
}

/// Flattens feature maps into one column vector and back.
///
/// Maps are concatenated in declaration order, each row-major, so
/// `unflatten(flatten(x)) == x` for every `x` of the configured shapes.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SerializeLayer {
    config: SerializeConfig,
    serialize_size: usize,
    output: Vector<f64>,
    input_delta: Vec<Matrix<f64>>,
}

impl SerializeLayer {
    pub fn new(config: SerializeConfig) -> Result<Self> {
        let serialize_size = config.serialize_size();
        if serialize_size == 0 {
            return Err(NNError::InvalidLayerConfiguration(
                "serialize layer needs at least one non-empty map".to_string(),
            ));
        }
        Ok(Self {
            input_delta: zero_maps(&config.shapes),
            output: Vector::zeros(serialize_size),
            serialize_size,
            config,
        })
    }

    pub fn serialize_size(&self) -> usize {
        self.serialize_size
    }

    pub fn shapes(&self) -> &[(usize, usize)] {
        &self.config.shapes
    }

    pub fn flatten(&self, maps: &[Matrix<f64>]) -> Result<Vector<f64>> {
        let shapes: Vec<(usize, usize)> = maps.iter().map(Matrix::shape).collect();
        if shapes != self.config.shapes {
            return Err(NNError::ShapeMismatch(format!(
                "flatten: expected maps {:?}, got {:?}",
                self.config.shapes, shapes
            )));
        }
        let mut data = Vec::with_capacity(self.serialize_size);
        for m in maps {
            data.extend(m.iter().copied());
        }
        Ok(Vector::from_vec(data))
    }

    pub fn unflatten(&self, vector: &Vector<f64>) -> Result<Vec<Matrix<f64>>> {
        if vector.len() != self.serialize_size {
            return Err(NNError::ShapeMismatch(format!(
                "unflatten: expected length {}, got {}",
                self.serialize_size,
                vector.len()
            )));
        }
        let values = vector.to_vec();
        let mut offset = 0;
        let mut maps = Vec::with_capacity(self.config.shapes.len());
        for &(rows, cols) in &self.config.shapes {
            let len = rows * cols;
            maps.push(Matrix::from_vec(rows, cols, values[offset..offset + len].to_vec())?);
            offset += len;
        }
        Ok(maps)
    }

    pub fn forward(&mut self, input: &[Matrix<f64>]) -> &Vector<f64> {
        self.output = self.flatten(input).unwrap_or_else(|err| {
            error!("SerializeLayer::forward: {}", err);
            Vector::zeros(self.serialize_size)
        });
        &self.output
    }

    pub fn output(&self) -> &Vector<f64> {
        &self.output
    }

    pub fn backward(&mut self, delta: &Vector<f64>) -> &[Matrix<f64>] {
        self.input_delta = self.unflatten(delta).unwrap_or_else(|err| {
            error!("SerializeLayer::backward: {}", err);
            zero_maps(&self.config.shapes)
        });
        &self.input_delta
    }

    pub fn input_delta(&self) -> &[Matrix<f64>] {
        &self.input_delta
    }
}

fn zero_maps(shapes: &[(usize, usize)]) -> Vec<Matrix<f64>> {
    shapes.iter().map(|&(r, c)| Matrix::zeros(r, c)).collect()
}

impl LayerTrait for SerializeLayer {
    fn typ(&self) -> String {
        "Serialize".into()
    }
}
