use crate::core::normalization::Normalization;
use crate::prelude::*;

/// One training example: input feature maps and the expected output.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Sample {
    pub input: Vec<Matrix<f64>>,
    pub target: Vector<f64>,
}

impl Sample {
    pub fn new(input: Vec<Matrix<f64>>, target: Vector<f64>) -> Self {
        Self { input, target }
    }
}

/// Indexed sample source shared read-only across training workers.
pub trait Dataset: Sync {
    fn len(&self) -> usize;

    fn sample(&self, index: usize) -> Option<&Sample>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct InMemoryDataset {
    samples: Vec<Sample>,
}

impl InMemoryDataset {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn random_sample<R: Rng>(&self, rng: &mut R) -> Option<&Sample> {
        if self.samples.is_empty() {
            return None;
        }
        self.samples.get(rng.gen_range(0..self.samples.len()))
    }

    /// Rescales every input map from `[lb, ub]` onto `[0, 1]`.
    pub fn normalize_inputs(&mut self, lb: f64, ub: f64) {
        for sample in self.samples.iter_mut() {
            for map in sample.input.iter_mut() {
                map.to_unity(lb, ub);
            }
        }
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn sample(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> InMemoryDataset {
        InMemoryDataset::new(vec![
            Sample::new(vec![Matrix::filled(2, 2, Fill::Value(255.0))], Vector::from_vec(vec![1.0])),
            Sample::new(vec![Matrix::zeros(2, 2)], Vector::from_vec(vec![0.0])),
        ])
    }

    #[test]
    fn test_indexing() {
        let data = dataset();
        assert_eq!(data.len(), 2);
        assert!(!data.is_empty());
        assert_eq!(data.sample(1).map(|s| s.target[0]), Some(0.0));
        assert!(data.sample(2).is_none());
        assert!(InMemoryDataset::default().is_empty());
    }

    #[test]
    fn test_random_sample_is_seeded() {
        let data = dataset();
        let mut a = StdRng::seed_from_u64(11);
        let mut b = StdRng::seed_from_u64(11);
        for _ in 0..5 {
            assert_eq!(data.random_sample(&mut a), data.random_sample(&mut b));
        }
        assert!(InMemoryDataset::default().random_sample(&mut a).is_none());
    }

    #[test]
    fn test_normalize_inputs() {
        let mut data = dataset();
        data.normalize_inputs(0.0, 255.0);
        assert_eq!(data.samples()[0].input[0], Matrix::filled(2, 2, Fill::One));
        assert_eq!(data.samples()[1].input[0], Matrix::zeros(2, 2));
    }
}
