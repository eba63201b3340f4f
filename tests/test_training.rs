//! End-to-end training through the pipeline and the scheduler.

use approx::assert_relative_eq;
use rcnet::core::layers::{ConvConfig, DenseConfig, MapShape, PoolConfig, PoolKind, ProcessConfig};
use rcnet::core::optimizers::OptimizerConfig;
use rcnet::models::MapStage;
use rcnet::{
    Activation, CancellationToken, Dataset, Fill, InMemoryDataset, Loss, Matrix, NNError, Pipeline, Sample, Scheduler,
    TrainingConfig, Vector,
};

fn build() -> Pipeline {
    let input = MapShape::new(1, 4, 4);
    Pipeline::builder(input)
        .conv(ConvConfig::new(input, 3, 2).seed(10))
        .process(ProcessConfig::new(MapShape::new(2, 2, 2), Activation::Tanh))
        .pool(PoolConfig::new(MapShape::new(2, 2, 2), 2, PoolKind::Average))
        .dense(DenseConfig::new(2, 1, Activation::Sigmoid).output(Loss::MSE).seed(11))
        .build()
        .unwrap()
}

/// Bright left half -> 1, bright right half -> 0.
fn halves() -> InMemoryDataset {
    let mut data = InMemoryDataset::default();
    for level in [0.6, 0.8, 1.0] {
        let mut left = Matrix::zeros(4, 4);
        let mut right = Matrix::zeros(4, 4);
        for r in 0..4 {
            for c in 0..2 {
                left[(r, c)] = level;
                right[(r, c + 2)] = level;
            }
        }
        data.push(Sample::new(vec![left], Vector::from_vec(vec![1.0])));
        data.push(Sample::new(vec![right], Vector::from_vec(vec![0.0])));
    }
    data
}

fn total_loss(pipeline: &mut Pipeline, data: &InMemoryDataset) -> f64 {
    data.samples()
        .iter()
        .map(|s| {
            pipeline.forward(&s.input);
            pipeline.loss(&s.target)
        })
        .sum()
}

fn full_batch(epochs: usize, workers: usize) -> TrainingConfig {
    TrainingConfig::new(epochs, halves().len(), OptimizerConfig::sgd(0.1))
        .workers(workers)
        .seed(7)
}

#[test]
fn test_full_batch_training_reduces_loss() {
    let data = halves();
    let mut pipeline = build();
    let before = total_loss(&mut pipeline, &data);

    let scheduler = Scheduler::new(&full_batch(20, 1)).unwrap();
    let history = scheduler.fit(&mut pipeline, &data).unwrap();
    assert_eq!(history.len(), 20);

    let after = total_loss(&mut pipeline, &data);
    assert!(after < before, "loss went from {} to {}", before, after);
}

#[test]
fn test_workers_match_single_thread() {
    let data = halves();
    let mut single = build();
    let mut parallel = build();
    Scheduler::new(&full_batch(5, 1)).unwrap().fit(&mut single, &data).unwrap();
    Scheduler::new(&full_batch(5, 3)).unwrap().fit(&mut parallel, &data).unwrap();

    for (a, b) in single.dense_layers().iter().zip(parallel.dense_layers()) {
        for (x, y) in a.w.iter().zip(b.w.iter()) {
            assert_relative_eq!(x, y, epsilon = 1e-9);
        }
    }
    let input = &data.samples()[0].input;
    assert_relative_eq!(single.predict(input)[0], parallel.predict(input)[0], epsilon = 1e-9);
}

#[test]
fn test_mini_batches_are_reproducible() {
    let data = halves();
    let config = TrainingConfig::new(3, 2, OptimizerConfig::sgd(0.2)).seed(99);
    let mut a = build();
    let mut b = build();
    let ha = Scheduler::new(&config).unwrap().fit(&mut a, &data).unwrap();
    let hb = Scheduler::new(&config).unwrap().fit(&mut b, &data).unwrap();
    assert_eq!(ha, hb);
    assert_eq!(a.dense_layers()[0].w, b.dense_layers()[0].w);
}

#[test]
fn test_cancellation_stops_training() {
    let data = halves();
    let mut pipeline = build();
    let untouched = pipeline.clone();
    let scheduler = Scheduler::new(&full_batch(50, 2)).unwrap();
    scheduler.cancellation_token().cancel();
    let result = scheduler.fit(&mut pipeline, &data);
    assert!(matches!(result, Err(NNError::Cancelled)));
    assert_eq!(pipeline.dense_layers()[0].w, untouched.dense_layers()[0].w);
}

/// Cancels the run as soon as any worker reads a sample.
struct CancellingDataset {
    inner: InMemoryDataset,
    token: CancellationToken,
}

impl Dataset for CancellingDataset {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn sample(&self, index: usize) -> Option<&Sample> {
        self.token.cancel();
        self.inner.sample(index)
    }
}

fn conv_kernels(pipeline: &Pipeline) -> Vec<Matrix<f64>> {
    match &pipeline.stages()[0] {
        MapStage::Conv(layer) => layer.kernels().into_iter().cloned().collect(),
        other => panic!("expected a conv stage, got {:?}", other),
    }
}

#[test]
fn test_cancellation_during_batch_discards_gradients() {
    let mut pipeline = build();
    let untouched = pipeline.clone();
    let scheduler = Scheduler::new(&full_batch(5, 2)).unwrap();
    let data = CancellingDataset { inner: halves(), token: scheduler.cancellation_token() };

    let result = scheduler.fit(&mut pipeline, &data);
    assert!(matches!(result, Err(NNError::Cancelled)));
    assert_eq!(pipeline.dense_layers()[0].w, untouched.dense_layers()[0].w);
    assert_eq!(pipeline.dense_layers()[0].b, untouched.dense_layers()[0].b);
    assert_eq!(conv_kernels(&pipeline), conv_kernels(&untouched));
}

#[test]
fn test_empty_dataset_is_rejected() {
    let mut pipeline = build();
    let scheduler = Scheduler::new(&full_batch(1, 1)).unwrap();
    let result = scheduler.fit(&mut pipeline, &InMemoryDataset::default());
    assert!(matches!(result, Err(NNError::InvalidConfig(_))));
}

#[test]
fn test_save_and_load_round_trip() {
    let mut pipeline = build();
    let input = vec![Matrix::filled(4, 4, Fill::Value(0.25))];
    let expected = pipeline.predict(&input);

    let path = std::env::temp_dir().join(format!("rcnet_pipeline_{}.bin", std::process::id()));
    pipeline.save(&path).unwrap();
    let mut loaded = Pipeline::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(loaded.parameter_count(), pipeline.parameter_count());
    assert_eq!(loaded.predict(&input), expected);
}

#[test]
fn test_load_missing_file() {
    let path = std::env::temp_dir().join("rcnet_missing_pipeline.bin");
    assert!(matches!(Pipeline::load(path), Err(NNError::IoError(_))));
}
