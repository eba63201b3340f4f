//! Sample-parallel mini-batch training.
//!
//! Each batch is split across worker threads through a blocking [`TaskQueue`].
//! Every worker trains a private clone of the pipeline; once all workers have
//! joined, their accumulated gradients are merged into the master pipeline,
//! which then takes one update step.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use rand::seq::SliceRandom;

use crate::config::TrainingConfig;
use crate::core::optimizers::OptimizerConfig;
use crate::dataset::Dataset;
use crate::prelude::*;

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// FIFO shared between producers and blocking consumers.
pub struct TaskQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Condvar,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState { items: VecDeque::new(), closed: false }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues `item`. Returns `false` once the queue is closed.
    pub fn push(&self, item: T) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.items.push_back(item);
        self.ready.notify_one();
        true
    }

    /// Blocks until an item is available. `None` once the queue is closed and
    /// drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self.ready.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

struct WorkerReport {
    pipeline: Pipeline,
    loss: f64,
    samples: usize,
}

pub struct Scheduler {
    workers: usize,
    batch_size: usize,
    epochs: usize,
    optimizer: OptimizerConfig,
    seed: Option<u64>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(config: &TrainingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            workers: config.workers,
            batch_size: config.batch_size,
            epochs: config.epochs,
            optimizer: config.optimizer,
            seed: config.seed,
            cancel: CancellationToken::new(),
        })
    }

    /// Token that stops training after the samples in flight.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Trains for the configured number of epochs. Returns the mean loss of
    /// each epoch.
    pub fn fit<D: Dataset>(&self, pipeline: &mut Pipeline, dataset: &D) -> Result<Vec<f64>> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut history = Vec::with_capacity(self.epochs);
        for epoch in 0..self.epochs {
            let loss = self.train_epoch(pipeline, dataset, &mut rng)?;
            info!("Epoch: {}/{} mean loss: {:.6}", epoch + 1, self.epochs, loss);
            history.push(loss);
        }
        Ok(history)
    }

    /// One pass over `dataset` in shuffled mini-batches. Returns the mean
    /// sample loss.
    pub fn train_epoch<D: Dataset>(&self, pipeline: &mut Pipeline, dataset: &D, rng: &mut StdRng) -> Result<f64> {
        if dataset.is_empty() {
            return Err(NNError::InvalidConfig("cannot train on an empty dataset".to_string()));
        }
        let mut order: Vec<usize> = (0..dataset.len()).collect();
        order.shuffle(rng);

        let mut total_loss = 0.0;
        let mut total_samples = 0;
        for batch in order.chunks(self.batch_size) {
            if self.cancel.is_cancelled() {
                return Err(NNError::Cancelled);
            }
            let (loss, samples) = self.train_batch(pipeline, dataset, batch)?;
            total_loss += loss;
            total_samples += samples;
        }
        Ok(total_loss / total_samples as f64)
    }

    fn train_batch<D: Dataset>(&self, pipeline: &mut Pipeline, dataset: &D, batch: &[usize]) -> Result<(f64, usize)> {
        pipeline.clear_gradients();
        let queue = TaskQueue::new();
        for &index in batch {
            queue.push(index);
        }
        queue.close();

        let workers = self.workers.min(batch.len());
        let reports = thread::scope(|scope| {
            let queue = &queue;
            let cancel = &self.cancel;
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    let mut local = pipeline.clone();
                    scope.spawn(move || -> Result<WorkerReport> {
                        let mut loss = 0.0;
                        let mut samples = 0;
                        while let Some(index) = queue.pop() {
                            if cancel.is_cancelled() {
                                break;
                            }
                            let sample = dataset.sample(index).ok_or_else(|| {
                                NNError::ShapeMismatch(format!("sample index {} out of range", index))
                            })?;
                            loss += local.train_sample(sample);
                            samples += 1;
                        }
                        Ok(WorkerReport { pipeline: local, loss, samples })
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .map_err(|_| NNError::WorkerPanicked("training worker panicked".to_string()))?
                })
                .collect::<Result<Vec<WorkerReport>>>()
        })?;

        if self.cancel.is_cancelled() {
            return Err(NNError::Cancelled);
        }

        let mut loss = 0.0;
        let mut samples = 0;
        for report in &reports {
            pipeline.absorb_gradients(&report.pipeline);
            loss += report.loss;
            samples += report.samples;
        }
        debug!("merged {} workers over {} samples", reports.len(), samples);
        pipeline.update(&self.optimizer);
        Ok((loss, samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_drains_then_closes() {
        let queue = TaskQueue::new();
        assert!(queue.push(1));
        assert!(queue.push(2));
        queue.close();
        assert!(!queue.push(3));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let queue = Arc::new(TaskQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };
        queue.push(7);
        assert_eq!(consumer.join().unwrap(), Some(7));
    }

    #[test]
    fn test_close_wakes_waiting_consumers() {
        let queue: Arc<TaskQueue<u8>> = Arc::new(TaskQueue::new());
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.pop())
            })
            .collect();
        queue.close();
        for consumer in consumers {
            assert_eq!(consumer.join().unwrap(), None);
        }
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }
}
