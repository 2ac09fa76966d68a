use crate::error::{ErpError, Result};
use crate::types::{hstack, Epoch};
use nalgebra::DMatrix;
use std::collections::{BTreeMap, VecDeque};

/// Mean of the epochs currently held for one stimulus
#[derive(Debug, Clone, PartialEq)]
pub struct Average {
    pub pre: DMatrix<f64>,
    pub post: DMatrix<f64>,
    /// Number of epochs in the mean
    pub count: usize,
}

impl Average {
    pub fn combined(&self) -> DMatrix<f64> {
        hstack(&self.pre, &self.post)
    }
}

#[derive(Debug, Default)]
struct StimulusHistory {
    pre: VecDeque<DMatrix<f64>>,
    post: VecDeque<DMatrix<f64>>,
    orders: VecDeque<u64>,
    mean_pre: Option<DMatrix<f64>>,
    mean_post: Option<DMatrix<f64>>,
}

impl StimulusHistory {
    fn refresh_means(&mut self) {
        self.mean_pre = mean_of(&self.pre);
        self.mean_post = mean_of(&self.post);
    }
}

/// Per-stimulus FIFO of recent epochs with their running mean
///
/// Pre- and post-stimulus segments are kept in separate FIFOs. Each append
/// evicts the oldest epoch once `num_averages` is reached and recomputes the
/// mean from the retained sequence.
#[derive(Debug)]
pub struct RollingAverageStore {
    num_averages: usize,
    histories: BTreeMap<usize, StimulusHistory>,
}

impl RollingAverageStore {
    pub fn new(num_averages: usize) -> Result<Self> {
        if num_averages == 0 {
            return Err(ErpError::InvalidConfig(
                "num_averages must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            num_averages,
            histories: BTreeMap::new(),
        })
    }

    pub fn append(&mut self, epoch: Epoch) {
        let history = self.histories.entry(epoch.stimulus).or_default();

        history.pre.push_back(epoch.pre);
        history.post.push_back(epoch.post);
        history.orders.push_back(epoch.order);

        while history.pre.len() > self.num_averages {
            history.pre.pop_front();
            history.post.pop_front();
            if let Some(order) = history.orders.pop_front() {
                log::trace!("Stimulus {} evicted epoch {}", epoch.stimulus, order);
            }
        }

        history.refresh_means();
    }

    pub fn current_average(&self, stimulus: usize) -> Option<Average> {
        let history = self.histories.get(&stimulus)?;

        Some(Average {
            pre: history.mean_pre.clone()?,
            post: history.mean_post.clone()?,
            count: history.pre.len(),
        })
    }

    /// Epochs held for a stimulus
    pub fn len(&self, stimulus: usize) -> usize {
        self.histories
            .get(&stimulus)
            .map(|h| h.pre.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.histories.values().all(|h| h.pre.is_empty())
    }

    /// Retained (order, pre, post) triples, oldest first
    pub fn epochs(
        &self,
        stimulus: usize,
    ) -> impl Iterator<Item = (u64, &DMatrix<f64>, &DMatrix<f64>)> + '_ {
        self.histories.get(&stimulus).into_iter().flat_map(|h| {
            h.orders
                .iter()
                .copied()
                .zip(h.pre.iter())
                .zip(h.post.iter())
                .map(|((order, pre), post)| (order, pre, post))
        })
    }

    /// Stimuli with at least one epoch, ascending
    pub fn stimuli(&self) -> Vec<usize> {
        self.histories
            .iter()
            .filter(|(_, h)| !h.pre.is_empty())
            .map(|(&stimulus, _)| stimulus)
            .collect()
    }

    pub fn num_averages(&self) -> usize {
        self.num_averages
    }

    pub fn clear(&mut self) {
        self.histories.clear();
    }
}

fn mean_of(segments: &VecDeque<DMatrix<f64>>) -> Option<DMatrix<f64>> {
    let first = segments.front()?;
    let mut sum = DMatrix::zeros(first.nrows(), first.ncols());
    for segment in segments {
        sum += segment;
    }
    Some(sum / segments.len() as f64)
}
