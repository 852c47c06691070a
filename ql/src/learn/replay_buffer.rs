use std::collections::VecDeque;
use std::ops::Range;
use std::rc::Rc;

use rand::Rng;

use crate::prelude::{Action, QlError};

/// Capacity bounded FIFO. Once full, every `add` drops the oldest element.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    capacity: usize,
    pub(crate) buffer: VecDeque<T>,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            capacity,
            buffer: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize { self.capacity }

    pub fn len(&self) -> usize { self.buffer.len() }

    pub fn is_empty(&self) -> bool { self.buffer.is_empty() }

    pub fn add(
        &mut self,
        element: T,
    ) {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(element);
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> { self.buffer.iter() }

    /// returns references to the elements at the specified `indices`
    pub fn get_many(
        &self,
        indices: &[usize],
    ) -> Vec<&T> {
        debug_assert!(!indices.iter().any(|&e| e >= self.buffer.len()));
        indices.iter().map(|&i| &self.buffer[i]).collect()
    }
}

/// One recorded interaction step
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<S, A> {
    pub state: Rc<S>,
    pub action: A,
    pub reward: f32,
    pub state_next: Rc<S>,
    pub done: bool,
}

/// Experience replay buffer
pub struct ReplayBuffer<S, A>
where
    A: Action,
{
    transitions: RingBuffer<Transition<S, A>>,
}

impl<S, A> ReplayBuffer<S, A>
where
    A: Action,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            transitions: RingBuffer::new(capacity),
        }
    }

    pub fn len(&self) -> usize { self.transitions.len() }

    pub fn is_empty(&self) -> bool { self.transitions.is_empty() }

    pub fn capacity(&self) -> usize { self.transitions.capacity() }

    pub fn push(
        &mut self,
        transition: Transition<S, A>,
    ) {
        self.transitions.add(transition)
    }

    pub fn add(
        &mut self,
        action: A,
        state: Rc<S>,
        state_next: Rc<S>,
        reward: f32,
        done: bool,
    ) {
        self.push(Transition {
            state,
            action,
            reward,
            state_next,
            done,
        })
    }

    /// Draws `batch_size` distinct transitions, uniformly distributed
    pub fn sample<R: Rng>(
        &self,
        rng: &mut R,
        batch_size: usize,
    ) -> Result<Vec<&Transition<S, A>>, QlError> {
        if self.len() < batch_size {
            return Err(QlError::InsufficientData {
                requested: batch_size,
                available: self.len(),
            });
        }
        let indices = generate_distinct_random_ids(rng, 0..self.len(), batch_size);
        Ok(self.transitions.get_many(&indices))
    }

    /// Stored transitions, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Transition<S, A>> { self.transitions.iter() }

    pub fn actions(&self) -> impl Iterator<Item = A> + '_ { self.transitions.iter().map(|t| t.action) }
}

/// Rolling history of the total rewards of recent episodes
pub struct EpisodeRewardHistory(RingBuffer<f32>);

impl EpisodeRewardHistory {
    pub fn new(len: usize) -> Self { Self(RingBuffer::new(len)) }

    pub fn add(
        &mut self,
        episode_reward: f32,
    ) {
        self.0.add(episode_reward)
    }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn is_full(&self) -> bool { self.0.len() == self.0.capacity() }

    pub fn rewards(&self) -> Vec<f32> { self.0.iter().copied().collect() }

    pub fn avg(&self) -> f32 {
        if self.0.is_empty() {
            return 0.0;
        }
        self.0.iter().sum::<f32>() / self.0.len() as f32
    }

    pub fn min(&self) -> f32 { self.0.iter().copied().fold(f32::INFINITY, f32::min) }
}

pub(crate) fn generate_distinct_random_ids<R: Rng>(
    rng: &mut R,
    range: Range<usize>,
    amount: usize,
) -> Vec<usize> {
    assert!(range.end - range.start >= amount);
    rand::seq::index::sample(rng, range.end - range.start, amount)
        .into_iter()
        .map(|i| range.start + i)
        .collect()
}
