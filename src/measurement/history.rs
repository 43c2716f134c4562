//! Sliding averaging window

use crate::measurement::Quantity;
use std::collections::VecDeque;

/// Bounded per-quantity history; keeps the most recent `window` values.
#[derive(Debug, Clone)]
pub struct SampleHistory {
    window: usize,
    columns: Vec<(Quantity, VecDeque<f64>)>,
    pushed: usize,
}

impl SampleHistory {
    /// `window` of zero is treated as one.
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            columns: Vec::new(),
            pushed: 0,
        }
    }

    /// Maximum values kept per quantity.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Record one reading's quantities.
    pub fn push(&mut self, values: &[(Quantity, f64)]) {
        for &(quantity, value) in values {
            let column = match self.columns.iter().position(|(q, _)| *q == quantity) {
                Some(i) => &mut self.columns[i].1,
                None => {
                    self.columns
                        .push((quantity, VecDeque::with_capacity(self.window)));
                    let last = self.columns.len() - 1;
                    &mut self.columns[last].1
                }
            };
            column.push_back(value);
            while column.len() > self.window {
                column.pop_front();
            }
        }
        self.pushed += 1;
    }

    /// Readings currently held, at most the window.
    pub fn len(&self) -> usize {
        self.pushed.min(self.window)
    }

    /// True before the first reading.
    pub fn is_empty(&self) -> bool {
        self.pushed == 0
    }

    /// Whether at least a window's worth of readings has been recorded.
    pub fn is_full(&self) -> bool {
        self.pushed >= self.window
    }

    /// Values held for `quantity`, oldest first.
    pub fn values(&self, quantity: Quantity) -> Option<&VecDeque<f64>> {
        self.columns
            .iter()
            .find(|(q, _)| *q == quantity)
            .map(|(_, v)| v)
    }

    /// Mean of each quantity over the values held.
    pub fn averages(&self) -> SampleAverages {
        SampleAverages(
            self.columns
                .iter()
                .filter(|(_, v)| !v.is_empty())
                .map(|(q, v)| (*q, v.iter().sum::<f64>() / v.len() as f64))
                .collect(),
        )
    }
}

/// Per-quantity means, in first-recorded order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleAverages(Vec<(Quantity, f64)>);

impl SampleAverages {
    /// Mean of `quantity`, if it was recorded.
    pub fn get(&self, quantity: Quantity) -> Option<f64> {
        self.0.iter().find(|(q, _)| *q == quantity).map(|(_, v)| *v)
    }

    /// Every mean with its quantity.
    pub fn iter(&self) -> impl Iterator<Item = (Quantity, f64)> + '_ {
        self.0.iter().copied()
    }

    /// True when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
