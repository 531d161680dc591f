//! Request-scoped counters over matched faces.

use crate::roster::{Decade, Reference};

/// Nine-bucket histogram of matches by decade, 1940s through 2020s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecadeTable([u32; 9]);

impl DecadeTable {
    pub fn increment(&mut self, decade: Decade) {
        self.0[decade.index()] += 1;
    }

    pub fn get(&self, decade: Decade) -> u32 {
        self.0[decade.index()]
    }

    /// Every bucket in order, zeros included.
    pub fn iter(&self) -> impl Iterator<Item = (Decade, u32)> + '_ {
        Decade::ALL.into_iter().map(|d| (d, self.get(d)))
    }

    pub fn total(&self) -> u32 {
        self.0.iter().sum()
    }
}

/// Counts for one identify request. Starts at zero; never shared between requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tally {
    identities: Vec<u32>,
    decades: DecadeTable,
    wikipedia: u32,
}

impl Tally {
    /// A zeroed tally for a roster of `references` people.
    pub fn new(references: usize) -> Self {
        Self {
            identities: vec![0; references],
            decades: DecadeTable::default(),
            wikipedia: 0,
        }
    }

    /// Count one face matched to roster entry `idx`.
    pub fn record(&mut self, idx: usize, reference: &Reference) {
        if let Some(count) = self.identities.get_mut(idx) {
            *count += 1;
        }
        if let Some(decade) = reference.decade {
            self.decades.increment(decade);
        }
        if reference.wikipedia {
            self.wikipedia += 1;
        }
    }

    pub fn identity(&self, idx: usize) -> u32 {
        self.identities.get(idx).copied().unwrap_or(0)
    }

    pub fn identities(&self) -> &[u32] {
        &self.identities
    }

    pub fn decades(&self) -> &DecadeTable {
        &self.decades
    }

    pub fn wikipedia(&self) -> u32 {
        self.wikipedia
    }

    /// Number of faces matched to any reference.
    pub fn matched(&self) -> u32 {
        self.identities.iter().sum()
    }
}
