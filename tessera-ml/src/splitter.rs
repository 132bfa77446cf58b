//! K-fold partitioning of a dataframe.
//!
//! Identities are enumerated once (identity order, or a seeded shuffle of it)
//! and cut into `k` contiguous parts: every part holds `n / k` identities and
//! the first `n % k` parts hold one more. Fold `i` validates on part `i` and
//! trains on everything else.

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use tessera_core::ValidationSettings;

use crate::dataframe::Dataframe;
use crate::error::MlError;

/// Enumeration order used before cutting parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitOrder {
    /// Identity order.
    Insertion,
    /// Identity order shuffled with a ChaCha8 generator seeded by `seed`.
    Shuffled { seed: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KFoldSplitter {
    k: usize,
    order: SplitOrder,
}

/// One (train, validation) pair.
#[derive(Debug)]
pub struct Fold {
    pub index: usize,
    pub train: Dataframe,
    pub validation: Dataframe,
}

impl KFoldSplitter {
    pub fn new(k: usize) -> Result<Self, MlError> {
        if k < 2 {
            return Err(MlError::invalid_input(format!("k must be at least 2, got {k}")));
        }
        Ok(Self {
            k,
            order: SplitOrder::Insertion,
        })
    }

    pub fn shuffled(k: usize, seed: u64) -> Result<Self, MlError> {
        Ok(Self::new(k)?.with_order(SplitOrder::Shuffled { seed }))
    }

    /// Build from configured fold count and shuffle seed.
    pub fn from_settings(settings: &ValidationSettings) -> Result<Self, MlError> {
        let splitter = Self::new(settings.folds)?;
        Ok(match settings.shuffle_seed {
            Some(seed) => splitter.with_order(SplitOrder::Shuffled { seed }),
            None => splitter,
        })
    }

    pub fn with_order(mut self, order: SplitOrder) -> Self {
        self.order = order;
        self
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn order(&self) -> SplitOrder {
        self.order
    }

    /// Cut `ids` into `k` validation parts.
    pub fn partition(&self, ids: &[u64]) -> Result<Vec<Vec<u64>>, MlError> {
        let n = ids.len();
        if self.k > n {
            return Err(MlError::invalid_input(format!(
                "k = {} exceeds the {n} available records",
                self.k
            )));
        }

        let mut ordered = ids.to_vec();
        if let SplitOrder::Shuffled { seed } = self.order {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            ordered.shuffle(&mut rng);
        }

        let base = n / self.k;
        let extra = n % self.k;
        let mut parts = Vec::with_capacity(self.k);
        let mut start = 0;
        for i in 0..self.k {
            let len = base + usize::from(i < extra);
            parts.push(ordered[start..start + len].to_vec());
            start += len;
        }
        Ok(parts)
    }

    /// Lazily produce the `k` folds of `data`.
    pub fn split<'a>(&self, data: &'a Dataframe) -> Result<KFoldSplits<'a>, MlError> {
        let ids: Vec<u64> = data.ids().collect();
        let parts = self.partition(&ids)?;
        tracing::debug!(k = self.k, records = ids.len(), order = ?self.order, "Partitioned dataframe");
        Ok(KFoldSplits {
            data,
            parts,
            next: 0,
        })
    }
}

/// Iterator over the folds of one dataframe. Each fold is materialized on demand.
#[derive(Debug)]
pub struct KFoldSplits<'a> {
    data: &'a Dataframe,
    parts: Vec<Vec<u64>>,
    next: usize,
}

impl KFoldSplits<'_> {
    /// Validation identities of every fold, in fold order.
    pub fn parts(&self) -> &[Vec<u64>] {
        &self.parts
    }
}

impl Iterator for KFoldSplits<'_> {
    type Item = Fold;

    fn next(&mut self) -> Option<Fold> {
        let index = self.next;
        let part = self.parts.get(index)?;
        self.next += 1;

        let validation = self.data.select(part.iter().copied());
        let train = self.data.select(
            self.parts
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != index)
                .flat_map(|(_, ids)| ids.iter().copied()),
        );
        Some(Fold {
            index,
            train,
            validation,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.parts.len() - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for KFoldSplits<'_> {}
