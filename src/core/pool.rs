use crate::core::error::{Result, SchedError};
use crate::core::resources::ResourceDemand;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use uuid::Uuid;

/// Proof that resources were reserved from a [`ResourcePool`].
///
/// A grant is handed back to the pool that issued it exactly once; it is
/// neither `Clone` nor `Copy`, so releasing the same value twice does not
/// compile.
#[must_use = "a grant that is dropped without release leaks its resources"]
#[derive(Debug, PartialEq, Eq)]
pub struct Grant {
    pool: Uuid,
    id: u64,
    cores: u32,
    gpu_ids: Vec<u32>,
}

impl Grant {
    pub fn cores(&self) -> u32 {
        self.cores
    }

    /// GPU identifiers in ascending order.
    pub fn gpu_ids(&self) -> &[u32] {
        &self.gpu_ids
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grant#{} ({} core(s)", self.id, self.cores)?;
        if !self.gpu_ids.is_empty() {
            write!(f, ", GPUs {:?}", self.gpu_ids)?;
        }
        write!(f, ")")
    }
}

/// Point-in-time view of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolInfo {
    pub total_cores: u32,
    pub available_cores: u32,
    pub total_gpus: usize,
    pub free_gpus: Vec<u32>,
    pub outstanding: usize,
}

/// Local capacity: a fixed number of cores and an optional set of GPU ids.
///
/// Acquisition is all-or-nothing. Capacity never changes after construction.
#[derive(Debug)]
pub struct ResourcePool {
    id: Uuid,
    total_cores: u32,
    available_cores: u32,
    total_gpus: BTreeSet<u32>,
    free_gpus: BTreeSet<u32>,
    /// grant id -> cores held, for validating releases
    outstanding: HashMap<u64, u32>,
    next_grant_id: u64,
}

impl ResourcePool {
    pub fn new(cores: u32) -> Self {
        Self::with_gpus(cores, std::iter::empty())
    }

    /// Duplicate GPU ids are collapsed.
    pub fn with_gpus(cores: u32, gpu_ids: impl IntoIterator<Item = u32>) -> Self {
        let total_gpus: BTreeSet<u32> = gpu_ids.into_iter().collect();
        Self {
            id: Uuid::new_v4(),
            total_cores: cores,
            available_cores: cores,
            free_gpus: total_gpus.clone(),
            total_gpus,
            outstanding: HashMap::new(),
            next_grant_id: 1,
        }
    }

    /// Size the pool from the host's logical CPU count, without GPUs.
    pub fn from_host() -> Self {
        Self::new(host_cores())
    }

    /// Host cores plus an externally supplied list of GPU ids
    /// (e.g. parsed from `CUDA_VISIBLE_DEVICES`).
    pub fn from_host_with_gpus(gpu_ids: impl IntoIterator<Item = u32>) -> Self {
        Self::with_gpus(host_cores(), gpu_ids)
    }

    pub fn total_cores(&self) -> u32 {
        self.total_cores
    }

    pub fn available_cores(&self) -> u32 {
        self.available_cores
    }

    pub fn total_gpus(&self) -> usize {
        self.total_gpus.len()
    }

    pub fn free_gpus(&self) -> Vec<u32> {
        self.free_gpus.iter().copied().collect()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Whether `demand` could be satisfied by an otherwise idle pool.
    pub fn could_ever_fit(&self, demand: &ResourceDemand) -> bool {
        demand.core_count() <= self.total_cores
            && demand.gpu_count() as usize <= self.total_gpus.len()
    }

    /// Reserve what `demand` asks for, or nothing at all.
    pub fn acquire(&mut self, demand: &ResourceDemand) -> Option<Grant> {
        let cores = demand.core_count();
        let n_gpus = demand.gpu_count() as usize;

        if cores > self.available_cores || n_gpus > self.free_gpus.len() {
            return None;
        }

        let gpu_ids: Vec<u32> = self.free_gpus.iter().take(n_gpus).copied().collect();
        for gpu in &gpu_ids {
            self.free_gpus.remove(gpu);
        }
        self.available_cores -= cores;

        let id = self.next_grant_id;
        self.next_grant_id += 1;
        self.outstanding.insert(id, cores);

        tracing::trace!(
            "Acquired {} core(s), GPUs {:?}; {} core(s) left",
            cores,
            gpu_ids,
            self.available_cores
        );

        Some(Grant {
            pool: self.id,
            id,
            cores,
            gpu_ids,
        })
    }

    /// Return a grant's cores and GPU ids to the pool.
    pub fn release(&mut self, grant: Grant) -> Result<()> {
        if grant.pool != self.id {
            return Err(SchedError::ResourceAccounting(format!(
                "{grant} was issued by a different pool"
            )));
        }
        match self.outstanding.remove(&grant.id) {
            Some(cores) if cores == grant.cores => {}
            Some(cores) => {
                return Err(SchedError::ResourceAccounting(format!(
                    "{grant} does not match the {cores} core(s) reserved for it"
                )))
            }
            None => {
                return Err(SchedError::ResourceAccounting(format!(
                    "{grant} is not outstanding"
                )))
            }
        }

        for gpu in &grant.gpu_ids {
            if !self.total_gpus.contains(gpu) || !self.free_gpus.insert(*gpu) {
                return Err(SchedError::ResourceAccounting(format!(
                    "GPU {gpu} from {grant} was not held"
                )));
            }
        }
        self.available_cores += grant.cores;
        debug_assert!(self.available_cores <= self.total_cores);

        tracing::trace!(
            "Released {grant}; {} core(s) available",
            self.available_cores
        );
        Ok(())
    }

    pub fn info(&self) -> PoolInfo {
        PoolInfo {
            total_cores: self.total_cores,
            available_cores: self.available_cores,
            total_gpus: self.total_gpus.len(),
            free_gpus: self.free_gpus(),
            outstanding: self.outstanding.len(),
        }
    }
}

fn host_cores() -> u32 {
    u32::try_from(num_cpus::get()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cores(n: u32) -> ResourceDemand {
        ResourceDemand::cores(n).unwrap()
    }

    #[test]
    fn test_acquire_is_all_or_nothing() {
        let mut pool = ResourcePool::new(4);
        let a = pool.acquire(&cores(3)).unwrap();
        assert_eq!(pool.available_cores(), 1);

        assert!(pool.acquire(&cores(2)).is_none());
        assert_eq!(pool.available_cores(), 1);

        pool.release(a).unwrap();
        assert_eq!(pool.available_cores(), 4);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_gpu_pool_lowest_first() {
        let mut pool = ResourcePool::with_gpus(8, [1, 2, 3, 5]);

        assert!(pool.acquire(&ResourceDemand::gpus(5)).is_none());

        let r1 = pool.acquire(&ResourceDemand::gpus(1)).unwrap();
        let r2 = pool.acquire(&ResourceDemand::gpus(1)).unwrap();
        let r3 = pool.acquire(&ResourceDemand::gpus(2)).unwrap();
        assert_eq!(r1.gpu_ids(), &[1]);
        assert_eq!(r2.gpu_ids(), &[2]);
        assert_eq!(r3.gpu_ids(), &[3, 5]);
        assert!(pool.acquire(&ResourceDemand::gpus(1)).is_none());

        pool.release(r3).unwrap();
        let r5 = pool.acquire(&ResourceDemand::gpus(1)).unwrap();
        let r6 = pool.acquire(&ResourceDemand::gpus(1)).unwrap();
        assert!(pool.acquire(&ResourceDemand::gpus(1)).is_none());

        for grant in [r1, r2, r5, r6] {
            pool.release(grant).unwrap();
        }
        assert_eq!(pool.free_gpus(), vec![1, 2, 3, 5]);
        assert_eq!(pool.available_cores(), 8);
    }

    #[test]
    fn test_gpu_round_trip_restores_members() {
        let mut pool = ResourcePool::with_gpus(4, [1, 2]);
        let before = pool.free_gpus();
        let grant = pool.acquire(&ResourceDemand::gpus(2)).unwrap();
        assert_eq!(grant.gpu_ids(), &[1, 2]);
        assert!(pool.free_gpus().is_empty());
        pool.release(grant).unwrap();
        assert_eq!(pool.free_gpus(), before);
    }

    #[test]
    fn test_gpu_demand_needs_a_core() {
        let mut pool = ResourcePool::with_gpus(1, [0, 1]);
        let g = pool.acquire(&ResourceDemand::gpus(1)).unwrap();
        assert!(pool.acquire(&ResourceDemand::gpus(1)).is_none());
        pool.release(g).unwrap();
    }

    #[test]
    fn test_release_foreign_grant_is_accounting_error() {
        let mut a = ResourcePool::new(2);
        let mut b = ResourcePool::new(2);
        let grant = a.acquire(&cores(1)).unwrap();

        let err = b.release(grant).unwrap_err();
        assert!(matches!(err, SchedError::ResourceAccounting(_)));
        assert_eq!(b.available_cores(), 2);
        assert_eq!(a.available_cores(), 1);
    }

    #[test]
    fn test_duplicate_gpu_ids_collapse() {
        let pool = ResourcePool::with_gpus(1, [0, 0, 1]);
        assert_eq!(pool.total_gpus(), 2);
    }

    #[test]
    fn test_zero_capacity_admits_nothing() {
        let mut pool = ResourcePool::new(0);
        assert!(pool.acquire(&cores(1)).is_none());
        assert!(!pool.could_ever_fit(&cores(1)));
    }

    #[test]
    fn test_from_host_has_cores() {
        let pool = ResourcePool::from_host();
        assert!(pool.total_cores() >= 1);
        assert_eq!(pool.total_gpus(), 0);
    }

    #[test]
    fn test_info_snapshot() {
        let mut pool = ResourcePool::with_gpus(4, [0, 1]);
        let g = pool.acquire(&ResourceDemand::gpus(1)).unwrap();
        let info = pool.info();
        assert_eq!(info.total_cores, 4);
        assert_eq!(info.available_cores, 3);
        assert_eq!(info.free_gpus, vec![1]);
        assert_eq!(info.outstanding, 1);
        pool.release(g).unwrap();
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Acquire { cores: u32, gpus: u32 },
            Release(usize),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (1u32..6, 0u32..3).prop_map(|(cores, gpus)| Op::Acquire { cores, gpus }),
                (0usize..16).prop_map(Op::Release),
            ]
        }

        proptest! {
            /// Property: acquired + available == total after every operation,
            /// and no GPU is ever held by two grants.
            #[test]
            fn prop_capacity_conserved(
                total in 1u32..16,
                n_gpus in 0u32..6,
                ops in prop::collection::vec(op(), 1..64),
            ) {
                let mut pool = ResourcePool::with_gpus(total, 0..n_gpus);
                let mut held: Vec<Grant> = Vec::new();

                for op in ops {
                    match op {
                        Op::Acquire { cores, gpus } => {
                            let demand = if gpus > 0 {
                                ResourceDemand::gpus(gpus)
                            } else {
                                ResourceDemand::cores(cores).unwrap()
                            };
                            let before = pool.available_cores();
                            match pool.acquire(&demand) {
                                Some(g) => held.push(g),
                                None => prop_assert_eq!(pool.available_cores(), before),
                            }
                        }
                        Op::Release(i) if !held.is_empty() => {
                            let g = held.swap_remove(i % held.len());
                            prop_assert!(pool.release(g).is_ok());
                        }
                        Op::Release(_) => {}
                    }

                    let acquired: u32 = held.iter().map(Grant::cores).sum();
                    prop_assert_eq!(acquired + pool.available_cores(), total);

                    let mut seen = BTreeSet::new();
                    for g in &held {
                        for id in g.gpu_ids() {
                            prop_assert!(seen.insert(*id));
                            prop_assert!(!pool.free_gpus().contains(id));
                        }
                    }
                }

                for g in held {
                    prop_assert!(pool.release(g).is_ok());
                }
                prop_assert_eq!(pool.available_cores(), total);
                prop_assert_eq!(pool.free_gpus(), (0..n_gpus).collect::<Vec<_>>());
            }
        }
    }
}
