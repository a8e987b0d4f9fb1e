use crate::core::error::{Result, SchedError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A bundle of MPI tasks and OpenMP threads describing one slice of a node.
///
/// One OpenMP thread runs on the core assigned to its MPI task, so a unit with
/// 1 task and 4 threads occupies 4 cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeUnit {
    #[serde(default)]
    pub mpi_tasks: u32,
    #[serde(default)]
    pub omp_threads: u32,
}

impl ComputeUnit {
    pub fn new(mpi_tasks: u32, omp_threads: u32) -> Result<Self> {
        if mpi_tasks == 0 && omp_threads == 0 {
            return Err(SchedError::InvalidDemand(
                "a compute unit needs at least one MPI task or OpenMP thread".into(),
            ));
        }
        Ok(Self {
            mpi_tasks,
            omp_threads,
        })
    }

    pub fn cores_per_unit(&self) -> u32 {
        self.mpi_tasks.max(self.omp_threads)
    }
}

/// What a job needs from the local pool in order to run.
///
/// Construct through the validating constructors; deserialized values pass
/// through the same checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", try_from = "RawDemand")]
pub enum ResourceDemand {
    /// Plain cores, no parallel runtime implied.
    Cores { n_cores: u32 },
    Mpi { n_tasks: u32 },
    Omp { n_threads: u32 },
    /// Hybrid MPI/OpenMP expressed in compute units.
    MpiOmp { unit: ComputeUnit, n_units: u32 },
    /// GPUs plus a single core to drive them.
    Gpu { n_gpus: u32 },
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RawDemand {
    Cores { n_cores: u32 },
    Mpi { n_tasks: u32 },
    Omp { n_threads: u32 },
    MpiOmp { unit: ComputeUnit, n_units: u32 },
    Gpu { n_gpus: u32 },
}

impl TryFrom<RawDemand> for ResourceDemand {
    type Error = SchedError;

    fn try_from(raw: RawDemand) -> Result<Self> {
        match raw {
            RawDemand::Cores { n_cores } => Self::cores(n_cores),
            RawDemand::Mpi { n_tasks } => Self::mpi(n_tasks),
            RawDemand::Omp { n_threads } => Self::omp(n_threads),
            RawDemand::MpiOmp { unit, n_units } => {
                Self::mpi_omp(ComputeUnit::new(unit.mpi_tasks, unit.omp_threads)?, n_units)
            }
            RawDemand::Gpu { n_gpus } => Ok(Self::gpus(n_gpus)),
        }
    }
}

fn positive(value: u32, what: &str) -> Result<u32> {
    if value == 0 {
        Err(SchedError::InvalidDemand(format!("{what} must be at least 1")))
    } else {
        Ok(value)
    }
}

impl ResourceDemand {
    pub fn cores(n_cores: u32) -> Result<Self> {
        Ok(Self::Cores {
            n_cores: positive(n_cores, "core count")?,
        })
    }

    pub fn mpi(n_tasks: u32) -> Result<Self> {
        Ok(Self::Mpi {
            n_tasks: positive(n_tasks, "MPI task count")?,
        })
    }

    pub fn omp(n_threads: u32) -> Result<Self> {
        Ok(Self::Omp {
            n_threads: positive(n_threads, "OpenMP thread count")?,
        })
    }

    /// Rejects unit counts whose total cores or MPI tasks do not fit a `u32`.
    pub fn mpi_omp(unit: ComputeUnit, n_units: u32) -> Result<Self> {
        let n_units = positive(n_units, "compute unit count")?;
        let too_large = || {
            SchedError::InvalidDemand(format!(
                "{n_units} compute unit(s) of {} core(s) is too large",
                unit.cores_per_unit()
            ))
        };
        unit.cores_per_unit()
            .checked_mul(n_units)
            .ok_or_else(too_large)?;
        unit.mpi_tasks.checked_mul(n_units).ok_or_else(too_large)?;
        Ok(Self::MpiOmp { unit, n_units })
    }

    /// GPU demands cannot be invalid: zero GPUs degrades to a single core.
    pub fn gpus(n_gpus: u32) -> Self {
        Self::Gpu { n_gpus }
    }

    pub fn core_count(&self) -> u32 {
        match *self {
            Self::Cores { n_cores } => n_cores,
            Self::Mpi { n_tasks } => n_tasks,
            Self::Omp { n_threads } => n_threads,
            Self::MpiOmp { unit, n_units } => unit.cores_per_unit().saturating_mul(n_units),
            Self::Gpu { .. } => 1,
        }
    }

    pub fn gpu_count(&self) -> u32 {
        match *self {
            Self::Gpu { n_gpus } => n_gpus,
            _ => 0,
        }
    }

    /// Total MPI tasks, if the job is launched through MPI.
    pub fn mpi_tasks(&self) -> Option<u32> {
        match *self {
            Self::Mpi { n_tasks } => Some(n_tasks),
            Self::MpiOmp { unit, n_units } if unit.mpi_tasks > 0 => {
                Some(unit.mpi_tasks.saturating_mul(n_units))
            }
            _ => None,
        }
    }

    /// OpenMP threads per process, if the job uses OpenMP.
    pub fn omp_threads(&self) -> Option<u32> {
        match *self {
            Self::Omp { n_threads } => Some(n_threads),
            Self::MpiOmp { unit, .. } if unit.omp_threads > 0 => Some(unit.omp_threads),
            _ => None,
        }
    }

    pub fn needs_mpi(&self) -> bool {
        self.mpi_tasks().is_some()
    }

    pub fn needs_omp(&self) -> bool {
        self.omp_threads().is_some()
    }

    pub fn needs_gpus(&self) -> bool {
        self.gpu_count() > 0
    }
}

/// A demand together with the job's wall-clock allowance and memory request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub demand: ResourceDemand,
    /// `None` means the job is expected to be short.
    #[serde(default)]
    pub wall_clock: Option<Duration>,
    /// Total memory in bytes. Informative only, never used for admission.
    #[serde(default)]
    pub memory: Option<u64>,
}

impl Resources {
    pub fn new(demand: ResourceDemand) -> Self {
        Self {
            demand,
            wall_clock: None,
            memory: None,
        }
    }

    pub fn wall_clock(mut self, wall_clock: Duration) -> Self {
        self.wall_clock = Some(wall_clock);
        self
    }

    pub fn memory(mut self, bytes: u64) -> Self {
        self.memory = Some(bytes);
        self
    }

    pub fn core_count(&self) -> u32 {
        self.demand.core_count()
    }

    pub fn memory_per_core(&self) -> Option<u64> {
        self.memory.map(|m| m / u64::from(self.core_count()))
    }
}

impl From<ResourceDemand> for Resources {
    fn from(demand: ResourceDemand) -> Self {
        Self::new(demand)
    }
}
