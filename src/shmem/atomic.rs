use std::mem;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use super::Pe;
use crate::error::ShmemError;

pub(crate) struct AtomicRegion {
    id: u64,
    cells: Vec<AtomicI64>,
}

/// PEごとに1つずつある対称アトミック整数
pub struct SymmetricAtomic {
    region: Arc<AtomicRegion>,
}

impl<'w> Pe<'w> {
    /// 0 で初期化された対称アトミックを確保する (shmem_calloc 相当の集団操作)
    pub fn atomic_alloc(&self) -> Result<SymmetricAtomic, ShmemError> {
        let bytes = mem::size_of::<AtomicI64>();
        self.reserve(bytes, 0)?;

        let n_pes = self.n_pes();
        let (id, shared) = self.join_alloc(|id| AtomicRegion {
            id,
            cells: (0..n_pes).map(|_| AtomicI64::new(0)).collect(),
        });
        let region = shared
            .downcast::<AtomicRegion>()
            .map_err(|_| self.symmetry_violation(format!("allocation #{id} is not an atomic")))?;

        let start = &region.cells[self.me] as *const AtomicI64 as usize;
        self.track(id, start..start + bytes, bytes);

        let counter = SymmetricAtomic { region };
        self.barrier_all()?;
        Ok(counter)
    }

    pub fn atomic_free(&self, counter: SymmetricAtomic) -> Result<(), ShmemError> {
        self.barrier_all()?;
        self.release(counter.region.id, mem::size_of::<AtomicI64>());
        Ok(())
    }

    /// `target` 上の値に 1 を足す (shmem_atomic_inc)
    pub fn atomic_inc(&self, counter: &SymmetricAtomic, target: usize) -> Result<(), ShmemError> {
        self.atomic_fetch_add(counter, 1, target).map(|_| ())
    }

    /// `target` 上の値に `value` を足し、足す前の値を返す
    pub fn atomic_fetch_add(&self, counter: &SymmetricAtomic, value: i64, target: usize) -> Result<i64, ShmemError> {
        self.check_target(target)?;
        Ok(counter.region.cells[target].fetch_add(value, Ordering::AcqRel))
    }

    pub fn atomic_fetch(&self, counter: &SymmetricAtomic, target: usize) -> Result<i64, ShmemError> {
        self.check_target(target)?;
        Ok(counter.region.cells[target].load(Ordering::Acquire))
    }

    pub fn atomic_set(&self, counter: &SymmetricAtomic, value: i64, target: usize) -> Result<(), ShmemError> {
        self.check_target(target)?;
        counter.region.cells[target].store(value, Ordering::Release);
        Ok(())
    }
}
