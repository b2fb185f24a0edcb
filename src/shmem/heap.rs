use std::any::Any;
use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{lock, Pe};
use crate::error::ShmemError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum RendezvousKey {
    Alloc(u64),
    Split { parent: u64, seq: u64 },
}

struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    remaining: usize,
}

/*
  集団操作の待ち合わせ表

  全PEが同じ順序で同じ集団操作を呼ぶことを前提に、
  (操作の種類, 呼び出し順の通し番号) をキーにして
  最初に来たPEが実体を作り、残りのPEはそれを受け取る。
  全員が受け取ったらエントリは消える。
*/
pub(crate) struct Rendezvous {
    entries: Mutex<HashMap<RendezvousKey, Entry>>,
}

impl Rendezvous {
    pub(crate) fn new() -> Self {
        Rendezvous {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn join<V, F>(&self, key: RendezvousKey, parties: usize, make: F) -> Arc<dyn Any + Send + Sync>
    where
        V: Any + Send + Sync,
        F: FnOnce() -> V,
    {
        let mut entries = lock(&self.entries);
        if let Some(entry) = entries.get_mut(&key) {
            let value = Arc::clone(&entry.value);
            entry.remaining -= 1;
            if entry.remaining == 0 {
                entries.remove(&key);
            }
            return value;
        }

        let value: Arc<dyn Any + Send + Sync> = Arc::new(make());
        if parties > 1 {
            entries.insert(
                key,
                Entry {
                    value: Arc::clone(&value),
                    remaining: parties - 1,
                },
            );
        }
        value
    }
}

// 1回の対称確保。PEごとに同じ長さの領域を持つ
pub(crate) struct SymmetricRegion<T> {
    id: u64,
    len: usize,
    parts: Vec<RwLock<Vec<T>>>,
}

impl<T: Copy + Default> SymmetricRegion<T> {
    fn new(id: u64, n_pes: usize, len: usize) -> Self {
        SymmetricRegion {
            id,
            len,
            parts: (0..n_pes).map(|_| RwLock::new(vec![T::default(); len])).collect(),
        }
    }
}

impl<T: Copy> SymmetricRegion<T> {
    fn write_at(&self, target: usize, offset: usize, src: &[T]) {
        let mut part = self.parts[target]
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        part[offset..offset + src.len()].copy_from_slice(src);
    }
}

/// 対称バッファのハンドル
///
/// 全PEが同じ長さ・同じ呼び出し順で確保したもの。`Clone` ではないので
/// `Pe::free` に渡した後に使ったり二重に解放したりはできない。
pub struct SymmetricBuf<T> {
    region: Arc<SymmetricRegion<T>>,
}

impl<T> SymmetricBuf<T> {
    pub fn len(&self) -> usize {
        self.region.len
    }

    pub fn is_empty(&self) -> bool {
        self.region.len == 0
    }

    /// 自分の領域を読む
    pub fn read(&self, pe: &Pe<'_>) -> RwLockReadGuard<'_, Vec<T>> {
        self.region.parts[pe.my_pe()]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// 自分の領域に書く
    pub fn write(&self, pe: &Pe<'_>) -> RwLockWriteGuard<'_, Vec<T>> {
        self.region.parts[pe.my_pe()]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<'w> Pe<'w> {
    /// 対称確保 (shmem_malloc)。全PEが同じ `len` で呼ぶ集団操作
    ///
    /// 中身はゼロ (`T::default()`) で初期化され、最後に暗黙のバリアを含む。
    pub fn malloc<T>(&self, len: usize) -> Result<SymmetricBuf<T>, ShmemError>
    where
        T: Copy + Default + Send + Sync + 'static,
    {
        let bytes = self.region_bytes::<T>(len)?;
        self.reserve(bytes, 0)?;
        self.alloc_region::<T>(len, bytes)
    }

    /// 対称解放 (shmem_free)。集団操作で、先頭に暗黙のバリアを含む
    pub fn free<T>(&self, buf: SymmetricBuf<T>) -> Result<(), ShmemError> {
        // 解放前に、この領域を狙った put を全部終わらせる
        self.barrier_all()?;
        self.release(buf.region.id, buf.region.len * mem::size_of::<T>());
        Ok(())
    }

    /// 対称再確保 (shmem_realloc)。共通部分の中身を引き継ぐ
    pub fn realloc<T>(&self, buf: SymmetricBuf<T>, new_len: usize) -> Result<SymmetricBuf<T>, ShmemError>
    where
        T: Copy + Default + Send + Sync + 'static,
    {
        let old_bytes = buf.len() * mem::size_of::<T>();
        let new_bytes = self.region_bytes::<T>(new_len)?;
        // 古い領域は解放される前提で容量を見る
        self.reserve(new_bytes, old_bytes)?;

        let fresh = self.alloc_region::<T>(new_len, new_bytes)?;
        {
            let old = buf.read(self);
            let mut new = fresh.write(self);
            let keep = old.len().min(new.len());
            new[..keep].copy_from_slice(&old[..keep]);
        }
        self.free(buf)?;
        Ok(fresh)
    }

    /// 片側 put (shmem_put)。`target` の `buf[offset..]` に `src` を書く
    ///
    /// 完了は保証されない。次のバリアで相手から見えるようになる。
    pub fn put<T>(&self, buf: &SymmetricBuf<T>, offset: usize, src: &[T], target: usize) -> Result<(), ShmemError>
    where
        T: Copy + Send + Sync + 'static,
    {
        self.check_target(target)?;
        if offset + src.len() > buf.len() {
            return Err(ShmemError::OutOfBounds {
                offset,
                len: src.len(),
                capacity: buf.len(),
            });
        }

        let region = Arc::clone(&buf.region);
        let data = src.to_vec();
        self.outbox
            .borrow_mut()
            .push(Box::new(move || region.write_at(target, offset, &data)));
        Ok(())
    }

    /// `addr` がこのPEの生きている対称領域内にあり、`target` からアクセス可能か
    pub fn addr_accessible<T>(&self, addr: *const T, target: usize) -> bool {
        if target >= self.n_pes() {
            return false;
        }
        let addr = addr as usize;
        self.live.borrow().values().any(|range| range.contains(&addr))
    }

    /// このPEが確保中の対称メモリ量 (バイト)
    pub fn heap_used(&self) -> usize {
        self.heap_used.get()
    }

    fn region_bytes<T>(&self, len: usize) -> Result<usize, ShmemError> {
        len.checked_mul(mem::size_of::<T>())
            .ok_or_else(|| self.oversized_request())
    }

    /// usize に収まらない大きさの確保要求
    pub(crate) fn oversized_request(&self) -> ShmemError {
        ShmemError::AllocationFailed {
            pe: self.me,
            requested: usize::MAX,
            available: self.available(),
        }
    }

    fn available(&self) -> usize {
        self.shared.heap_size.saturating_sub(self.heap_used.get())
    }

    // 容量チェック。`credit` はこの直後に解放される予定の量
    pub(crate) fn reserve(&self, bytes: usize, credit: usize) -> Result<(), ShmemError> {
        let available = self.available() + credit;
        if bytes > available {
            log::error!(
                "PE {}: symmetric heap exhausted ({} requested, {} available)",
                self.me,
                bytes,
                available
            );
            return Err(ShmemError::AllocationFailed {
                pe: self.me,
                requested: bytes,
                available,
            });
        }
        Ok(())
    }

    fn alloc_region<T>(&self, len: usize, bytes: usize) -> Result<SymmetricBuf<T>, ShmemError>
    where
        T: Copy + Default + Send + Sync + 'static,
    {
        let n_pes = self.n_pes();
        let (id, shared) = self.join_alloc(|id| SymmetricRegion::<T>::new(id, n_pes, len));
        let region = shared
            .downcast::<SymmetricRegion<T>>()
            .map_err(|_| self.symmetry_violation(format!("allocation #{id} has a different element type")))?;
        if region.len != len {
            return Err(self.symmetry_violation(format!(
                "allocation #{id}: this PE asked for {len} elements, others for {}",
                region.len
            )));
        }

        let start = region.parts[self.me]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ptr() as usize;
        self.track(id, start..start + bytes, bytes);

        let buf = SymmetricBuf { region };
        self.barrier_all()?;
        Ok(buf)
    }

    // 確保の通し番号を進めて待ち合わせる
    pub(crate) fn join_alloc<V, F>(&self, make: F) -> (u64, Arc<dyn Any + Send + Sync>)
    where
        V: Any + Send + Sync,
        F: FnOnce(u64) -> V,
    {
        let id = self.alloc_seq.get();
        self.alloc_seq.set(id + 1);
        let value = self
            .shared
            .rendezvous
            .join(RendezvousKey::Alloc(id), self.n_pes(), || make(id));
        (id, value)
    }

    pub(crate) fn track(&self, id: u64, range: std::ops::Range<usize>, bytes: usize) {
        self.live.borrow_mut().insert(id, range);
        self.heap_used.set(self.heap_used.get() + bytes);
        log::debug!(
            "PE {}: symmetric allocation #{} ({} bytes, {} in use)",
            self.me,
            id,
            bytes,
            self.heap_used.get()
        );
    }

    pub(crate) fn release(&self, id: u64, bytes: usize) {
        self.live.borrow_mut().remove(&id);
        self.heap_used.set(self.heap_used.get().saturating_sub(bytes));
        log::debug!("PE {}: freed symmetric allocation #{}", self.me, id);
    }

    pub(crate) fn symmetry_violation(&self, detail: String) -> ShmemError {
        ShmemError::SymmetryViolation { pe: self.me, detail }
    }
}
