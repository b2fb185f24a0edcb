use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::barrier::PhaseBarrier;
use super::heap::RendezvousKey;
use super::Pe;
use crate::error::ShmemError;

pub(crate) struct TeamInner {
    pub(crate) id: u64,
    pub(crate) members: Vec<usize>,
    pub(crate) barrier: Arc<PhaseBarrier>,
    pub(crate) slots: Vec<AtomicU64>,
}

impl TeamInner {
    pub(crate) fn new(id: u64, members: Vec<usize>) -> Self {
        let size = members.len();
        TeamInner {
            id,
            members,
            barrier: Arc::new(PhaseBarrier::new(size)),
            slots: (0..size).map(|_| AtomicU64::new(0)).collect(),
        }
    }
}

/// PEの部分集合 (shmem_team_t)
///
/// チーム内番号は `members` の並び順。ハンドルを落とせば破棄される。
#[derive(Clone)]
pub struct Team {
    inner: Arc<TeamInner>,
    my_index: usize,
}

impl Team {
    /// チーム内での自分の番号
    pub fn my_pe(&self) -> usize {
        self.my_index
    }

    pub fn n_pes(&self) -> usize {
        self.inner.members.len()
    }

    /// チーム内番号からワールド番号へ
    pub fn world_pe(&self, team_pe: usize) -> Option<usize> {
        self.inner.members.get(team_pe).copied()
    }

    pub fn members(&self) -> &[usize] {
        &self.inner.members
    }

    pub(crate) fn inner(&self) -> &TeamInner {
        &self.inner
    }
}

impl std::fmt::Debug for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Team")
            .field("id", &self.inner.id)
            .field("my_pe", &self.my_index)
            .field("members", &self.inner.members)
            .finish()
    }
}

impl<'w> Pe<'w> {
    /// 全PEからなるチーム (SHMEM_TEAM_WORLD)
    pub fn world_team(&self) -> Team {
        Team {
            inner: Arc::clone(&self.shared.world),
            my_index: self.me,
        }
    }

    /// 等間隔分割 (shmem_team_split_strided)
    ///
    /// 親チームの全メンバーが同じ引数で呼ぶ集団操作。親チーム内番号
    /// `start, start + stride, ...` の `size` 個が新チームになり、
    /// それ以外のPEには `None` が返る。
    pub fn team_split_strided(
        &self,
        parent: &Team,
        start: usize,
        stride: usize,
        size: usize,
    ) -> Result<Option<Team>, ShmemError> {
        if size == 0 || stride == 0 {
            return Err(ShmemError::InvalidTeam(format!(
                "size and stride must be positive (start={start}, stride={stride}, size={size})"
            )));
        }
        let last = (size - 1)
            .checked_mul(stride)
            .and_then(|span| span.checked_add(start));
        match last {
            Some(last) if last < parent.n_pes() => {}
            _ => {
                return Err(ShmemError::InvalidTeam(format!(
                    "start={start}, stride={stride}, size={size} exceeds parent team of {} PEs",
                    parent.n_pes()
                )))
            }
        }

        let members: Vec<usize> = (0..size)
            .filter_map(|k| parent.world_pe(start + k * stride))
            .collect();

        let seq = {
            let mut seqs = self.split_seq.borrow_mut();
            let counter = seqs.entry(parent.inner.id).or_insert(0);
            let seq = *counter;
            *counter += 1;
            seq
        };

        let key = RendezvousKey::Split {
            parent: parent.inner.id,
            seq,
        };
        let shared = self.shared.rendezvous.join(key, parent.n_pes(), || {
            let id = self.shared.next_team_id.fetch_add(1, Ordering::Relaxed);
            TeamInner::new(id, members.clone())
        });
        let inner = shared
            .downcast::<TeamInner>()
            .map_err(|_| self.symmetry_violation(format!("team split #{seq} collided with another collective")))?;
        if inner.members != members {
            return Err(self.symmetry_violation(format!(
                "team split #{seq}: members {:?} differ from {:?}",
                members, inner.members
            )));
        }
        self.shared.abort.register(&inner.barrier);

        // 親チームで同期してから使わせる
        self.sync(&parent.inner.barrier)?;

        let team = inner
            .members
            .iter()
            .position(|&pe| pe == self.me)
            .map(|my_index| Team { inner, my_index });
        if let Some(team) = &team {
            log::debug!(
                "PE {}: joined team {} as {} of {}",
                self.me,
                team.inner.id,
                team.my_pe(),
                team.n_pes()
            );
        }
        Ok(team)
    }

    /// チーム内バリア (shmem_team_sync)
    pub fn team_barrier(&self, team: &Team) -> Result<super::Fence, ShmemError> {
        self.sync(&team.inner.barrier)
    }
}
