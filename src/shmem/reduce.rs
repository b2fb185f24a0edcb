use std::sync::atomic::Ordering;

use super::{Pe, Team};
use crate::error::ShmemError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Min,
    Max,
    Sum,
}

/// リダクションできるスカラー型
///
/// 値は 64bit のビット列としてスロットに置かれる。
pub trait Reducible: Copy + Send + 'static {
    fn to_bits(self) -> u64;
    fn from_bits(bits: u64) -> Self;
    fn combine(op: ReduceOp, a: Self, b: Self) -> Self;
}

impl Reducible for f64 {
    fn to_bits(self) -> u64 {
        f64::to_bits(self)
    }

    fn from_bits(bits: u64) -> Self {
        f64::from_bits(bits)
    }

    fn combine(op: ReduceOp, a: Self, b: Self) -> Self {
        match op {
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
            ReduceOp::Sum => a + b,
        }
    }
}

impl Reducible for i64 {
    fn to_bits(self) -> u64 {
        self as u64
    }

    fn from_bits(bits: u64) -> Self {
        bits as i64
    }

    fn combine(op: ReduceOp, a: Self, b: Self) -> Self {
        match op {
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
            ReduceOp::Sum => a.wrapping_add(b),
        }
    }
}

impl Reducible for u64 {
    fn to_bits(self) -> u64 {
        self
    }

    fn from_bits(bits: u64) -> Self {
        bits
    }

    fn combine(op: ReduceOp, a: Self, b: Self) -> Self {
        match op {
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
            ReduceOp::Sum => a.wrapping_add(b),
        }
    }
}

impl<'w> Pe<'w> {
    /// 全PEでのリダクション。全PEが同じ順序で呼ぶ必要がある
    pub fn reduce<T: Reducible>(&self, op: ReduceOp, value: T) -> Result<T, ShmemError> {
        let world = self.world_team();
        self.team_reduce(&world, op, value)
    }

    /// チーム内のリダクション。結果は全メンバーで同一
    pub fn team_reduce<T: Reducible>(&self, team: &Team, op: ReduceOp, value: T) -> Result<T, ShmemError> {
        let inner = team.inner();
        inner.slots[team.my_pe()].store(value.to_bits(), Ordering::Relaxed);
        // 1回目: 全員の書き込み完了を待つ
        self.sync(&inner.barrier)?;

        // PE順に畳み込むので、浮動小数点の和も全員で一致する
        let result = inner
            .slots
            .iter()
            .map(|slot| T::from_bits(slot.load(Ordering::Relaxed)))
            .reduce(|acc, v| T::combine(op, acc, v))
            .unwrap_or(value);

        // 2回目: 全員が読み終わるまでスロットを再利用させない
        self.sync(&inner.barrier)?;
        log::trace!("PE {}: reduce {:?} done", self.me, op);
        Ok(result)
    }
}
