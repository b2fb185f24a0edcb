use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};

use super::lock;
use crate::error::ShmemError;

/// バリア通過時の記録
///
/// `completed_puts` はこのPEが直前のバリア以降に発行した put のうち、
/// このバリアで相手側に可視になったものの数。バリアを抜けた時点で、
/// 全PEがこのバリアより前に発行した put はすべて適用済みである。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fence {
    pub epoch: u64,
    pub completed_puts: usize,
}

struct BarrierState {
    arrived: usize,
    epoch: u64,
}

/*
  中断可能なバリア

  std::sync::Barrier は他のPEが死ぬと永久に待つので、
  Mutex + Condvar で作り直し、全体中断 (global exit) で起こせるようにしている。
*/
pub(crate) struct PhaseBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

impl PhaseBarrier {
    pub(crate) fn new(parties: usize) -> Self {
        PhaseBarrier {
            parties,
            state: Mutex::new(BarrierState {
                arrived: 0,
                epoch: 0,
            }),
            cvar: Condvar::new(),
        }
    }

    pub(crate) fn wait(&self, abort: &AbortSignal) -> Result<u64, ShmemError> {
        let mut state = lock(&self.state);
        if let Some(err) = abort.check() {
            return Err(err);
        }

        let epoch = state.epoch;
        state.arrived += 1;
        if state.arrived == self.parties {
            // 最後に到着したPEが世代を進めて全員を起こす
            state.arrived = 0;
            state.epoch += 1;
            self.cvar.notify_all();
            return Ok(epoch);
        }

        while state.epoch == epoch {
            if let Some(err) = abort.check() {
                return Err(err);
            }
            state = self
                .cvar
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        Ok(epoch)
    }

    fn wake_all(&self) {
        // ロックを取ってから notify しないと起床を取りこぼす
        let _state = lock(&self.state);
        self.cvar.notify_all();
    }
}

/// 全体中断フラグ。最初に中断したPEと終了コードを記録する
pub(crate) struct AbortSignal {
    flag: AtomicBool,
    status: Mutex<Option<(usize, i32)>>,
    barriers: Mutex<Vec<Weak<PhaseBarrier>>>,
}

impl AbortSignal {
    pub(crate) fn new() -> Self {
        AbortSignal {
            flag: AtomicBool::new(false),
            status: Mutex::new(None),
            barriers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn register(&self, barrier: &Arc<PhaseBarrier>) {
        let mut barriers = lock(&self.barriers);
        barriers.retain(|b| b.strong_count() > 0);
        barriers.push(Arc::downgrade(barrier));
    }

    /// 中断を要求する。2回目以降の呼び出しは記録を上書きしない
    pub(crate) fn abort(&self, pe: usize, code: i32) {
        {
            let mut status = lock(&self.status);
            if status.is_none() {
                *status = Some((pe, code));
            }
        }
        self.flag.store(true, Ordering::SeqCst);

        for barrier in lock(&self.barriers).iter().filter_map(Weak::upgrade) {
            barrier.wake_all();
        }
    }

    pub(crate) fn status(&self) -> Option<(usize, i32)> {
        *lock(&self.status)
    }

    pub(crate) fn check(&self) -> Option<ShmemError> {
        if !self.flag.load(Ordering::SeqCst) {
            return None;
        }
        self.status()
            .map(|(by_pe, code)| ShmemError::Aborted { by_pe, code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_barrier_epochs_advance() {
        let abort = AbortSignal::new();
        let barrier = Arc::new(PhaseBarrier::new(3));
        abort.register(&barrier);

        thread::scope(|scope| {
            let handles: Vec<_> = (0..3)
                .map(|_| {
                    let barrier = &barrier;
                    let abort = &abort;
                    scope.spawn(move || {
                        let first = barrier.wait(abort).unwrap();
                        let second = barrier.wait(abort).unwrap();
                        (first, second)
                    })
                })
                .collect();
            for h in handles {
                assert_eq!(h.join().unwrap(), (0, 1));
            }
        });
    }

    #[test]
    fn test_abort_wakes_waiters() {
        let abort = AbortSignal::new();
        let barrier = Arc::new(PhaseBarrier::new(2));
        abort.register(&barrier);

        thread::scope(|scope| {
            // 片方だけが到着し、もう片方は中断を要求する
            let waiter = scope.spawn(|| barrier.wait(&abort));
            thread::sleep(std::time::Duration::from_millis(20));
            abort.abort(1, 7);

            match waiter.join().unwrap() {
                Err(ShmemError::Aborted { by_pe, code }) => {
                    assert_eq!((by_pe, code), (1, 7));
                }
                other => panic!("expected abort, got {:?}", other),
            }
        });

        // 最初の記録が残る
        abort.abort(0, 3);
        assert_eq!(abort.status(), Some((1, 7)));
    }
}
