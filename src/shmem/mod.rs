//! プロセス内 PGAS 基盤
//!
//! 各PE (processing element) はスコープ付きスレッドとして起動され、
//! 対称ヒープ・片側 put・バリア・集団リダクション・アトミック・チームを
//! 共有メモリ上で提供する。
//!
//! ```no_run
//! use shmem_jacobi::shmem::{World, WorldConfig};
//!
//! let world = World::new(WorldConfig::new(4));
//! world.run(|pe| {
//!     println!("hello from pe {} of {}", pe.my_pe(), pe.n_pes());
//!     Ok(())
//! }).unwrap();
//! ```

mod atomic;
mod barrier;
mod heap;
mod reduce;
mod team;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

pub use atomic::SymmetricAtomic;
pub use barrier::Fence;
pub use heap::SymmetricBuf;
pub use reduce::{ReduceOp, Reducible};
pub use team::Team;

use barrier::{AbortSignal, PhaseBarrier};
use heap::Rendezvous;
use team::TeamInner;

use crate::error::ShmemError;

/// 既定の対称ヒープ容量 (PEあたり)
pub const DEFAULT_HEAP_SIZE: usize = 64 * 1024 * 1024;

/// ワールドの起動設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldConfig {
    pub n_pes: usize,
    /// PEあたりの対称ヒープ容量 (バイト)
    pub heap_size: usize,
}

impl WorldConfig {
    pub fn new(n_pes: usize) -> Self {
        WorldConfig {
            n_pes,
            heap_size: DEFAULT_HEAP_SIZE,
        }
    }

    pub fn with_heap_size(mut self, heap_size: usize) -> Self {
        self.heap_size = heap_size;
        self
    }
}

// 全PEで共有される状態
pub(crate) struct Shared {
    n_pes: usize,
    heap_size: usize,
    abort: AbortSignal,
    rendezvous: Rendezvous,
    world: Arc<TeamInner>,
    next_team_id: AtomicU64,
}

impl Shared {
    fn new(config: &WorldConfig) -> Self {
        let abort = AbortSignal::new();
        let world = Arc::new(TeamInner::new(0, (0..config.n_pes).collect()));
        abort.register(&world.barrier);
        Shared {
            n_pes: config.n_pes,
            heap_size: config.heap_size,
            abort,
            rendezvous: Rendezvous::new(),
            world,
            next_team_id: AtomicU64::new(1),
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// PE群の起動器 (shmem_init / shmem_finalize の対)
pub struct World {
    config: WorldConfig,
}

impl World {
    pub fn new(config: WorldConfig) -> Self {
        World { config }
    }

    pub fn n_pes(&self) -> usize {
        self.config.n_pes
    }

    /// 全PEで `f` を実行し、PE順に結果を返す
    ///
    /// どれかのPEがエラーを返すかパニックすると全体中断となり、
    /// 他のPEは次の集団操作で `ShmemError::Aborted` を受け取って巻き戻る。
    /// 戻り値は原因となったエラー (PE番号の小さい順に最初のもの)。
    pub fn run<F, R>(&self, f: F) -> Result<Vec<R>, ShmemError>
    where
        F: Fn(&Pe<'_>) -> Result<R, ShmemError> + Sync,
        R: Send,
    {
        if self.config.n_pes == 0 {
            return Err(ShmemError::InvalidTeam(
                "world must have at least one PE".to_string(),
            ));
        }

        let shared = Shared::new(&self.config);
        log::debug!(
            "shmem: starting {} PEs (heap {} bytes/PE)",
            self.config.n_pes,
            self.config.heap_size
        );

        let results: Vec<thread::Result<Result<R, ShmemError>>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..self.config.n_pes)
                .map(|me| {
                    let shared = &shared;
                    let f = &f;
                    scope.spawn(move || {
                        let _guard = AbortOnPanic { shared, me };
                        let pe = Pe::new(shared, me);
                        let result = f(&pe).and_then(|value| {
                            // finalize は暗黙のバリアを含む
                            pe.barrier_all()?;
                            Ok(value)
                        });
                        if let Err(err) = &result {
                            if !matches!(err, ShmemError::Aborted { .. }) {
                                shared.abort.abort(me, err.exit_code());
                            }
                        }
                        result
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join()).collect()
        });

        let mut values = Vec::with_capacity(results.len());
        let mut root_cause = None;
        for (pe, result) in results.into_iter().enumerate() {
            match result {
                Ok(Ok(value)) => values.push(value),
                Ok(Err(ShmemError::Aborted { .. })) => {}
                Ok(Err(err)) => {
                    if root_cause.is_none() {
                        root_cause = Some(err);
                    }
                }
                Err(_) => {
                    if root_cause.is_none() {
                        root_cause = Some(ShmemError::ParticipantPanicked { pe });
                    }
                }
            }
        }

        if let Some(err) = root_cause {
            log::debug!("shmem: world terminated: {}", err);
            return Err(err);
        }
        if let Some((pe, code)) = shared.abort.status() {
            return Err(ShmemError::GlobalExit { pe, code });
        }
        log::debug!("shmem: all {} PEs finalized", self.config.n_pes);
        Ok(values)
    }
}

// パニックしたPEが他のPEをバリアで永久に待たせないようにする
struct AbortOnPanic<'w> {
    shared: &'w Shared,
    me: usize,
}

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            log::error!("PE {}: panicked, aborting all PEs", self.me);
            self.shared.abort.abort(self.me, 101);
        }
    }
}

type PendingPut = Box<dyn FnOnce()>;

/// 1つのPEから見た基盤のハンドル
///
/// PEのスレッド内でのみ使う。バリアを跨いで対称バッファのガードを
/// 保持してはいけない (相手の put 適用がロック待ちになり、全体が止まる)。
pub struct Pe<'w> {
    shared: &'w Shared,
    me: usize,
    outbox: RefCell<Vec<PendingPut>>,
    alloc_seq: Cell<u64>,
    split_seq: RefCell<HashMap<u64, u64>>,
    live: RefCell<HashMap<u64, Range<usize>>>,
    heap_used: Cell<usize>,
}

impl<'w> Pe<'w> {
    fn new(shared: &'w Shared, me: usize) -> Self {
        Pe {
            shared,
            me,
            outbox: RefCell::new(Vec::new()),
            alloc_seq: Cell::new(0),
            split_seq: RefCell::new(HashMap::new()),
            live: RefCell::new(HashMap::new()),
            heap_used: Cell::new(0),
        }
    }

    pub fn my_pe(&self) -> usize {
        self.me
    }

    pub fn n_pes(&self) -> usize {
        self.shared.n_pes
    }

    /// 全PEのバリア
    ///
    /// 到着前に自分の未完了 put をすべて相手に適用するので、
    /// 返った時点で全PEのバリア以前の put が可視になっている。
    pub fn barrier_all(&self) -> Result<Fence, ShmemError> {
        self.sync(&self.shared.world.barrier)
    }

    /// 全体中断 (shmem_global_exit)。返り値をそのまま `Err` で返すこと
    pub fn global_exit(&self, code: i32) -> ShmemError {
        log::error!("PE {}: global exit with code {}", self.me, code);
        self.shared.abort.abort(self.me, code);
        ShmemError::GlobalExit { pe: self.me, code }
    }

    pub(crate) fn check_target(&self, target: usize) -> Result<(), ShmemError> {
        if target >= self.shared.n_pes {
            return Err(ShmemError::InvalidPe {
                pe: self.me,
                target,
                n_pes: self.shared.n_pes,
            });
        }
        Ok(())
    }

    fn quiet(&self) -> usize {
        let pending = std::mem::take(&mut *self.outbox.borrow_mut());
        let count = pending.len();
        for put in pending {
            put();
        }
        count
    }

    fn sync(&self, barrier: &PhaseBarrier) -> Result<Fence, ShmemError> {
        let completed_puts = self.quiet();
        let epoch = barrier.wait(&self.shared.abort)?;
        log::trace!(
            "PE {}: passed barrier epoch {} ({} puts completed)",
            self.me,
            epoch,
            completed_puts
        );
        Ok(Fence {
            epoch,
            completed_puts,
        })
    }
}
