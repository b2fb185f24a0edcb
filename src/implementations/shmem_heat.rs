use std::fmt;
use std::time::{Duration, Instant};

use crate::config::HeatConfig;
use crate::error::ShmemError;
use crate::grid::{idx, Partition};
use crate::shmem::{Fence, Pe, ReduceOp, SymmetricBuf};

/*
  対称メモリ版 Jacobi 法 (1 PE 分)

  各PEは自分の行ブロック + ゴースト行2本を2面 (current / next) 持つ。
  1ステップの流れ：
  - 自分の先頭行を上隣の末尾ゴースト行へ、末尾行を下隣の先頭ゴースト行へ put
  - バリア1 (put がここで相手に見えるようになる)
  - current を読んで next に書く
  - バリア2 (全員が読み終わるまで次の put をさせない)
  - current / next の役割を入れ替える (データはコピーしない)

  境界の扱い：
  左右の列と上端・下端の固定行は毎ステップ current から next へそのまま写す。
*/

/// 1 PE の状態遷移
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Exchange,
    Sync1,
    Update,
    Sync2,
    Drain,
    Reduce,
    Report,
    Terminate,
}

/// 2面バッファ。役割フラグで current / next を指す
pub struct DoubleBuffer {
    arenas: [SymmetricBuf<f64>; 2],
    current: usize,
}

impl DoubleBuffer {
    pub fn new(a: SymmetricBuf<f64>, b: SymmetricBuf<f64>) -> Self {
        DoubleBuffer {
            arenas: [a, b],
            current: 0,
        }
    }

    pub fn current(&self) -> &SymmetricBuf<f64> {
        &self.arenas[self.current]
    }

    pub fn next(&self) -> &SymmetricBuf<f64> {
        &self.arenas[self.current ^ 1]
    }

    pub fn swap(&mut self) {
        self.current ^= 1;
    }

    pub fn into_arenas(self) -> [SymmetricBuf<f64>; 2] {
        self.arenas
    }
}

/// 局所の min / max / sum
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub sum: f64,
}

impl Stats {
    pub const EMPTY: Stats = Stats {
        min: f64::MAX,
        max: f64::MIN,
        sum: 0.0,
    };

    /// ゴースト行を除いた行 1..=local_rows を集計する
    pub fn from_rows(data: &[f64], part: &Partition, nx: usize) -> Self {
        data[nx..(part.local_rows + 1) * nx]
            .iter()
            .fold(Stats::EMPTY, |acc, &v| Stats {
                min: acc.min.min(v),
                max: acc.max.max(v),
                sum: acc.sum + v,
            })
    }

    /// 全PEで集約する。全PEが呼ぶこと
    pub fn reduce(self, pe: &Pe<'_>) -> Result<Stats, ShmemError> {
        Ok(Stats {
            min: pe.reduce(ReduceOp::Min, self.min)?,
            max: pe.reduce(ReduceOp::Max, self.max)?,
            sum: pe.reduce(ReduceOp::Sum, self.sum)?,
        })
    }
}

/// PE 0 が出力する結果
#[derive(Debug, Clone, PartialEq)]
pub struct HeatReport {
    pub nx: usize,
    pub ny: usize,
    pub n_pes: usize,
    pub iterations: usize,
    pub elapsed: Duration,
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

impl fmt::Display for HeatReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.elapsed.as_secs_f64();
        let per_iter_ms = if self.iterations == 0 {
            0.0
        } else {
            1e3 * total / self.iterations as f64
        };
        writeln!(f, "--- Heat-2D SHMEM Report ---")?;
        writeln!(f, "Grid            : {}x{}", self.ny, self.nx)?;
        writeln!(f, "PEs             : {}", self.n_pes)?;
        writeln!(f, "Iterations      : {}", self.iterations)?;
        writeln!(f, "Total time (s)  : {:.4}", total)?;
        writeln!(f, "Time/iter (ms)  : {:.3}", per_iter_ms)?;
        write!(
            f,
            "Final Tmin/Tavg/Tmax : {:.2} / {:.2} / {:.2} °C",
            self.min, self.avg, self.max
        )
    }
}

/// 各PEの最終状態
#[derive(Debug, Clone)]
pub struct HeatOutcome {
    pub partition: Partition,
    /// ゴースト行を除いた自分の行ブロック (local_rows * nx)
    pub block: Vec<f64>,
    pub report: Option<HeatReport>,
}

/// Jacobi 更新 (1 PE 分)
///
/// `src` / `dst` はゴースト行込みのバッファ。更新するのは行 1..=local_rows のみ。
pub fn jacobi_update(src: &[f64], dst: &mut [f64], part: &Partition, nx: usize, alpha: f64) {
    for i in 1..=part.local_rows {
        let row = i * nx..(i + 1) * nx;

        // 固定端の行は触らない
        let fixed = (i == 1 && part.owns_top_edge()) || (i == part.local_rows && part.owns_bottom_edge());
        if fixed {
            dst[row.clone()].copy_from_slice(&src[row]);
            continue;
        }

        for j in 1..nx.saturating_sub(1) {
            let c = idx(i, j, nx);
            let laplacian = src[c - nx] + src[c + nx] + src[c - 1] + src[c + 1] - 4.0 * src[c];
            dst[c] = src[c] + alpha * laplacian;
        }

        // 左右の列はそのまま引き継ぐ
        dst[i * nx] = src[i * nx];
        dst[i * nx + nx - 1] = src[i * nx + nx - 1];
    }
}

pub struct HeatSolver {
    cfg: HeatConfig,
    part: Partition,
    buffers: DoubleBuffer,
    phase: Phase,
}

impl HeatSolver {
    /// 対称バッファを2面確保して初期条件を書く (集団操作)
    ///
    /// 確保に失敗したら全体中断する。1 PE だけ抜けると他のPEが
    /// 次のバリアで止まってしまうため。
    pub fn new(pe: &Pe<'_>, cfg: &HeatConfig) -> Result<Self, ShmemError> {
        let part = Partition::new(cfg.ny, pe.n_pes(), pe.my_pe());
        let alloc = || -> Result<DoubleBuffer, ShmemError> {
            let len = part
                .symmetric_len(cfg.nx)
                .ok_or_else(|| pe.oversized_request())?;
            let u = pe.malloc::<f64>(len)?;
            let un = pe.malloc::<f64>(len)?;
            Ok(DoubleBuffer::new(u, un))
        };
        let buffers = match alloc() {
            Ok(buffers) => buffers,
            Err(err @ ShmemError::AllocationFailed { .. }) => {
                log::error!("PE {}: shmem_malloc failed: {}", pe.my_pe(), err);
                return Err(pe.global_exit(1));
            }
            Err(err) => return Err(err),
        };

        let mut solver = HeatSolver {
            cfg: *cfg,
            part,
            buffers,
            phase: Phase::Init,
        };
        solver.initialize(pe);
        log::debug!(
            "PE {}: rows {}..{} ({} local)",
            pe.my_pe(),
            part.start_row,
            part.end_row(),
            part.local_rows
        );
        Ok(solver)
    }

    // 両面を同じ初期条件にする (ゴースト行も含めて initial)
    fn initialize(&mut self, pe: &Pe<'_>) {
        let nx = self.cfg.nx;
        let local_rows = self.part.local_rows;
        for buf in [self.buffers.current(), self.buffers.next()] {
            let mut data = buf.write(pe);
            data.fill(self.cfg.initial);
            if self.part.owns_top_edge() {
                data[nx..2 * nx].fill(self.cfg.hot);
            }
            if self.part.owns_bottom_edge() {
                data[local_rows * nx..(local_rows + 1) * nx].fill(self.cfg.cold);
            }
        }
    }

    pub fn partition(&self) -> &Partition {
        &self.part
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, pe: &Pe<'_>, phase: Phase) {
        log::trace!("PE {}: {:?} -> {:?}", pe.my_pe(), self.phase, phase);
        self.phase = phase;
    }

    /// ゴースト行を隣へ送る。put の完了は次のバリアまで保証されない
    pub fn exchange(&mut self, pe: &Pe<'_>) -> Result<(), ShmemError> {
        self.enter(pe, Phase::Exchange);
        let nx = self.cfg.nx;
        let local_rows = self.part.local_rows;
        let cur = self.buffers.current();

        if let Some(upper) = self.part.upper_neighbor() {
            let first = cur.read(pe)[nx..2 * nx].to_vec();
            // 上隣の末尾ゴースト行 (local_rows + 1)
            pe.put(cur, idx(upper.local_rows + 1, 0, nx), &first, upper.me)?;
        }
        if let Some(lower) = self.part.lower_neighbor() {
            let last = cur.read(pe)[local_rows * nx..(local_rows + 1) * nx].to_vec();
            // 下隣の先頭ゴースト行 (0)
            pe.put(cur, 0, &last, lower.me)?;
        }
        Ok(())
    }

    /// current -> next の更新。ゴースト行はバリア1の後でしか読まない
    pub fn update(&mut self, pe: &Pe<'_>) {
        self.enter(pe, Phase::Update);
        let src = self.buffers.current().read(pe);
        let mut dst = self.buffers.next().write(pe);
        jacobi_update(&src, &mut dst, &self.part, self.cfg.nx, self.cfg.alpha);
    }

    /// 1ステップ: EXCHANGE -> SYNC1 -> UPDATE -> SYNC2 -> swap
    pub fn step(&mut self, pe: &Pe<'_>) -> Result<Fence, ShmemError> {
        self.exchange(pe)?;
        self.enter(pe, Phase::Sync1);
        let fence = pe.barrier_all()?;
        self.update(pe);
        self.enter(pe, Phase::Sync2);
        pe.barrier_all()?;
        self.buffers.swap();
        Ok(fence)
    }

    /// current 面のゴースト行 (先頭, 末尾)
    pub fn ghost_rows(&self, pe: &Pe<'_>) -> (Vec<f64>, Vec<f64>) {
        let nx = self.cfg.nx;
        let data = self.buffers.current().read(pe);
        let tail = self.part.local_rows + 1;
        (
            data[0..nx].to_vec(),
            data[tail * nx..(tail + 1) * nx].to_vec(),
        )
    }

    /// current 面の自分の行ブロック (ゴースト行なし)
    pub fn block(&self, pe: &Pe<'_>) -> Vec<f64> {
        let nx = self.cfg.nx;
        let data = self.buffers.current().read(pe);
        data[nx..(self.part.local_rows + 1) * nx].to_vec()
    }

    pub fn local_stats(&self, pe: &Pe<'_>) -> Stats {
        let data = self.buffers.current().read(pe);
        Stats::from_rows(&data, &self.part, self.cfg.nx)
    }

    /// 対称バッファを解放する (集団操作)
    pub fn finish(mut self, pe: &Pe<'_>) -> Result<(), ShmemError> {
        self.enter(pe, Phase::Terminate);
        let [u, un] = self.buffers.into_arenas();
        pe.free(u)?;
        pe.free(un)
    }

    /// 全体の実行: 初期化から PE 0 の集計まで
    pub fn run(pe: &Pe<'_>, cfg: &HeatConfig) -> Result<HeatOutcome, ShmemError> {
        let mut solver = HeatSolver::new(pe, cfg)?;

        pe.barrier_all()?;
        let t0 = Instant::now();

        for iter in 0..cfg.max_iters {
            solver.step(pe)?;
            if pe.my_pe() == 0 && iter % 100 == 0 {
                log::trace!("iteration {}/{}", iter, cfg.max_iters);
            }
        }

        solver.drain(pe)?;
        let elapsed = t0.elapsed();
        let report = solver.report(pe, elapsed)?;

        let outcome = HeatOutcome {
            partition: *solver.partition(),
            block: solver.block(pe),
            report,
        };
        solver.finish(pe)?;
        Ok(outcome)
    }

    /// 最後のバリア。これ以降 put は飛ばない
    pub fn drain(&mut self, pe: &Pe<'_>) -> Result<Fence, ShmemError> {
        self.enter(pe, Phase::Drain);
        pe.barrier_all()
    }

    /// 全体集計 (集団操作)。レポートを作るのは PE 0 だけ
    pub fn report(&mut self, pe: &Pe<'_>, elapsed: Duration) -> Result<Option<HeatReport>, ShmemError> {
        self.enter(pe, Phase::Reduce);
        let global = self.local_stats(pe).reduce(pe)?;
        if pe.my_pe() != 0 {
            return Ok(None);
        }

        self.enter(pe, Phase::Report);
        let cfg = &self.cfg;
        Ok(Some(HeatReport {
            nx: cfg.nx,
            ny: cfg.ny,
            n_pes: pe.n_pes(),
            iterations: cfg.max_iters,
            elapsed,
            min: global.min,
            avg: global.sum / (cfg.nx * cfg.ny) as f64,
            max: global.max,
        }))
    }
}

/// 各PEの行ブロックを1枚のグリッドに並べる
pub fn assemble(outcomes: &[HeatOutcome], nx: usize, ny: usize) -> Vec<f64> {
    let mut data = vec![0.0; nx * ny];
    for outcome in outcomes {
        let part = &outcome.partition;
        data[part.start_row * nx..part.end_row() * nx].copy_from_slice(&outcome.block);
    }
    data
}
