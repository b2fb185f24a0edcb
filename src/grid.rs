pub const NX: usize = 256; // x方向セル数 (列)
pub const NY: usize = 256; // y方向セル数 (行)
pub const MAX_ITERS: usize = 500; // ステップ数
pub const ALPHA: f64 = 0.1; // 拡散係数 (0.25以下で安定)

pub const HOT: f64 = 100.0; // 上端の固定温度
pub const COLD: f64 = 0.0; // 下端の固定温度
pub const INITIAL: f64 = 25.0; // 内部の初期温度

/// 行優先の2次元インデックス
#[inline]
pub fn idx(i: usize, j: usize, nx: usize) -> usize {
    i * nx + j
}

/*
  行ブロック分割

  base = NY / P, extra = NY % P
  先頭の extra 個のPEが1行多く持つ。
  P > NY の場合は後ろのPEが0行になる (ループが空になるだけで落ちない)。
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub me: usize,
    pub n_pes: usize,
    pub global_rows: usize,
    pub start_row: usize,
    pub local_rows: usize,
}

impl Partition {
    pub fn new(global_rows: usize, n_pes: usize, me: usize) -> Self {
        let base = global_rows / n_pes;
        let extra = global_rows % n_pes;
        let local_rows = base + usize::from(me < extra);
        let start_row = me * base + me.min(extra);
        Partition {
            me,
            n_pes,
            global_rows,
            start_row,
            local_rows,
        }
    }

    pub fn end_row(&self) -> usize {
        self.start_row + self.local_rows
    }

    pub fn is_empty(&self) -> bool {
        self.local_rows == 0
    }

    /// ゴースト行2本を含む、このPEが実際に使う行数
    pub fn alloc_rows(&self) -> usize {
        self.local_rows + 2
    }

    /// 全PEで共通の確保行数 (対称ヒープはサイズが揃っている必要がある)
    pub fn symmetric_rows(&self) -> usize {
        self.global_rows / self.n_pes + usize::from(self.global_rows % self.n_pes > 0) + 2
    }

    /// 1面分の要素数 (symmetric_rows * nx)。usize に収まらなければ `None`
    pub fn symmetric_len(&self, nx: usize) -> Option<usize> {
        (self.global_rows / self.n_pes + usize::from(self.global_rows % self.n_pes > 0))
            .checked_add(2)?
            .checked_mul(nx)
    }

    // 上端 (大域0行目) を持つか
    pub fn owns_top_edge(&self) -> bool {
        !self.is_empty() && self.start_row == 0
    }

    // 下端 (大域 NY-1 行目) を持つか
    pub fn owns_bottom_edge(&self) -> bool {
        !self.is_empty() && self.end_row() == self.global_rows
    }

    /// 上隣 (me-1) のPE。0行のPEは誰とも交換しない
    pub fn upper_neighbor(&self) -> Option<Partition> {
        if self.is_empty() || self.me == 0 {
            return None;
        }
        Some(Partition::new(self.global_rows, self.n_pes, self.me - 1))
    }

    /// 下隣 (me+1) のPE。0行のPEは末尾にしか現れないので、隣が空なら None
    pub fn lower_neighbor(&self) -> Option<Partition> {
        if self.is_empty() || self.me + 1 >= self.n_pes {
            return None;
        }
        let next = Partition::new(self.global_rows, self.n_pes, self.me + 1);
        (!next.is_empty()).then_some(next)
    }
}

/// 全PE分の分割
pub fn partition_all(global_rows: usize, n_pes: usize) -> Vec<Partition> {
    (0..n_pes)
        .map(|me| Partition::new(global_rows, n_pes, me))
        .collect()
}
