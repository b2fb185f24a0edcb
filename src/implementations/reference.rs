use rayon::prelude::*;

use crate::config::HeatConfig;
use crate::grid::idx;

/// 単一プロセスで持つ全体グリッド (検証用)
#[derive(Clone, Debug)]
pub struct Grid {
    pub nx: usize,
    pub ny: usize,
    pub data: Vec<f64>,
}

impl Grid {
    /// 初期条件: 全体を initial、上端を hot、下端を cold にする
    ///
    /// 1行しかない場合は上端と下端が同じ行になり、cold が優先される。
    pub fn new(cfg: &HeatConfig) -> Self {
        let mut grid = Grid {
            nx: cfg.nx,
            ny: cfg.ny,
            data: vec![cfg.initial; cfg.nx * cfg.ny],
        };
        if cfg.ny > 0 {
            grid.row_mut(0).fill(cfg.hot);
            grid.row_mut(cfg.ny - 1).fill(cfg.cold);
        }
        grid
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.nx..(i + 1) * self.nx]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.data[i * self.nx..(i + 1) * self.nx]
    }

    pub fn at(&self, i: usize, j: usize) -> f64 {
        self.data[idx(i, j, self.nx)]
    }
}

/*
  行単位で rayon 並列化した Jacobi 法

  書き込み先を行ごとに分割するのでロック不要。
  上端・下端の行と左右の列は固定値としてそのまま引き継ぐ
  (分散版と同じ境界の扱い)。
*/
pub fn reference_solve(a: &mut Grid, alpha: f64, steps: usize) {
    let nx = a.nx;
    let ny = a.ny;
    if ny == 0 || nx == 0 {
        return;
    }

    let mut b = a.clone();
    let mut src = &mut a.data[..];
    let mut dst = &mut b.data[..];

    for _step in 0..steps {
        // 上端・下端の行は変化しない
        dst[0..nx].copy_from_slice(&src[0..nx]);
        dst[(ny - 1) * nx..ny * nx].copy_from_slice(&src[(ny - 1) * nx..ny * nx]);

        if ny > 2 {
            let src_ref = &*src;
            let interior_dst = &mut dst[nx..(ny - 1) * nx];

            interior_dst
                .par_chunks_mut(nx)
                .enumerate()
                .for_each(|(r, dst_row)| {
                    // 実際のgrid上の行は r + 1
                    let i = r + 1;

                    for j in 1..nx.saturating_sub(1) {
                        let c = idx(i, j, nx);
                        let laplacian = src_ref[c - nx] + src_ref[c + nx] + src_ref[c - 1] + src_ref[c + 1]
                            - 4.0 * src_ref[c];
                        dst_row[j] = src_ref[c] + alpha * laplacian;
                    }

                    dst_row[0] = src_ref[i * nx];
                    dst_row[nx - 1] = src_ref[i * nx + nx - 1];
                });
        }

        std::mem::swap(&mut src, &mut dst);
    }

    if steps % 2 != 0 {
        a.data.copy_from_slice(&b.data);
    }
}

/// 2つのグリッドの最大絶対差
pub fn max_abs_diff(x: &[f64], y: &[f64]) -> f64 {
    x.iter()
        .zip(y)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn small() -> HeatConfig {
        HeatConfig {
            nx: 6,
            ny: 5,
            ..HeatConfig::default()
        }
    }

    #[test]
    fn test_initial_conditions() {
        let grid = Grid::new(&small());
        assert!(grid.row(0).iter().all(|&v| v == 100.0));
        assert!(grid.row(4).iter().all(|&v| v == 0.0));
        assert!(grid.row(2).iter().all(|&v| v == 25.0));
    }

    #[test]
    fn test_one_step_matches_formula() {
        let cfg = small();
        let before = Grid::new(&cfg);
        let mut after = before.clone();
        reference_solve(&mut after, 0.1, 1);

        // 1行目は上端(100)に接している
        let expected = 25.0 + 0.1 * (100.0 + 25.0 + 25.0 + 25.0 - 4.0 * 25.0);
        assert_relative_eq!(after.at(1, 2), expected, epsilon = 1e-12);
        // 左右の列はそのまま
        assert_eq!(after.at(2, 0), 25.0);
        assert_eq!(after.at(2, 5), 25.0);
        // 中央の行は周囲が全部25なので変化しない
        assert_relative_eq!(after.at(2, 2), 25.0, epsilon = 1e-12);
    }

    #[test]
    fn test_edges_fixed() {
        let cfg = small();
        let mut grid = Grid::new(&cfg);
        reference_solve(&mut grid, 0.25, 7);
        assert!(grid.row(0).iter().all(|&v| v == 100.0));
        assert!(grid.row(4).iter().all(|&v| v == 0.0));
    }
}
