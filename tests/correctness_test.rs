use approx::assert_relative_eq;

use shmem_jacobi::config::HeatConfig;
use shmem_jacobi::grid::{idx, partition_all, Partition};
use shmem_jacobi::implementations::shmem_heat::Stats;
use shmem_jacobi::implementations::{assemble, max_abs_diff, reference_solve, Grid, HeatSolver};
use shmem_jacobi::shmem::{World, WorldConfig};
use shmem_jacobi::ShmemError;

const TEST_STEPS: usize = 10;
const EPSILON: f64 = 1e-10;

fn small_config(nx: usize, ny: usize, steps: usize) -> HeatConfig {
    HeatConfig {
        nx,
        ny,
        max_iters: steps,
        ..HeatConfig::default()
    }
}

/// 分散版を走らせて全体グリッドを組み立てる
fn run_distributed(cfg: &HeatConfig, n_pes: usize) -> Vec<f64> {
    let world = World::new(WorldConfig::new(n_pes));
    let outcomes = world.run(|pe| HeatSolver::run(pe, cfg)).unwrap();
    assemble(&outcomes, cfg.nx, cfg.ny)
}

fn run_reference(cfg: &HeatConfig) -> Grid {
    let mut grid = Grid::new(cfg);
    reference_solve(&mut grid, cfg.alpha, cfg.max_iters);
    grid
}

/// グリッドの全要素が一致するかチェック
fn grids_are_equal(x: &[f64], y: &[f64]) -> bool {
    if x.len() != y.len() {
        return false;
    }
    let diff = max_abs_diff(x, y);
    if diff > EPSILON {
        eprintln!("max diff {}", diff);
        return false;
    }
    true
}

#[test]
fn test_reference_vs_shmem() {
    let cfg = small_config(16, 12, TEST_STEPS);
    let reference = run_reference(&cfg);

    for n_pes in [1, 2, 3, 5] {
        let distributed = run_distributed(&cfg, n_pes);
        assert!(
            grids_are_equal(&reference.data, &distributed),
            "shmem result with {} PEs differs from reference",
            n_pes
        );
    }
    println!("✓ Reference vs shmem: Results match!");
}

#[test]
fn test_more_pes_than_rows() {
    // 6 PE に 4 行: 後ろの2 PEは0行
    let cfg = small_config(5, 4, 3);
    let reference = run_reference(&cfg);
    let distributed = run_distributed(&cfg, 6);
    assert!(grids_are_equal(&reference.data, &distributed));
}

#[test]
fn test_alpha_zero_leaves_grid_unchanged() {
    let cfg = HeatConfig {
        alpha: 0.0,
        ..small_config(8, 8, 2)
    };
    let initial = Grid::new(&cfg);
    let distributed = run_distributed(&cfg, 3);
    assert_eq!(initial.data, distributed);
}

#[test]
fn test_single_row_grid_keeps_cold_edge() {
    // 1行だけなら上端と下端が重なり、cold が残る
    let cfg = small_config(5, 1, 3);
    let reference = run_reference(&cfg);
    assert!(reference.data.iter().all(|&v| v == cfg.cold));

    for n_pes in [1, 2] {
        assert_eq!(run_distributed(&cfg, n_pes), reference.data);
    }
}

#[test]
fn test_maximum_principle() {
    let cfg = HeatConfig {
        alpha: 0.25,
        ..small_config(12, 12, 50)
    };
    let distributed = run_distributed(&cfg, 4);
    assert!(distributed.iter().all(|&v| (0.0..=100.0).contains(&v)));

    // 固定端の行は最後まで変わらない
    assert!(distributed[0..12].iter().all(|&v| v == 100.0));
    assert!(distributed[11 * 12..].iter().all(|&v| v == 0.0));
}

#[test]
fn test_report_statistics() {
    let cfg = small_config(6, 7, 4);
    let reference = run_reference(&cfg);

    let world = World::new(WorldConfig::new(3));
    let outcomes = world.run(|pe| HeatSolver::run(pe, &cfg)).unwrap();

    // レポートは PE 0 だけが持つ
    assert!(outcomes[0].report.is_some());
    assert!(outcomes[1..].iter().all(|o| o.report.is_none()));

    let report = outcomes[0].report.as_ref().unwrap();
    let min = reference.data.iter().copied().fold(f64::MAX, f64::min);
    let max = reference.data.iter().copied().fold(f64::MIN, f64::max);
    let avg = reference.data.iter().sum::<f64>() / (cfg.nx * cfg.ny) as f64;
    assert_eq!((report.nx, report.ny, report.n_pes, report.iterations), (6, 7, 3, 4));
    assert_relative_eq!(report.min, min, epsilon = 1e-12);
    assert_relative_eq!(report.max, max, epsilon = 1e-12);
    assert_relative_eq!(report.avg, avg, epsilon = 1e-12);
}

#[test]
fn test_global_reduction_on_synthetic_grid() {
    let nx = 5;
    let ny = 9;
    let n_pes = 4;
    // 値 = 大域インデックス - 20 (負の値も含む)
    let value = |i: usize, j: usize| idx(i, j, nx) as f64 - 20.0;

    let world = World::new(WorldConfig::new(n_pes));
    let results = world
        .run(|pe| {
            let part = Partition::new(ny, n_pes, pe.my_pe());
            let mut local = vec![f64::NAN; part.alloc_rows() * nx];
            for i in 0..part.local_rows {
                for j in 0..nx {
                    local[idx(i + 1, j, nx)] = value(part.start_row + i, j);
                }
            }
            Stats::from_rows(&local, &part, nx).reduce(pe)
        })
        .unwrap();

    let all: Vec<f64> = (0..ny).flat_map(|i| (0..nx).map(move |j| value(i, j))).collect();
    for stats in results {
        assert_eq!(stats.min, -20.0);
        assert_eq!(stats.max, (nx * ny) as f64 - 21.0);
        assert_relative_eq!(stats.sum, all.iter().sum::<f64>(), epsilon = 1e-9);
    }
}

#[test]
fn test_four_by_four_two_pes_one_step() {
    let cfg = small_config(4, 4, 1);
    let alpha = cfg.alpha;

    let world = World::new(WorldConfig::new(2));
    let results = world
        .run(|pe| {
            let mut solver = HeatSolver::new(pe, &cfg)?;
            let before = solver.block(pe);

            solver.exchange(pe)?;
            pe.barrier_all()?;
            // 更新前のゴースト行
            let ghosts = solver.ghost_rows(pe);
            solver.update(pe);
            pe.barrier_all()?;
            // update は next 面に書く。current はまだ更新前
            assert_eq!(solver.block(pe), before);

            let fence = pe.barrier_all()?;
            assert_eq!(fence.completed_puts, 0);
            solver.finish(pe)?;
            Ok((before, ghosts))
        })
        .unwrap();

    let (top_before, (_, top_tail_ghost)) = &results[0];
    let (bottom_before, (bottom_head_ghost, _)) = &results[1];

    // PE0 は行0,1、PE1 は行2,3
    assert_eq!(top_tail_ghost, &bottom_before[0..4].to_vec());
    assert_eq!(bottom_head_ghost, &top_before[4..8].to_vec());
    assert_eq!(top_before[0..4], [100.0; 4]);
    assert_eq!(bottom_before[4..8], [0.0; 4]);

    // 1ステップ後の値を式から確認
    let distributed = run_distributed(&cfg, 2);
    let initial = Grid::new(&cfg);
    for i in 0..4 {
        for j in 0..4 {
            let c = idx(i, j, 4);
            let expected = if i == 0 || i == 3 || j == 0 || j == 3 {
                initial.data[c]
            } else {
                let u = &initial.data;
                u[c] + alpha * (u[c - 4] + u[c + 4] + u[c - 1] + u[c + 1] - 4.0 * u[c])
            };
            assert_relative_eq!(distributed[c], expected, epsilon = 1e-12);
        }
    }
    // 行1: 上が100 -> 25 + 0.1 * 75 = 32.5, 行2: 下が0 -> 25 - 0.1 * 25 = 22.5
    assert_relative_eq!(distributed[idx(1, 1, 4)], 32.5, epsilon = 1e-12);
    assert_relative_eq!(distributed[idx(2, 2, 4)], 22.5, epsilon = 1e-12);
}

#[test]
fn test_single_pe_sends_nothing() {
    let cfg = small_config(6, 6, 3);

    let world = World::new(WorldConfig::new(1));
    let puts = world
        .run(|pe| {
            let mut solver = HeatSolver::new(pe, &cfg)?;
            let mut puts = 0;
            for _ in 0..cfg.max_iters {
                puts += solver.step(pe)?.completed_puts;
            }
            solver.finish(pe)?;
            Ok(puts)
        })
        .unwrap();
    assert_eq!(puts, vec![0]);

    let reference = run_reference(&cfg);
    assert!(grids_are_equal(&reference.data, &run_distributed(&cfg, 1)));
}

#[test]
fn test_interior_pes_send_two_rows_per_step() {
    let cfg = small_config(4, 9, 2);
    let world = World::new(WorldConfig::new(3));
    let puts = world
        .run(|pe| {
            let mut solver = HeatSolver::new(pe, &cfg)?;
            let fence = solver.step(pe)?;
            solver.finish(pe)?;
            Ok(fence.completed_puts)
        })
        .unwrap();
    assert_eq!(puts, vec![1, 2, 1]);
}

#[test]
fn test_allocation_failure_aborts_all_pes() {
    let cfg = small_config(64, 64, 5);
    // 1面分も入らない容量
    let world = World::new(WorldConfig::new(3).with_heap_size(1024));
    let err = world.run(|pe| HeatSolver::run(pe, &cfg)).unwrap_err();

    match &err {
        ShmemError::GlobalExit { code, .. } => assert_eq!(*code, 1),
        other => panic!("expected global exit, got {:?}", other),
    }
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn test_partition_layout_is_contiguous() {
    let parts = partition_all(256, 7);
    assert_eq!(parts.iter().map(|p| p.local_rows).sum::<usize>(), 256);
    for pair in parts.windows(2) {
        assert_eq!(pair[0].end_row(), pair[1].start_row);
    }
}
