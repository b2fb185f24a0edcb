use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use shmem_jacobi::config::{parse_size, RunConfig};
use shmem_jacobi::implementations::{assemble, max_abs_diff, reference_solve, Grid, HeatSolver};
use shmem_jacobi::logging::init_from_verbosity;
use shmem_jacobi::shmem::World;
use shmem_jacobi::{ConfigError, ShmemError};

const VERIFY_TOLERANCE: f64 = 1e-9;

/// 対称メモリ上の2次元熱拡散 (Jacobi 法)
///
/// 引数なしなら 256x256, 500ステップ, alpha=0.1, 4 PE で実行する。
#[derive(Parser)]
#[command(name = "heat2d")]
#[command(version)]
struct Cli {
    /// PE数 (oshrun -n に相当)
    pes: Option<usize>,
    /// TOML 設定ファイル
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// 列数
    #[arg(long)]
    nx: Option<usize>,
    /// 行数
    #[arg(long)]
    ny: Option<usize>,
    /// ステップ数
    #[arg(long)]
    iters: Option<usize>,
    /// 拡散係数 (0 以上 0.25 以下)
    #[arg(long)]
    alpha: Option<f64>,
    /// PEあたりの対称ヒープ容量 (例: 64M)。SHMEM_SYMMETRIC_SIZE より優先
    #[arg(long, value_parser = parse_heap_size)]
    heap_size: Option<usize>,
    /// 単一プロセスの参照解と比較する
    #[arg(long)]
    verify: bool,
    /// ログを詳しくする (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_heap_size(value: &str) -> Result<usize, String> {
    parse_size(value).map_err(|e| e.to_string())
}

fn main() {
    let cli = Cli::parse();
    init_from_verbosity(cli.verbose);

    if let Err(err) = run(&cli) {
        eprintln!("エラー: {:#}", err);
        std::process::exit(exit_code(&err));
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<ShmemError>() {
        e.exit_code()
    } else if let Some(e) = err.downcast_ref::<ConfigError>() {
        e.exit_code()
    } else {
        1
    }
}

fn load_config(cli: &Cli) -> Result<RunConfig> {
    let mut cfg = match &cli.config {
        Some(path) => RunConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => RunConfig::default(),
    };

    if let Some(pes) = cli.pes {
        cfg.pes = pes;
    }
    if let Some(nx) = cli.nx {
        cfg.heat.nx = nx;
    }
    if let Some(ny) = cli.ny {
        cfg.heat.ny = ny;
    }
    if let Some(iters) = cli.iters {
        cfg.heat.max_iters = iters;
    }
    if let Some(alpha) = cli.alpha {
        cfg.heat.alpha = alpha;
    }

    cfg.validate()?;
    Ok(cfg)
}

fn run(cli: &Cli) -> Result<()> {
    let cfg = load_config(cli)?;
    let mut world_cfg = cfg.world_config()?;
    if let Some(size) = cli.heap_size {
        world_cfg = world_cfg.with_heap_size(size);
    }
    let heat = cfg.heat;

    log::info!(
        "grid {}x{}, {} iterations, alpha {}, {} PEs",
        heat.ny,
        heat.nx,
        heat.max_iters,
        heat.alpha,
        world_cfg.n_pes
    );
    match heat.heap_bytes_per_pe(world_cfg.n_pes) {
        Some(needed) => log::debug!(
            "symmetric heap: {} bytes/PE needed, {} available",
            needed,
            world_cfg.heap_size
        ),
        None => log::warn!("grid {}x{} does not fit in the address space", heat.ny, heat.nx),
    }

    let world = World::new(world_cfg);
    let outcomes = world
        .run(|pe| {
            let outcome = HeatSolver::run(pe, &heat)?;
            // 出力は PE 0 だけ
            if let Some(report) = &outcome.report {
                println!("{}", report);
            }
            Ok(outcome)
        })
        .context("heat2d run failed")?;

    if cli.verify {
        let distributed = assemble(&outcomes, heat.nx, heat.ny);
        let mut reference = Grid::new(&heat);
        reference_solve(&mut reference, heat.alpha, heat.max_iters);

        let diff = max_abs_diff(&distributed, &reference.data);
        println!("Verify: max |shmem - reference| = {:.3e}", diff);
        if diff > VERIFY_TOLERANCE {
            bail!("distributed result deviates from reference by {:.3e}", diff);
        }
    }

    Ok(())
}
