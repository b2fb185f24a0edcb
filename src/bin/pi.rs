use anyhow::Result;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use shmem_jacobi::config::world_config_from_env;
use shmem_jacobi::logging::init_logging;
use shmem_jacobi::shmem::{ReduceOp, World};

const NUM: usize = 100_000;

/// モンテカルロ法で円周率を求め、和リダクションで集計する
#[derive(Parser)]
#[command(name = "pi")]
struct Cli {
    /// PE数
    #[arg(default_value_t = 4)]
    pes: usize,
    /// 乱数シード (PEごとに +me する)。省略時は毎回変わる
    #[arg(long)]
    seed: Option<u64>,
}

// 第1象限の単位円: y^2 <= 1 - x^2
fn circle(x: f64) -> f64 {
    1.0 - x.powi(2)
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let seed = cli.seed.unwrap_or_else(|| rand::thread_rng().gen());

    let world = World::new(world_config_from_env(cli.pes)?);
    world.run(|pe| {
        let me = pe.my_pe();
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(me as u64));

        let mut count: i64 = 0;
        for _ in 0..NUM {
            let x: f64 = rng.gen();
            let y: f64 = rng.gen();
            if y.powi(2) <= circle(x) {
                count += 1;
            }
        }
        println!("{}: count {}", me, count);

        let total = pe.reduce(ReduceOp::Sum, count)?;
        if me == 0 {
            let ratio = total as f64 / (NUM * pe.n_pes()) as f64;
            println!("{}: count total: {}", me, total);
            println!("{}: ratio: {:.6}", me, ratio);
            println!("{}: est of pi: {:.6}", me, ratio * 4.0);
        }
        Ok(())
    })?;
    Ok(())
}
