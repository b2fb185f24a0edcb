use anyhow::Result;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use shmem_jacobi::config::world_config_from_env;
use shmem_jacobi::logging::init_logging;
use shmem_jacobi::shmem::World;

const ROUNDS: usize = 100;

/// PE 0 上の対称カウンタを全PEがアトミックに増やす
///
/// PE `me` は各ラウンドで確率 1/(me+1) でカウンタを 1 増やす。
#[derive(Parser)]
#[command(name = "distributed_counter")]
struct Cli {
    /// PE数
    #[arg(default_value_t = 4)]
    pes: usize,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let world = World::new(world_config_from_env(cli.pes)?);
    world.run(|pe| {
        let me = pe.my_pe();
        let mut rng = StdRng::seed_from_u64(me as u64);
        let counter = pe.atomic_alloc()?;

        for _ in 0..ROUNDS {
            if rng.gen_range(0..=me) == 0 {
                pe.atomic_inc(&counter, 0)?;
            }
        }

        // 全員の加算が終わってから読む
        pe.barrier_all()?;
        if me == 0 {
            println!("counter is now {}", pe.atomic_fetch(&counter, 0)?);
        }
        pe.atomic_free(counter)
    })?;
    Ok(())
}
