use anyhow::Result;
use clap::Parser;

use shmem_jacobi::config::world_config_from_env;
use shmem_jacobi::logging::init_logging;
use shmem_jacobi::shmem::World;

/// 各PEが自分の番号と総数を表示する
#[derive(Parser)]
#[command(name = "hello")]
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
        println!("hello from pe {} of {}", pe.my_pe(), pe.n_pes());
        Ok(())
    })?;
    Ok(())
}
