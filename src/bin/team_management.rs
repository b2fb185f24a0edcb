use anyhow::Result;
use clap::Parser;

use shmem_jacobi::config::world_config_from_env;
use shmem_jacobi::logging::init_logging;
use shmem_jacobi::shmem::{ReduceOp, World};
use shmem_jacobi::ShmemError;

/// 偶数番号のPEだけでチームを作り、チーム内で挨拶とリダクションをする
#[derive(Parser)]
#[command(name = "team_management")]
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
        let parent = pe.world_team();

        // 0, 2, 4, ... の n_pes/2 個
        let team = match pe.team_split_strided(&parent, 0, 2, pe.n_pes() / 2) {
            Ok(team) => team,
            Err(ShmemError::InvalidTeam(reason)) => {
                if me == 0 {
                    log::warn!("no team created: {}", reason);
                }
                None
            }
            Err(err) => return Err(err),
        };

        if let Some(team) = team {
            println!(
                "hello from {} of team, my world ID is {}!",
                team.my_pe(),
                me
            );
            let id_sum = pe.team_reduce(&team, ReduceOp::Sum, me as u64)?;
            if team.my_pe() == 0 {
                println!("team of {} PEs, sum of world IDs = {}", team.n_pes(), id_sum);
            }
        }
        Ok(())
    })?;
    Ok(())
}
