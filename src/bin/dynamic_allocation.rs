use anyhow::Result;
use clap::Parser;

use shmem_jacobi::config::world_config_from_env;
use shmem_jacobi::logging::init_logging;
use shmem_jacobi::shmem::World;

/// 対称確保・再確保と、通常のヒープとのアクセス可否の違いを示す
#[derive(Parser)]
#[command(name = "dynamic_allocation")]
struct Cli {
    /// PE数
    #[arg(default_value_t = 2)]
    pes: usize,
}

fn is_or_not(flag: bool) -> &'static str {
    if flag {
        "is"
    } else {
        "is not"
    }
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let world = World::new(world_config_from_env(cli.pes)?);
    world.run(|pe| {
        let symmetric = pe.malloc::<i32>(8)?;
        let local = vec![0i32; 4];

        let sym_addr = symmetric.read(pe).as_ptr();
        println!(
            "PE {}: local {} remotely accessible, and symmetric {}",
            pe.my_pe(),
            is_or_not(pe.addr_accessible(local.as_ptr(), 0)),
            is_or_not(pe.addr_accessible(sym_addr, 0))
        );

        {
            let mut data = symmetric.write(pe);
            for (k, v) in data.iter_mut().enumerate() {
                *v = (pe.my_pe() * 100 + k) as i32;
            }
        }

        // 中身は先頭8要素が引き継がれる
        let symmetric = pe.realloc(symmetric, 16)?;
        log::info!(
            "PE {}: realloc to {} elements, head {:?}",
            pe.my_pe(),
            symmetric.len(),
            &symmetric.read(pe)[..8]
        );

        drop(local);
        pe.free(symmetric)
    })?;
    Ok(())
}
