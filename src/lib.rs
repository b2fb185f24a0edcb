//! 対称メモリ (PGAS) 上の2次元熱拡散 Jacobi 法
//!
//! - [`grid`]: 定数と行ブロック分割
//! - [`shmem`]: プロセス内 PGAS 基盤 (PE, 対称ヒープ, put, バリア, リダクション, チーム)
//! - [`implementations`]: 分散ステンシルソルバと単一プロセスの参照実装

pub mod config;
pub mod error;
pub mod grid;
pub mod implementations;
pub mod logging;
pub mod shmem;

pub use error::{ConfigError, ShmemError};
