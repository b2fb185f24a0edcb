//! エラー型
//!
//! ライブラリ側は `thiserror` で列挙し、バイナリ側は `anyhow` で包む。

use std::path::PathBuf;

use thiserror::Error;

/// 対称メモリ基盤 (shmem) のエラー
#[derive(Debug, Error)]
pub enum ShmemError {
    #[error("PE {pe}: symmetric allocation failed: requested {requested} bytes, available {available}")]
    AllocationFailed {
        pe: usize,
        requested: usize,
        available: usize,
    },

    #[error("PE {pe}: symmetric layout mismatch: {detail}")]
    SymmetryViolation { pe: usize, detail: String },

    #[error("PE {pe}: target PE {target} is out of range (n_pes = {n_pes})")]
    InvalidPe {
        pe: usize,
        target: usize,
        n_pes: usize,
    },

    #[error("invalid team configuration: {0}")]
    InvalidTeam(String),

    #[error("access out of bounds: offset {offset} + len {len} exceeds capacity {capacity}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    #[error("collective aborted by PE {by_pe} (exit code {code})")]
    Aborted { by_pe: usize, code: i32 },

    #[error("PE {pe} called global exit with code {code}")]
    GlobalExit { pe: usize, code: i32 },

    #[error("PE {pe} panicked")]
    ParticipantPanicked { pe: usize },
}

impl ShmemError {
    /// プロセス終了コード
    pub fn exit_code(&self) -> i32 {
        match self {
            ShmemError::Aborted { code, .. } | ShmemError::GlobalExit { code, .. } => *code,
            ShmemError::ParticipantPanicked { .. } => 101,
            _ => 1,
        }
    }
}

/// 設定読み込み・検証のエラー
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid size value {0:?} (expected e.g. 1048576, 512K, 64M, 1G)")]
    InvalidSize(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn exit_code(&self) -> i32 {
        2
    }
}
