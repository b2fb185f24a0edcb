//! 実行設定 (TOML + 環境変数)
//!
//! 優先順位は 既定値 < 設定ファイル < 環境変数 < コマンドライン引数。
//!
//! ```toml
//! pes = 4
//! heap_size = "64M"
//!
//! [heat]
//! nx = 256
//! ny = 256
//! max_iters = 500
//! alpha = 0.1
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::grid::{Partition, ALPHA, COLD, HOT, INITIAL, MAX_ITERS, NX, NY};
use crate::shmem::{WorldConfig, DEFAULT_HEAP_SIZE};

/// 対称ヒープ容量を指定する環境変数
pub const HEAP_SIZE_ENV: &str = "SHMEM_SYMMETRIC_SIZE";

pub const DEFAULT_PES: usize = 4;

/// 熱拡散の問題設定
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeatConfig {
    pub nx: usize,
    pub ny: usize,
    pub max_iters: usize,
    pub alpha: f64,
    /// 上端 (大域0行目) の固定温度
    pub hot: f64,
    /// 下端 (大域 NY-1 行目) の固定温度
    pub cold: f64,
    pub initial: f64,
}

impl Default for HeatConfig {
    fn default() -> Self {
        HeatConfig {
            nx: NX,
            ny: NY,
            max_iters: MAX_ITERS,
            alpha: ALPHA,
            hot: HOT,
            cold: COLD,
            initial: INITIAL,
        }
    }
}

impl HeatConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nx < 3 {
            return Err(ConfigError::Invalid(format!(
                "nx must be at least 3 to have interior columns (got {})",
                self.nx
            )));
        }
        if self.ny == 0 {
            return Err(ConfigError::Invalid("ny must be positive".to_string()));
        }
        // 0.25 を超えると陽解法が不安定になり最大値原理も崩れる
        if !(0.0..=0.25).contains(&self.alpha) {
            return Err(ConfigError::Invalid(format!(
                "alpha must be within [0, 0.25] (got {})",
                self.alpha
            )));
        }
        Ok(())
    }

    /// 1 PE が確保する対称メモリ量 (2面分, バイト)。usize を超えるなら `None`
    pub fn heap_bytes_per_pe(&self, n_pes: usize) -> Option<usize> {
        Partition::new(self.ny, n_pes, 0)
            .symmetric_len(self.nx)?
            .checked_mul(2 * std::mem::size_of::<f64>())
    }
}

/// 設定ファイル全体
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default = "default_pes")]
    pub pes: usize,
    #[serde(default, deserialize_with = "deserialize_size")]
    pub heap_size: Option<usize>,
    #[serde(default)]
    pub heat: HeatConfig,
}

fn default_pes() -> usize {
    DEFAULT_PES
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            pes: DEFAULT_PES,
            heap_size: None,
            heat: HeatConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pes == 0 {
            return Err(ConfigError::Invalid("pes must be positive".to_string()));
        }
        self.heat.validate()
    }

    /// ワールド設定。ヒープ容量は 環境変数 > 設定ファイル > 既定値
    ///
    /// コマンドライン引数はこの後で呼び出し側が上書きする。
    pub fn world_config(&self) -> Result<WorldConfig, ConfigError> {
        Ok(self.world_config_with(heap_size_from_env()?))
    }

    /// `env_heap_size` を環境変数の値として解決する
    pub fn world_config_with(&self, env_heap_size: Option<usize>) -> WorldConfig {
        let heap_size = env_heap_size
            .or(self.heap_size)
            .unwrap_or(DEFAULT_HEAP_SIZE);
        WorldConfig::new(self.pes).with_heap_size(heap_size)
    }
}

/// 環境変数のヒープ容量を反映したワールド設定
pub fn world_config_from_env(pes: usize) -> Result<WorldConfig, ConfigError> {
    if pes == 0 {
        return Err(ConfigError::Invalid("pes must be positive".to_string()));
    }
    let heap_size = heap_size_from_env()?.unwrap_or(DEFAULT_HEAP_SIZE);
    Ok(WorldConfig::new(pes).with_heap_size(heap_size))
}

/// `SHMEM_SYMMETRIC_SIZE` を読む。未設定なら `None`
pub fn heap_size_from_env() -> Result<Option<usize>, ConfigError> {
    match std::env::var(HEAP_SIZE_ENV) {
        Ok(value) => parse_size(&value).map(Some),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(value)) => {
            Err(ConfigError::InvalidSize(value.to_string_lossy().into_owned()))
        }
    }
}

/// "1048576", "512K", "64M", "1G" 形式のサイズ
pub fn parse_size(value: &str) -> Result<usize, ConfigError> {
    let trimmed = value.trim();
    let invalid = || ConfigError::InvalidSize(value.to_string());

    let (digits, shift) = match trimmed.char_indices().last() {
        Some((pos, 'k' | 'K')) => (&trimmed[..pos], 10),
        Some((pos, 'm' | 'M')) => (&trimmed[..pos], 20),
        Some((pos, 'g' | 'G')) => (&trimmed[..pos], 30),
        Some(_) => (trimmed, 0),
        None => return Err(invalid()),
    };
    let base: usize = digits.trim().parse().map_err(|_| invalid())?;
    base.checked_mul(1usize << shift).ok_or_else(invalid)
}

fn deserialize_size<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeSpec {
        Bytes(usize),
        Text(String),
    }

    match SizeSpec::deserialize(deserializer)? {
        SizeSpec::Bytes(bytes) => Ok(Some(bytes)),
        SizeSpec::Text(text) => parse_size(&text).map(Some).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_build_constants() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.pes, 4);
        assert_eq!(cfg.heat.nx, 256);
        assert_eq!(cfg.heat.ny, 256);
        assert_eq!(cfg.heat.max_iters, 500);
        assert_eq!(cfg.heat.alpha, 0.1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let cfg = RunConfig::from_toml_str(
            r#"
            pes = 3
            heap_size = "2M"

            [heat]
            nx = 32
            alpha = 0.2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.pes, 3);
        assert_eq!(cfg.heap_size, Some(2 * 1024 * 1024));
        assert_eq!(cfg.heat.nx, 32);
        assert_eq!(cfg.heat.ny, NY);
        assert_eq!(cfg.heat.alpha, 0.2);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = RunConfig::from_toml_str("[heat]\nnxx = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation() {
        let mut heat = HeatConfig::default();
        heat.alpha = 0.3;
        assert!(heat.validate().is_err());
        heat.alpha = 0.25;
        assert!(heat.validate().is_ok());
        heat.nx = 2;
        assert!(heat.validate().is_err());

        let run = RunConfig {
            pes: 0,
            ..RunConfig::default()
        };
        assert!(run.validate().is_err());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1048576").unwrap(), 1 << 20);
        assert_eq!(parse_size("512K").unwrap(), 512 << 10);
        assert_eq!(parse_size(" 64m ").unwrap(), 64 << 20);
        assert_eq!(parse_size("1G").unwrap(), 1 << 30);
        assert!(parse_size("").is_err());
        assert!(parse_size("M").is_err());
        assert!(parse_size("ten").is_err());
    }

    #[test]
    fn test_heap_bytes_per_pe() {
        let heat = HeatConfig {
            nx: 4,
            ny: 10,
            ..HeatConfig::default()
        };
        // 10行を4PEに分けると最大3行 + ゴースト2行
        assert_eq!(heat.heap_bytes_per_pe(4), Some(2 * 5 * 4 * 8));

        let huge = HeatConfig {
            nx: usize::MAX / 4,
            ..heat
        };
        assert_eq!(huge.heap_bytes_per_pe(1), None);
    }

    #[test]
    fn test_heap_size_precedence() {
        let from_file = RunConfig::from_toml_str("heap_size = \"64M\"\n").unwrap();
        // 環境変数 > 設定ファイル
        assert_eq!(from_file.world_config_with(Some(1024)).heap_size, 1024);
        assert_eq!(from_file.world_config_with(None).heap_size, 64 << 20);
        assert_eq!(
            RunConfig::default().world_config_with(None).heap_size,
            DEFAULT_HEAP_SIZE
        );
    }

    #[test]
    fn test_env_heap_size_overrides_file() {
        // この環境変数を触るテストはここだけ
        std::env::set_var(HEAP_SIZE_ENV, "1K");
        let from_file = RunConfig::from_toml_str("heap_size = \"64M\"\n").unwrap();
        let result = from_file.world_config();
        std::env::remove_var(HEAP_SIZE_ENV);
        assert_eq!(result.unwrap().heap_size, 1024);
    }
}
