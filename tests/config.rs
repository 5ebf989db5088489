use std::fs;

use tempfile::TempDir;
use vitalstream::{AppConfig, AppError, AppResult};

#[test]
fn partial_file_overrides_defaults() -> AppResult<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("conf.toml");
    fs::write(
        &path,
        "[extract]\nchunk_size = 1024\n\n[retry]\nmax_attempts = 7\njitter = false\n",
    )?;

    let config = AppConfig::set_up_config(&path)?;
    assert_eq!(config.extract.chunk_size, 1024);
    assert_eq!(config.retry.max_attempts, 7);
    assert!(!config.retry.jitter);
    // untouched keys keep their defaults
    assert_eq!(config.extract.prefetch_chunks, 2);
    assert_eq!(config.retry.base_backoff_ms, 500);
    Ok(())
}

#[test]
fn environment_overrides_the_file() -> AppResult<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("conf.toml");
    fs::write(&path, "[storage]\nseries_dir = \"from-file\"\n")?;

    std::env::set_var("VITALSTREAM__STORAGE__SERIES_DIR", "from-env");
    let config = AppConfig::set_up_config(&path);
    std::env::remove_var("VITALSTREAM__STORAGE__SERIES_DIR");

    assert_eq!(config?.storage.series_dir, "from-env");
    Ok(())
}

#[test]
fn missing_file() -> AppResult<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("absent.toml");

    assert!(matches!(
        AppConfig::set_up_config(&path),
        Err(AppError::ConfigFileError(_))
    ));
    let config = AppConfig::set_up_optional_config(&path)?;
    assert_eq!(config.extract, AppConfig::default().extract);
    Ok(())
}

#[test]
fn invalid_values_are_rejected() -> AppResult<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("conf.toml");
    fs::write(&path, "[retry]\nmax_attempts = 0\n")?;

    assert!(matches!(
        AppConfig::set_up_config(&path),
        Err(AppError::InvalidValue(_))
    ));
    Ok(())
}
