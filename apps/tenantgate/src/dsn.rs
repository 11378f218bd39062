use std::error::Error;
use std::fs::OpenOptions;
use std::path::PathBuf;

/// Uses `input` when given, otherwise a SQLite file under `data_dir`.
/// SQLite files and their parent directories are created on demand.
pub(crate) fn resolve_dsn(
    input: Option<&str>,
    data_dir: &str,
) -> Result<String, Box<dyn Error + Send + Sync>> {
    if let Some(input) = input.filter(|value| !value.trim().is_empty()) {
        ensure_sqlite_dsn(input)?;
        return Ok(input.to_string());
    }

    let db_path = PathBuf::from(data_dir).join("db").join("tenantgate.db");
    let db_path = db_path.to_string_lossy();
    let dsn = match db_path.strip_prefix('/') {
        Some(absolute) => format!("sqlite:///{absolute}?mode=rwc"),
        None => format!("sqlite://{db_path}?mode=rwc"),
    };
    ensure_sqlite_dsn(&dsn)?;
    Ok(dsn)
}

fn ensure_sqlite_dsn(dsn: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
    let Some(rest) = dsn.strip_prefix("sqlite:") else {
        return Ok(());
    };
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    if rest.starts_with(":memory:") || rest.starts_with("memory:") {
        return Ok(());
    }
    let path_part = rest.split('?').next().unwrap_or_default();
    if path_part.is_empty() {
        return Ok(());
    }

    let path = PathBuf::from(path_part);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
    }
    Ok(())
}
