//! CLI context management: a persisted default namespace so `scan`/
//! `enqueue` don't require `--namespace` on every invocation. Stored as a
//! single line of plain text rather than a structured format, since it
//! holds exactly one value.

use std::path::PathBuf;

fn context_file_path() -> anyhow::Result<PathBuf> {
    Ok(scanforge_logging::scanforge_home().join("namespace"))
}

/// Get the persisted default namespace, if one has been set.
pub fn get_default_namespace() -> anyhow::Result<Option<String>> {
    let path = context_file_path()?;
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("failed to read namespace context {}: {}", path.display(), e))?;
    let trimmed = content.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

/// Persist `name` as the default namespace.
pub fn set_default_namespace(name: &str) -> anyhow::Result<()> {
    let path = context_file_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, name)?;
    Ok(())
}

/// Clear the persisted default namespace.
pub fn clear_default_namespace() -> anyhow::Result<()> {
    let path = context_file_path()?;
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_a_temp_home() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("SCANFORGE_HOME", dir.path());

        assert_eq!(get_default_namespace().unwrap(), None);
        set_default_namespace("analysis").unwrap();
        assert_eq!(get_default_namespace().unwrap(), Some("analysis".to_string()));
        clear_default_namespace().unwrap();
        assert_eq!(get_default_namespace().unwrap(), None);

        std::env::remove_var("SCANFORGE_HOME");
    }
}
