//! Module Workspace: download + unpack a module archive into a scratch
//! directory, then prime it for the analyzer with an init/tidy or
//! download subcommand.

use scanforge_ids::{ModulePath, ModuleVersion};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("fetching module archive: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("reading module archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("zip entry {0:?} escapes the destination directory")]
    PathEscape(String),
    #[error("bad module: {command} failed: {stderr}")]
    BadModule { command: String, stderr: String },
    #[error("subprocess task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Unpack a module zip archive's bytes into `target_dir`.
///
/// The archive's conventional top-level `<module>@<version>/` directory is
/// stripped from every entry. An entry whose stripped path would resolve
/// outside `target_dir` aborts the whole unpack — a single malicious entry
/// poisons the batch rather than being silently skipped. A `vendor/`
/// directory (that exact path segment, not anything merely prefixed with
/// the letters "vendor") and everything beneath it is skipped.
pub fn unpack_zip(bytes: &[u8], target_dir: &Path, strip_prefix: &str) -> Result<(), WorkspaceError> {
    let cursor = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(cursor)?;

    std::fs::create_dir_all(target_dir)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let raw_name = entry.name().to_string();

        let relative = raw_name
            .strip_prefix(strip_prefix)
            .unwrap_or(raw_name.as_str());
        let relative = relative.trim_start_matches('/');
        if relative.is_empty() {
            continue;
        }

        if is_under_vendor(relative) {
            continue;
        }

        let dest = resolve_within(target_dir, relative)
            .ok_or_else(|| WorkspaceError::PathEscape(raw_name.clone()))?;

        if entry.is_dir() {
            std::fs::create_dir_all(&dest)?;
            continue;
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buf)?;
        std::fs::write(&dest, buf)?;
    }

    Ok(())
}

fn is_under_vendor(relative: &str) -> bool {
    relative == "vendor" || relative.starts_with("vendor/")
}

/// Join `relative` onto `base`, refusing any component that would escape
/// `base` (`..`, an absolute root, or a Windows path prefix).
fn resolve_within(base: &Path, relative: &str) -> Option<PathBuf> {
    let mut resolved = base.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(resolved)
}

/// Download a module's archive from the proxy and materialize it under
/// `target_dir`, then prime the workspace: if `init` is set and no
/// `go.mod` is present, run the module-init and dependency-tidy commands;
/// otherwise run the dependency-download command. Every subprocess
/// inherits `proxy_env` and, when `sandbox_module_cache` is set, an
/// alternate module cache path.
pub async fn materialize(
    client: &reqwest::Client,
    proxy_base_url: &str,
    module: &ModulePath,
    version: &ModuleVersion,
    target_dir: &Path,
    init: bool,
    proxy_env: &[(String, String)],
    sandbox_module_cache: Option<&Path>,
) -> Result<(), WorkspaceError> {
    let url = format!(
        "{}/{}/@v/{}.zip",
        proxy_base_url.trim_end_matches('/'),
        module.as_str(),
        version.as_str()
    );
    let bytes = client.get(&url).send().await?.error_for_status()?.bytes().await?;

    let strip_prefix = format!("{}@{}/", module.as_str(), version.as_str());
    unpack_zip(&bytes, target_dir, &strip_prefix)?;

    let go_mod_exists = target_dir.join("go.mod").exists();
    if init && !go_mod_exists {
        run_subprocess(
            "go",
            &["mod", "init", "scanforge/synthetic"],
            target_dir,
            proxy_env,
            sandbox_module_cache,
        )
        .await?;
        run_subprocess("go", &["mod", "tidy"], target_dir, proxy_env, sandbox_module_cache).await?;
    } else {
        run_subprocess(
            "go",
            &["mod", "download"],
            target_dir,
            proxy_env,
            sandbox_module_cache,
        )
        .await?;
    }

    Ok(())
}

/// Runs the subprocess on a blocking-pool thread: `Command::output` blocks
/// the calling thread until the child exits, which would otherwise stall a
/// tokio worker thread for the module-init/tidy/download duration.
async fn run_subprocess(
    program: &str,
    args: &[&str],
    cwd: &Path,
    proxy_env: &[(String, String)],
    sandbox_module_cache: Option<&Path>,
) -> Result<(), WorkspaceError> {
    let program = program.to_string();
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    let cwd = cwd.to_path_buf();
    let proxy_env = proxy_env.to_vec();
    let sandbox_module_cache = sandbox_module_cache.map(|p| p.to_path_buf());

    tokio::task::spawn_blocking(move || {
        let mut command = Command::new(&program);
        command
            .args(&args)
            .current_dir(&cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        for (key, value) in &proxy_env {
            command.env(key, value);
        }
        if let Some(cache) = &sandbox_module_cache {
            command.env("GOMODCACHE", cache);
        }

        let output = command.output()?;
        if !output.status.success() {
            return Err(WorkspaceError::BadModule {
                command: format!("{program} {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(())
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_test_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let cursor = std::io::Cursor::new(&mut buf);
            let mut writer = zip::ZipWriter::new(cursor);
            for (name, content) in entries {
                writer
                    .start_file(*name, zip::write::FileOptions::<()>::default())
                    .unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    #[test]
    fn unpacks_and_strips_prefix() {
        let zip_bytes = build_test_zip(&[("mod@v1.0.0/main.go", "package main")]);
        let dir = tempfile::tempdir().unwrap();
        unpack_zip(&zip_bytes, dir.path(), "mod@v1.0.0/").unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("main.go")).unwrap(),
            "package main"
        );
    }

    #[test]
    fn skips_vendor_directory_but_keeps_lookalike() {
        let zip_bytes = build_test_zip(&[
            ("mod@v1.0.0/vendor/pkg/a.go", "skip me"),
            ("mod@v1.0.0/vendorius/b.go", "keep me"),
        ]);
        let dir = tempfile::tempdir().unwrap();
        unpack_zip(&zip_bytes, dir.path(), "mod@v1.0.0/").unwrap();
        assert!(!dir.path().join("vendor").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("vendorius/b.go")).unwrap(),
            "keep me"
        );
    }

    #[test]
    fn refuses_path_escape() {
        let zip_bytes = build_test_zip(&[("mod@v1.0.0/../../etc/passwd", "pwned")]);
        let dir = tempfile::tempdir().unwrap();
        let err = unpack_zip(&zip_bytes, dir.path(), "mod@v1.0.0/").unwrap_err();
        assert!(matches!(err, WorkspaceError::PathEscape(_)));
    }
}
