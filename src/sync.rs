//! Server-side sync: builds file batches from the configured source root.
//!
//! With `sync.collection` set, the whole root is one batch for that
//! collection. Otherwise every non-hidden top-level folder that contains at
//! least one matching file becomes its own batch, targeting
//! `collection_prefix + folder`.

use std::path::Path;

use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::SyncConfig;
use crate::error::IngestError;
use crate::pipeline::{batch_from_paths, FileBatch};

/// One job's worth of sync work.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub collection: String,
    pub batch: FileBatch,
}

/// Collection name for a top-level source folder.
pub fn collection_name_for(prefix: &str, folder: &str) -> String {
    format!("{}{}", prefix.trim(), folder)
}

/// Scans the source root and returns one plan per target collection.
pub fn plan_sync(config: &SyncConfig) -> Result<Vec<SyncPlan>, IngestError> {
    let root = &config.source_root;
    if !root.is_dir() {
        return Err(IngestError::SourceRootMissing(root.clone()));
    }
    let include = build_globset(&config.include_globs)?;
    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude = build_globset(&excludes)?;

    let mut plans = Vec::new();
    if let Some(collection) = &config.collection {
        let batch = scan_dir(root, &include, &exclude, config.follow_symlinks)?;
        if !batch.files.is_empty() {
            plans.push(SyncPlan {
                collection: collection.clone(),
                batch,
            });
        }
    } else {
        let mut folders: Vec<_> = std::fs::read_dir(root)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        folders.sort_by_key(|e| e.file_name());

        for folder in folders {
            let batch = scan_dir(&folder.path(), &include, &exclude, config.follow_symlinks)?;
            if batch.files.is_empty() {
                continue;
            }
            plans.push(SyncPlan {
                collection: collection_name_for(
                    &config.collection_prefix,
                    &folder.file_name().to_string_lossy(),
                ),
                batch,
            });
        }
    }

    if plans.is_empty() {
        return Err(IngestError::NothingToSync(root.clone()));
    }
    Ok(plans)
}

fn scan_dir(
    root: &Path,
    include: &GlobSet,
    exclude: &GlobSet,
    follow_symlinks: bool,
) -> Result<FileBatch, IngestError> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(root).follow_links(follow_symlinks) {
        let entry = entry.map_err(|e| IngestError::Other(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if exclude.is_match(relative) || !include.is_match(relative) {
            continue;
        }
        paths.push(path.to_path_buf());
    }
    paths.sort();
    Ok(batch_from_paths(root, paths, false))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, IngestError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob: {}", pattern))?);
    }
    Ok(builder.build().context("failed to build glob set")?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config_for(root: &Path) -> SyncConfig {
        SyncConfig {
            source_root: root.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn missing_root_is_reported() {
        let config = config_for(Path::new("/definitely/not/here"));
        assert!(matches!(
            plan_sync(&config).unwrap_err(),
            IngestError::SourceRootMissing(_)
        ));
    }

    #[test]
    fn folders_become_collections() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("manuals/sub")).unwrap();
        fs::create_dir_all(tmp.path().join("faq")).unwrap();
        fs::create_dir_all(tmp.path().join(".hidden")).unwrap();
        fs::create_dir_all(tmp.path().join("empty")).unwrap();
        fs::write(tmp.path().join("manuals/sub/a.md"), "a").unwrap();
        fs::write(tmp.path().join("manuals/b.txt"), "b").unwrap();
        fs::write(tmp.path().join("faq/q.txt"), "q").unwrap();
        fs::write(tmp.path().join(".hidden/x.txt"), "x").unwrap();
        fs::write(tmp.path().join("loose.txt"), "loose").unwrap();

        let mut config = config_for(tmp.path());
        config.collection_prefix = "kb_".into();
        let plans = plan_sync(&config).unwrap();
        let names: Vec<_> = plans.iter().map(|p| p.collection.as_str()).collect();
        assert_eq!(names, vec!["kb_faq", "kb_manuals"]);
        assert_eq!(plans[1].batch.relative_paths(), vec!["b.txt", "sub/a.md"]);
    }

    #[test]
    fn single_collection_takes_whole_root() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("d")).unwrap();
        fs::create_dir_all(tmp.path().join(".git")).unwrap();
        fs::write(tmp.path().join("d/a.md"), "a").unwrap();
        fs::write(tmp.path().join("top.txt"), "t").unwrap();
        fs::write(tmp.path().join(".git/config"), "c").unwrap();

        let mut config = config_for(tmp.path());
        config.collection = Some("all".into());
        config.exclude_globs = vec!["**/*.md".into()];
        let plans = plan_sync(&config).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].collection, "all");
        assert_eq!(plans[0].batch.relative_paths(), vec!["top.txt"]);
    }

    #[test]
    fn empty_root_has_nothing_to_sync() {
        let tmp = tempfile::tempdir().unwrap();
        let err = plan_sync(&config_for(tmp.path())).unwrap_err();
        assert!(matches!(err, IngestError::NothingToSync(_)));
    }
}
