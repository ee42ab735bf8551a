use std::path::{Path, PathBuf};

use vpr_db::{Catalog, Database, DbError};

const EXTENSION: &str = "vprdb";

/// Expand the command line paths: files are kept as given, directories are
/// walked for database files in name order.
pub fn expand_paths(paths: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths.iter().map(Path::new) {
        if !path.is_dir() {
            files.push(path.to_path_buf());
            continue;
        }
        let mut found = walkdir::WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry.file_type().is_file()
                    && entry
                        .path()
                        .extension()
                        .map(|ext| ext == EXTENSION)
                        .unwrap_or(false)
            })
            .map(|entry| entry.path().to_path_buf())
            .collect::<Vec<_>>();
        if found.is_empty() {
            log::warn!("no .{EXTENSION} files under {}", path.display());
        }
        files.append(&mut found);
    }
    files
}

/// Load every file and merge them into one catalog. The first failure aborts.
pub fn load_catalog(files: &[PathBuf]) -> Result<Catalog, DbError> {
    let pb = indicatif::ProgressBar::new(files.len() as u64);
    pb.set_style(
        indicatif::ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}/{len:3} {msg}")
            .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
            .progress_chars("##>-"),
    );

    let mut databases = Vec::with_capacity(files.len());
    for file in files {
        pb.set_message(file.display().to_string());
        let db = Database::load(file).inspect_err(|e| {
            log::error!("failed to load {}: {e}", file.display());
        })?;
        log::debug!(
            "{}: {} words, {} signatures, {} labels",
            file.display(),
            db.words.len(),
            db.signatures.len(),
            db.labels.len()
        );
        databases.push(db);
        pb.inc(1);
    }
    pb.finish_and_clear();

    Catalog::merge(databases)
}
