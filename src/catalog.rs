// src/catalog.rs

use anyhow::{Context, Result};
use glob::glob;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Csv,
    Parquet,
    Zip,
    Geotiff,
}

const PATTERNS: &[(&str, SourceKind)] = &[
    ("csv", SourceKind::Csv),
    ("parquet", SourceKind::Parquet),
    ("zip", SourceKind::Zip),
    ("tif", SourceKind::Geotiff),
    ("tiff", SourceKind::Geotiff),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub path: PathBuf,
    pub kind: SourceKind,
    pub bytes: u64,
}

/// Every loadable file under `dir`, recursively, sorted by path.
pub fn discover(dir: &Path) -> Result<Vec<CatalogEntry>> {
    let mut entries = Vec::new();
    for (ext, kind) in PATTERNS {
        let pattern = format!("{}/**/*.{}", dir.display(), ext);
        for path in glob(&pattern).with_context(|| format!("bad glob pattern {}", pattern))? {
            let path = match path {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable path");
                    continue;
                }
            };
            let bytes = fs::metadata(&path)
                .with_context(|| format!("stat {}", path.display()))?
                .len();
            entries.push(CatalogEntry {
                path,
                kind: *kind,
                bytes,
            });
        }
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(dir = %dir.display(), found = entries.len(), "catalogued data dir");
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn finds_known_extensions() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir(dir.path().join("dem"))?;
        fs::write(dir.path().join("gap.csv"), "a,b\n1,2\n")?;
        fs::write(dir.path().join("dem/taiwan.tif"), [0u8; 16])?;
        fs::write(dir.path().join("poverty.zip"), [0u8; 4])?;
        fs::write(dir.path().join("notes.txt"), "ignored")?;

        let found = discover(dir.path())?;
        let kinds: Vec<SourceKind> = found.iter().map(|e| e.kind).collect();
        assert_eq!(found.len(), 3);
        assert!(kinds.contains(&SourceKind::Geotiff));
        let csv = found.iter().find(|e| e.kind == SourceKind::Csv).unwrap();
        assert_eq!(csv.bytes, 8);
        Ok(())
    }

    #[test]
    fn empty_dir_is_empty() -> Result<()> {
        let dir = tempdir()?;
        assert!(discover(dir.path())?.is_empty());
        Ok(())
    }
}
