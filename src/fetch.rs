// src/fetch.rs

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{Cursor, Read},
    path::Path,
    time::Duration,
};
use tracing::{debug, info, instrument};
use url::Url;
use zip::ZipArchive;

/// On-disk/wire format of a tabular source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableFormat {
    Csv,
    Parquet,
}

/// Where a table comes from and how to read it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    /// File path or http(s) URL.
    pub location: String,
    /// Entry to read when `location` is a ZIP archive; first `.csv` when unset.
    #[serde(default)]
    pub zip_entry: Option<String>,
    /// Leading metadata lines before the header.
    #[serde(default)]
    pub skip_rows: usize,
    #[serde(default)]
    pub format: Option<TableFormat>,
}

impl SourceRef {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            zip_entry: None,
            skip_rows: 0,
            format: None,
        }
    }

    pub fn with_skip_rows(mut self, skip_rows: usize) -> Self {
        self.skip_rows = skip_rows;
        self
    }

    pub fn with_zip_entry(mut self, entry: impl Into<String>) -> Self {
        self.zip_entry = Some(entry.into());
        self
    }

    /// Stable identifier used in logs, errors and cache keys.
    pub fn id(&self) -> String {
        match &self.zip_entry {
            Some(entry) => format!("{}#{}", self.location, entry),
            None => self.location.clone(),
        }
    }

    pub fn is_remote(&self) -> bool {
        parse_remote(&self.location).is_some()
    }

    fn is_zip(&self) -> bool {
        self.location.to_ascii_lowercase().ends_with(".zip")
    }

    /// Declared format, else inferred from the (entry) extension.
    pub fn format(&self) -> TableFormat {
        if let Some(f) = self.format {
            return f;
        }
        let name = self
            .zip_entry
            .as_deref()
            .unwrap_or(&self.location)
            .to_ascii_lowercase();
        if name.ends_with(".parquet") || name.ends_with(".pq") {
            TableFormat::Parquet
        } else {
            TableFormat::Csv
        }
    }
}

fn parse_remote(location: &str) -> Option<Url> {
    Url::parse(location)
        .ok()
        .filter(|u| u.scheme() == "http" || u.scheme() == "https")
}

/// Blocking fetcher with a bounded timeout for remote sources.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Read the raw bytes of `location`, local or remote.
    #[instrument(level = "debug", skip(self))]
    pub fn read_location(&self, location: &str) -> Result<Vec<u8>> {
        match parse_remote(location) {
            Some(url) => {
                info!(url = %url, timeout = ?self.timeout, "fetching");
                let resp = self
                    .client
                    .get(url.as_str())
                    .send()
                    .with_context(|| format!("GET {}", url))?
                    .error_for_status()
                    .with_context(|| format!("GET {}", url))?;
                let bytes = resp
                    .bytes()
                    .with_context(|| format!("reading body from {}", url))?;
                Ok(bytes.to_vec())
            }
            None => {
                let path = Path::new(location);
                if !path.is_file() {
                    bail!("file `{}` does not exist", path.display());
                }
                let mut buf = Vec::new();
                File::open(path)
                    .and_then(|mut f| f.read_to_end(&mut buf))
                    .with_context(|| format!("reading {}", path.display()))?;
                debug!(path = %path.display(), bytes = buf.len(), "read file");
                Ok(buf)
            }
        }
    }

    /// Read a source, unpacking the wanted ZIP entry when needed.
    pub fn read_source(&self, source: &SourceRef) -> Result<Vec<u8>> {
        let bytes = self.read_location(&source.location)?;
        if !source.is_zip() {
            return Ok(bytes);
        }
        extract_entry(&bytes, source.zip_entry.as_deref())
            .with_context(|| format!("unpacking {}", source.location))
    }
}

/// Pull one entry out of an in-memory ZIP archive.
pub fn extract_entry(zip_bytes: &[u8], entry: Option<&str>) -> Result<Vec<u8>> {
    let mut archive = ZipArchive::new(Cursor::new(zip_bytes)).context("reading ZIP archive")?;

    let index = match entry {
        Some(name) => archive
            .index_for_name(name)
            .ok_or_else(|| anyhow!("entry `{}` not found in archive", name))?,
        None => (0..archive.len())
            .find(|&i| {
                archive
                    .name_for_index(i)
                    .is_some_and(|n| n.to_ascii_lowercase().ends_with(".csv"))
            })
            .ok_or_else(|| anyhow!("archive has no .csv entry"))?,
    };

    let mut file = archive
        .by_index(index)
        .with_context(|| format!("opening archive entry {}", index))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .with_context(|| format!("reading archive entry {}", file.name()))?;
    debug!(entry = file.name(), bytes = buf.len(), "extracted zip entry");
    Ok(buf)
}
