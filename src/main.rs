use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use geodash::{catalog, pages::Selection, Dashboard, DashboardConfig, PageError};
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Subcommand)]
enum Command {
    /// List pages in navigation order
    Pages,

    /// Year choices for a page, newest first
    Years {
        #[arg(long)]
        page: String,
    },

    /// Render one page for one selection and write the result as JSON
    Render {
        #[arg(long)]
        page: String,

        /// Defaults to the latest year the page has data for
        #[arg(long)]
        year: Option<i64>,

        /// Output file (default: stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// List loadable files under the data directory
    Catalog {
        /// Defaults to `data_dir` from the config, then `data`
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Debug, Parser)]
#[command(name = "geodash", about = "3D geospatial dashboard pages as scene JSON")]
struct Cli {
    /// Dashboard YAML (falls back to $GEODASH_CONFIG, then the builtin pages)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

fn init_logging() {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::new(level)
    });
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();
}

fn write_json<T: Serialize>(value: &T, out: Option<&Path>) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialising output")?;
    match out {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "wrote output");
        }
        None => println!("{}", text),
    }
    Ok(())
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = DashboardConfig::resolve(cli.config.as_deref())?;

    match cli.cmd {
        Command::Pages => {
            let dash = Dashboard::new(config)?;
            write_json(&dash.navigation(), None)
        }
        Command::Years { page } => {
            let dash = Dashboard::new(config)?;
            let years = match dash.years(&page) {
                Ok(years) => years,
                Err(err @ PageError::UnknownPage { .. }) => return Err(err.into()),
                Err(err) => {
                    error!(page = %page, error = %err, "no year index");
                    Vec::new()
                }
            };
            write_json(&years, None)
        }
        Command::Render { page, year, out } => {
            let dash = Dashboard::new(config)?;
            let view = dash.render(&Selection { page, year })?;
            write_json(&view, out.as_deref())
        }
        Command::Catalog { dir } => {
            let dir = dir
                .or_else(|| config.data_dir.clone())
                .unwrap_or_else(|| PathBuf::from("data"));
            write_json(&catalog::discover(&dir)?, None)
        }
    }
}
