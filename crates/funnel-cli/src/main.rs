//   Copyright (c) 2024-2026 Anton Kundenko <singaraiona@gmail.com>
//   All rights reserved.
//
//   Permission is hereby granted, free of charge, to any person obtaining a copy
//   of this software and associated documentation files (the "Software"), to deal
//   in the Software without restriction, including without limitation the rights
//   to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
//   copies of the Software, and to permit persons to whom the Software is
//   furnished to do so, subject to the following conditions:
//
//   The above copyright notice and this permission notice shall be included in all
//   copies or substantial portions of the Software.
//
//   THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
//   IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
//   FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
//   AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
//   LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
//   OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
//   SOFTWARE.

use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};

use funnel_sql::{FunnelCompiler, FunnelConfig, FunnelRequest, SqlError, StaticRegistry};

#[derive(Parser)]
#[command(name = "funnel", version, about = "Compile funnel queries to SQL")]
struct Args {
    /// Funnel request (JSON)
    #[arg(short, long)]
    request: PathBuf,
    /// Precomputed table listings per project (JSON)
    #[arg(short, long)]
    catalog: Option<PathBuf>,
    /// Compiler configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Sql)]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Sql,
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), SqlError> {
    let request = read_request(&args.request)?;
    let registry = match &args.catalog {
        Some(path) => StaticRegistry::from_json_file(path)?,
        None => StaticRegistry::new(),
    };
    let config = match &args.config {
        Some(path) => FunnelConfig::from_json_file(path)?,
        None => FunnelConfig::default(),
    };

    let compiled = FunnelCompiler::new(&registry)
        .with_config(config)
        .compile(&request)?;

    match args.format {
        OutputFormat::Sql => {
            println!("{};", compiled.sql);
            for set in &compiled.unresolved {
                match &set.dimension {
                    Some(dim) => eprintln!("unresolved: {} by {dim}", set.collection),
                    None => eprintln!("unresolved: {}", set.collection),
                }
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&compiled)
                .map_err(|e| SqlError::Plan(format!("failed to encode result: {e}")))?;
            println!("{json}");
        }
    }
    Ok(())
}

fn read_request(path: &Path) -> Result<FunnelRequest, SqlError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| SqlError::Request(format!("failed to read {}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| SqlError::Request(format!("{}: {e}", path.display())))
}
