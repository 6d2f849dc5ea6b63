use anyhow::{anyhow, Context, Result};
use clap::Parser;
use gramflow::data::Dataset;
use gramflow::parser;
use gramflow::theme::Theme;
use std::io::{self, Read, Write};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gramflow")]
#[command(about = "Compile CSV data and a plot DSL into a JSON scene graph", long_about = None)]
struct Args {
    /// Plot DSL string (e.g., 'aes(x: category, y: value) | bar(stat: mean)')
    dsl: String,

    /// Theme overrides as a JSON file
    #[arg(long)]
    theme: Option<std::path::PathBuf>,

    /// Read stdin as a JSON array of objects instead of CSV
    #[arg(long)]
    json_input: bool,

    /// Pretty-print the scene graph
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read data from stdin")?;
    let data = if args.json_input {
        let json: serde_json::Value = serde_json::from_str(&input).context("Failed to parse JSON input")?;
        Dataset::from_json(&json)?
    } else {
        Dataset::from_csv(input.as_bytes()).context("Failed to read CSV from stdin")?
    };

    let spec = match parser::parse_plot_spec(&args.dsl) {
        Ok((_, spec)) => spec,
        Err(e) => return Err(anyhow!("Parse error: {:?}", e)),
    };

    let mut plot = parser::build_plot(&spec, data)?;
    if let Some(path) = &args.theme {
        let json = std::fs::read_to_string(path).with_context(|| format!("Failed to read theme {}", path.display()))?;
        plot = plot.theme(Theme::from_json(&json)?);
    }

    let scene = plot.render().context("Failed to render plot")?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if args.pretty {
        serde_json::to_writer_pretty(&mut handle, &scene)?;
    } else {
        serde_json::to_writer(&mut handle, &scene)?;
    }
    writeln!(handle).context("Failed to write scene to stdout")?;
    handle.flush().context("Failed to flush stdout")?;

    Ok(())
}
