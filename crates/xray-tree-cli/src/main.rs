use anyhow::bail;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use xray_tree::TreeOptions;
use xray_tree_cli::{seed_data, TreeRequest};

#[derive(Parser)]
#[command(name = "xray-tree")]
#[command(about = "Assemble X-Ray traces into trees of execution paths", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble a trace tree and print its root-to-leaf paths
    Tree {
        /// Tracing header, e.g. `Root=1-...;Parent=...;Sampled=1`
        #[arg(long)]
        header: Option<String>,

        /// JSON file with traces (array of traces or a BatchGetTraces response)
        #[arg(long, conflicts_with = "seed")]
        fixture: Option<PathBuf>,

        /// Use the bundled Step Functions example instead of a fixture
        #[arg(long)]
        seed: bool,

        /// Follow child links into other traces
        #[arg(long)]
        fetch_child_traces: bool,

        /// Maximum depth of followed child traces
        #[arg(long, default_value = "5")]
        max_link_depth: usize,

        /// Accept paths ending in in-progress segments
        #[arg(long)]
        allow_in_progress: bool,

        /// Poll for up to this many seconds (0 polls forever)
        #[arg(long)]
        timeout: Option<f64>,

        /// Only accept a tree with exactly this many paths
        #[arg(long)]
        expect_paths: Option<usize>,

        /// Print the tree as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a tracing header for a new sampled trace
    Header,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Tree {
            header,
            fixture,
            seed,
            fetch_child_traces,
            max_link_depth,
            allow_in_progress,
            timeout,
            expect_paths,
            json,
        } => {
            let (source, header) = match (fixture, seed) {
                (Some(path), _) => (xray_tree_cli::load_fixtures(&path)?, header),
                (None, true) => (
                    seed_data::seed_source(),
                    header.or_else(|| Some(seed_data::seed_header().to_string())),
                ),
                (None, false) => bail!("either --fixture or --seed is required"),
            };
            let Some(header) = header else {
                bail!("--header is required with --fixture");
            };

            let request = TreeRequest {
                header,
                options: TreeOptions::new()
                    .with_child_traces(fetch_child_traces)
                    .with_max_link_depth(max_link_depth)
                    .with_in_progress_leaves(allow_in_progress),
                timeout,
                expect_paths,
                json,
            };
            let output = xray_tree_cli::run_tree(source, &request, xray_tree_cli::base_delay_from_env()?)?;
            print!("{output}");
        }
        Commands::Header => println!("{}", xray_tree_cli::new_header()),
    }

    Ok(())
}
