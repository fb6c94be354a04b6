use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use itertools::Itertools;
use miette::{Context, IntoDiagnostic};
use pindrop_bin::{global_multi_progress, IndicatifWriter};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

use pindrop::index::PackageDb;
use pindrop::resolve::{
    resolve, PreReleaseResolution, ResolveOptions, SDistResolution, TargetEnv,
};
use pindrop::types::UserRequirement;
use pindrop::{normalize_index_url, Os};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The requirements to resolve, e.g. 'flask==2.1.2' or 'requests[socks] >=2,<3'
    #[clap(num_args = 1.., required = true, value_parser = parse_requirement)]
    specs: Vec<UserRequirement>,

    /// Base URL of a Python package index compliant with the simple repository API
    /// (PEP 503 / PEP 691). Repeat to consult several indexes, in priority order.
    #[clap(default_value = "https://pypi.org/simple/", long)]
    index_url: Vec<Url>,

    /// The Python version to resolve for, e.g. '3.10' or '3.10.4'
    #[clap(long, default_value = "3.10")]
    python_version: String,

    /// The operating system to resolve for
    #[clap(long, default_value = "linux")]
    os: Os,

    /// Prefer source distributions over wheels
    #[clap(long)]
    prefer_source: bool,

    /// Allow pre-release versions everywhere, not just where a specifier asks for one
    #[clap(long)]
    pre: bool,

    /// Skip candidates whose metadata cannot be obtained instead of failing
    #[clap(long)]
    ignore_errors: bool,

    /// Trust statically parsed sdist metadata even when the sdist does not promise that
    /// its dependencies are static
    #[clap(long)]
    allow_insecure_metadata: bool,

    /// Directory for the artifact and HTTP caches
    #[clap(long)]
    cache_dir: Option<PathBuf>,

    /// Maximum number of concurrent network fetches
    #[clap(long, default_value_t = pindrop::index::DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Upper bound on resolution rounds
    #[clap(long, default_value_t = 200_000)]
    max_rounds: usize,

    /// Emit the flat adjacency graph instead of the nested dependency tree
    #[clap(long)]
    graph: bool,

    /// Print the result as JSON
    #[clap(long)]
    json: bool,

    /// Verbose logging
    #[clap(short)]
    verbose: bool,
}

async fn actual_main() -> miette::Result<()> {
    let args = Args::parse();

    // Route log lines through the progress bars so they don't tear each other up
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(IndicatifWriter::new(global_multi_progress())))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| get_default_env_filter(args.verbose)),
        )
        .init();

    let cache_dir = match args.cache_dir {
        Some(dir) => dir,
        None => pindrop::index::default_cache_dir()
            .ok_or_else(|| miette::miette!("failed to determine cache directory"))?,
    };
    tracing::info!("cache directory: {}", cache_dir.display());

    let env = TargetEnv::new(&args.python_version, args.os)?;

    let index_urls: Vec<Url> = args.index_url.iter().cloned().map(normalize_index_url).collect();
    // every network operation gets a deadline; expiry counts as a transient failure
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .into_diagnostic()?;
    let package_db = PackageDb::new(client, &index_urls, &cache_dir)
        .into_diagnostic()
        .wrap_err_with(|| {
            format!(
                "failed to construct package database for indexes {}",
                index_urls.iter().format(", ")
            )
        })?
        .with_concurrency(args.concurrency);

    let options = ResolveOptions {
        sdist_resolution: if args.prefer_source {
            SDistResolution::PreferSDists
        } else {
            SDistResolution::PreferWheels
        },
        pre_release_resolution: if args.pre {
            PreReleaseResolution::Allow
        } else {
            PreReleaseResolution::from_specs(&args.specs)
        },
        version_strategy: Default::default(),
        ignore_errors: args.ignore_errors,
        allow_insecure_metadata: args.allow_insecure_metadata,
        max_rounds: args.max_rounds,
        network_concurrency: args.concurrency,
    };

    let resolution = resolve(&package_db, args.specs.iter(), &env, &options)
        .await
        .map_err(miette::Report::new)
        .wrap_err("could not resolve the requested requirements")?;

    for warning in &resolution.warnings {
        tracing::warn!("{warning}");
    }

    if args.json {
        let requirements: Vec<String> = args.specs.iter().map(ToString::to_string).collect();
        let document = if args.graph {
            resolution.graph_document(&requirements, &env)
        } else {
            resolution.tree_document(&requirements, &env)
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&document).into_diagnostic()?
        );
        return Ok(());
    }

    println!("{}:", console::style("Resolved environment").bold());
    for spec in args.specs.iter() {
        println!("- {}", spec);
    }

    println!();
    let mut tabbed_stdout = tabwriter::TabWriter::new(std::io::stdout());
    writeln!(
        tabbed_stdout,
        "{}\t{}",
        console::style("Name").bold(),
        console::style("Version").bold()
    )
    .into_diagnostic()?;
    for pinned_package in resolution.flat().iter().sorted_by(|a, b| a.name.cmp(&b.name)) {
        write!(tabbed_stdout, "{name}", name = pinned_package.name.as_str()).into_diagnostic()?;
        if !pinned_package.extras.is_empty() {
            write!(
                tabbed_stdout,
                "[{}]",
                pinned_package.extras.iter().map(|e| e.as_str()).join(",")
            )
            .into_diagnostic()?;
        }
        writeln!(
            tabbed_stdout,
            "\t{version}",
            version = pinned_package.version
        )
        .into_diagnostic()?;
    }
    tabbed_stdout.flush().into_diagnostic()?;

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = actual_main().await {
        eprintln!("{e:?}");
        std::process::exit(1);
    }
}

/// Clap cannot use [`UserRequirement`]'s `FromStr` directly because the parse error is a
/// `miette::Report`.
fn parse_requirement(input: &str) -> Result<UserRequirement, String> {
    UserRequirement::from_str(input).map_err(|err| format!("{err}"))
}

/// Constructs a default [`EnvFilter`] that is used when the user did not specify a custom
/// RUST_LOG.
fn get_default_env_filter(verbose: bool) -> EnvFilter {
    let mut result = EnvFilter::new("pindrop=warn");

    if verbose {
        result = result.add_directive(Directive::from_str("pindrop=debug").unwrap());
    }

    result
}
