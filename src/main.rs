mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

use lc_core::config::{Config, LogFormat, LoggingConfig};
use lc_core::FormatRegistry;
use lc_engine::EngineLocator;

/// Crates whose log level follows `LOG_LEVEL` / `--verbose`.
const LOG_TARGETS: &[&str] = &["libre_convert", "lc_server", "lc_engine", "lc_core"];

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(cli.config.as_deref())?;
    config.apply_env()?;

    init_logging(&config.logging, cli.verbose);

    match cli.command {
        Commands::Start { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            let rt = build_runtime(config.server.workers)?;
            rt.block_on(lc_server::start(config))?;
            Ok(())
        }
        Commands::CheckEngine => check_engine(&config),
        Commands::Formats { json } => print_formats(json),
        Commands::Validate => validate_config(cli.config.as_deref(), &config),
        Commands::Version => {
            println!("libre-convert {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise our crates log at `LOG_LEVEL` (or
/// trace with `--verbose`) and everything else at warn.
fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(default_directives(&logging.level, verbose))
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Plain => builder.init(),
    }
}

fn default_directives(level: &str, verbose: bool) -> String {
    let (ours, http) = if verbose {
        ("trace", "debug")
    } else {
        (level, level)
    };
    let mut directives = vec!["warn".to_string()];
    directives.extend(LOG_TARGETS.iter().map(|t| format!("{t}={ours}")));
    directives.push(format!("tower_http={http}"));
    directives.join(",")
}

fn build_runtime(workers: Option<usize>) -> std::io::Result<tokio::runtime::Runtime> {
    let workers = workers.filter(|n| *n > 0).unwrap_or_else(num_cpus::get);
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()
}

fn check_engine(config: &Config) -> Result<()> {
    println!("Checking conversion engine...\n");

    let locator = EngineLocator::discover(&config.engine);
    let info = build_runtime(Some(1))?.block_on(locator.info());
    if info.available {
        print!("✓ {}", info.name);
        if let Some(ref version) = info.version {
            print!(" ({version})");
        }
        if let Some(ref path) = info.path {
            print!(" - {}", path.display());
        }
        println!();
        Ok(())
    } else {
        println!("✗ {}", info.name);
        println!();
        anyhow::bail!(
            "No conversion engine found. Install LibreOffice or set API_ENGINE_PATH."
        )
    }
}

fn print_formats(json: bool) -> Result<()> {
    let table = FormatRegistry::new().table();

    if json {
        println!("{}", serde_json::to_string_pretty(&table)?);
    } else {
        for (input, outputs) in &table {
            println!("{input:>5} -> {}", outputs.join(", "));
        }
    }

    Ok(())
}

fn validate_config(path: Option<&std::path::Path>, config: &Config) -> Result<()> {
    match path {
        Some(p) => println!("Validating config: {}", p.display()),
        None => println!("No config file specified, using defaults and environment"),
    }

    println!("  Server: {}:{}", config.server.host, config.server.port);
    match config.server.workers {
        Some(n) => println!("  Workers: {n}"),
        None => println!("  Workers: auto ({})", num_cpus::get()),
    }
    println!("  Max upload: {} bytes", config.server.max_upload_bytes);
    println!("  Auth enabled: {}", config.auth.enabled);
    println!("  Max concurrent: {}", config.conversion.max_concurrent);
    println!("  Timeout: {}s", config.conversion.timeout_secs);
    println!(
        "  Admission wait: {}s (Retry-After {}s)",
        config.conversion.admission_wait_secs, config.conversion.retry_after_secs
    );
    println!("  Scratch root: {}", config.conversion.scratch_root().display());
    println!("  Log: {} ({:?})", config.logging.level, config.logging.format);

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("✓ Configuration is valid");
    } else {
        for warning in &warnings {
            println!("! {warning}");
        }
    }

    Ok(())
}
