//! Node pool CLI

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use nodepool::{InMemoryBackend, NodeOptions, NodePool, NodeTemplate, PoolConfig, PoolStatus};

#[derive(Parser)]
#[command(name = "nodepool")]
#[command(about = "Warm pool of pre-provisioned compute nodes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a pool configuration file
    Validate {
        /// Path to a JSON pool configuration
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run a pool against an in-memory backend
    Simulate {
        /// Path to a JSON pool configuration (default: built-in)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Return released nodes to the pool instead of destroying them
        /// (`--reuse false` destroys and replaces them)
        #[arg(long, num_args = 0..=1, default_missing_value = "true")]
        reuse: Option<bool>,
        /// Allocate nodes, as group:count (repeatable)
        #[arg(short, long, value_parser = parse_allocation)]
        allocate: Vec<(String, usize)>,
        /// Release an allocated node by id (repeatable)
        #[arg(short, long)]
        release: Vec<String>,
    },
}

fn parse_allocation(s: &str) -> Result<(String, usize), String> {
    let (group, count) = s
        .split_once(':')
        .ok_or_else(|| format!("expected group:count, got '{}'", s))?;
    if group.is_empty() {
        return Err("group cannot be empty".into());
    }
    let count = count
        .parse()
        .map_err(|e| format!("invalid count '{}': {}", count, e))?;
    Ok((group.to_string(), count))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nodepool=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => cmd_validate(&config)?,
        Commands::Simulate {
            config,
            reuse,
            allocate,
            release,
        } => cmd_simulate(config, reuse, &allocate, &release)?,
    }

    Ok(())
}

fn cmd_validate(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = PoolConfig::from_json_file(path)?;
    println!("Configuration OK");
    println!("  Group:   {}", config.group);
    println!("  Size:    {}..={}", config.min_size, config.max_size);
    println!("  Reuse:   {}", config.reuse_destroyed);
    println!("  Workers: {}", config.growth_workers);
    Ok(())
}

fn cmd_simulate(
    config: Option<PathBuf>,
    reuse: Option<bool>,
    allocations: &[(String, usize)],
    releases: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match config {
        Some(path) => PoolConfig::from_json_file(path)?,
        None => PoolConfig::new("nodepool", NodeTemplate::builder().hardware("small").build()),
    };
    if let Some(reuse) = reuse {
        config = config.reuse_destroyed(reuse);
    }

    let backend = InMemoryBackend::new().with_sequential_ids();
    let pool = NodePool::new(config, Arc::new(backend))?;

    println!("Starting pool...");
    let grown = pool.start_pool().wait()?;
    println!("Provisioned {} node(s)", grown.len());

    for (group, count) in allocations {
        match pool.create_nodes_in_group(group, *count, &NodeOptions::new()) {
            Ok(views) => {
                let ids: Vec<_> = views.iter().map(|v| v.id.as_str()).collect();
                println!("Allocated to {}: {}", group, ids.join(", "));
            }
            Err(e) => println!("Allocation of {} to {} failed: {}", count, group, e),
        }
    }

    for id in releases {
        match pool.destroy_node(id) {
            Ok(view) => println!("Released {} from {}", view.id, view.group),
            Err(e) => println!("Release of {} failed: {}", id, e),
        }
    }

    print_status(&pool.status());

    println!("\n{:<20} {:<12} {:<12}", "NODE", "GROUP", "STATUS");
    println!("{}", "-".repeat(46));
    for view in pool.list_nodes()? {
        println!("{:<20} {:<12} {:<12}", view.id, view.group, view.status);
    }

    pool.close()?;
    println!("\nPool closed");
    Ok(())
}

fn print_status(status: &PoolStatus) {
    println!("\nPool '{}' ({})", status.group, status.lifecycle);
    println!("  Min/Max:   {}/{}", status.min_size, status.max_size);
    println!("  Total:     {}", status.total);
    println!("  Available: {}", status.available);
    println!("  Assigned:  {}", status.assigned);
    println!("  Pending:   {}", status.pending);
    for (group, count) in &status.groups {
        println!("    {:<12} {}", group, count);
    }
}
