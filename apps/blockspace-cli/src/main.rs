mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use glam::IVec3;
use tracing_subscriber::EnvFilter;

use blockspace_common::{Compute, DataView};
use blockspace_domain::{BlockGrid, Cell, MultiResGrid, Stencil};
use blockspace_set::{ExecutionKind, SchedulePolicy, Sequence};

use crate::config::RunConfig;

#[derive(Parser)]
#[command(name = "blockspace-cli", about = "CLI tool for blockspace grids and containers")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Build a grid and print topology and partition statistics
    Build {
        /// JSON run configuration; defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Run a Laplace stencil followed by dot and norm2 reductions
    Demo {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// List execution kinds
    Kinds,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("blockspace-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", blockspace_common::crate_info());
            println!("set: {}", blockspace_set::crate_info());
            println!("domain: {}", blockspace_domain::crate_info());
        }
        Commands::Build { config } => {
            let config = RunConfig::load_or_default(config.as_deref())?;
            match &config.multires {
                Some(_) => build_multires(&config)?,
                None => {
                    let grid = build_grid(&config)?;
                    print_grid(&grid)?;
                }
            }
        }
        Commands::Demo { config } => {
            let config = RunConfig::load_or_default(config.as_deref())?;
            let grid = build_grid(&config)?;
            print_grid(&grid)?;
            run_demo(&grid)?;
        }
        Commands::Kinds => {
            for kind in ExecutionKind::ALL {
                println!(
                    "{:<22} expandable={} dispatchable={}",
                    kind.to_string(),
                    kind.is_expandable(),
                    kind.is_dispatchable()
                );
            }
        }
    }

    Ok(())
}

fn build_grid(config: &RunConfig) -> anyhow::Result<BlockGrid> {
    let backend = config.backend()?;
    let grid = BlockGrid::new(
        &backend,
        config.domain,
        config.shape.predicate(config.domain),
        &Stencil::s7_laplace(),
        config.descriptor.clone(),
    )?;
    Ok(grid)
}

fn print_grid(grid: &BlockGrid) -> anyhow::Result<()> {
    println!(
        "Grid: domain={}, block_size={}, blocks={}, active_voxels={}",
        grid.domain_size(),
        grid.block_size(),
        grid.num_blocks(),
        grid.num_active_voxels()
    );
    for view in DataView::ALL {
        let space = grid.partition_space(0, view)?;
        println!(
            "  {:<9} blocks={:<6} cells={}",
            view.to_string(),
            space.num_blocks(),
            space.num_active_cells()
        );
    }
    println!("  topology_hash={:#018x}", grid.topology_hash());
    Ok(())
}

fn build_multires(config: &RunConfig) -> anyhow::Result<()> {
    let backend = config.backend()?;
    let descriptor = config.multires.clone().unwrap_or_default();
    let predicate = config.shape.predicate(config.domain);
    let grid = MultiResGrid::new(
        &backend,
        config.domain,
        |level, v| level == 0 && predicate(v),
        &Stencil::s7_laplace(),
        descriptor,
    )?;
    println!("Multi-resolution grid: depth={}", grid.depth());
    for level in 0..grid.depth() {
        let g = grid.level(level)?;
        println!(
            "  level {level}: spacing={} domain={} blocks={} active_voxels={}",
            grid.spacing(level)?,
            g.domain_size(),
            g.num_blocks(),
            g.num_active_voxels()
        );
    }
    Ok(())
}

fn run_demo(grid: &BlockGrid) -> anyhow::Result<()> {
    let x = grid.new_field("x", 1, 0.0f64);
    let lap = grid.new_field("laplace", 1, 0.0f64);
    x.for_each_active_cell(|idx, _, v| *v = f64::from(idx.x + idx.y + idx.z))?;

    let laplace = grid.new_container("laplace", |loader| {
        let x = loader.load_with(&x, Compute::Stencil);
        let lap = loader.load_mut(&lap);
        let faces = [IVec3::X, IVec3::NEG_X, IVec3::Y, IVec3::NEG_Y, IVec3::Z, IVec3::NEG_Z];
        Ok(move |cell: Cell| {
            let center = x.read(cell, 0);
            let sum: f64 = faces
                .iter()
                .filter_map(|&o| x.neighbor(cell, o, 0))
                .map(|n| n - center)
                .sum();
            lap.write(cell, 0, sum);
        })
    })?;

    let dot_scalar = grid.new_pattern_scalar();
    let norm_scalar = grid.new_pattern_scalar();
    let dot = grid.dot("dot", &x, &lap, &dot_scalar)?;
    let norm = grid.norm2("norm2", &lap, &norm_scalar)?;

    let sequence = Sequence::build(&[laplace, dot, norm], SchedulePolicy::OverlapInternal)?;
    println!("Demo: {} nodes in {} levels", sequence.len(), sequence.levels().len());
    sequence.run(0)?;

    println!("  dot(x, laplace) = {:.6}", dot_scalar.get());
    println!("  norm2(laplace)  = {:.6}", norm_scalar.get());
    println!("  halo exchanges  = {}", x.exchange_count());
    Ok(())
}
