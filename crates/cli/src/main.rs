use std::path::PathBuf;

use anyhow::Context;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use clap::{Args, Parser, Subcommand};
use moe_gate_core::gen_neighbor_gate;

use moe_gate_cli::config::CliConfig;
use moe_gate_cli::logging;
use moe_gate_cli::report::{synthetic_tokens, MaskReport, RouteReport};

#[derive(Parser)]
#[command(name = "moe-gate", about = "Inspect neighbor-restricted MoE gate routing")]
struct Cli {
    /// Config file (default: ~/.config/moe-gate/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Default log level; RUST_LOG takes precedence
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

/// Gate shape shared by every subcommand. Unset values fall back to the
/// config file, then to built-in defaults.
#[derive(Args, Debug, Clone, Default)]
struct GateArgs {
    /// Worker whose gate is inspected
    #[arg(long)]
    rank: Option<usize>,

    /// Number of workers in the ring
    #[arg(long)]
    world_size: Option<usize>,

    /// Experts per worker
    #[arg(long)]
    n_expert: Option<usize>,

    /// Token embedding width
    #[arg(long)]
    d_model: Option<usize>,
}

impl GateArgs {
    fn to_config(&self) -> CliConfig {
        CliConfig {
            rank: self.rank,
            world_size: self.world_size,
            n_expert: self.n_expert,
            d_model: self.d_model,
            ..Default::default()
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print the experts a rank may and may not route to
    Mask {
        #[command(flatten)]
        gate: GateArgs,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Route a synthetic batch through a randomly initialized gate
    Route {
        #[command(flatten)]
        gate: GateArgs,

        /// Tokens in the batch
        #[arg(long)]
        tokens: Option<usize>,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Show the effective configuration
    Config {
        #[command(flatten)]
        gate: GateArgs,

        /// Tokens in the batch used by `route`
        #[arg(long)]
        tokens: Option<usize>,

        /// Persist the effective configuration
        #[arg(long)]
        save: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Config file first, CLI arguments override
    let mut cfg = match &cli.config {
        Some(path) if path.exists() => CliConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        // `config --save` may create it
        Some(_) => CliConfig::default(),
        None => CliConfig::load(),
    };

    let overrides = match &cli.command {
        Command::Mask { gate, .. } => gate.to_config(),
        Command::Route { gate, tokens, .. } | Command::Config { gate, tokens, .. } => CliConfig {
            tokens: *tokens,
            ..gate.to_config()
        },
    };
    cfg.merge(&overrides);
    if let Some(level) = &cli.log_level {
        cfg.log_level = Some(level.clone());
    }

    logging::init_with_level(cfg.log_level());

    match cli.command {
        Command::Mask { json, .. } => run_mask(&cfg, json),
        Command::Route { json, .. } => run_route(&cfg, json),
        Command::Config { save, .. } => run_config(&cfg, cli.config, save),
    }
}

fn run_mask(cfg: &CliConfig, json: bool) -> anyhow::Result<()> {
    let gate_config = cfg.gate_config();
    let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
    let gate = gen_neighbor_gate(cfg.rank())
        .build(&gate_config, vb)
        .context("failed to build gate")?;

    let report = MaskReport::from_gate(&gate);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}

fn run_route(cfg: &CliConfig, json: bool) -> anyhow::Result<()> {
    let device = Device::Cpu;
    let gate_config = cfg.gate_config();
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let gate = gen_neighbor_gate(cfg.rank())
        .build(&gate_config, vb)
        .context("failed to build gate")?;

    let tokens = synthetic_tokens(cfg.tokens(), gate_config.d_model, &device)?;
    tracing::info!(
        rank = cfg.rank(),
        world_size = gate_config.world_size,
        n_expert = gate_config.n_expert,
        num_tokens = cfg.tokens(),
        "Routing synthetic batch"
    );

    let report = RouteReport::from_route(&gate, &tokens)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }

    if report.masked_hits > 0 {
        anyhow::bail!(
            "{} token slots were routed to masked experts",
            report.masked_hits
        );
    }
    Ok(())
}

fn run_config(cfg: &CliConfig, path: Option<PathBuf>, save: bool) -> anyhow::Result<()> {
    print!("{}", toml::to_string_pretty(cfg)?);

    if save {
        let path = match path {
            Some(path) => {
                cfg.save_to(&path)?;
                path
            }
            None => cfg.save()?,
        };
        tracing::info!(path = %path.display(), "Saved configuration");
    }
    Ok(())
}
