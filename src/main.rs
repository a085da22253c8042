use clap::{Args, Parser, Subcommand};
use comfy_table::{Cell, ContentArrangement, Row, Table, presets::UTF8_FULL};
use gemcov::model::{GenerativeModelConfig, ModelConstruction, setup_model};
use gemcov::spectrum::{
    decay_exponent_for_explained_variance, explained_variance_ratios, power_law_eigenvalues,
};
use gemcov::types::{ModelKind, SubspaceDimension};
use ndarray::Array1;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gemcov")]
#[command(about = "Joint covariance models with prescribed CCA/PLS structure", long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Construct a joint covariance model and summarize it.
    Build(BuildArgs),
    /// Print a power-law within-block spectrum.
    Spectrum(SpectrumArgs),
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// JSON file with a full or partial model configuration.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_parser = parse_model)]
    model: Option<ModelKind>,
    #[arg(long)]
    px: Option<usize>,
    #[arg(long)]
    py: Option<usize>,
    /// 'all', 'force_1', a whole number of dimensions, or a fraction of px.
    #[arg(long, value_parser = parse_subspace)]
    qx: Option<SubspaceDimension>,
    #[arg(long, value_parser = parse_subspace)]
    qy: Option<SubspaceDimension>,
    #[arg(short = 'm', long)]
    m: Option<usize>,
    #[arg(long, allow_hyphen_values = true)]
    ax: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    ay: Option<f64>,
    #[arg(long = "a-between", allow_hyphen_values = true)]
    a_between: Option<f64>,
    #[arg(long = "r-between")]
    r_between: Option<f64>,
    #[arg(long = "max-trials")]
    max_n_sigma_trials: Option<usize>,
    #[arg(long = "expl-var-thr")]
    expl_var_ratio_thr: Option<f64>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    rotate: bool,
    #[arg(short, long)]
    verbose: bool,
    /// Print the construction as JSON instead of a table.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct SpectrumArgs {
    #[arg(short, long)]
    p: usize,
    #[arg(short, long, default_value_t = 0.0, allow_hyphen_values = true)]
    a: f64,
    /// Solve for the exponent giving PC1 this explained-variance ratio.
    #[arg(long = "pc1-ratio")]
    pc1_ratio: Option<f64>,
}

fn parse_model(s: &str) -> Result<ModelKind, String> {
    s.parse::<ModelKind>().map_err(|e| e.to_string())
}

fn parse_subspace(s: &str) -> Result<SubspaceDimension, String> {
    if let Ok(dim) = s.parse::<SubspaceDimension>() {
        return Ok(dim);
    }
    if let Ok(count) = s.parse::<usize>() {
        return Ok(SubspaceDimension::Count(count));
    }
    s.parse::<f64>()
        .map(SubspaceDimension::Fraction)
        .map_err(|_| format!("invalid subspace dimension '{s}'"))
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let cli = Cli::parse();
    match cli.command {
        Command::Build(args) => run_build(args),
        Command::Spectrum(args) => run_spectrum(args),
    }
}

fn load_config(args: &BuildArgs) -> Result<GenerativeModelConfig, String> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
            serde_json::from_str::<GenerativeModelConfig>(&text)
                .map_err(|e| format!("invalid config {}: {e}", path.display()))?
        }
        None => GenerativeModelConfig::default(),
    };
    if let Some(model) = args.model {
        config.model = model;
    }
    if let Some(px) = args.px {
        config.px = px;
    }
    if let Some(py) = args.py {
        config.py = py;
    }
    if let Some(qx) = args.qx {
        config.qx = qx;
    }
    if let Some(qy) = args.qy {
        config.qy = qy;
    }
    if let Some(m) = args.m {
        config.m = m;
    }
    if let Some(ax) = args.ax {
        config.ax = ax;
    }
    if let Some(ay) = args.ay {
        config.ay = ay;
    }
    if let Some(a) = args.a_between {
        config.a_between = a;
    }
    if let Some(r) = args.r_between {
        config.r_between = r;
    }
    if let Some(n) = args.max_n_sigma_trials {
        config.max_n_sigma_trials = n;
    }
    if let Some(thr) = args.expl_var_ratio_thr {
        config.expl_var_ratio_thr = thr;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    config.rotate_within_block |= args.rotate;
    config.verbose |= args.verbose;
    Ok(config)
}

#[derive(Serialize)]
struct BuildOutput<'a> {
    config: &'a GenerativeModelConfig,
    model: &'a ModelConstruction,
}

fn fmt_values(values: &Array1<f64>) -> String {
    values
        .iter()
        .map(|v| format!("{v:.4}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn run_build(args: BuildArgs) -> Result<(), String> {
    let config = load_config(&args)?;
    let model = setup_model(&config).map_err(|e| e.to_string())?;

    if args.json {
        let out = serde_json::to_string_pretty(&BuildOutput {
            config: &config,
            model: &model,
        })
        .map_err(|e| format!("failed to serialize model: {e}"))?;
        println!("{out}");
        return Ok(());
    }

    println!(
        "model built | kind={} | algorithm={} | trials={} | min_eval={:.4e}",
        model.model, model.algorithm, model.trials, model.min_eval
    );
    for advisory in &model.advisories {
        println!("note: {advisory}");
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Quantity", "X", "Y"]);
    table.add_row(Row::from(vec![
        Cell::new("dimension"),
        Cell::new(model.px),
        Cell::new(model.py),
    ]));
    table.add_row(Row::from(vec![
        Cell::new("dominant subspace"),
        Cell::new(model.qx),
        Cell::new(model.qy),
    ]));
    table.add_row(Row::from(vec![
        Cell::new("decay exponent"),
        Cell::new(format!("{:.4}", model.ax)),
        Cell::new(format!("{:.4}", model.ay)),
    ]));
    table.add_row(Row::from(vec![
        Cell::new("explained variance"),
        Cell::new(fmt_values(&model.explained_variance_x)),
        Cell::new(fmt_values(&model.explained_variance_y)),
    ]));
    println!("{table}");

    let mut modes = Table::new();
    modes
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Mode", "True corr", "True assoc", "Singular value"]);
    for k in 0..model.m {
        modes.add_row(Row::from(vec![
            Cell::new(k + 1),
            Cell::new(format!("{:.4}", model.true_corrs[k])),
            Cell::new(format!("{:.4}", model.true_assocs[k])),
            Cell::new(format!("{:.4}", model.singular_values[k])),
        ]));
    }
    println!("{modes}");
    Ok(())
}

fn run_spectrum(args: SpectrumArgs) -> Result<(), String> {
    let decay = match args.pc1_ratio {
        Some(ratio) => {
            decay_exponent_for_explained_variance(args.p, ratio).map_err(|e| e.to_string())?
        }
        None => args.a,
    };
    let eig = power_law_eigenvalues(args.p, decay, 1.0).map_err(|e| e.to_string())?;
    let ratios = explained_variance_ratios(&eig);
    println!("power-law spectrum | p={} | a={decay:.6}", args.p);

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Component", "Eigenvalue", "Ratio", "Cumulative"]);
    let mut cumulative = 0.0;
    for (i, (value, ratio)) in eig.iter().zip(ratios.iter()).enumerate() {
        cumulative += ratio;
        table.add_row(Row::from(vec![
            Cell::new(i + 1),
            Cell::new(format!("{value:.6}")),
            Cell::new(format!("{ratio:.4}")),
            Cell::new(format!("{cumulative:.4}")),
        ]));
    }
    println!("{table}");
    Ok(())
}
