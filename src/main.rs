//! kernelctx CLI
//!
//! Main entry point for the `kctx` command.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use kernelctx::{
    Context, ContextConfig, ElementType, HostArray, KernelError, KernelTemplate, Placeholder,
    Substitutions,
};

#[derive(Parser)]
#[command(name = "kctx")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Templated map/reduce compute kernels", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Context configuration (TOML)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply an element-wise expression to one or more arrays
    Map {
        /// Element type of every array
        #[arg(short = 't', long = "type", value_enum, default_value = "float32")]
        element_type: ElementType,

        /// Expression evaluated per index `i`, e.g. `x[i] * y[i]`
        #[arg(short, long)]
        expr: String,

        /// Named input, e.g. `x=1,2,3`
        #[arg(short, long = "arg", value_name = "NAME=VALUES", required = true)]
        args: Vec<String>,

        /// Work-group size
        #[arg(short, long)]
        local_size: Option<usize>,
    },

    /// Reduce an array to one value
    Reduce {
        /// Element type of the array
        #[arg(short = 't', long = "type", value_enum, default_value = "float32")]
        element_type: ElementType,

        /// Operator over `a` and `b`, e.g. `a + b`
        #[arg(short, long, default_value = "a + b")]
        op: String,

        /// Identity of the operator
        #[arg(short, long)]
        base: Option<String>,

        /// Work-group size (power of two)
        #[arg(short, long)]
        local_size: Option<usize>,

        /// Comma-separated values
        #[arg(value_name = "VALUES")]
        values: String,
    },

    /// Render a kernel template
    Render {
        /// Template file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Substitution, e.g. `TYPE=float`
        #[arg(short, long = "set", value_name = "NAME=TEXT")]
        set: Vec<String>,
    },

    /// Build kernel source on the device and report the build log
    Build {
        /// Kernel source file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Kernel entry point
        #[arg(short, long)]
        entry: String,
    },

    /// Parse kernel source and print the AST as JSON
    Parse {
        /// Kernel source file
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Show information about the compute device
    Info,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    let config = match &cli.config {
        Some(path) => ContextConfig::load(path)?,
        None => ContextConfig::default(),
    };

    match cli.command {
        Commands::Map {
            element_type,
            expr,
            args,
            local_size,
        } => map(config, element_type, &expr, &args, local_size, cli.json),

        Commands::Reduce {
            element_type,
            op,
            base,
            local_size,
            values,
        } => reduce(
            config,
            element_type,
            &op,
            base.as_deref(),
            local_size,
            &values,
            cli.json,
        ),

        Commands::Render { input, set } => render(&input, &set),

        Commands::Build { input, entry } => build(config, &input, &entry),

        Commands::Parse { input } => parse(&input),

        Commands::Info => info(config, cli.json),
    }
}

fn read_source(input: &Path) -> Result<String> {
    std::fs::read_to_string(input)
        .map_err(|e| miette::miette!("Failed to read {}: {}", input.display(), e))
}

fn parse_values(ty: ElementType, text: &str) -> Result<HostArray> {
    let values = text
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<f64>()
                .map_err(|e| miette::miette!("invalid value `{}`: {}", v, e))
        })
        .collect::<Result<Vec<f64>>>()?;
    Ok(HostArray::from_f64s(ty, &values))
}

fn print_values(values: &[f64], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(values).into_diagnostic()?);
    } else {
        let text: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        println!("{}", text.join(", "));
    }
    Ok(())
}

fn map(
    config: ContextConfig,
    ty: ElementType,
    expr: &str,
    args: &[String],
    local_size: Option<usize>,
    json: bool,
) -> Result<()> {
    let mut names = Vec::with_capacity(args.len());
    let mut arrays = Vec::with_capacity(args.len());
    for arg in args {
        let (name, values) = arg
            .split_once('=')
            .ok_or_else(|| miette::miette!("expected NAME=VALUES, got `{}`", arg))?;
        names.push(name.trim());
        arrays.push(parse_values(ty, values)?);
    }

    let mut ctx = Context::with_config(config)?;
    let out = match local_size {
        Some(local) => run_map_kernel(&mut ctx, ty, &names, expr, &arrays, local)?,
        None => ctx.map(&names, expr, &arrays)?,
    };
    print_values(&out.to_f64_vec(), json)
}

fn run_map_kernel(
    ctx: &mut Context,
    ty: ElementType,
    names: &[&str],
    expr: &str,
    arrays: &[HostArray],
    local: usize,
) -> kernelctx::Result<HostArray> {
    let kernel = ctx.map_kernel(ty, names, expr, Some(local))?;
    let length = arrays.first().map_or(0, HostArray::len);
    if length == 0 {
        return Ok(HostArray::zeros(ty, 0));
    }
    let inputs = arrays
        .iter()
        .map(|array| ctx.transfer_to_device(array))
        .collect::<kernelctx::Result<Vec<_>>>()?;
    let result = kernel.run(ctx, None, length, &inputs)?;
    ctx.transfer_from_device(result, None)
}

fn reduce(
    config: ContextConfig,
    ty: ElementType,
    op: &str,
    base: Option<&str>,
    local_size: Option<usize>,
    values: &str,
    json: bool,
) -> Result<()> {
    let data = parse_values(ty, values)?;
    let mut ctx = Context::with_config(config)?;
    let value = ctx.reduce(&data, op, base, local_size)?;
    if json {
        println!("{}", serde_json::json!({ "value": value }));
    } else {
        println!("{}", value);
    }
    Ok(())
}

fn render(input: &Path, set: &[String]) -> Result<()> {
    let template = KernelTemplate::new(read_source(input)?).map_err(KernelError::from)?;
    let mut subs = Substitutions::new();
    for entry in set {
        let (name, text) = entry
            .split_once('=')
            .ok_or_else(|| miette::miette!("expected NAME=TEXT, got `{}`", entry))?;
        let placeholder = Placeholder::from_name(name.trim_start_matches('$'))
            .ok_or_else(|| miette::miette!("unknown placeholder `{}`", name))?;
        subs.insert(placeholder, text);
    }
    let source = template.render(&subs).map_err(KernelError::from)?;
    print!("{}", source);
    Ok(())
}

fn build(config: ContextConfig, input: &Path, entry: &str) -> Result<()> {
    let source = read_source(input)?;
    let mut ctx = Context::with_config(config)?;
    let kernel = ctx.compile(&source, entry)?;
    println!(
        "Built `{}` ({} parameters) on {}",
        kernel.entry(),
        kernel.param_count(),
        ctx.device_info().name
    );
    Ok(())
}

fn parse(input: &Path) -> Result<()> {
    let source = read_source(input)?;
    let name = input.display().to_string();
    let program = kernelctx::parser::parse_source(&source)
        .map_err(|e| miette::Report::new(e.into_report(&name, &source)))?;
    let json = serde_json::to_string_pretty(&program)
        .map_err(|e| miette::miette!("Failed to serialize AST: {}", e))?;
    println!("{}", json);
    Ok(())
}

fn info(config: ContextConfig, json: bool) -> Result<()> {
    let ctx = Context::with_config(config)?;
    let device = ctx.device_info();
    if json {
        let value = serde_json::json!({
            "version": kernelctx::VERSION,
            "device": device,
            "config": ctx.config(),
        });
        println!("{}", serde_json::to_string_pretty(&value).into_diagnostic()?);
        return Ok(());
    }

    println!("kernelctx {}", kernelctx::VERSION);
    println!();
    println!("Device:");
    println!("  Name:                {}", device.name);
    println!("  Type:                {}", device.device_type);
    println!("  Compute units:       {}", device.compute_units);
    println!("  Max work-group size: {}", device.max_work_group_size);
    println!("  Work-item dims:      {}", device.max_work_item_dimensions);
    println!("  Local memory:        {} bytes", device.local_mem_size);
    println!("  Global memory:       {} bytes", device.global_mem_size);
    println!();
    println!("Defaults:");
    println!("  Local size:          {}", ctx.config().local_size);
    Ok(())
}
