use std::fs;

use anyhow::Context;
use clap::Parser;

use popart::ir::ast::ComponentDecl;
use popart::options::{BackendOptions, Integrator, NumericMode};

#[derive(Parser, Debug)]
#[command(version, about = "Population/part model backend", long_about = None)]
struct Args {
    /// The model tree (*.json) produced by the front end
    #[arg(name = "MODEL_FILE")]
    model_file: String,

    /// Write the generated source here instead of stdout
    #[arg(short, long, default_value = "")]
    output: String,

    /// Numeric representation: float, double, or fixed
    #[arg(short, long, default_value = "double")]
    numeric: String,

    /// Bit width for fixed-point mode
    #[arg(long, default_value_t = 32)]
    fixed_bits: u8,

    /// Integrator: euler or rk4
    #[arg(short, long, default_value = "euler")]
    integrator: String,

    /// Verbose output
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    popart::init_logger();
    let args = Args::parse();
    let bar = "=".repeat(40);

    let text = fs::read_to_string(&args.model_file)
        .with_context(|| format!("reading {}", args.model_file))?;
    let decl: ComponentDecl =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", args.model_file))?;

    if args.verbose {
        println!("\n\n{}", bar);
        println!("MODEL");
        println!("{}", bar);
        println!("{:#?}", decl);
    }

    let mut options = BackendOptions::default();
    options.numeric = match args.numeric.as_str() {
        "float" => NumericMode::Float32,
        "double" => NumericMode::Float64,
        "fixed" => NumericMode::Fixed {
            bits: args.fixed_bits,
        },
        other => anyhow::bail!("unknown numeric mode '{}'", other),
    };
    options.integrator = Integrator::parse(&args.integrator)
        .with_context(|| format!("unknown integrator '{}'", args.integrator))?;

    let generated = popart::compile(&decl, &options)?;

    if args.verbose {
        println!("\n\n{}", bar);
        println!("GENERATE");
        println!("{}", bar);
    }

    if args.output.is_empty() {
        println!("{generated}");
    } else {
        fs::write(&args.output, generated).with_context(|| format!("writing {}", args.output))?;
        if args.verbose {
            println!("wrote {}", args.output);
        }
    }

    Ok(())
}
