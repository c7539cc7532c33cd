use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use luaot::{
    Chunk, Engine, Runtime,
    aot::{CompileOptions, Compiler, emit},
};

#[derive(Parser)]
#[command(name = "luaot")]
#[command(about = "Ahead-of-time compiler for register bytecode chunks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a chunk into a Rust module
    Compile {
        /// The chunk to compile
        input: PathBuf,

        /// Output file, must end in `.rs`
        #[arg(short, long)]
        output: String,

        /// Leave out the disassembly comments
        #[arg(long)]
        no_comments: bool,

        /// Annotate every instruction with its protection class
        #[arg(long)]
        protection: bool,
    },

    /// Compile a chunk in-process and run it
    Run {
        /// The chunk to run
        input: PathBuf,

        /// Run every function through the interpreter instead
        #[arg(long)]
        interpret: bool,
    },

    /// Print a listing of a chunk
    Disasm {
        /// The chunk to list
        input: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("luaot: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Compile {
            input,
            output,
            no_comments,
            protection,
        } => {
            let module = emit::module_name(&output)?;
            let chunk = read(&input)?;
            let mut compiler = Compiler::new(CompileOptions {
                comments: !no_comments,
                protection,
            });
            let source = compiler.emit(&module, &chunk)?;
            std::fs::write(&output, source).with_context(|| format!("cannot write {output}"))?;
            tracing::debug!(%output, %module, "wrote module");
        }
        Commands::Run { input, interpret } => {
            let chunk = read(&input)?;
            let mut rt = Runtime::new();
            if interpret {
                rt.set_engine(Engine::Interpreted);
            }
            rt.execute_module(&chunk)?;
            tracing::debug!(stats = ?rt.stats(), "finished");
        }
        Commands::Disasm { input } => {
            let chunk = read(&input)?;
            print!("{}", chunk.main.listing());
        }
    }
    Ok(())
}

fn read(path: &Path) -> anyhow::Result<Chunk> {
    Ok(Chunk::read(path)?)
}
