use clap::Parser;
use std::path::PathBuf;

use mexgen::pipeline::{build_manifest, run_files, RunOptions};
use mexgen::registry::ComplexFlavor;
use mexgen::stubgen::StubWriter;

#[derive(Parser, Debug)]
#[command(
    name = "mexgen",
    version,
    about = "mexgen — compiles .mw interface definitions to MEX glue code and host caller stubs"
)]
struct Cli {
    /// Input .mw interface files, processed in order
    #[arg(required = true)]
    sources: Vec<PathBuf>,

    /// Output C glue file
    #[arg(short = 'c', long = "cfile")]
    cfile: Option<PathBuf>,

    /// Combined caller stub file
    #[arg(short = 'm', long = "mfile")]
    mfile: Option<PathBuf>,

    /// One stub file per @function block, named after the function
    #[arg(long = "mb")]
    batch: bool,

    /// List the stub files a --mb run would generate, without writing them
    #[arg(long)]
    list: bool,

    /// Gateway name caller stubs dispatch through
    #[arg(long = "mex", default_value = "mexfunction")]
    mex: String,

    /// Generate device-array support
    #[arg(long)]
    gpu: bool,

    /// Wrap generated calls in try/catch
    #[arg(long = "catch")]
    catch_exceptions: bool,

    /// Emit C99 _Complex typedefs for dcomplex/fcomplex
    #[arg(long = "c99complex", conflicts_with = "cppcomplex")]
    c99complex: bool,

    /// Emit std::complex typedefs for dcomplex/fcomplex
    #[arg(long = "cppcomplex")]
    cppcomplex: bool,

    /// Integer promotion policy level
    #[arg(short = 'i', long = "promote", default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=4))]
    promote: u8,

    /// Write a JSON run summary to this file
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Print compiler phases and counts
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        for s in &cli.sources {
            eprintln!("mexgen: source = {}", s.display());
        }
        eprintln!("mexgen: gateway = {}", cli.mex);
    }

    let complex = if cli.c99complex {
        ComplexFlavor::C99
    } else if cli.cppcomplex {
        ComplexFlavor::Cpp
    } else {
        ComplexFlavor::None
    };

    let opts = RunOptions {
        gateway: cli.mex.clone(),
        gpu: cli.gpu,
        catch_exceptions: cli.catch_exceptions,
        complex,
        promote: cli.promote,
    };

    let stubs = if cli.batch || cli.list {
        StubWriter::batched()
    } else if let Some(mfile) = &cli.mfile {
        StubWriter::single(&mfile.display().to_string())
    } else {
        StubWriter::disabled()
    };

    let result = match run_files(&cli.sources, stubs, &opts) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("mexgen: error: {e}");
            std::process::exit(2);
        }
    };

    for d in &result.diagnostics {
        eprintln!("mexgen: {d}");
    }
    if result.has_errors() {
        std::process::exit(1);
    }

    if cli.verbose {
        eprintln!(
            "mexgen: {} unique signatures, {} stub files",
            result.signatures.len(),
            result.stubs.file_names().len()
        );
    }

    if cli.list {
        for name in result.stubs.file_names() {
            println!("{name}");
        }
        return;
    }

    if let Some(cfile) = &cli.cfile {
        if let Err(e) = std::fs::write(cfile, &result.glue) {
            eprintln!("mexgen: error: {}: {e}", cfile.display());
            std::process::exit(2);
        }
    }

    if let Err(e) = result.stubs.flush(std::path::Path::new(".")) {
        eprintln!("mexgen: error: {e}");
        std::process::exit(2);
    }

    if let Some(path) = &cli.manifest {
        let manifest = build_manifest(&result, &opts);
        let json = match serde_json::to_string_pretty(&manifest) {
            Ok(j) => j,
            Err(e) => {
                eprintln!("mexgen: error: {e}");
                std::process::exit(2);
            }
        };
        if let Err(e) = std::fs::write(path, json + "\n") {
            eprintln!("mexgen: error: {}: {e}", path.display());
            std::process::exit(2);
        }
    }
}
