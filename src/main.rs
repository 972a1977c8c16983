use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use svg_guard::{CallContext, Outcome, Policy, Settings, SvgValidator, Verdict};

/// Validate and sanitize untrusted SVG files.
#[derive(Debug, Parser)]
#[command(name = "svg-guard", version)]
struct Cli {
    /// SVG file to check, or `-` for stdin
    input: PathBuf,

    /// Settings file (TOML)
    #[arg(short, long, env = "SVG_GUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Whitelist JSON, overriding the settings; relative to the working directory
    #[arg(short, long)]
    whitelist: Option<PathBuf>,

    /// Upload field whose overrides apply
    #[arg(short, long)]
    field: Option<String>,

    /// Only report the verdict; never print sanitized output
    #[arg(long)]
    check: bool,

    /// Write sanitized output here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(Verdict::Invalid(reason)) => {
            eprintln!("invalid: {}", reason);
            ExitCode::from(1)
        }
        Ok(verdict) => {
            eprintln!("{}", if verdict == Verdict::Valid { "valid" } else { "sanitized" });
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(2)
        }
    }
}

fn run(cli: &Cli) -> Result<Verdict, svg_guard::Error> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(path) = &cli.whitelist {
        settings.override_whitelist(load_whitelist(path)?);
    }

    let ctx = CallContext {
        field: cli.field.clone(),
    };
    log::debug!("Checking {} (field: {:?})", cli.input.display(), ctx.field);

    let input = read_input(&cli.input)?;
    let Outcome { verdict, output } = SvgValidator::new(settings).check(&input, &ctx);

    if let (false, Some(bytes)) = (cli.check, output) {
        write_output(cli.output.as_deref(), &bytes)?;
    }
    Ok(verdict)
}

/// A whitelist named on the command line must load; there is no fallback.
fn load_whitelist(path: &Path) -> Result<String, svg_guard::Error> {
    let json = std::fs::read_to_string(path).map_err(|source| svg_guard::Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Policy::from_json(&json)?;
    Ok(json)
}

fn read_input(path: &Path) -> Result<Vec<u8>, svg_guard::Error> {
    let io_err = |source: std::io::Error| svg_guard::Error::Io {
        path: path.to_path_buf(),
        source,
    };
    if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf).map_err(io_err)?;
        Ok(buf)
    } else {
        std::fs::read(path).map_err(io_err)
    }
}

fn write_output(path: Option<&Path>, bytes: &[u8]) -> Result<(), svg_guard::Error> {
    match path {
        Some(path) => std::fs::write(path, bytes).map_err(|source| svg_guard::Error::Io {
            path: path.to_path_buf(),
            source,
        }),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(bytes)
                .and_then(|_| stdout.flush())
                .map_err(|source| svg_guard::Error::Io {
                    path: PathBuf::from("-"),
                    source,
                })
        }
    }
}
