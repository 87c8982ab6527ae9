use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use antfarm_app::{ControlHandle, MatchConfig};
use antfarm_core::World;
use tracing::{error, info};

fn main() -> Result<()> {
    init_tracing();
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("compile") => {
            let sources: Vec<PathBuf> = args.map(PathBuf::from).collect();
            if sources.is_empty() {
                bail!("usage: antfarm compile <source>...");
            }
            compile_all(&sources)
        }
        Some("run") => {
            let Some(config) = args.next().map(PathBuf::from) else {
                bail!("usage: antfarm run <match-config>");
            };
            run_match(&config)
        }
        _ => bail!("usage: antfarm <compile|run> ..."),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Compile each source to `<source>.bin`, continuing past failures so a
/// batch reports every broken file at once.
fn compile_all(sources: &[PathBuf]) -> Result<()> {
    let mut failures = 0usize;
    for source in sources {
        match compile_one(source) {
            Ok(output) => info!(source = %source.display(), output = %output.display(), "compiled"),
            Err(err) => {
                error!(source = %source.display(), "{err:#}");
                failures += 1;
            }
        }
    }
    if failures > 0 {
        bail!("{failures} of {} files failed to compile", sources.len());
    }
    Ok(())
}

fn compile_one(source: &Path) -> Result<PathBuf> {
    let text = std::fs::read_to_string(source)
        .with_context(|| format!("cannot read {}", source.display()))?;
    let class = antfarm_compiler::compile(&text)?;
    let mut output = source.as_os_str().to_owned();
    output.push(".bin");
    let output = PathBuf::from(output);
    std::fs::write(&output, class.to_bytes()?)
        .with_context(|| format!("cannot write {}", output.display()))?;
    Ok(output)
}

fn run_match(config_path: &Path) -> Result<()> {
    let config = MatchConfig::load(config_path)?;
    let rosters = config.load_rosters()?;
    let world = World::new(config.simulation, rosters)?;
    let mut handle = ControlHandle::new(world);
    handle.start()?;

    loop {
        let state = handle.state();
        if state.is_terminal() {
            break;
        }
        info!(
            state = %state,
            cycle = handle.cycle()?,
            ants = ?handle.live_counts()?,
            "match in progress"
        );
        std::thread::sleep(Duration::from_secs(1));
    }

    let state = handle.wait_until_stopped()?;
    match handle.fault()? {
        Some(fault) => error!(state = %state, %fault, "match aborted"),
        None => info!(state = %state, cycle = handle.cycle()?, "match over"),
    }
    Ok(())
}
