use std::io;
use std::process;
use std::sync::Arc;

use anyhow::Result;
use clap::CommandFactory;
use tracing::error;

use kuberuntime::cli::{self, Commands};
use kuberuntime::executor::{CommandRunner, LocalRunner};
use kuberuntime::sysinit::{ServiceManager, Systemd};

fn main() -> Result<()> {
    let args = cli::parse_args()?;

    let Some(common) = args.command.common() else {
        if let Commands::Completions(opts) = &args.command {
            let mut cmd = cli::Cli::command();
            clap_complete::generate(opts.shell, &mut cmd, env!("CARGO_PKG_NAME"), &mut io::stdout());
        }
        return Ok(());
    };

    kuberuntime::init_logging(common.log_level)?;

    let runner: Arc<dyn CommandRunner> = Arc::new(LocalRunner::new(common.dry_run));
    let init: Arc<dyn ServiceManager> = Arc::new(Systemd::new(Arc::clone(&runner)));

    let mut stdout = io::stdout().lock();
    let result = match &args.command {
        Commands::Status(opts) => kuberuntime::run_status(opts, runner, init, &mut stdout),
        Commands::Enable(opts) => kuberuntime::run_enable(opts, runner, init),
        Commands::Disable(opts) => kuberuntime::run_disable(opts, runner, init),
        Commands::Preload(opts) => kuberuntime::run_preload(opts, runner, init),
        Commands::Images(opts) => kuberuntime::run_images(opts, runner, init, &mut stdout),
        Commands::Containers(opts) => kuberuntime::run_containers(opts, runner, init, &mut stdout),
        Commands::Completions(_) => Ok(()),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        process::exit(1);
    }

    Ok(())
}
