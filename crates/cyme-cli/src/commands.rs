//! Command handlers for CLI subcommands.
//!
//! Every handler returns a promise so the same code runs on both backends:
//! the eager backend settles it before returning, the async backend is
//! awaited on a current-thread runtime inside a `LocalSet`.

use cyme_branch::{Branch, BranchConfig, Outcome};
use cyme_runtime::{AsyncBackend, Backend, BackendKind, EagerBackend, Promise};
use tokio::task::LocalSet;
use tracing::{debug, info};

use crate::cli::{Cli, Commands};
use crate::error::{CliError, Result};

/// Execute the parsed command line.
pub fn execute(cli: &Cli) -> Result<()> {
    let config = cli.config();
    info!(
        id = %config.id,
        workdir = %config.workdir.display(),
        backend = %cli.backend,
        "running command"
    );

    match cli.backend {
        BackendKind::Eager => {
            let branch = Branch::new(config, EagerBackend::new());
            let done = dispatch(&cli.command, &branch)?;
            settled(&done)
        }
        BackendKind::Async => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let local = LocalSet::new();
            local.block_on(&runtime, async {
                let branch = Branch::new(config, AsyncBackend::new());
                let done = dispatch(&cli.command, &branch)?;
                let state = done.wait().await;
                debug!(?state, "command settled");
                settled(&done)
            })
        }
    }
}

/// Starts `command` against `branch`.
pub fn dispatch<B: Backend>(command: &Commands, branch: &Branch<B>) -> Result<Promise<(), CliError>> {
    let done = match command {
        Commands::Start { timing } => lifecycle(&branch.start(&timing.options())),
        Commands::Stop { signal, timing } => {
            lifecycle(&branch.stop(&timing.options().with_signal((*signal).into())))
        }
        Commands::Kill { timing } => lifecycle(&branch.force_stop(&timing.options())),
        Commands::Restart { timing } => lifecycle(&branch.restart(&timing.options())),
        Commands::Status => cmd_status(branch),
        Commands::Ping => cmd_ping(branch)?,
        Commands::Apps => cmd_apps(branch)?,
    };
    Ok(done)
}

/// Turns a settled promise into the command result.
fn settled(done: &Promise<(), CliError>) -> Result<()> {
    done.result().unwrap_or(Err(CliError::Unsettled))
}

/// Completes with `()` once `upstream` succeeds, after running `report`.
fn finish<T, F, R>(upstream: &Promise<T, F>, report: R) -> Promise<(), CliError>
where
    T: 'static,
    F: Clone + 'static,
    CliError: From<F>,
    R: FnOnce(&T) + 'static,
{
    let done = Promise::linked(upstream);
    let target = done.clone();
    upstream.on_success(move |value| {
        report(value);
        target.succeed(());
    });
    done
}

fn lifecycle(outcome: &Promise<Outcome, cyme_branch::BranchError>) -> Promise<(), CliError> {
    // The status line already shows the outcome.
    finish(outcome, |outcome| debug!(%outcome, "lifecycle command finished"))
}

fn cmd_status<B: Backend>(branch: &Branch<B>) -> Promise<(), CliError> {
    print_config(branch.config(), branch.backend().kind());
    match branch.pid() {
        Ok(pid) => println!("  pid:       {}", pid),
        Err(err) => println!("  pid:       - ({})", err),
    }
    finish(&branch.is_alive(), |alive| {
        println!("  alive:     {}", if *alive { "yes" } else { "no" });
    })
}

fn print_config(config: &BranchConfig, backend: BackendKind) {
    println!("cyme-branch {}", config.id);
    println!("  workdir:   {}", config.workdir.display());
    println!("  url:       {}", config.url());
    println!("  broker:    {}", config.broker);
    println!("  pidfile:   {}", config.pidfile().display());
    println!("  logfile:   {}", config.logfile().display());
    println!("  backend:   {}", backend);
}

fn cmd_ping<B: Backend>(branch: &Branch<B>) -> Result<Promise<(), CliError>> {
    let client = branch.client()?;
    let url = client.url().to_string();
    let done = Promise::new();
    let target = done.clone();
    client.ping().on_success(move |alive| {
        if *alive {
            println!("pong");
            target.succeed(());
        } else {
            target.fail(CliError::NotResponding(url));
        }
    });
    Ok(done)
}

fn cmd_apps<B: Backend>(branch: &Branch<B>) -> Result<Promise<(), CliError>> {
    let client = branch.client()?;
    let names = client.apps().all_names();
    Ok(finish(&names, |names| {
        for name in names {
            println!("{}", name);
        }
    }))
}
