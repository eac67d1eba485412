/*
 * runq - Command Line Launcher
 * Copyright (C) 2025 runq team
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! runq - submit a command against a workspace and follow it to completion
//!
//! ```text
//! runq [--workspace dev] [--path ./infra] plan -- -out=plan.tfplan
//! runq workspace new dev --secret cloud-creds --privileged-commands apply,destroy
//! ```
//!
//! Exits with the remote command's exit code.

use clap::{Args, Parser, Subcommand};
use controller::crds::RunCommand;
use launcher::provision::provision;
use launcher::{KubeConnector, LaunchError, Launcher, LauncherConfig, NewWorkspace, Timeouts};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "runq")]
#[command(about = "Run a command against a runq workspace", long_about = None)]
#[command(version)]
#[command(args_conflicts_with_subcommands = true, subcommand_negates_reqs = true)]
struct Cli {
    #[command(subcommand)]
    subcommand: Option<Commands>,

    /// Namespace of the workspace (defaults to the environment marker, then "default")
    #[arg(long, short = 'n', env = "RUNQ_NAMESPACE")]
    namespace: Option<String>,

    /// Workspace to run against (defaults to the environment marker, then "default")
    #[arg(long, short = 'w', env = "RUNQ_WORKSPACE")]
    workspace: Option<String>,

    /// Configuration directory to upload
    #[arg(long, short = 'p', default_value = ".")]
    path: PathBuf,

    /// Follow logs instead of attaching, even on a terminal
    #[arg(long)]
    no_tty: bool,

    /// Seconds to wait for the run to be queued
    #[arg(long = "timeout-enqueue", default_value_t = 10)]
    enqueue_timeout: u64,

    /// Seconds to wait at the back of the queue
    #[arg(long = "timeout-queue", default_value_t = 3600)]
    queue_timeout: u64,

    /// Seconds to wait for the controller to pick up the run
    #[arg(long = "timeout-reconcile", default_value_t = 10)]
    reconcile_timeout: u64,

    /// Seconds to wait for the pod once the run is attachable
    #[arg(long = "timeout-ready", default_value_t = 60)]
    ready_timeout: u64,

    /// Seconds the pod waits for the handshake
    #[arg(long = "timeout-handshake", default_value_t = 10)]
    handshake_timeout: u64,

    /// Command to run (a terraform subcommand or "sh")
    #[arg(required = true)]
    command: Option<String>,

    /// Arguments passed to the command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage workspaces
    Workspace {
        #[command(subcommand)]
        action: WorkspaceCommand,
    },
}

#[derive(Subcommand)]
enum WorkspaceCommand {
    /// Create a workspace and make it the default for the configuration directory
    New(NewWorkspaceArgs),
}

#[derive(Args)]
struct NewWorkspaceArgs {
    /// Name of the new workspace
    name: String,

    /// Namespace to create the workspace in
    #[arg(long, short = 'n', env = "RUNQ_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Configuration directory to write the environment marker into
    #[arg(long, short = 'p', default_value = ".")]
    path: PathBuf,

    /// Size of the cache volume
    #[arg(long)]
    size: Option<String>,

    /// Storage class of the cache volume (empty disables dynamic provisioning)
    #[arg(long, env = "RUNQ_STORAGE_CLASS")]
    storage_class: Option<String>,

    /// ServiceAccount run pods execute as
    #[arg(long)]
    service_account: Option<String>,

    /// Secret exposed to run pods as environment variables
    #[arg(long)]
    secret: Option<String>,

    /// Commands that need approval before they run (comma-separated)
    #[arg(long, value_delimiter = ',')]
    privileged_commands: Vec<String>,

    /// Repository the configuration is sourced from
    #[arg(long)]
    repository: Option<String>,

    /// Branch the configuration is sourced from
    #[arg(long)]
    branch: Option<String>,

    /// Path of the configuration within the repository
    #[arg(long)]
    working_dir: Option<String>,

    /// Seconds to wait for the controller to pick up the workspace
    #[arg(long = "timeout-reconcile", default_value_t = 10)]
    reconcile_timeout: u64,

    /// Seconds to wait for the workspace to become ready
    #[arg(long = "timeout-ready", default_value_t = 60)]
    ready_timeout: u64,

    /// Keep the workspace when it fails to become ready
    #[arg(long)]
    no_cleanup: bool,
}

impl NewWorkspaceArgs {
    fn into_spec(self) -> Result<(NewWorkspace, PathBuf), LaunchError> {
        for command in &self.privileged_commands {
            command.parse::<RunCommand>()?;
        }

        let mut spec = NewWorkspace::new(self.name, self.namespace);
        spec.cache_size = self.size;
        spec.storage_class = self.storage_class;
        spec.service_account = self.service_account;
        spec.secret = self.secret;
        spec.privileged_commands = self.privileged_commands;
        spec.repository = self.repository;
        spec.branch = self.branch;
        spec.working_dir = self.working_dir;
        spec.reconcile_timeout = Duration::from_secs(self.reconcile_timeout);
        spec.ready_timeout = Duration::from_secs(self.ready_timeout);
        spec.cleanup = !self.no_cleanup;
        Ok((spec, self.path))
    }
}

impl Cli {
    fn timeouts(&self) -> Timeouts {
        Timeouts {
            enqueue: Duration::from_secs(self.enqueue_timeout),
            queue: Duration::from_secs(self.queue_timeout),
            reconcile: Duration::from_secs(self.reconcile_timeout),
            ready: Duration::from_secs(self.ready_timeout),
            handshake: Duration::from_secs(self.handshake_timeout),
            ..Timeouts::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Pod output owns stdout
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match launch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(LaunchError::ExitCode(code)) => {
            debug!("Command exited with code {}", code);
            exit_code(code)
        }
        Err(err) => {
            error!("{}", err);
            exit_code(err.exit_code())
        }
    }
}

async fn launch(mut cli: Cli) -> Result<(), LaunchError> {
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    match cli.subcommand.take() {
        Some(Commands::Workspace {
            action: WorkspaceCommand::New(args),
        }) => {
            let (spec, dir) = args.into_spec()?;
            let client = kube::Client::try_default().await?;
            provision(&client, &spec, &dir, &cancel).await
        }
        None => run_command(cli, cancel).await,
    }
}

async fn run_command(cli: Cli, cancel: CancellationToken) -> Result<(), LaunchError> {
    let timeouts = cli.timeouts();
    let Some(command) = cli.command else {
        return Err(LaunchError::Config(anyhow::anyhow!("no command given")));
    };

    let mut config = LauncherConfig::resolve(&cli.path, cli.namespace, cli.workspace)?;
    config.interactive = !cli.no_tty && std::io::stdin().is_terminal();
    config.timeouts = timeouts;

    let client = kube::Client::try_default().await?;
    let connector = KubeConnector::new(client.clone(), &config.namespace, config.timeouts.handshake);

    let launcher = Launcher::new(client, config, connector, cancel);
    launcher.run(&cli.path, &command, cli.args).await
}

fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}
