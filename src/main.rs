use anyhow::Context;
use clap::Parser;
use futures_util::stream::{self, Stream, StreamExt};
use std::process::ExitCode;
use std::time::Duration;

use rouster::runtime::{DEFAULT_IMAGE, DEFAULT_RUNTIME};
use rouster::session::DEFAULT_SHELL;
use rouster::{ExecCommand, SessionConfig, SessionController};

/// Run commands inside a throw-away container
#[derive(Parser, Debug)]
#[command(name = "rouster", version)]
struct Cli {
    /// Image to run
    #[arg(short, long, value_name = "IMAGE", default_value = DEFAULT_IMAGE)]
    image: String,

    /// Container runtime executable to use
    #[arg(short, long = "docker", value_name = "EXECUTABLE", default_value = DEFAULT_RUNTIME, env = "ROUSTER_DOCKER")]
    docker: String,

    /// Shell command the container runs as its main process
    #[arg(short, long, value_name = "COMMAND", default_value = DEFAULT_SHELL)]
    shell: String,

    /// Command to execute in the container once it is running (repeatable)
    #[arg(short, long = "execute", value_name = "COMMAND")]
    execute: Vec<String>,

    /// Working directory inside the container
    #[arg(short, long = "workingdir", value_name = "DIRECTORY")]
    workingdir: Option<String>,

    /// Mount a directory into the container, host:container (repeatable)
    #[arg(short, long = "volume", value_name = "HOST:CONTAINER")]
    volume: Vec<String>,

    /// Publish a container port on the host, hostPort:containerPort (repeatable)
    #[arg(short, long = "publish", value_name = "HOST_PORT:CONTAINER_PORT")]
    publish: Vec<String>,

    /// Don't remove the container when complete
    #[arg(short = 'r', long = "no-rm")]
    no_rm: bool,

    /// Don't kill or remove the container when complete
    #[arg(short = 'k', long = "no-kill")]
    no_kill: bool,

    /// Wrap a currently running container instead of starting one
    #[arg(short, long = "container-id", value_name = "CONTAINER_ID")]
    container_id: Option<String>,

    /// Print the container id and status once everything is complete
    #[arg(short = 'u', long = "output-status")]
    output_status: bool,

    /// Pull the image before starting the container
    #[arg(long)]
    pull: bool,

    /// Kill any single runtime invocation that runs longer than this
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Log every lifecycle event
    #[arg(long, visible_alias = "loud")]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> SessionConfig {
        SessionConfig {
            image: self.image,
            runtime: self.docker,
            shell: self.shell,
            verbose: self.verbose,
            working_dir: self.workingdir,
            volumes: self.volume,
            publish: self.publish,
            remove_on_exit: !self.no_rm,
            kill_on_exit: !self.no_kill,
            attach_to: self.container_id,
            output_status: self.output_status,
            pull: self.pull,
            exec: self.execute.into_iter().map(ExecCommand::from).collect(),
            timeout: self.timeout.map(Duration::from_secs),
        }
    }
}

fn init_logging(verbose: bool) {
    let mut builder = pretty_env_logger::formatted_builder();
    builder.filter_level(if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    });
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

/// Every Ctrl-C press, until the signal handler can no longer be installed
fn ctrl_c_presses() -> impl Stream<Item = ()> {
    stream::unfold((), |()| async { tokio::signal::ctrl_c().await.ok().map(|()| ((), ())) })
}

/// Call `on_interrupt` for each signal so a later press still reaches the
/// command running at that moment
async fn forward_interrupts<S, F>(signals: S, on_interrupt: F)
where
    S: Stream<Item = ()>,
    F: Fn(),
{
    tokio::pin!(signals);
    while signals.next().await.is_some() {
        log::warn!("Interrupted, terminating the running command");
        on_interrupt();
    }
}

async fn run(config: SessionConfig) -> anyhow::Result<()> {
    let mut controller = SessionController::new(config);

    let cancel = controller.cancel_handle();
    tokio::spawn(forward_interrupts(ctrl_c_presses(), move || cancel.cancel()));

    let report = controller.run().await.context("Session failed")?;

    let failed = report.results.failures().count();
    if failed > 0 {
        log::warn!(
            "{} of {} commands failed",
            failed,
            report.results.len()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = cli.into_config();
    log::debug!("Starting session with {:?}", config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
