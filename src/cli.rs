use crate::config::types::{
    CgrunError, CpuBudget, RunConfig, SubsystemSet, DEFAULT_MOUNTINFO_PATH, DEFAULT_OUTPUT_PATH,
    DEFAULT_SUBSYSTEMS, EXIT_BUDGET_EXCEEDED, EXIT_FAILURE, EXIT_USAGE,
};
use crate::config::validator::validate_config;
use crate::core::{Accountant, Supervisor, SupervisionResult};
use crate::kernel::rlimit::install_cpu_limit;
use crate::kernel::signal::SignalMaskGuard;
use crate::observability::diagnostics::{DiagnosticKind, Diagnostics, PROGRAM_TAG};
use crate::utils::output::ReportWriter;
use crate::verdict::budget::BudgetVerdict;
use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "cgrun",
    author,
    version,
    about = "Run a command under a CPU budget, relay signals to it and record its cgroup usage",
    long_about = None
)]
struct Cli {
    /// Where the cgroup stats report is written
    #[arg(short, long, default_value = DEFAULT_OUTPUT_PATH)]
    output: PathBuf,

    /// Comma-separated cgroup subsystems to report on
    #[arg(short, long, default_value = DEFAULT_SUBSYSTEMS)]
    subsystems: String,

    /// CPU-time budget in whole seconds (0 = unlimited)
    #[arg(short, long, default_value_t = 0)]
    budget: u64,

    /// Exit with 111 when the child is killed for exceeding its budget
    #[arg(long)]
    budget_exit_code: bool,

    /// Skip cgroup accounting
    #[arg(long)]
    no_stats: bool,

    /// Mount table used to locate cgroup hierarchies
    #[arg(long, default_value = DEFAULT_MOUNTINFO_PATH)]
    mountinfo: PathBuf,

    /// Command to run, followed by its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl Cli {
    fn into_config(self) -> RunConfig {
        RunConfig {
            command: self.command,
            budget: CpuBudget::from_secs(self.budget),
            subsystems: SubsystemSet::parse(&self.subsystems),
            output_path: self.output,
            mountinfo_path: self.mountinfo,
            budget_exit_code: self.budget_exit_code,
            collect_stats: !self.no_stats,
        }
    }
}

/// Entry point for the `cgrun` binary. Exits the process with the run's
/// exit code; only returns on a startup error.
pub fn run() -> Result<()> {
    // Block relayable signals before anything can spawn a thread, so no
    // signal lands on a thread that will not forward it. The guard is never
    // dropped: late signals stay blocked until the process is gone.
    let _mask = SignalMaskGuard::block().map_err(|e| anyhow!(e))?;

    init_logging();

    let cli = Cli::parse();
    let diagnostics = Diagnostics::stderr();
    let code = execute(&cli.into_config(), &diagnostics);
    std::process::exit(code)
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {} {} {}: {}",
                PROGRAM_TAG,
                chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

/// Run one configured invocation end to end and compute the exit code.
pub fn execute(config: &RunConfig, diagnostics: &Diagnostics) -> i32 {
    if config.command.is_empty() {
        diagnostics.emit(DiagnosticKind::Usage, "no command given; usage: cgrun [OPTIONS] [--] <COMMAND>...");
        return EXIT_USAGE;
    }
    if let Err(e) = validate_config(config) {
        diagnostics.emit(DiagnosticKind::Usage, e);
        return EXIT_USAGE;
    }

    // The limit is inherited across fork/exec; losing it only loses the cap.
    if let Err(e) = install_cpu_limit(config.budget) {
        diagnostics.emit(DiagnosticKind::LimitInstallFailed, e);
    }

    let result = match Supervisor::new(diagnostics).run(&config.command) {
        Ok(result) => result,
        Err(CgrunError::Spawn { .. }) => return EXIT_FAILURE,
        Err(e) => {
            diagnostics.emit(DiagnosticKind::SupervisionFailed, e);
            return EXIT_FAILURE;
        }
    };
    log::info!(
        "Child exited with {} after {:.3}s user, {:.3}s system ({} signals relayed)",
        result.exit_code,
        result.user_cpu_time.as_secs_f64(),
        result.system_cpu_time.as_secs_f64(),
        result.relayed_signals
    );

    let verdict = BudgetVerdict::classify(&result, config.budget);
    if let BudgetVerdict::Exceeded { used_secs, limit_secs } = verdict {
        diagnostics.emit(
            DiagnosticKind::BudgetExceeded,
            format!("child used {}s of CPU time against a budget of {}s", used_secs, limit_secs),
        );
    }

    if config.collect_stats {
        record_stats(config, diagnostics);
    }

    final_exit_code(&result, verdict, config.budget_exit_code)
}

/// Accounting failures are reported and swallowed; they never change the
/// exit code.
fn record_stats(config: &RunConfig, diagnostics: &Diagnostics) {
    let writer = ReportWriter::new(&config.output_path);
    if let Err(e) = writer.discard_stale() {
        diagnostics.emit(DiagnosticKind::ReportWriteFailed, e);
    }

    let accountant = Accountant::from_mountinfo(&config.mountinfo_path);
    let report = match accountant.collect_stats(&config.subsystems) {
        Ok(report) => report,
        Err(e @ CgrunError::MountpointResolution { .. }) => {
            diagnostics.emit(DiagnosticKind::MountpointResolutionFailed, e);
            return;
        }
        Err(e) => {
            diagnostics.emit(DiagnosticKind::StatsCollectionFailed, e);
            return;
        }
    };

    if let Err(e) = writer.write(&report) {
        diagnostics.emit(DiagnosticKind::ReportWriteFailed, e);
    }
}

fn final_exit_code(result: &SupervisionResult, verdict: BudgetVerdict, budget_exit_code: bool) -> i32 {
    if budget_exit_code && verdict.is_exceeded() {
        EXIT_BUDGET_EXCEEDED
    } else {
        result.exit_code
    }
}
