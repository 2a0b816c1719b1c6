//! execrelay CLI entry point
//!
//! Usage:
//!   execrelay run <command>        Run a command and print its captured output
//!   execrelay stream <command>     Relay output live while the command runs
//!   execrelay tty <command>        Run attached to this terminal
//!   execrelay tokenize <command>   Show how a command line splits
//!   execrelay script -k <kind> ... Run a PowerShell, Bash or Python script
//!   execrelay config               Show configuration

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;

use execrelay::cli::{
    commands::{
        ConfigArgs, LaunchArgs, OutputFormat, RunArgs, ScriptArgs, StreamArgs, TokenFormat,
        TokenizeArgs, TtyArgs,
    },
    Cli, Commands,
};
use execrelay::command::tokenize;
use execrelay::config::{active_layers, default_config_file, load_config, Config};
use execrelay::error::{ErrorInfo, ExecError};
use execrelay::executor::{CapturedOutput, Executor};
use execrelay::logging;
use execrelay::script::{Script, ScriptType};

/// Exit code used when a deadline kills the command, as timeout(1) does
const DEADLINE_EXIT_CODE: u8 = 124;

/// How long shutdown waits for blocking tasks; a stdin feeder parked on a terminal read never ends
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}: failed to start runtime: {}", "error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };
    let result = runtime.block_on(run(cli));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {:#}", "error".red().bold(), e);
            exit_code_for(e.downcast_ref::<ExecError>())
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = load_config(cli.config.as_deref())?;
    if cli.verbose && std::env::var_os("RUST_LOG").is_none() {
        config.logging.level = "execrelay=debug".to_string();
    }
    // A subscriber may already exist when embedded; that is fine
    let _ = logging::try_init(&config.logging);

    match cli.command {
        Commands::Run(args) => run_command(args, &config).await,
        Commands::Stream(args) => stream_command(args, &config).await,
        Commands::Tty(args) => tty_command(args, &config).await,
        Commands::Tokenize(args) => tokenize_command(args),
        Commands::Script(args) => script_command(args, &config).await,
        Commands::Config(args) => show_config(args, &config, cli.config.as_deref()),
    }
}

/// Executor from config with command-line overrides applied
fn build_executor(launch: &LaunchArgs, config: &Config) -> Executor {
    let mut executor = Executor::from_config(&config.executor);

    if let Some(environment) = launch.environment(config.executor.environment.as_deref()) {
        executor = executor.with_environment(environment);
    }
    if let Some(user) = &launch.user {
        executor = executor.with_user(user);
    }
    if let Some(shell) = &launch.shell {
        executor = executor.with_shell(shell);
    } else if launch.default_shell {
        executor = executor.with_default_shell();
    }
    if let Some(dir) = &launch.working_dir {
        executor = executor.with_working_dir(dir);
    }
    if let Some(timeout) = launch.timeout {
        executor = executor.with_timeout(Duration::from_secs(timeout));
    }

    tracing::debug!(?executor, "configured executor");
    executor
}

/// Run a command, then print its captured output
async fn run_command(args: RunArgs, config: &Config) -> Result<ExitCode> {
    let executor = build_executor(&args.launch, config);
    let captured = executor.output(&executor.spec(&args.command)).await?;

    match args.format {
        OutputFormat::Json => {
            let error = captured.outcome.as_ref().err().map(ErrorInfo::from);
            let json = if args.separate {
                serde_json::json!({
                    "command": args.command,
                    "success": captured.outcome.is_ok(),
                    "stdout": captured.stdout_string(),
                    "stderr": captured.stderr_string(),
                    "error": error,
                })
            } else {
                serde_json::json!({
                    "command": args.command,
                    "success": captured.outcome.is_ok(),
                    "output": captured.combined(),
                    "error": error,
                })
            };
            println!("{}", serde_json::to_string_pretty(&json)?);
            Ok(exit_code_for(captured.outcome.as_ref().err()))
        }
        OutputFormat::Text => {
            print_captured(&captured, args.separate);
            captured.outcome?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_captured(captured: &CapturedOutput, separate: bool) {
    if separate {
        print!("{}", captured.stdout_string());
        eprint!("{}", captured.stderr_string());
    } else {
        print!("{}", captured.combined());
    }
}

/// Run a command, copying its output to ours as it arrives
async fn stream_command(args: StreamArgs, config: &Config) -> Result<ExitCode> {
    let executor = build_executor(&args.launch, config);
    let result = if args.stdin {
        executor.execute_async_with_input(&args.command, tokio::io::stdin())?
    } else {
        executor.execute_async(&args.command)?
    };

    tracing::debug!(pid = result.pid(), timeout = ?result.deadline.timeout(), "streaming");

    let mut stdout = result.stdout.clone();
    let mut stderr = result.stderr.clone();
    let mut our_stdout = tokio::io::stdout();
    let mut our_stderr = tokio::io::stderr();
    let (out, err) = tokio::join!(
        tokio::io::copy(&mut stdout, &mut our_stdout),
        tokio::io::copy(&mut stderr, &mut our_stderr),
    );
    out.context("Failed to relay stdout")?;
    err.context("Failed to relay stderr")?;

    result.finished.await?;
    Ok(ExitCode::SUCCESS)
}

async fn tty_command(args: TtyArgs, config: &Config) -> Result<ExitCode> {
    let executor = build_executor(&args.launch, config);
    executor.execute_tty(&args.command).await?;
    Ok(ExitCode::SUCCESS)
}

fn tokenize_command(args: TokenizeArgs) -> Result<ExitCode> {
    let fields = tokenize(&args.command).map_err(ExecError::from)?;

    match args.format {
        TokenFormat::Json => println!("{}", serde_json::to_string_pretty(&fields)?),
        TokenFormat::Plain => {
            for field in &fields {
                println!("{}", field);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn script_command(args: ScriptArgs, config: &Config) -> Result<ExitCode> {
    let kind = ScriptType::from(args.kind);
    let mut script = match (&args.inline, &args.path) {
        (Some(source), _) => Script::inline(kind, source.as_str()),
        (None, Some(path)) => Script::from_path(kind, path.as_str()),
        (None, None) => anyhow::bail!("Provide a script path or --inline source"),
    };
    script = script.args(args.args.iter().cloned());
    for (key, value) in &args.params {
        script = script.param(key, value);
    }

    let executor = build_executor(&args.launch, config);
    let captured = executor
        .execute_script_async(&script)?
        .wait_within_deadline()
        .await;

    print_captured(&captured, true);
    captured.outcome?;
    Ok(ExitCode::SUCCESS)
}

fn show_config(args: ConfigArgs, config: &Config, override_path: Option<&str>) -> Result<ExitCode> {
    let layers = active_layers(override_path);

    match args.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "layers": layers,
                "config": config,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            println!("{}:", "Config Files".cyan());
            if layers.is_empty() {
                println!("  None (using defaults)");
                if let Some(path) = default_config_file() {
                    println!("  Create {} to customize", path.display());
                }
            }
            for layer in &layers {
                println!("  - [{}] {}", layer.scope, layer.path.display());
            }
            println!();
            println!("{}:", "Resolved".cyan());
            print!(
                "{}",
                toml::to_string_pretty(config).context("Failed to render configuration")?
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Map an execution error to the process exit code
fn exit_code_for(err: Option<&ExecError>) -> ExitCode {
    ExitCode::from(exit_status(err))
}

fn exit_status(err: Option<&ExecError>) -> u8 {
    match err {
        None => 0,
        Some(ExecError::DeadlineExceeded { .. }) => DEADLINE_EXIT_CODE,
        Some(err) => match err.exit_code() {
            Some(code) if (1..=255).contains(&code) => code as u8,
            _ => 1,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_for_success() {
        assert_eq!(exit_status(None), 0);
    }

    #[test]
    fn test_exit_code_for_child_status() {
        let err = ExecError::NonZeroExit {
            command: "exit 3".to_string(),
            code: Some(3),
        };
        assert_eq!(exit_status(Some(&err)), 3);
    }

    #[test]
    fn test_exit_code_for_signal() {
        let err = ExecError::NonZeroExit {
            command: "kill".to_string(),
            code: None,
        };
        assert_eq!(exit_status(Some(&err)), 1);
    }

    #[test]
    fn test_exit_code_for_deadline() {
        let err = ExecError::DeadlineExceeded {
            command: "sleep 9".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(exit_status(Some(&err)), DEADLINE_EXIT_CODE);
    }

    #[test]
    fn test_build_executor_overrides() {
        let config = Config::default();
        let launch = LaunchArgs {
            timeout: Some(7),
            shell: Some("/bin/bash".to_string()),
            working_dir: Some("/tmp".to_string()),
            ..Default::default()
        };
        let executor = build_executor(&launch, &config);
        let spec = executor.spec("echo");

        assert_eq!(spec.timeout, Duration::from_secs(7));
        assert_eq!(spec.shell.as_deref(), Some("/bin/bash"));
        assert_eq!(spec.working_dir, Some("/tmp".into()));
        assert!(spec.environment.is_none());
    }
}
