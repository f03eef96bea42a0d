use std::process::ExitCode;

use clap::Parser;

use brokerctl::cli::{Cli, Command, ConfigArg, RunArgs};
use brokerctl::config::{load_config, EffectiveConfig};
use brokerctl::error::BrokerctlError;
use brokerctl::output::{self, OutputFormat};
use brokerctl::runner::run_scenario;
use brokerctl::scenario::parse_scenario;
use ipc_broker::Coordinator;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Command::Run(args) => run(args, cli.output),
        Command::Config(args) => show_config(args, cli.output),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            output::emit_error(cli.output, e.exit_code_num(), &e.to_string());
            e.exit_code()
        }
    }
}

fn run(args: &RunArgs, format: OutputFormat) -> Result<ExitCode, BrokerctlError> {
    let config = load_config(args.config.config.as_deref())?;
    let scenario = parse_scenario(&args.scenario)?;

    let coordinator = Coordinator::new(config);
    let report = run_scenario(&coordinator, &scenario, args.fail_fast)?;
    output::emit(format, &report)?;

    if report.is_success() {
        return Ok(ExitCode::SUCCESS);
    }

    // The JSON report already carries the failure count.
    let err = BrokerctlError::ExpectationFailed {
        failed: report.failed,
        total: report.steps.len(),
    };
    if format == OutputFormat::Human {
        output::emit_error(format, err.exit_code_num(), &err.to_string());
    }
    Ok(err.exit_code())
}

fn show_config(args: &ConfigArg, format: OutputFormat) -> Result<ExitCode, BrokerctlError> {
    let config = load_config(args.config.as_deref())?;
    let effective = EffectiveConfig {
        source: args.config.clone(),
        config,
    };
    output::emit(format, &effective)?;
    Ok(ExitCode::SUCCESS)
}
