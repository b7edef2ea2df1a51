//! ocideploy CLI application
//!
//! Prints each command's JSON result on stdout. Logs and errors go to
//! stderr.

// The CLI binary writes results to stdout and fatal errors to stderr
#![allow(clippy::print_stdout, clippy::print_stderr)]

use ocideploy::cli::{self, CliError, EXIT_OK, EXIT_OPERATION, exit_code_for, render_error};
use ocideploy::commands;
use ocideploy::logging::{init_tracing, level_for_verbosity};

fn main() {
    let cli = cli::parse();

    if let Err(e) = init_tracing(level_for_verbosity(cli.verbose), cli.log_format) {
        eprintln!("{e:?}");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Fatal error: Failed to create tokio runtime: {e}");
            std::process::exit(EXIT_OPERATION);
        }
    };

    let exit_code = match runtime.block_on(commands::execute(&cli)) {
        Ok(result) => match serde_json::to_string_pretty(&result) {
            Ok(json) => {
                println!("{json}");
                EXIT_OK
            }
            Err(e) => {
                let err = CliError::operation(format!("Failed to render result: {e}"));
                render_error(&err);
                exit_code_for(&err)
            }
        },
        Err(err) => {
            render_error(&err);
            exit_code_for(&err)
        }
    };

    std::process::exit(exit_code);
}
