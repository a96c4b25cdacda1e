// src/main.rs

use std::process::ExitCode;

use pipedag::errors::PipedagError;
use pipedag::{cli, logging, run};

/// Exit code for definitions rejected before execution.
const DEFINITION_ERROR_EXIT: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    match run_main().await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("pipedag error: {err:?}");
            let definition = err
                .downcast_ref::<PipedagError>()
                .is_some_and(PipedagError::is_definition_error);
            ExitCode::from(if definition { DEFINITION_ERROR_EXIT } else { 1 })
        }
    }
}

async fn run_main() -> anyhow::Result<u8> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}
