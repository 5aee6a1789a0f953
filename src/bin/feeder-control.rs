use clap::Parser;
use log::{error, info};
use feeder_control::{init_logging, run};
use feeder_control::error::{AppRunError, ConfigError};
use feeder_control::shell::args::Args;

fn main() -> Result<(), AppRunError> {
    let args = Args::parse();
    init_logging(args.log_level);
    info!(concat!("Feeder Control ", env!("CARGO_PKG_VERSION")));

    match run(args) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            eprintln!("This application has already been started");
            Ok(())
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        },
        Ok(_) => Ok(())
    }
}
