use std::process::ExitCode;

use clap::Parser;
use oxc3_core::OxcError;

use crate::command::OxC3Package;
use crate::err_style::ErrStyle;

mod command;
mod err_style;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = OxC3Package::parse();

    match args.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", format!("error: {err}").errstyle(owo_colors::Style::new().red()));
            ExitCode::from(exit_code_for(&err))
        }
    }
}

/// Maps the error taxonomy (§7) onto the CLI's documented exit codes (§6):
/// 0 success, 1 user error, 2 platform init failure.
fn exit_code_for(err: &OxcError) -> u8 {
    match err {
        OxcError::PlatformError { .. } | OxcError::OutOfMemory => 2,
        _ => 1,
    }
}
