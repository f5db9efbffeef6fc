use blockscript_core::cli::Args;
use blockscript_core::diagnostic::CompileError;
use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = Args::parse();
    match blockscript_core::run_cli(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<CompileError>() {
                Some(diagnostic) => eprintln!("{}", diagnostic.render()),
                None => eprintln!("Error! {:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}
