use std::process::ExitCode;

use localisprod_orchestrator::cli::Command;

fn main() -> ExitCode {
    Command::run()
}
