use std::process::ExitCode;

fn main() -> ExitCode {
    approvy_cli::run()
}
