use std::process::ExitCode;

fn main() -> ExitCode {
    threadline_cli::run()
}
