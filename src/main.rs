use std::process::ExitCode;

fn main() -> ExitCode {
    dictate_setup::run()
}
