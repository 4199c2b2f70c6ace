//! tourist-shell - Interactive host for tourist tours.

fn main() -> std::process::ExitCode {
    tourist::cmd::shell::main()
}
