//! Console rendering of the run transcript.

use console::style;
use stackup_core::report::{Status, StatusReporter};

/// Prints each transcript line to stdout with a colored status symbol.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl ConsoleReporter {
    pub fn new() -> Self {
        Self
    }
}

pub fn render(status: Status, message: &str) -> String {
    let symbol = match status {
        Status::Success => style("✓").green(),
        Status::Failure => style("✗").red(),
        Status::Skipped => style("⇢").yellow(),
        Status::Info => style("•").cyan(),
    };
    format!("  {symbol} {message}")
}

impl StatusReporter for ConsoleReporter {
    fn report(&self, status: Status, message: &str) {
        println!("{}", render(status, message));
    }
}

/// Header printed once the workflow file is loaded.
pub fn print_header(name: &str, path: &str) {
    println!();
    println!(
        "  {} {} {}",
        style("stackup").bold(),
        style(name).cyan(),
        style(format!("({path})")).dim()
    );
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_uses_status_symbol() {
        console::set_colors_enabled(false);
        assert_eq!(render(Status::Success, "build"), "  ✓ build");
        assert_eq!(render(Status::Failure, "docker is installed"), "  ✗ docker is installed");
        assert_eq!(render(Status::Skipped, "lint"), "  ⇢ lint");
        assert_eq!(render(Status::Info, "stopped web"), "  • stopped web");
    }
}
