//! # comic-matcher CLI
//!
//! Command-line interface for the comic cover matching service.
//!
//! ## Usage
//! ```bash
//! comic-matcher serve --port 8080
//! comic-matcher match-local cover.jpg candidates.json --json
//! ```

mod cli;

use inferno_comics_matcher::Result;

fn main() -> Result<()> {
    cli::run()
}
