use clap::Parser;

use brimd::cli::{self, Cli};

fn main() {
    let cli = Cli::parse();
    match cli::run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}
