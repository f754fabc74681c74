use std::{path::PathBuf, process::ExitCode};

use local_ai_writer::{AppConfig, setup_check};

fn main() -> anyhow::Result<ExitCode> {
    let root = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let config = AppConfig::from_env()?;

    println!("🧪 Local AI Writer setup check");
    println!("{}", "=".repeat(40));

    let report = setup_check::run(&root, &config);
    print!("{}", report.render());

    println!("\n{}", "=".repeat(40));
    if report.passed() {
        println!("🎉 All checks passed!");
        println!("\nNext steps:");
        println!("1. Start the API: cargo run --release");
        println!("2. Start the front end: cd frontend && npm start");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("❌ Some checks failed. Review the items marked above.");
        println!("\nCommon fixes:");
        println!("- Point LIBTORCH at an unpacked libtorch distribution");
        println!("- Place the TorchScript export and tokenizer.json under models/");
        println!("- Install Node.js for the front end");
        Ok(ExitCode::FAILURE)
    }
}
