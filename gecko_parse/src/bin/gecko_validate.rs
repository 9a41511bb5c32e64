use gecko_parse::Profile;
use std::env;
use std::fs::File;
use std::io::BufReader;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        eprintln!("Usage: {} <profile.json>", args[0]);
        return ExitCode::from(2);
    }

    let path = &args[1];

    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening '{}': {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    match Profile::parse(BufReader::new(file)) {
        Ok(profile) => {
            println!("Valid processed profile: {}", path);
            println!("  Product: {}", profile.meta.product);
            println!("  Profile version: {}", profile.meta.preprocessed_profile_version);
            println!("  Categories: {}", profile.meta.categories.len());
            println!("  Duration: {:.3} ms", profile.duration());
            if !profile.meta.extensions.is_empty() {
                println!("  Extensions: {}", profile.meta.extensions.len());
            }
            println!("  Threads: {}", profile.threads.len());
            for thread in &profile.threads {
                println!(
                    "    {}:{} {} - {} samples, {} markers, {} stacks",
                    thread.pid,
                    thread.tid,
                    thread.name,
                    thread.sample_count(),
                    thread.marker_count(),
                    thread.stack_table.len()
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Invalid processed profile '{}': {}", path, e);
            ExitCode::FAILURE
        }
    }
}
