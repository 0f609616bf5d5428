mod cli;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    // chorusfield-demo [--offline] [--clip <path>]
    let args: Vec<String> = std::env::args().skip(1).collect();
    let offline = args.iter().any(|a| a == "--offline");
    let clip = args
        .iter()
        .position(|a| a == "--clip")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str);

    if offline {
        // Headless: render through the offline output and report levels
        cli::run_offline(5.0, clip)
    } else {
        cli::run_live(20.0, clip)
    }
}
