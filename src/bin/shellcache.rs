use std::env;

fn print_usage() {
    eprintln!("Usage: shellcache [OPTIONS] <COMMAND> [ARGS]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  install             Fetch the core shell into the holding area");
    eprintln!("  activate            Activate the current manifest, evicting stale entries");
    eprintln!("  resolve <URL>       Resolve one GET request through the cache");
    eprintln!("  sync                Fetch every declared resource that is not cached");
    eprintln!("  status              Show worker state and cache contents");
    eprintln!("  message <CMD>       Send skipWaiting or downloadOffline");
    eprintln!("  serve               Run the HTTP host");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <FILE>     Config file (default: <config dir>/shellcache/config.toml)");
    eprintln!("  -m, --manifest <FILE>   Manifest JSON from the build step");
    eprintln!("  -o, --origin <URL>      Application origin");
    eprintln!("  -s, --store <DIR>       Cache store directory");
    eprintln!("  -h, --help              Show this help");
    eprintln!();
    eprintln!("Set RUST_LOG=debug for verbose logging.");
}

#[tokio::main]
async fn main() -> shellcache::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();

    #[cfg(feature = "cli")]
    {
        let parsed = match shellcache::cli::parse_args(&args) {
            Ok(parsed) => parsed,
            Err(e) => {
                eprintln!("Error: {e}");
                print_usage();
                std::process::exit(2);
            }
        };
        if parsed.command == shellcache::cli::CliCommand::Help {
            print_usage();
            return Ok(());
        }
        shellcache::cli::run(parsed).await
    }
    #[cfg(not(feature = "cli"))]
    {
        let _ = args;
        print_usage();
        eprintln!("CLI support not compiled in");
        std::process::exit(1);
    }
}
