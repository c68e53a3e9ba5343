use tether::{config, telemetry};

fn main() {
    let cli = tether::cli::parse_from(std::env::args_os());

    let config = match config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("config load failed, using defaults: {err}");
            let mut config = config::Config::default();
            config::apply_env_overrides(&mut config);
            config
        }
    };

    let _telemetry_guard = telemetry::init(cli.verbose, &config.logging);

    if let Err(e) = tether::cli::run(cli, &config) {
        tracing::error!("error: {}", e);
        std::process::exit(1);
    }
}
