use crate::cli::InfoArgs;
use crate::exit_codes;
use crate::output;
use crate::settings;
use erp_rs::AveragingConfig;
use serde::Serialize;

#[derive(Serialize)]
struct InfoOutput {
    cli_version: String,
    platform: String,
    arch: String,
    config_env: &'static str,
    default_config_path: Option<String>,
    active_config_path: Option<String>,
    defaults: AveragingConfig,
}

pub fn execute(args: InfoArgs) -> i32 {
    let info = InfoOutput {
        cli_version: env!("CARGO_PKG_VERSION").to_string(),
        platform: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        config_env: settings::CONFIG_ENV,
        default_config_path: settings::default_config_path().map(|p| p.display().to_string()),
        active_config_path: settings::resolve_config_path(args.config.as_deref())
            .map(|p| p.display().to_string()),
        defaults: AveragingConfig::default(),
    };

    if args.json {
        match output::to_json(&info, false) {
            Ok(json) => {
                if let Err(e) = output::write_output(&json, None) {
                    eprintln!("Error: {}", e);
                    return exit_codes::EXECUTION_ERROR;
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                return exit_codes::EXECUTION_ERROR;
            }
        }
    } else {
        println!("erp CLI v{}", info.cli_version);
        println!("Platform: {} ({})", info.platform, info.arch);
        println!();
        match &info.active_config_path {
            Some(path) => println!("Config: {}", path),
            None => println!("Config: built-in defaults"),
        }
        println!(
            "Search paths: --config, ${}, {}",
            info.config_env,
            info.default_config_path.as_deref().unwrap_or("(no user config dir)")
        );
        println!();
        println!("Defaults:");
        println!("  pre_stim_samples:    {}", info.defaults.pre_stim_samples);
        println!("  post_stim_samples:   {}", info.defaults.post_stim_samples);
        println!("  num_averages:        {}", info.defaults.num_averages);
        println!("  buffer_capacity:     {}", info.defaults.buffer_capacity);
        println!("  raw_digital_channel: {}", info.defaults.raw_digital_channel);
    }

    exit_codes::SUCCESS
}
