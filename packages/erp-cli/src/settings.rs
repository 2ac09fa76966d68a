use crate::cli::ConfigArgs;
use erp_rs::AveragingConfig;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "ERP_CONFIG";
pub const CONFIG_FILE_NAME: &str = "averaging.json";

/// `<user config dir>/erp-rs/averaging.json`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("erp-rs").join(CONFIG_FILE_NAME))
}

/// Explicit path (flag or $ERP_CONFIG), then the default path if it exists.
pub fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(PathBuf::from(path));
    }

    default_config_path().filter(|path| path.is_file())
}

/// Load the configuration file, if any, and apply flag overrides.
///
/// Returns the configuration and the file it came from.
pub fn load_config(args: &ConfigArgs) -> Result<(AveragingConfig, Option<PathBuf>), String> {
    let source = resolve_config_path(args.config.as_deref());

    let mut config = match &source {
        Some(path) => read_config(path)?,
        None => AveragingConfig::default(),
    };

    apply_overrides(&mut config, args);
    Ok((config, source))
}

fn read_config(path: &Path) -> Result<AveragingConfig, String> {
    if !path.exists() {
        return Err(format!("Config file not found: {}", path.display()));
    }

    let config = AveragingConfig::from_json_file(path)
        .map_err(|e| format!("Failed to load config '{}': {}", path.display(), e))?;
    log::info!("Loaded averaging config from {}", path.display());
    Ok(config)
}

pub fn apply_overrides(config: &mut AveragingConfig, args: &ConfigArgs) {
    if let Some(pre) = args.pre {
        config.pre_stim_samples = pre;
    }
    if let Some(post) = args.post {
        config.post_stim_samples = post;
    }
    if let Some(num_averages) = args.num_averages {
        config.num_averages = num_averages;
    }
    if let Some(capacity) = args.capacity {
        config.buffer_capacity = capacity;
    }
    if let Some(sample_rate) = args.sample_rate {
        config.sample_rate = Some(sample_rate);
    }
    if let Some(name) = &args.raw_digital_channel {
        config.raw_digital_channel = name.clone();
    }
}
