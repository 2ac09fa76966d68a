use crate::cli::ValidateArgs;
use crate::exit_codes;
use crate::output;
use crate::settings;
use erp_rs::{AveragingConfig, WindowGeometry};
use serde::Serialize;

#[derive(Serialize)]
struct GeometryReport {
    #[serde(flatten)]
    geometry: WindowGeometry,
    pre_capacity: usize,
    post_capacity: usize,
}

#[derive(Serialize)]
struct ValidateOutput {
    config_file: Option<String>,
    config: AveragingConfig,
    geometry: Option<GeometryReport>,
    valid: bool,
    error: Option<String>,
}

pub fn execute(args: ValidateArgs) -> i32 {
    let (mut config, source) = match settings::load_config(&args.config) {
        Ok(loaded) => loaded,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };
    if args.block_len.is_some() {
        config.block_length = args.block_len;
    }

    let error = config.validate().err().map(|e| e.to_string());
    let geometry = config
        .block_length
        .and_then(|block_length| WindowGeometry::new(&config, block_length).ok())
        .map(|geometry| GeometryReport {
            geometry,
            pre_capacity: geometry.pre_capacity(),
            post_capacity: geometry.post_capacity(),
        });

    let result = ValidateOutput {
        config_file: source.map(|p| p.display().to_string()),
        config,
        geometry,
        valid: error.is_none(),
        error: error.clone(),
    };

    if args.json {
        match output::to_json(&result, false) {
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
    } else if let Some(ref err) = error {
        eprintln!("Error: {}", err);
    } else {
        let config = &result.config;
        println!(
            "Configuration is valid: {} pre + {} post samples, up to {} epochs per stimulus",
            config.pre_stim_samples, config.post_stim_samples, config.num_averages
        );
        match &result.geometry {
            Some(report) => println!(
                "Window: {} blocks of {} samples, events confirmed in block {} \
                 ({} samples before, {} from the event onward)",
                report.geometry.window_blocks,
                report.geometry.block_length,
                report.geometry.mid_index,
                report.pre_capacity,
                report.post_capacity
            ),
            None => println!("Window: checked on the first block (pass --block-len to check now)"),
        }
    }

    if error.is_some() {
        exit_codes::INPUT_ERROR
    } else {
        exit_codes::SUCCESS
    }
}
