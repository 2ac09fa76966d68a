use crate::cli::SimulateArgs;
use crate::exit_codes;
use crate::output;
use crate::settings;
use crate::synthetic::SyntheticSource;
use erp_rs::{AverageUpdate, AveragingConfig, AveragingEngine, EngineEvent, EngineStats, ErpError};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

const DEFAULT_SAMPLE_RATE: f64 = 1000.0;

#[derive(Serialize)]
struct SimulateOutput {
    engine_id: String,
    config: AveragingConfig,
    stimulus_channels: Vec<String>,
    blocks_streamed: u64,
    stats: EngineStats,
    averages: Vec<AverageUpdate>,
}

pub fn execute(args: SimulateArgs) -> i32 {
    let (mut config, _) = match settings::load_config(&args.config) {
        Ok(loaded) => loaded,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };
    config.block_length = Some(args.block_len);
    let sample_rate = *config.sample_rate.get_or_insert(DEFAULT_SAMPLE_RATE);

    if args.block_len == 0 || args.period == 0 {
        eprintln!("Error: --block-len and --period must be greater than 0");
        return exit_codes::INPUT_ERROR;
    }

    let mut source = SyntheticSource::new(
        args.eeg_channels,
        args.stim_channels,
        args.block_len,
        args.period,
        sample_rate,
    );

    let mut engine = match AveragingEngine::new(config.clone(), source.channels()) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let updates = Arc::new(AtomicU64::new(0));
    {
        let updates = Arc::clone(&updates);
        engine.set_event_callback(move |event| match event {
            EngineEvent::AverageUpdated { update, .. } => {
                updates.fetch_add(1, Ordering::Relaxed);
                log::debug!("{}: nave = {}", update.channel_name, update.nave);
            }
            EngineEvent::Fault { error, .. } => log::error!("Engine fault: {}", error),
            EngineEvent::StateChanged { state, .. } => log::info!("Engine state: {:?}", state),
        });
    }

    if !args.quiet {
        eprintln!(
            "Simulating {} blocks of {} samples ({} EEG + {} stimulus channels)...",
            args.blocks, args.block_len, args.eeg_channels, args.stim_channels
        );
        eprintln!(
            "  Epoch: {} pre + {} post samples, averaging up to {} epochs",
            config.pre_stim_samples, config.post_stim_samples, config.num_averages
        );
    }

    if let Err(e) = engine.start() {
        eprintln!("Error: {}", e);
        return exit_codes::EXECUTION_ERROR;
    }

    let producer = {
        let buffer = engine.buffer();
        let blocks = args.blocks;
        thread::spawn(move || -> erp_rs::Result<u64> {
            for streamed in 0..blocks {
                let block = source.next_block()?;
                match buffer.push(block) {
                    Ok(()) => {}
                    // The worker faulted and released the buffer
                    Err(ErpError::BufferClosed) => return Ok(streamed),
                    Err(e) => return Err(e),
                }
            }
            Ok(blocks)
        })
    };

    let produced = producer.join().unwrap_or(Err(ErpError::WorkerPanicked));
    let finished = engine.finish();

    let blocks_streamed = match (produced, finished) {
        (Ok(streamed), Ok(())) => streamed,
        (_, Err(e)) | (Err(e), _) => {
            eprintln!("Averaging failed: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };

    let result = SimulateOutput {
        engine_id: engine.id.clone(),
        stimulus_channels: (0..engine.stimulus_channels().len())
            .filter_map(|s| engine.stimulus_channels().name(s))
            .map(str::to_string)
            .collect(),
        config,
        blocks_streamed,
        stats: engine.stats(),
        averages: engine.averages(),
    };

    match output::to_json(&result, args.compact) {
        Ok(json) => {
            if let Err(e) = output::write_output(&json, args.output.as_deref()) {
                eprintln!("Error: {}", e);
                return exit_codes::EXECUTION_ERROR;
            }
            if !args.quiet {
                eprintln!(
                    "Published {} average updates for {} stimuli",
                    updates.load(Ordering::Relaxed),
                    result.averages.len()
                );
                if let Some(ref path) = args.output {
                    eprintln!("Results written to {}", path);
                }
            }
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("Error serializing result: {}", e);
            exit_codes::EXECUTION_ERROR
        }
    }
}
