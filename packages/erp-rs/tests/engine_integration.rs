use erp_rs::{
    AveragingConfig, AveragingEngine, Block, ChannelInfo, ChannelKind, EngineEvent, EngineState,
    ErpError,
};
use nalgebra::DMatrix;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;

const BLOCK_LEN: usize = 10;

/// EEG ramp, one trigger line, and the raw digital line
fn channels() -> Vec<ChannelInfo> {
    vec![
        ChannelInfo::new("EEG 001", ChannelKind::Eeg),
        ChannelInfo::new("STI 001", ChannelKind::Stimulus),
        ChannelInfo::new("STI 014", ChannelKind::Stimulus),
    ]
}

fn block(seq: u64, pulse: Option<usize>) -> Block {
    let mut data = DMatrix::zeros(3, BLOCK_LEN);
    for col in 0..BLOCK_LEN {
        data[(0, col)] = (seq as usize * BLOCK_LEN + col) as f64;
    }
    if let Some(col) = pulse {
        data[(1, col)] = 1.0;
        data[(2, col)] = 1.0;
    }
    Block::new(seq, data)
}

fn pulse_every_fifth(seq: u64) -> Option<usize> {
    (seq % 5 == 3).then_some(4)
}

#[test]
fn test_engine_averages_threaded_stream() {
    let mut config = AveragingConfig::new(15, 15, 2);
    config.buffer_capacity = 4;
    let mut engine = AveragingEngine::new(config, channels()).unwrap();

    let published = Arc::new(Mutex::new(Vec::new()));
    {
        let published = Arc::clone(&published);
        engine.set_event_callback(move |event| {
            if let EngineEvent::AverageUpdated { update, .. } = event {
                published.lock().push(update.nave);
            }
        });
    }

    engine.start().unwrap();
    assert!(engine.is_running());
    assert_eq!(engine.stimulus_channels().channels(), &[1]);

    let producer = {
        let buffer = engine.buffer();
        thread::spawn(move || {
            for seq in 0..16 {
                buffer.push(block(seq, pulse_every_fifth(seq))).unwrap();
            }
        })
    };
    producer.join().unwrap();

    engine.finish().unwrap();
    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(!engine.is_running());

    // Events at global samples 34, 84, 134; only the last two are retained
    assert_eq!(*published.lock(), vec![1, 2, 2]);

    let average = engine.current_average(0).unwrap();
    assert_eq!(average.nave, 2);
    assert_eq!(average.channel_name, "STI 001");
    assert_eq!(average.pre[0][0], (69.0 + 119.0) / 2.0);
    assert_eq!(average.post[0][0], (84.0 + 134.0) / 2.0);
    assert!(engine.current_average(1).is_none());

    let stats = engine.stats();
    assert_eq!(stats.blocks_processed, 16);
    assert_eq!(stats.epochs_extracted, 3);
    assert_eq!(stats.averages_published, 3);
    assert_eq!(stats.buffer.total_pushed, 16);
    assert!(stats.buffer.peak_size <= 4);
}

#[test]
fn test_engine_faults_on_shape_change() {
    let mut engine = AveragingEngine::new(AveragingConfig::new(15, 15, 2), channels()).unwrap();

    let faults = Arc::new(Mutex::new(Vec::new()));
    {
        let faults = Arc::clone(&faults);
        engine.set_event_callback(move |event| {
            if let EngineEvent::Fault { error, .. } = event {
                faults.lock().push(error);
            }
        });
    }

    engine.start().unwrap();
    engine.append(block(0, None)).unwrap();

    let odd = Block::new(1, DMatrix::zeros(3, BLOCK_LEN + 2));
    assert!(matches!(
        engine.append(odd),
        Err(ErpError::ShapeMismatch { .. })
    ));
    assert!(matches!(
        engine.append(block(2, None)),
        Err(ErpError::BufferClosed)
    ));

    let result = engine.stop();
    assert!(matches!(result, Err(ErpError::ShapeMismatch { .. })));
    assert!(matches!(engine.state(), EngineState::Faulted { .. }));
    assert_eq!(faults.lock().len(), 1);
}

#[test]
fn test_engine_faults_on_infeasible_geometry() {
    let mut engine = AveragingEngine::new(AveragingConfig::new(100, 0, 2), channels()).unwrap();
    engine.start().unwrap();

    // The worker rejects the geometry on the first block and releases the buffer
    let _ = engine.append(block(0, None));

    let result = engine.finish();
    assert!(matches!(result, Err(ErpError::InvalidConfig(_))));
    assert!(matches!(engine.state(), EngineState::Faulted { .. }));
}

#[test]
fn test_engine_rejects_infeasible_geometry_up_front() {
    let mut config = AveragingConfig::new(100, 0, 2);
    config.block_length = Some(BLOCK_LEN);
    assert!(matches!(
        AveragingEngine::new(config, channels()),
        Err(ErpError::InvalidConfig(_))
    ));
}

#[test]
fn test_stop_releases_idle_worker() {
    let mut engine = AveragingEngine::new(AveragingConfig::new(15, 15, 2), channels()).unwrap();
    engine.start().unwrap();

    // Worker is parked in pop with nothing queued
    engine.stop().unwrap();
    assert_eq!(engine.state(), EngineState::Stopped);
}

#[test]
fn test_engine_restarts_with_fresh_state() {
    let mut engine = AveragingEngine::new(AveragingConfig::new(15, 15, 2), channels()).unwrap();

    engine.start().unwrap();
    for seq in 0..8 {
        engine.append(block(seq, pulse_every_fifth(seq))).unwrap();
    }
    engine.finish().unwrap();
    assert_eq!(engine.current_average(0).unwrap().nave, 1);

    engine.start().unwrap();
    assert!(engine.current_average(0).is_none());

    // Shape latch was reset: a different block length is accepted
    engine.append(Block::new(0, DMatrix::zeros(3, 20))).unwrap();
    engine.finish().unwrap();
    assert_eq!(engine.stats().blocks_processed, 1);
}

#[test]
fn test_no_stimulus_channels_is_not_an_error() {
    let channels = vec![
        ChannelInfo::new("EEG 001", ChannelKind::Eeg),
        ChannelInfo::new("STI 014", ChannelKind::Stimulus),
    ];
    let mut engine = AveragingEngine::new(AveragingConfig::new(15, 15, 2), channels).unwrap();
    engine.start().unwrap();
    assert!(engine.stimulus_channels().is_empty());

    for seq in 0..10 {
        let mut data = DMatrix::zeros(2, BLOCK_LEN);
        data[(1, 0)] = 1.0;
        engine.append(Block::new(seq, data)).unwrap();
    }

    engine.finish().unwrap();
    assert!(engine.averages().is_empty());
    assert_eq!(engine.stats().blocks_processed, 10);
}
