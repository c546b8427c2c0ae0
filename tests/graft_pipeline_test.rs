//! End to end: align, phase-correct and graft skewed streams

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use coherent_sdr::simulation::SyntheticStream;
use coherent_sdr::stream::{read_full, MultiplyReader, ReadStream};
use coherent_sdr::{
    align_readers, band_plan, phase_offsets, AlignConfig, CancelToken, Complex32, Error,
    GraftConfig, Grafter, OffsetArray, Receiver, RustFftPlanner, SamplesMut,
};

use test_utils::{
    complex_gain, init_test_tracing, reference_signal, spectrum, MockReceiver, Paced,
};

const RATE: u32 = 2_000_000;
const BLOCK: usize = 4096;
const DELAYS: [isize; 4] = [0, 5, 1000, -300];
const PHASES: [f32; 4] = [0.0, 0.9, -2.2, 2.9];

fn align_config() -> AlignConfig {
    AlignConfig {
        buffer_len: 8192,
        trials: 3,
        max_attempts: Some(8),
    }
}

fn graft_config() -> GraftConfig {
    GraftConfig {
        block_len: BLOCK,
        pipe_capacity: 64,
    }
}

/// Four receivers skewed in time and phase, all replaying one 64 Ki signal.
/// Limited so the graft loop runs dry instead of overrunning the pipe.
fn skewed_streams() -> Vec<SyntheticStream> {
    let signal = reference_signal(64 * 1024, 2024);
    DELAYS
        .iter()
        .zip(PHASES.iter())
        .map(|(&d, &p)| {
            SyntheticStream::new(Arc::clone(&signal), RATE)
                .with_delay(d)
                .with_rotation(p)
                .with_limit(200_000)
        })
        .collect()
}

fn first_block(reader: &mut impl ReadStream, len: usize) -> Vec<Complex32> {
    let mut block = vec![Complex32::new(0.0, 0.0); len];
    read_full(reader, SamplesMut::C64(&mut block)).unwrap();
    block
}

/// Gain of every M-bin band of `freq` relative to band 0
fn band_gains(freq: &[Complex32]) -> Vec<(Complex32, f32)> {
    let bands: Vec<&[Complex32]> = freq.chunks(BLOCK).collect();
    bands.iter().map(|band| complex_gain(band, bands[0])).collect()
}

#[test]
fn test_grafted_bands_stack_without_phase_step() {
    init_test_tracing();
    let planner = RustFftPlanner::new();
    let mut readers = skewed_streams();

    let report =
        align_readers(&planner, &mut readers, &align_config(), &CancelToken::new()).unwrap();
    assert_eq!(report.drained, vec![1000, 995, 0, 1300]);

    let rotators = phase_offsets(&mut readers, 8192).unwrap();
    let corrected: Vec<MultiplyReader<SyntheticStream>> = readers
        .into_iter()
        .zip(rotators)
        .map(|(reader, rotator)| MultiplyReader::new(reader, rotator).unwrap())
        .collect();

    let mut graft =
        Grafter::start(&planner, corrected, graft_config(), CancelToken::new()).unwrap();
    assert_eq!(graft.sample_rate(), 4 * RATE);

    let block = first_block(&mut graft, 4 * BLOCK);
    graft.close().unwrap();
    graft.join();

    let freq = spectrum(&planner, &block);
    let energy: f32 = freq.iter().map(|v| v.norm_sqr()).sum();
    assert!(energy > 0.0);
    for (band, (gain, residual)) in band_gains(&freq).into_iter().enumerate() {
        assert!(
            (gain - Complex32::new(1.0, 0.0)).norm() < 1e-3,
            "band {} gain {}",
            band,
            gain
        );
        assert!(residual < 1e-6, "band {} residual {}", band, residual);
    }
}

#[test]
fn test_skipping_phase_correction_leaves_phase_steps() {
    let planner = RustFftPlanner::new();
    let mut readers = skewed_streams();
    align_readers(&planner, &mut readers, &align_config(), &CancelToken::new()).unwrap();

    let mut graft = Grafter::start(&planner, readers, graft_config(), CancelToken::new()).unwrap();
    let block = first_block(&mut graft, 4 * BLOCK);
    graft.close().unwrap();
    graft.join();

    let freq = spectrum(&planner, &block);
    for (band, (gain, _)) in band_gains(&freq).into_iter().enumerate() {
        let expected = Complex32::from_polar(1.0, PHASES[band]);
        assert!(
            (gain - expected).norm() < 1e-3,
            "band {} gain {} expected {}",
            band,
            gain,
            expected
        );
    }
}

#[test]
fn test_offset_array_tiles_band_and_grafts() {
    init_test_tracing();
    let signal = reference_signal(64 * 1024, 77);
    let receivers: Vec<MockReceiver> = DELAYS
        .iter()
        .zip(PHASES.iter())
        .map(|(&d, &p)| {
            MockReceiver::new(Arc::clone(&signal), RATE)
                .with_skew(d, p)
                .with_limit(200_000)
        })
        .collect();

    let mut array = OffsetArray::new(Arc::new(RustFftPlanner::new()), receivers)
        .unwrap()
        .with_align_config(align_config())
        .with_graft_config(graft_config());
    array.set_center_frequency(915e6).unwrap();
    assert_eq!(Receiver::sample_rate(&array).unwrap(), 4 * RATE);

    let tuned: Vec<f64> = array.receivers().iter().filter_map(|r| r.center).collect();
    assert_eq!(tuned, band_plan(915e6, RATE, 4));
    assert_eq!(tuned, vec![916e6, 918e6, 912e6, 914e6]);

    let mut reader = Receiver::start_rx(&mut array).unwrap();
    assert_eq!(reader.sample_rate(), 4 * RATE);
    let block = first_block(&mut reader, 4 * BLOCK);
    reader.close().unwrap();

    let freq = spectrum(&RustFftPlanner::new(), &block);
    for (gain, residual) in band_gains(&freq) {
        assert!((gain - Complex32::new(1.0, 0.0)).norm() < 1e-3);
        assert!(residual < 1e-6);
    }
}

#[test]
fn test_offset_array_rate_control() {
    let signal = reference_signal(1024, 5);
    let receivers = vec![
        MockReceiver::new(Arc::clone(&signal), 1_000_000),
        MockReceiver::new(signal, 1_000_000),
    ];
    let mut array = OffsetArray::new(Arc::new(RustFftPlanner::new()), receivers).unwrap();
    array.set_center_frequency(100e6).unwrap();

    array.set_sample_rate(6_000_000).unwrap();
    assert_eq!(array.sample_rate().unwrap(), 6_000_000);
    // bands are re-tiled for the new per-receiver rate
    let tuned: Vec<f64> = array.receivers().iter().filter_map(|r| r.center).collect();
    assert_eq!(tuned, vec![101.5e6, 98.5e6]);

    assert!(array.set_sample_rate(3_000_001).is_err());
}

#[test]
fn test_offset_array_rejects_odd_receiver_count() {
    let signal = reference_signal(1024, 6);
    let receivers: Vec<MockReceiver> = (0..3)
        .map(|_| MockReceiver::new(Arc::clone(&signal), 1_000_000))
        .collect();
    assert!(OffsetArray::new(Arc::new(RustFftPlanner::new()), receivers).is_err());
}

#[test]
fn test_cancel_token_stops_running_grafter() {
    let planner = RustFftPlanner::new();
    let signal = reference_signal(4096, 31);
    let readers: Vec<Paced<SyntheticStream>> = (0..2)
        .map(|_| Paced {
            inner: SyntheticStream::new(Arc::clone(&signal), RATE),
            pause: Duration::from_millis(2),
        })
        .collect();
    let config = GraftConfig {
        block_len: 1024,
        pipe_capacity: 256,
    };
    let cancel = CancelToken::new();
    let mut graft = Grafter::start(&planner, readers, config, cancel.clone()).unwrap();

    thread::sleep(Duration::from_millis(50));
    cancel.cancel();
    graft.join();

    // blocks queued before the cancel are still delivered, then the loop's
    // reason for stopping
    let mut block = vec![Complex32::new(0.0, 0.0); 2048];
    let mut delivered = 0;
    let err = loop {
        match read_full(&mut graft, SamplesMut::C64(&mut block)) {
            Ok(_) => delivered += 1,
            Err(e) => break e,
        }
    };
    assert!(delivered > 0);
    assert!(matches!(err, Error::Cancelled), "unexpected error {:?}", err);
}

#[test]
fn test_offset_array_rate_overflow_is_config_error() {
    let signal = reference_signal(1024, 9);
    let receivers = vec![
        MockReceiver::new(Arc::clone(&signal), 3_000_000_000),
        MockReceiver::new(signal, 3_000_000_000),
    ];
    let array = OffsetArray::new(Arc::new(RustFftPlanner::new()), receivers).unwrap();
    assert!(matches!(array.sample_rate(), Err(Error::InvalidConfig { .. })));
}
