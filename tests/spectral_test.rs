//! Planner, convolution and bin arithmetic working together

use coherent_sdr::fft::{
    convolve_once, CrossCorrelator, FreqConvolution, FrequencyRange, FrequencySlice, Order,
};
use coherent_sdr::simulation::{complex_noise, cw};
use coherent_sdr::{Complex32, RustFftPlanner, SampleFormat, Samples};

use test_utils::{peak_bin, spectrum};

const RATE: u32 = 16_000;

fn zero() -> Complex32 {
    Complex32::new(0.0, 0.0)
}

#[test]
fn test_tone_lands_in_predicted_bin_in_both_orders() {
    let planner = RustFftPlanner::new();
    for &freq in &[1000.0, -3000.0, 7984.375] {
        let mut bins = spectrum(&planner, &cw(freq, RATE, 1024));
        let mut slice = FrequencySlice::new(&mut bins, RATE, Order::ZeroFirst);
        let expected = slice.bin_by_freq(freq).unwrap();
        assert_eq!(peak_bin(slice.data()), expected, "{} Hz zero first", freq);

        slice.shift();
        assert_eq!(slice.order(), Order::NegativeFirst);
        let expected = slice.bin_by_freq(freq).unwrap();
        assert_eq!(peak_bin(slice.data()), expected, "{} Hz negative first", freq);
    }
}

#[test]
fn test_bins_round_trip_for_odd_and_even_lengths() {
    for len in [7usize, 8, 1024] {
        let mut data = vec![zero(); len];
        for order in [Order::ZeroFirst, Order::NegativeFirst] {
            let slice = FrequencySlice::new(&mut data, RATE, order);
            for bin in 0..len {
                let freq = slice.freq_by_bin(bin).unwrap();
                assert!(freq > -slice.nyquist() && freq <= slice.nyquist());
                assert_eq!(slice.bin_by_freq(freq).unwrap(), bin, "len {} {:?}", len, order);
            }
        }
    }
}

#[test]
fn test_shift_twice_is_identity() {
    for len in [5usize, 6] {
        let original = complex_noise(len, 1.0, len as u64);
        let mut data = original.clone();
        let mut slice = FrequencySlice::new(&mut data, RATE, Order::NegativeFirst);
        slice.shift();
        slice.shift();
        assert_eq!(slice.order(), Order::NegativeFirst);
        assert_eq!(slice.data(), &original[..]);
    }
}

#[test]
fn test_brickwall_filter_keeps_one_tone() {
    let planner = RustFftPlanner::new();
    let len = 1024;
    let wanted = cw(1000.0, RATE, len);
    let unwanted = cw(-3000.0, RATE, len);
    let mixed: Vec<Complex32> = wanted.iter().zip(&unwanted).map(|(a, b)| a + b).collect();

    let mut kernel = vec![zero(); len];
    let pass = FrequencySlice::new(&mut kernel, RATE, Order::ZeroFirst)
        .bins_by_range(FrequencyRange::new(500.0, 1500.0))
        .unwrap();
    for bin in pass {
        kernel[bin] = Complex32::new(1.0, 0.0);
    }

    let mut src = Samples::from(mixed);
    let mut dst = Samples::new(SampleFormat::C64, len);
    let mut filter = FreqConvolution::new(&planner, &dst, &src, kernel).unwrap();
    filter.run(&mut dst, &mut src).unwrap();
    filter.close().unwrap();

    for (got, want) in dst.as_c64().unwrap().iter().zip(&wanted) {
        assert!((got - want).norm() < 1e-3);
    }
}

#[test]
fn test_impulse_convolution_is_identity() {
    let planner = RustFftPlanner::new();
    let signal = complex_noise(512, 1.0, 3);
    let mut impulse = vec![zero(); 512];
    impulse[0] = Complex32::new(1.0, 0.0);

    let mut a = Samples::from(signal.clone());
    let mut b = Samples::from(impulse);
    let mut dst = Samples::new(SampleFormat::C64, 512);
    convolve_once(&planner, &mut dst, &mut a, &mut b).unwrap();

    for (got, want) in dst.as_c64().unwrap().iter().zip(&signal) {
        assert!((got - want).norm() < 1e-4);
    }
}

#[test]
fn test_correlator_reports_signed_circular_shift() {
    let planner = RustFftPlanner::new();
    let mut correlator = CrossCorrelator::new(&planner, 2048).unwrap();
    let reference = complex_noise(2048, 1.0, 11);

    for shift in [0isize, 37, -37, 1000, -1023] {
        let mut stream = reference.clone();
        if shift >= 0 {
            stream.rotate_left(shift as usize);
        } else {
            stream.rotate_right(shift.unsigned_abs());
        }
        let mut r = reference.clone();
        assert_eq!(correlator.lag(&mut r, &mut stream, 1).unwrap(), shift);
    }
    correlator.close().unwrap();
}
