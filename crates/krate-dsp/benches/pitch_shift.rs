//! Pitch shifter throughput bench

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use krate_dsp::{MonoProcessor, PitchShifter};

fn bench_pitch_shift(c: &mut Criterion) {
    let sample_rate = 48_000.0;
    let input: Vec<f64> = (0..48_000)
        .map(|i| (std::f64::consts::TAU * 440.0 * i as f64 / sample_rate).sin())
        .collect();

    for &fft_size in &[2048usize, 4096] {
        c.bench_function(&format!("pitch_shift_1s_fft{fft_size}"), |b| {
            let mut shifter = PitchShifter::new(fft_size);
            shifter.prepare(sample_rate, fft_size).unwrap();
            shifter.set_pitch_ratio(1.5);
            let mut io = input.clone();
            b.iter(|| {
                io.copy_from_slice(&input);
                shifter.process_block(black_box(&mut io));
            });
        });
    }

    c.bench_function("pitch_shift_1s_fft4096_formant", |b| {
        let mut shifter = PitchShifter::new(4096);
        shifter.prepare(sample_rate, 4096).unwrap();
        shifter.set_pitch_ratio(2f64.powf(3.0 / 12.0));
        shifter.set_formant_preserve(true);
        let mut io = input.clone();
        b.iter(|| {
            io.copy_from_slice(&input);
            shifter.process_block(black_box(&mut io));
        });
    });
}

criterion_group!(benches, bench_pitch_shift);
criterion_main!(benches);
