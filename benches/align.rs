// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use criterion::{criterion_group, criterion_main, Criterion};
use dvo_rs::core::track::photometric::Config;
use dvo_rs::misc::type_aliases::{Float, Mat3};

fn synthetic_frame(width: usize, height: usize, shift: Float) -> Vec<Float> {
    (0..width * height)
        .map(|i| {
            let x = (i % width) as Float - shift;
            let y = (i / width) as Float;
            0.5 + 0.25 * (0.06 * x).sin() + 0.2 * (0.05 * y).cos()
        })
        .collect()
}

fn criterion_benchmark(c: &mut Criterion) {
    let (width, height) = (640, 480);
    let k = Mat3::new(525.0, 0.0, 319.5, 0.0, 525.0, 239.5, 0.0, 0.0, 1.0);
    let reference = synthetic_frame(width, height, 0.0);
    let moved = synthetic_frame(width, height, 2.0);
    let depth = vec![1.0; width * height];

    c.bench_function("align 640x480", |b| {
        let mut tracker = Config::new(width, height, k)
            .init(&reference, &depth)
            .unwrap();
        b.iter(|| tracker.align(&moved, &depth).unwrap())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
