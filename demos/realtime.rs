use std::{collections::VecDeque, sync::Arc, thread, time::Duration};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;

const DURATION_SECS: u64 = 4;

fn main() {
    env_logger::init();

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .expect("no output device available");
    let sample_rate = device.default_output_config().unwrap().sample_rate();
    let config = cpal::StreamConfig {
        channels: 2,
        sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    // The virtual card paces itself off a high-resolution timer; played periods are handed to
    // the real device through `queue`.
    let hardware = softpcm::Hardware::default().with_model(&softpcm::Model {
        rate_max: 192_000,
        ..softpcm::Model::default()
    });
    let engine = softpcm::engine()
        .backend(softpcm::Backend::HighRes)
        .hardware(hardware)
        .source(softpcm::tone::sine(sample_rate.0, 2, 440.0, sample_rate.0 as usize))
        .build()
        .expect("failed to build engine");
    let params = softpcm::Params {
        rate: sample_rate.0,
        buffer_size: 8192,
        period_size: 1024,
    };
    engine.prepare(params).unwrap();

    let queue = Arc::new(Mutex::new(VecDeque::<f32>::new()));
    let stream = device
        .build_output_stream(
            &config,
            {
                let queue = queue.clone();
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut queue = queue.lock();
                    for s in data {
                        *s = queue.pop_front().unwrap_or(0.0);
                    }
                }
            },
            move |err| {
                eprintln!("{}", err);
            },
        )
        .unwrap();
    stream.play().unwrap();

    let mut waiter = engine.waiter();
    engine.start().unwrap();

    let frame_bytes = engine.frame_bytes();
    let mut read = 0;
    let mut chunk = vec![0; params.buffer_size * frame_bytes];
    let periods = u64::from(sample_rate.0) * DURATION_SECS / params.period_size as u64;
    while waiter.periods() < periods {
        if !waiter.wait_timeout(Duration::from_secs(1)) {
            break;
        }
        let pointer = engine.pointer();
        let available = (pointer + params.buffer_size - read) % params.buffer_size;
        let n = engine.copy_out(read, &mut chunk[..available * frame_bytes]);
        queue
            .lock()
            .extend(chunk[..n].iter().map(|&b| (f32::from(b) - 128.0) / 128.0 * 0.2));
        read = pointer;
    }
    engine.stop().unwrap();

    // Let the device drain what was queued
    while !queue.lock().is_empty() {
        thread::sleep(Duration::from_millis(10));
    }
}
