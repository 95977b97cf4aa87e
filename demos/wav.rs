use std::{sync::Arc, time::Duration};

const DURATION_SECS: u32 = 3;
const RATE: u32 = 8000;

fn main() {
    env_logger::init();

    // Play a tone through the GPIO board model and record what the consumer would see
    let engine = softpcm::engine()
        .hardware(softpcm::Hardware::gpio())
        .clock(Arc::new(softpcm::SystemClock::default()))
        .source(softpcm::tone::sine(RATE, 2, 500.0, RATE as usize))
        .build()
        .expect("failed to build engine");
    let params = softpcm::Params {
        rate: RATE,
        buffer_size: 4096,
        period_size: 512,
    };
    engine.prepare(params).unwrap();

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: RATE,
        bits_per_sample: 8,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create("softpcm.wav", spec).unwrap();

    let mut waiter = engine.waiter();
    engine.start().unwrap();

    let frame_bytes = engine.frame_bytes();
    let mut read = 0;
    let mut frames = 0;
    let mut chunk = vec![0; params.buffer_size * frame_bytes];
    while frames < (RATE * DURATION_SECS) as usize {
        if !waiter.wait_timeout(Duration::from_secs(1)) {
            eprintln!("no period elapsed in a second; giving up");
            break;
        }
        // Everything played since the last wakeup
        let pointer = engine.pointer();
        let available = (pointer + params.buffer_size - read) % params.buffer_size;
        let n = engine.copy_out(read, &mut chunk[..available * frame_bytes]);
        for &byte in &chunk[..n] {
            // 8-bit WAV is unsigned on disk; hound takes it centered on zero
            writer.write_sample((i16::from(byte) - 128) as i8).unwrap();
        }
        read = pointer;
        frames += available;
    }
    engine.stop().unwrap();
    writer.finalize().unwrap();
    println!("wrote {} frames, {} periods", frames, waiter.periods());
}
