use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use lm983x::geometry::{Area, ImageRequest, Planner, ScanFlags, ScanParam};
use lm983x::pipeline::{LineProcessor, ScanRing};
use lm983x::{Adjustments, DeviceProfile, ImageType, RegisterSet, ScanSource, Xy};
use lm983x_test_data::{gray_lines, interleaved_color_lines, planar_color_lines, word_lines};

const LINES: usize = 64;

fn prepare(
    profile: &DeviceProfile,
    image_type: ImageType,
    dpi: u32,
    flags: ScanFlags,
) -> (LineProcessor, ScanRing) {
    let request = ImageRequest {
        area: Area {
            x: 0,
            y: 0,
            cx: 2400,
            cy: 300,
        },
        dpi: Xy::new(dpi, dpi),
        image_type,
        source: ScanSource::Reflection,
        flags,
    };
    let mut setup = ScanParam::from_request(profile, &request, &Adjustments::default());
    let mut regs = RegisterSet::from_hardware(&profile.hw);
    let plan = Planner::new(profile).plan(&mut regs, &mut setup.param);
    let processor = LineProcessor::new(profile, &setup, &plan);

    let bytes = processor.phy_bytes();
    let raw = match (image_type, setup.param.bit_depth > 8) {
        (ImageType::Color24 | ImageType::Color48, true) => word_lines(bytes / 6, LINES, 3),
        (ImageType::Color24 | ImageType::Color48, false) if profile.is_cis() => {
            planar_color_lines(bytes / 3, LINES)
        }
        (ImageType::Color24 | ImageType::Color48, false) => {
            interleaved_color_lines(bytes / 3, LINES)
        }
        _ => gray_lines(bytes, LINES),
    };
    let mut ring = processor.ring(LINES, LINES);
    let chunk = ring.chunk_mut(bytes * LINES);
    let len = chunk.len().min(raw.len());
    chunk[..len].copy_from_slice(&raw[..len]);
    ring.commit();
    (processor, ring)
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let ut12 = DeviceProfile::plustek_ut12();
    let lide25 = DeviceProfile::canon_lide25();
    let cases = [
        ("CCD Color 600dpi", &ut12, ImageType::Color24, 600, ScanFlags::NONE),
        ("CCD Color 200dpi", &ut12, ImageType::Color24, 200, ScanFlags::NONE),
        ("CCD Color 48-bit", &ut12, ImageType::Color48, 600, ScanFlags::NONE),
        ("CCD Gray 300dpi", &ut12, ImageType::Gray8, 300, ScanFlags::NONE),
        ("CCD Black and White", &ut12, ImageType::BlackWhite, 300, ScanFlags::NONE),
        ("CIS Color 300dpi", &lide25, ImageType::Color24, 300, ScanFlags::NONE),
    ];

    let mut group = c.benchmark_group("Line Reconstruction");
    for (name, profile, image_type, dpi, flags) in cases {
        let (processor, ring) = prepare(profile, image_type, dpi, flags);
        let mut out = vec![0u8; processor.bytes_per_line()];
        group.bench_function(name, |b| {
            b.iter_batched_ref(
                || (processor.clone(), ring.clone()),
                |(processor, ring)| {
                    for _ in 0..LINES {
                        processor.process(ring, &mut out).unwrap();
                        ring.advance();
                    }
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
