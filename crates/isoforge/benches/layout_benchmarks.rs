use std::io::Cursor;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use isoforge::{File, FileData, FileInput, FormatOption, IsoImage};

fn build_files(count: usize, bytes_per_file: usize) -> FileInput {
    let mut files = FileInput::empty();
    files.append(File::directory("data"));
    for i in 0..count {
        files.append(File::new(
            &format!("data/file_{i:04}.bin"),
            FileData::Data(vec![(i % 251) as u8; bytes_per_file]),
        ));
    }
    files
}

fn bench_format_new(c: &mut Criterion) {
    let mut group = c.benchmark_group("format_new");
    for &count in &[16usize, 256, 2048] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let files = build_files(count, 512);
            b.iter(|| {
                let ops = FormatOption::default()
                    .with_volume_name("BENCH".to_string())
                    .with_files(files.clone());
                let (_, max) = ops.image_len();
                let mut cursor = Cursor::new(vec![0u8; max as usize]);
                IsoImage::format_new(&mut cursor, ops).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_streaming_emit(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_emit");
    for &count in &[16usize, 256, 2048] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let files = build_files(count, 512);
            b.iter(|| {
                let ops = FormatOption::default()
                    .with_volume_name("BENCH".to_string())
                    .with_files(files.clone())
                    .with_fifo_size(256);
                let mut handle = isoforge::emit(ops).unwrap();
                let mut buf = [0u8; 8192];
                loop {
                    let n = std::io::Read::read(&mut handle, &mut buf).unwrap();
                    if n == 0 {
                        break;
                    }
                }
                handle.join().unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_format_new, bench_streaming_emit);
criterion_main!(benches);
