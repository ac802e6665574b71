use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use mpeg2ts_packetizer::packet::{ClockRef, Packet, Pid};
use mpeg2ts_packetizer::packetizer::{ChunkInfo, Packetizer, PacketizerConfig, PacketizerConsumer};
use mpeg2ts_packetizer::psi::Section;
use std::fs::File;
use std::io::Read;
use std::time::Duration;

struct NullConsumer;
impl PacketizerConsumer for NullConsumer {
    fn packet(&mut self, packet: &Packet<'_>, _offset: u64) {
        criterion::black_box(packet.payload());
    }
    fn wants_sections(&mut self, pid: Pid) -> bool {
        // PAT, and the PMT PIDs ffmpeg assigns
        pid == Pid::new(0) || pid == Pid::new(0x1000)
    }
    fn section(&mut self, section: Section) {
        criterion::black_box(section);
    }
    fn pcr(&mut self, _pid: Pid, pcr: ClockRef, output_time: Option<Duration>) {
        criterion::black_box((pcr, output_time));
    }
}

fn load_sample() -> Vec<u8> {
    let mut f = File::open("testsrc.ts").expect("Test file missing.  To create, run: ffmpeg -f lavfi -i testsrc=duration=20:size=640x360:rate=30 -c:v libx264 -f mpegts testsrc.ts");
    let l = f.metadata().unwrap().len() as usize;
    let size = l.min(188 * 200_000);
    let mut buf = vec![0; size];
    f.read_exact(&mut buf[..]).unwrap();
    buf
}

fn packetizer(c: &mut Criterion) {
    let buf = load_sample();
    let mut group = c.benchmark_group("packetizer");
    group.throughput(Throughput::Bytes(buf.len() as u64));
    group.bench_function("process", |b| {
        b.iter(|| {
            let mut packetizer = Packetizer::new(PacketizerConfig::default());
            packetizer.push(&buf[..], ChunkInfo::default());
            packetizer.process(&mut NullConsumer)
        })
    });
    group.bench_function("process_with_timing", |b| {
        let config = PacketizerConfig::default()
            .with_calculate_skew(true)
            .with_calculate_offset(true);
        b.iter(|| {
            let mut packetizer = Packetizer::new(config.clone());
            // arrival times as if each 188 * 1024 byte chunk was read 10ms apart
            for (i, chunk) in buf.chunks(188 * 1024).enumerate() {
                let info = ChunkInfo {
                    offset: None,
                    arrival: Some(Duration::from_millis(i as u64 * 10)),
                };
                packetizer.push(chunk, info);
                packetizer.process(&mut NullConsumer);
            }
        })
    });
    group.finish();
}

criterion_group!(benches, packetizer);
criterion_main!(benches);
