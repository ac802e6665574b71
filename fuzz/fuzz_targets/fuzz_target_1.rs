#![no_main]

use libfuzzer_sys::fuzz_target;
use mpeg2ts_packetizer::packet::{Packet, Pid};
use mpeg2ts_packetizer::packetizer::{ChunkInfo, Packetizer, PacketizerConfig, PacketizerConsumer};
use mpeg2ts_packetizer::psi::Section;
use std::time::Duration;

pub struct FuzzConsumer;
impl PacketizerConsumer for FuzzConsumer {
    fn packet(&mut self, packet: &Packet<'_>, _offset: u64) {
        if let Some(af) = packet.adaptation_field() {
            let _ = af.opcr();
            let _ = af.splice_countdown();
            let _ = af.adaptation_field_extension();
        }
    }
    fn wants_sections(&mut self, _pid: Pid) -> bool {
        true
    }
    fn section(&mut self, section: Section) {
        let _ = section.syntax_header();
    }
}

fuzz_target!(|data: &[u8]| {
    let config = PacketizerConfig::default()
        .with_calculate_skew(true)
        .with_calculate_offset(true)
        .with_check_crc(true);
    let mut packetizer = Packetizer::new(config);
    let pid = Pid::new(0x100);
    for (i, chunk) in data.chunks(1000).enumerate() {
        let info = ChunkInfo {
            offset: None,
            arrival: Some(Duration::from_millis(i as u64 * 7)),
        };
        packetizer.push(chunk, info);
        packetizer.process(&mut FuzzConsumer);
        let timeline = packetizer.timeline();
        let now = timeline.current_time(pid);
        let _ = timeline.pts_to_stream_time(Duration::from_millis(i as u64), pid);
        if let Some(now) = now {
            let _ = timeline.time_to_offset(now, pid);
        }
    }
    packetizer.flush(false);
});
