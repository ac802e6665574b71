use hex_slice::AsHex;
use mpeg2ts_packetizer::packet::{ClockRef, Packet, Pid};
use mpeg2ts_packetizer::packetizer::{ChunkInfo, Packetizer, PacketizerConfig, PacketizerConsumer};
use mpeg2ts_packetizer::psi::Section;
use std::collections::HashSet;
use std::env;
use std::fs::File;
use std::io::Read;
use std::time::Duration;

const PAT_PID: Pid = Pid::new(0);
const PAT_TABLE_ID: u8 = 0x00;
const PMT_TABLE_ID: u8 = 0x02;

/// Learns the PMT PIDs from the PAT, and the PCR PIDs from each PMT
#[derive(Default)]
struct PcrDump {
    pmt_pids: HashSet<Pid>,
    pcr_pids: HashSet<Pid>,
    pcr_count: usize,
}

impl PacketizerConsumer for PcrDump {
    fn packet(&mut self, _packet: &Packet<'_>, _offset: u64) {}

    fn wants_sections(&mut self, pid: Pid) -> bool {
        pid == PAT_PID || self.pmt_pids.contains(&pid)
    }

    fn section(&mut self, section: Section) {
        println!(
            "{:?} table_id={:#04x} offset={} {:x}",
            section.pid(),
            section.table_id(),
            section.offset(),
            section.payload().as_hex()
        );
        match section.table_id() {
            PAT_TABLE_ID => {
                for entry in section.payload().chunks_exact(4) {
                    let program_number = u16::from(entry[0]) << 8 | u16::from(entry[1]);
                    let pid = u16::from(entry[2] & 0b0001_1111) << 8 | u16::from(entry[3]);
                    if program_number != 0 {
                        if let Ok(pid) = Pid::try_from(pid) {
                            self.pmt_pids.insert(pid);
                        }
                    }
                }
            }
            PMT_TABLE_ID => {
                let payload = section.payload();
                if payload.len() >= 2 {
                    let pid = u16::from(payload[0] & 0b0001_1111) << 8 | u16::from(payload[1]);
                    if let Ok(pid) = Pid::try_from(pid) {
                        if self.pcr_pids.insert(pid) {
                            println!("PCR PID {:?}", pid);
                        }
                    }
                }
            }
            _ => (),
        }
    }

    fn pcr(&mut self, pid: Pid, pcr: ClockRef, _output_time: Option<Duration>) {
        self.pcr_count += 1;
        println!("{:?} pcr={}", pid, u64::from(pcr));
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    // open input file named on command line,
    let name = env::args().nth(1).expect("usage: dump-pcr <file.ts>");
    let mut f = File::open(&name).unwrap_or_else(|_| panic!("file not found: {}", &name));

    let config = PacketizerConfig::default().with_calculate_offset(true);
    let mut packetizer = Packetizer::new(config);
    let mut dump = PcrDump::default();

    // consume the input file,
    let mut buf = [0u8; 188 * 1024];
    let mut offset = 0;
    loop {
        match f.read(&mut buf[..]).expect("read failed") {
            0 => break,
            n => {
                let chunk = ChunkInfo {
                    offset: Some(offset),
                    arrival: None,
                };
                packetizer.push(&buf[0..n], chunk);
                packetizer.process(&mut dump);
                offset += n as u64;
            }
        }
    }

    println!("{:?} packets, {} PCRs", packetizer.packet_size(), dump.pcr_count);
    let timeline = packetizer.timeline();
    timeline.set_reference_offset(0);
    for pid in &dump.pcr_pids {
        println!(
            "{:?}: {} PCR groups, duration {:?}",
            pid,
            timeline.group_count(*pid),
            timeline.offset_to_time(offset, *pid)
        );
    }
}
