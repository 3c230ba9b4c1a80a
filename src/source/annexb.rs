use crate::core::{BufferFlags, EncodedPacket, Result, StreamInfo};
use crate::source::PacketSource;
use log::{debug, info};
use std::path::Path;

const START_CODE: [u8; 4] = [0, 0, 0, 1];

const NAL_IDR: u8 = 5;
const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;

/// H.264 Annex-B 裸码流读取器
///
/// 整个文件读入内存后按起始码切分 NAL 单元：
/// 非 VCL 单元与其后的 VCL 单元合并成一个包，同一帧的多个 slice 也合并；
/// 第一个 SPS / PPS 作为 csd-0 / csd-1。
pub struct AnnexBSource {
    info: StreamInfo,
    packets: Vec<EncodedPacket>,
    position: usize,
    label: String,
}

impl AnnexBSource {
    pub fn open(path: &Path, interval_us: i64) -> Result<Self> {
        let data = std::fs::read(path)?;
        info!("📁 读取裸码流 {} ({} 字节)", path.display(), data.len());
        Ok(Self::from_bytes(&data, &path.display().to_string(), interval_us))
    }

    pub fn from_bytes(data: &[u8], label: &str, interval_us: i64) -> Self {
        let interval_us = interval_us.max(1);
        let mut sps = None;
        let mut pps = None;
        let mut packets: Vec<EncodedPacket> = Vec::new();
        let mut prefix: Vec<u8> = Vec::new();

        for nal in split_nal_units(data) {
            let nal_type = nal[0] & 0x1f;
            match nal_type {
                NAL_SPS if sps.is_none() => sps = Some(with_start_code(nal)),
                NAL_PPS if pps.is_none() => pps = Some(with_start_code(nal)),
                _ => {}
            }

            if !(1..=NAL_IDR).contains(&nal_type) {
                prefix.extend_from_slice(&START_CODE);
                prefix.extend_from_slice(nal);
                continue;
            }

            // first_mb_in_slice 为 0 时第一个比特是 1：新的一帧开始
            let new_picture = nal.get(1).map_or(true, |b| b & 0x80 != 0);
            match packets.last_mut() {
                Some(current) if !new_picture && prefix.is_empty() => {
                    current.data.extend_from_slice(&START_CODE);
                    current.data.extend_from_slice(nal);
                    if nal_type == NAL_IDR {
                        current.flags |= BufferFlags::KEY_FRAME;
                    }
                }
                _ => {
                    let mut packet_data = std::mem::take(&mut prefix);
                    packet_data.extend_from_slice(&START_CODE);
                    packet_data.extend_from_slice(nal);
                    let flags = if nal_type == NAL_IDR {
                        BufferFlags::KEY_FRAME
                    } else {
                        BufferFlags::NONE
                    };
                    packets.push(EncodedPacket {
                        data: packet_data,
                        timestamp_us: packets.len() as i64 * interval_us,
                        flags,
                    });
                }
            }
        }
        if !prefix.is_empty() {
            debug!("丢弃末尾 {} 字节的非 VCL 数据", prefix.len());
        }

        let config_blobs = [sps, pps].into_iter().flatten().collect();
        debug!("{}: {} 个包", label, packets.len());
        Self {
            info: StreamInfo {
                codec_id: "video/avc".to_string(),
                width: None,
                height: None,
                config_blobs,
                duration_us: Some(packets.len() as i64 * interval_us),
            },
            packets,
            position: 0,
            label: label.to_string(),
        }
    }

    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }
}

fn with_start_code(nal: &[u8]) -> Vec<u8> {
    let mut blob = START_CODE.to_vec();
    blob.extend_from_slice(nal);
    blob
}

/// 按 3 字节或 4 字节起始码切分，返回不含起始码的 NAL 单元
fn split_nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push((i, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut units = Vec::with_capacity(starts.len());
    for (n, &(_, payload_start)) in starts.iter().enumerate() {
        let mut end = starts.get(n + 1).map_or(data.len(), |&(next, _)| next);
        // 4 字节起始码的前导 0 不属于上一个单元
        while end > payload_start && data[end - 1] == 0 {
            end -= 1;
        }
        if end > payload_start {
            units.push(&data[payload_start..end]);
        }
    }
    units
}

impl PacketSource for AnnexBSource {
    fn stream_info(&self) -> &StreamInfo {
        &self.info
    }

    fn read_packet(&mut self) -> Result<Option<EncodedPacket>> {
        let packet = self.packets.get(self.position).cloned();
        if packet.is_some() {
            self.position += 1;
        }
        Ok(packet)
    }

    fn seek(&mut self, timestamp_us: i64) -> Result<()> {
        self.position = self
            .packets
            .iter()
            .rposition(|p| p.flags.is_key_frame() && p.timestamp_us <= timestamp_us)
            .unwrap_or(0);
        debug!("裸码流 seek 到第 {} 个包", self.position);
        Ok(())
    }

    fn description(&self) -> String {
        format!("annex-b {} ({} 个包)", self.label, self.packets.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nal(header: u8, body: &[u8]) -> Vec<u8> {
        let mut unit = vec![0, 0, 0, 1, header];
        unit.extend_from_slice(body);
        unit
    }

    fn sample_stream() -> Vec<u8> {
        let mut stream = Vec::new();
        stream.extend(nal(0x67, &[0x42, 0x00, 0x1e]));
        stream.extend(nal(0x68, &[0xce, 0x3c]));
        stream.extend(nal(0x06, &[0x05, 0x01]));
        stream.extend(nal(0x65, &[0x88, 0x01])); // IDR, 新的一帧
        stream.extend(nal(0x65, &[0x08, 0x02])); // 同一帧的第二个 slice
        stream.extend(nal(0x41, &[0x9a, 0x03]));
        stream.extend_from_slice(&[0, 0, 1, 0x41, 0x9a, 0x04]);
        stream
    }

    #[test]
    fn test_split_handles_both_start_code_lengths() {
        let units = split_nal_units(&[0, 0, 0, 1, 0x67, 1, 0, 0, 1, 0x68, 2, 0, 0]);
        assert_eq!(units, vec![&[0x67, 1][..], &[0x68, 2][..]]);
    }

    #[test]
    fn test_groups_units_into_packets() {
        let mut source = AnnexBSource::from_bytes(&sample_stream(), "sample", 33_333);
        assert_eq!(source.packet_count(), 3);

        let info = source.stream_info();
        assert_eq!(info.config_blobs.len(), 2);
        assert_eq!(info.config_blobs[0][4], 0x67);
        assert_eq!(info.config_blobs[1][4], 0x68);
        assert_eq!(info.width, None);

        let first = source.read_packet().unwrap().unwrap();
        assert!(first.flags.is_key_frame());
        assert_eq!(first.timestamp_us, 0);
        // SPS + PPS + SEI + 两个 slice
        assert_eq!(first.data.windows(4).filter(|w| *w == START_CODE).count(), 5);

        let second = source.read_packet().unwrap().unwrap();
        assert!(!second.flags.is_key_frame());
        assert_eq!(second.timestamp_us, 33_333);
        assert!(source.read_packet().unwrap().is_some());
        assert!(source.read_packet().unwrap().is_none());
    }

    #[test]
    fn test_seek_returns_to_key_frame() {
        let mut source = AnnexBSource::from_bytes(&sample_stream(), "sample", 10_000);
        while source.read_packet().unwrap().is_some() {}
        source.seek(25_000).unwrap();
        let packet = source.read_packet().unwrap().unwrap();
        assert_eq!(packet.timestamp_us, 0);
    }

    #[test]
    fn test_open_missing_file() {
        let err = AnnexBSource::open(Path::new("/nonexistent/clip.h264"), 10_000).err().unwrap();
        assert!(matches!(err, crate::core::PlayerError::IoError(_)));
    }
}
