//! Packet builders for the pipeline tests. Recorders come from `tmtc::testing`.
#![allow(dead_code)]

use tmtc::{
    integrity::Crc16Ccitt,
    spacepacket::{
        secondary::{set_checksum_indicator, set_cuc_time},
        set_header, Apid, SEQ_UNSEGMENTED, TYPE_TC, TYPE_TM,
    },
};

/// 20 byte TM packet with secondary header, CUC time `coarse.fine` and a valid CRC.
pub fn tm_packet(apid: Apid, seq: u16, coarse: u32, fine: u8) -> Vec<u8> {
    let mut buf = vec![0u8; 20];
    set_header(&mut buf, apid, TYPE_TM, true, SEQ_UNSEGMENTED, seq);
    set_cuc_time(&mut buf, coarse, fine);
    set_checksum_indicator(&mut buf, true);
    let crc = Crc16Ccitt::default().checksum(&buf[..18]);
    buf[18..].copy_from_slice(&crc.to_be_bytes());
    buf
}

/// TC packet of `len` bytes without secondary header.
pub fn tc_packet(apid: Apid, len: usize) -> Vec<u8> {
    let mut buf: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
    set_header(&mut buf, apid, TYPE_TC, false, SEQ_UNSEGMENTED, 0);
    buf
}
