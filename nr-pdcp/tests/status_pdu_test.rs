//! Wire-format checks for data PDU headers and status report control PDUs.

use nr_bytes::ByteBuffer;
use nr_pdcp::pdu::{
    build_status_report, parse_status_report, pdu_is_data, read_data_pdu_header,
    write_data_pdu_header, SnSize, CONTROL_PDU_MAX_SIZE,
};

#[test]
fn test_sn12_header_layout() {
    let mut buf = ByteBuffer::from_slice(&[0xaa]).unwrap();
    write_data_pdu_header(&mut buf, 0xabc, SnSize::Size12, true).unwrap();
    assert_eq!(buf.to_vec(), vec![0x8a, 0xbc, 0xaa]);
    assert!(pdu_is_data(buf[0]));
    assert_eq!(read_data_pdu_header(&buf, SnSize::Size12), Some(0xabc));
}

#[test]
fn test_sn12_srb_header_has_no_dc_bit() {
    let mut buf = ByteBuffer::from_slice(&[0x01]).unwrap();
    write_data_pdu_header(&mut buf, 0xfff, SnSize::Size12, false).unwrap();
    assert_eq!(buf.to_vec(), vec![0x0f, 0xff, 0x01]);
}

#[test]
fn test_sn18_header_layout() {
    let mut buf = ByteBuffer::from_slice(&[0x55]).unwrap();
    write_data_pdu_header(&mut buf, 0x3f0f1, SnSize::Size18, true).unwrap();
    assert_eq!(buf.to_vec(), vec![0x83, 0xf0, 0xf1, 0x55]);
    assert_eq!(read_data_pdu_header(&buf, SnSize::Size18), Some(0x3f0f1));
}

#[test]
fn test_header_read_requires_payload() {
    let buf = ByteBuffer::from_slice(&[0x80, 0x01]).unwrap();
    assert_eq!(read_data_pdu_header(&buf, SnSize::Size12), None);
}

#[test]
fn test_status_report_layout() {
    // FMC=1; window holds COUNTs 2 and 4 out of [2, 5).
    let report = build_status_report(1, 5, |count| count == 2 || count == 4);
    // Header byte 0 (D/C=0, CPT=0), FMC, bitmap bits 101 padded to a byte.
    assert_eq!(report.to_vec(), vec![0x00, 0x00, 0x00, 0x00, 0x01, 0xa0]);
}

#[test]
fn test_status_report_without_gaps_has_no_bitmap() {
    let report = build_status_report(7, 7, |_| false);
    assert_eq!(report.to_vec(), vec![0x00, 0x00, 0x00, 0x00, 0x07]);
}

#[test]
fn test_status_report_roundtrip() {
    let report = build_status_report(10, 30, |count| count % 3 == 0);
    let parsed = parse_status_report(&report).unwrap();
    assert_eq!(parsed.fmc, 10);
    for (i, bit) in parsed.bitmap.iter().enumerate().take(19) {
        let count = 11 + i as u32;
        assert_eq!(*bit, count % 3 == 0, "count {count}");
    }
}

#[test]
fn test_status_report_is_capped() {
    let report = build_status_report(0, 0x0100_0000, |_| true);
    assert!(report.len() <= CONTROL_PDU_MAX_SIZE);
    assert_eq!(report.len(), CONTROL_PDU_MAX_SIZE);
}

#[test]
fn test_parse_rejects_malformed_reports() {
    // Too short.
    assert!(parse_status_report(&ByteBuffer::from_slice(&[0x00, 0x00]).unwrap()).is_none());
    // Data D/C bit.
    assert!(
        parse_status_report(&ByteBuffer::from_slice(&[0x80, 0, 0, 0, 0]).unwrap()).is_none()
    );
    // Unknown CPT.
    assert!(
        parse_status_report(&ByteBuffer::from_slice(&[0x10, 0, 0, 0, 0]).unwrap()).is_none()
    );
    // Reserved bits set.
    assert!(
        parse_status_report(&ByteBuffer::from_slice(&[0x01, 0, 0, 0, 0]).unwrap()).is_none()
    );
}
