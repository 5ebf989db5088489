use bytes::Bytes;
use rstest::rstest;
use vitalstream::record::{parse_record, ReassemblyStats};
use vitalstream::{RawRecord, RecordReassembler};

fn export(records: usize) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!DOCTYPE HealthData>\n<HealthData locale=\"en_US\">\n <ExportDate value=\"2024-02-01 09:00:00 -0500\"/>\n",
    );
    for i in 0..records {
        if i % 3 == 0 {
            xml.push_str(&format!(
                " <Record type=\"HKQuantityTypeIdentifierHeartRate\" sourceName=\"Watch &amp; Co\" unit=\"count/min\" creationDate=\"2024-01-01 08:{m:02}:05 -0500\" startDate=\"2024-01-01 08:{m:02}:00 -0500\" endDate=\"2024-01-01 08:{m:02}:00 -0500\" value=\"{v}\">\n  <MetadataEntry key=\"HKMetadataKeyHeartRateMotionContext\" value=\"0\"/>\n </Record>\n",
                m = i % 60,
                v = 60 + i % 40
            ));
        } else {
            xml.push_str(&format!(
                " <Record type=\"HKQuantityTypeIdentifierBodyMass\" sourceName=\"Scale\" unit=\"lb\" startDate=\"2024-01-{d:02} 07:00:00 -0500\" value=\"{v}\"/>\n",
                d = 1 + i % 28,
                v = 170 + i % 10
            ));
        }
    }
    xml.push_str("</HealthData>\n");
    xml
}

fn reassemble(input: &[u8], chunk_size: usize) -> (Vec<RawRecord>, ReassemblyStats) {
    let mut reassembler = RecordReassembler::default();
    let mut records = Vec::new();
    for chunk in input.chunks(chunk_size.max(1)) {
        reassembler.push(chunk);
        while let Some(record) = reassembler.next_record() {
            records.push(record);
        }
    }
    let stats = reassembler.finish();
    (records, stats)
}

#[rstest]
#[case::single_bytes(1)]
#[case::odd_size(17)]
#[case::page(4096)]
#[case::whole_file(usize::MAX)]
fn output_does_not_depend_on_chunk_size(#[case] chunk_size: usize) {
    let xml = export(90);
    let (expected, _) = reassemble(xml.as_bytes(), xml.len());
    let (records, stats) = reassemble(xml.as_bytes(), chunk_size);

    assert_eq!(records.len(), 90);
    assert_eq!(records, expected);
    assert_eq!(stats.records, 90);
    assert_eq!(stats.truncated_tail_bytes, 0);
    for record in &records {
        let offset = record.offset as usize;
        assert_eq!(&xml.as_bytes()[offset..offset + record.bytes.len()], &record.bytes[..]);
    }
}

#[test]
fn record_straddling_a_boundary_is_emitted_once() {
    let first = b"<Record type=\"heartRate\" value=\"72\" startDate=\"2024-01-01T00:00:00Z\"/><Record type=\"weigh";
    let second = b"t\" value=\"180\" startDate=\"2024-01-01T00:05:00Z\"/>";

    let mut reassembler = RecordReassembler::default();
    reassembler.push(first);
    let head = reassembler.next_record().expect("first record is complete");
    assert!(reassembler.next_record().is_none());
    assert!(reassembler.carry_len() > 0);

    reassembler.push(second);
    let straddling = reassembler.next_record().expect("second record completes");
    assert!(reassembler.next_record().is_none());

    assert_eq!(parse_record(&head).unwrap().record_type, "heartRate");
    let weight = parse_record(&straddling).unwrap();
    assert_eq!(weight.record_type, "weight");
    assert_eq!(weight.value, 180.0);
    assert_eq!(straddling.offset, head.bytes.len() as u64);
}

#[test]
fn record_spanning_five_chunks() {
    let record = b"<Record type=\"weight\" value=\"81.5\" startDate=\"2024-01-01\">\n</Record>";
    let piece = record.len().div_ceil(5);
    let pieces: Vec<&[u8]> = record.chunks(piece).collect();
    assert_eq!(pieces.len(), 5);

    let mut reassembler = RecordReassembler::default();
    for (i, piece) in pieces.iter().enumerate() {
        reassembler.push(piece);
        let emitted = reassembler.next_record();
        if i < 4 {
            assert!(emitted.is_none(), "emitted early after piece {}", i);
        } else {
            let emitted = emitted.expect("complete after the last piece");
            assert_eq!(emitted.bytes, Bytes::from_static(record));
        }
    }
}

#[test]
fn truncated_tail_is_not_emitted() {
    let mut xml = export(10);
    xml.truncate(xml.len() - "</HealthData>\n".len());
    let cut = " <Record type=\"HKQuantityTypeIdentifierBodyMass\" value=\"1";
    xml.push_str(cut);

    let (records, stats) = reassemble(xml.as_bytes(), 64);
    assert_eq!(records.len(), 10);
    assert_eq!(stats.truncated_tail_bytes, cut.len() as u64 - 1);
}

#[test]
fn one_malformed_record_among_a_hundred() {
    let mut xml = String::from("<HealthData>\n");
    for i in 0..100 {
        let value = if i == 42 { "n/a".to_string() } else { i.to_string() };
        xml.push_str(&format!(
            "<Record type=\"HKQuantityTypeIdentifierRestingHeartRate\" value=\"{}\" startDate=\"2024-01-01 06:00:00 +0000\"/>\n",
            value
        ));
    }
    xml.push_str("</HealthData>\n");

    let (records, _) = reassemble(xml.as_bytes(), 333);
    assert_eq!(records.len(), 100);
    let parsed: Vec<_> = records.iter().filter_map(|r| parse_record(r).ok()).collect();
    assert_eq!(parsed.len(), 99);
    assert!(parsed.iter().all(|r| r.value != 42.0));
}

#[rstest]
#[case::single_bytes(1)]
#[case::odd_size(333)]
#[case::whole_file(usize::MAX)]
fn stray_quote_loses_only_its_own_record(#[case] chunk_size: usize) {
    let mut xml = String::from("<HealthData>\n");
    for i in 0..100 {
        let value = if i == 42 { "\"7\"2\"".to_string() } else { format!("\"{}\"", 60 + i) };
        xml.push_str(&format!(
            "<Record type=\"heartRate\" value={} startDate=\"2024-01-01T00:00:00Z\"/>\n",
            value
        ));
    }
    xml.push_str("</HealthData>\n");

    let (records, stats) = reassemble(xml.as_bytes(), chunk_size);
    assert_eq!(records.len(), 99);
    assert_eq!(stats.unterminated_skipped, 1);
    assert_eq!(stats.truncated_tail_bytes, 0);
    let parsed: Vec<_> = records.iter().filter_map(|r| parse_record(r).ok()).collect();
    assert_eq!(parsed.len(), 99);
    assert!(parsed.iter().all(|r| r.value != 102.0));
}
