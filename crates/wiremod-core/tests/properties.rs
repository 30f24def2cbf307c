use proptest::prelude::*;
use wiremod_core::checksum::{crc16, lrc};
use wiremod_core::codec::{
    AsciiReader, AsciiWriter, BinReader, BinWriter, Symbol, SymbolRead, SymbolWrite,
};
use wiremod_core::encoding::{Reader, Writer};
use wiremod_core::frame;
use wiremod_core::pdu::{Request, Response};

fn write_frame<W: SymbolWrite>(writer: &mut W, payload: &[u8]) {
    writer.write_symbol(Symbol::FrameStart).unwrap();
    writer.write_bytes(payload).unwrap();
    writer.write_symbol(Symbol::FrameEnd).unwrap();
}

/// Data bytes between the first frame start and the following frame end.
fn read_frame<R: SymbolRead>(reader: &mut R) -> Vec<u8> {
    loop {
        match reader.read_symbol().unwrap() {
            Some(Symbol::FrameStart) => break,
            Some(_) => continue,
            None => panic!("no frame start"),
        }
    }
    let mut payload = Vec::new();
    loop {
        match reader.read_symbol().unwrap() {
            Some(Symbol::Byte(byte)) => payload.push(byte),
            Some(Symbol::FrameEnd) => return payload,
            other => panic!("unexpected symbol {other:?}"),
        }
    }
}

fn pdu_strategy() -> impl Strategy<Value = Vec<u8>> {
    (1u8..0x80, proptest::collection::vec(any::<u8>(), 0..252)).prop_map(|(function, data)| {
        let mut pdu = vec![function];
        pdu.extend(data);
        pdu
    })
}

proptest! {
    #[test]
    fn rtu_frame_roundtrip(unit in any::<u8>(), pdu in pdu_strategy()) {
        let mut buf = [0u8; 300];
        let mut w = Writer::new(&mut buf);
        frame::rtu::encode_frame(&mut w, unit, &pdu).unwrap();
        let (decoded_unit, decoded_pdu) = frame::rtu::decode_frame(w.as_written()).unwrap();
        prop_assert_eq!(decoded_unit, unit);
        prop_assert_eq!(decoded_pdu, pdu.as_slice());
    }

    #[test]
    fn ascii_frame_roundtrip(unit in any::<u8>(), pdu in pdu_strategy()) {
        let mut payload = vec![unit];
        payload.extend_from_slice(&pdu);
        payload.push(lrc(&payload));

        let mut writer = AsciiWriter::new(Vec::new());
        write_frame(&mut writer, &payload);
        let wire = writer.into_inner();
        prop_assert_eq!(wire.len(), payload.len() * 2 + 3);
        prop_assert!(wire[1..wire.len() - 2]
            .iter()
            .all(|c| matches!(c, b'0'..=b'9' | b'A'..=b'F')));

        let decoded = read_frame(&mut AsciiReader::new(wire.as_slice()));
        let (decoded_unit, decoded_pdu) = frame::ascii::verify(&decoded).unwrap();
        prop_assert_eq!(decoded_unit, unit);
        prop_assert_eq!(decoded_pdu, pdu.as_slice());
    }

    #[test]
    fn bin_frame_roundtrip(unit in any::<u8>(), pdu in pdu_strategy()) {
        let mut payload = vec![unit];
        payload.extend_from_slice(&pdu);
        let crc = crc16(&payload);
        payload.extend_from_slice(&crc.to_le_bytes());

        let mut writer = BinWriter::new(Vec::new());
        write_frame(&mut writer, &payload);
        let wire = writer.into_inner();
        let sentinels = payload.iter().filter(|b| frame::bin::is_sentinel(**b)).count();
        prop_assert_eq!(wire.len(), payload.len() + sentinels + 2);

        let decoded = read_frame(&mut BinReader::new(wire.as_slice()));
        let (decoded_unit, decoded_pdu) = frame::bin::verify(&decoded).unwrap();
        prop_assert_eq!(decoded_unit, unit);
        prop_assert_eq!(decoded_pdu, pdu.as_slice());
    }

    #[test]
    fn bin_stream_restores_payload(payload in proptest::collection::vec(any::<u8>(), 0..64)) {
        let mut writer = BinWriter::new(Vec::new());
        write_frame(&mut writer, &payload);
        let wire = writer.into_inner();

        let mut reader = BinReader::new(wire.as_slice());
        prop_assert_eq!(read_frame(&mut reader), payload);
        prop_assert_eq!(reader.read_symbol().unwrap(), None);
    }

    #[test]
    fn lrc_detects_single_byte_corruption(
        pdu in pdu_strategy(),
        idx in any::<prop::sample::Index>(),
        delta in 1u8..=255,
    ) {
        let mut payload = vec![0x11];
        payload.extend_from_slice(&pdu);
        payload.push(lrc(&payload));
        let at = idx.index(payload.len());
        payload[at] = payload[at].wrapping_add(delta);
        prop_assert!(frame::ascii::verify(&payload).is_err());
    }

    #[test]
    fn crc_detects_single_byte_corruption(
        pdu in pdu_strategy(),
        idx in any::<prop::sample::Index>(),
        delta in 1u8..=255,
    ) {
        let mut buf = [0u8; 300];
        let mut w = Writer::new(&mut buf);
        frame::rtu::encode_frame(&mut w, 0x01, &pdu).unwrap();
        let mut corrupted = w.as_written().to_vec();
        let at = idx.index(corrupted.len());
        corrupted[at] = corrupted[at].wrapping_add(delta);
        prop_assert!(frame::rtu::decode_frame(&corrupted).is_err());
    }

    #[test]
    fn random_request_decode_does_not_panic(data in proptest::collection::vec(any::<u8>(), 0..260)) {
        let _ = Request::decode(&data);
    }

    #[test]
    fn random_response_decode_does_not_panic(data in proptest::collection::vec(any::<u8>(), 0..260)) {
        let _ = Response::decode(&data);
    }

    #[test]
    fn random_mbap_decode_does_not_panic(data in proptest::collection::vec(any::<u8>(), 0..270)) {
        let mut r = Reader::new(&data);
        let _ = frame::tcp::decode_frame(&mut r);
    }

    #[test]
    fn register_response_roundtrip(registers in proptest::collection::vec(any::<u16>(), 1..=125)) {
        let mut pdu = vec![0x03, (registers.len() * 2) as u8];
        for reg in &registers {
            pdu.extend_from_slice(&reg.to_be_bytes());
        }
        let decoded = Response::decode(&pdu).unwrap();
        prop_assert_eq!(decoded.registers(), Some(registers.as_slice()));
        prop_assert_eq!(decoded.to_pdu().unwrap(), pdu);
    }

    #[test]
    fn write_registers_request_roundtrip(
        start in any::<u16>(),
        values in proptest::collection::vec(any::<u16>(), 1..=123),
    ) {
        let request = Request::WriteMultipleRegisters { start_address: start, values };
        let pdu = request.to_pdu().unwrap();
        prop_assert_eq!(Request::decode(&pdu).unwrap(), request);
    }
}
