use std::sync::{Arc, Mutex};
use std::time::Duration;

use wiremod_core::checksum::{crc16, lrc};
use wiremod_core::pdu::Request;
use wiremod_datalink::{
    AduHeader, AsciiTransport, BinTransport, LinkError, MemoryChannel, ModbusTransaction,
    ModbusTransport, RequestAdu, RtuTransport, SerialConnection, SerialEncoding, SerialParameters,
    SerialTransaction, TransactionConfig, TransportConnection,
};

fn with_crc(mut frame: Vec<u8>) -> Vec<u8> {
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

#[test]
fn rtu_read_holding_registers_request_on_the_wire() {
    let master_side = MemoryChannel::new();
    let mut master = RtuTransport::new(master_side.clone());
    master
        .write_request(&RequestAdu::new(
            1,
            Request::ReadHoldingRegisters {
                start_address: 0,
                quantity: 2,
            },
        ))
        .unwrap();
    let frame = master_side.written().remove(0);
    assert_eq!(frame, vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]);

    let slave_side = MemoryChannel::new();
    slave_side.push_input(frame);
    let mut slave = RtuTransport::new(slave_side);
    let request = slave.read_request().unwrap();
    assert_eq!(request.header, AduHeader::serial(1));
    assert_eq!(
        request.request,
        Request::ReadHoldingRegisters {
            start_address: 0,
            quantity: 2
        }
    );
}

#[test]
fn ascii_frame_is_checked_before_dispatch() {
    let channel = MemoryChannel::new();
    // A frame with a wrong LRC is skipped by the slave.
    channel.push_input(b":1103000A0002F2\r\n".to_vec());
    channel.push_input(b":1103000A0002E0\r\n".to_vec());
    channel.close();

    let mut slave = AsciiTransport::new(channel);
    slave.set_unit_filter(Some(0x11));
    let request = slave.read_request().unwrap();
    assert_eq!(request.header.unit_id, 0x11);
    assert_eq!(
        request.request,
        Request::ReadHoldingRegisters {
            start_address: 0x0A,
            quantity: 2
        }
    );
    assert_eq!(lrc(&[0x11, 0x03, 0x00, 0x0A, 0x00, 0x02]), 0xE0);
    assert!(matches!(
        slave.read_request(),
        Err(LinkError::ConnectionClosed)
    ));
}

#[test]
fn ascii_master_surfaces_lrc_failure_then_retries() {
    let channel = MemoryChannel::new();
    channel.push_input(b":110302002A00\r\n".to_vec());
    channel.push_input(b":110302002AC0\r\n".to_vec());
    let connection = TransportConnection::from_transport(AsciiTransport::new(channel.clone()));
    let mut transaction = SerialTransaction::new(Arc::new(Mutex::new(connection)))
        .with_config(TransactionConfig::default().with_retries(2));
    transaction.set_request(RequestAdu::new(
        0x11,
        Request::ReadHoldingRegisters {
            start_address: 0x0A,
            quantity: 1,
        },
    ));
    transaction.execute().unwrap();

    assert_eq!(channel.written().len(), 2);
    assert_eq!(
        transaction.response().unwrap().response.registers(),
        Some(&[42u16][..])
    );
}

#[test]
fn serial_retries_stop_after_the_attempt_budget() {
    let channel = MemoryChannel::new();
    let params = SerialParameters::new("loop", 19200)
        .with_encoding(SerialEncoding::Bin)
        .with_receive_timeout(Duration::from_millis(5));
    let connection = SerialConnection::from_channel(params, channel.clone()).unwrap();
    let mut transaction = SerialTransaction::new(Arc::new(Mutex::new(connection)))
        .with_config(TransactionConfig::default().with_retries(4));
    transaction.set_request(RequestAdu::new(
        3,
        Request::WriteSingleCoil {
            address: 0x7B,
            value: true,
        },
    ));

    match transaction.execute() {
        Err(LinkError::RetriesExhausted { attempts, source }) => {
            assert_eq!(attempts, 4);
            assert!(matches!(*source, LinkError::Timeout));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    let written = channel.written();
    assert_eq!(written.len(), 4);
    // The coil address byte equals the frame start sentinel and is doubled.
    assert_eq!(&written[0][..6], &[b'{', 0x03, 0x05, 0x00, b'{', b'{']);
}

#[test]
fn bin_slave_answers_through_escaped_frames() {
    let channel = MemoryChannel::new();
    let mut master = BinTransport::new(channel.clone());
    master
        .write_message(AduHeader::serial(0x7D), &[0x06, 0x00, 0x7B, 0x00, 0x7D])
        .unwrap();
    let frame = channel.written().remove(0);

    let slave_side = MemoryChannel::new();
    slave_side.push_input(frame);
    slave_side.close();
    let mut slave = BinTransport::new(slave_side);
    let request = slave.read_request().unwrap();
    assert_eq!(request.header.unit_id, 0x7D);
    assert_eq!(
        request.request,
        Request::WriteSingleRegister {
            address: 0x7B,
            value: 0x7D
        }
    );
}

#[test]
fn rtu_exception_response_completes_the_transaction() {
    let channel = MemoryChannel::new();
    channel.push_input(with_crc(vec![0x05, 0x86, 0x02]));
    let connection = TransportConnection::from_transport(RtuTransport::new(channel.clone()));
    let mut transaction = SerialTransaction::new(Arc::new(Mutex::new(connection)));
    transaction.set_request(RequestAdu::new(
        5,
        Request::WriteSingleRegister {
            address: 0x1000,
            value: 1,
        },
    ));

    let err = transaction.execute().unwrap_err();
    assert!(matches!(err, LinkError::Exception(_)));
    assert!(err.to_string().contains("illegal data address"));
    assert_eq!(channel.written().len(), 1);
}
