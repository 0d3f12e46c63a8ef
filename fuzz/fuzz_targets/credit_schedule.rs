//! Fuzz target for the credit state machines
//!
//! Runs arbitrary operation schedules against a producer/consumer channel
//! pair and asserts the contract invariant directly: emissions never exceed
//! granted credit, and neither side ever panics.

#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use shufflewire_core::{ConsumerChannel, ProducerChannel};
use shufflewire_proto::{
    Buffer, ChannelId, DataType, PartitionId, SubpartitionIndexSet, message::PartitionRequest,
};

#[derive(Debug, Arbitrary)]
enum Op {
    Grant(u8),
    Emit(u8),
    Resume,
    Ack,
    Cancel,
    Resize(u32),
}

fuzz_target!(|input: (u8, Vec<Op>)| {
    let (initial_credit, ops) = input;

    let (mut consumer, request) = ConsumerChannel::request(
        PartitionId::new([1u8; 16], [2u8; 16]),
        SubpartitionIndexSet::from_range(0, 0),
        ChannelId::from_bytes([0xF0; 16]),
        u32::from(initial_credit),
    );
    let mut producer = ProducerChannel::open(&request);

    let mut granted = u64::from(initial_credit);
    let mut emitted = 0u64;
    let mut cancelled = false;

    for op in ops {
        match op {
            Op::Grant(n) => {
                if n > 0 && !cancelled {
                    if let Ok(grant) = consumer.grant(u32::from(n)) {
                        producer.on_add_credit(grant.credit);
                        granted += u64::from(n);
                    }
                }
            },
            Op::Emit(kind) => {
                let data_type = match kind % 4 {
                    0 => DataType::DataBuffer,
                    1 => DataType::UnalignedBarrier,
                    2 => DataType::EndOfData,
                    _ => DataType::Event,
                };
                let buffer = Buffer::plain(BytesMut::from(&b"z"[..]), data_type, false);
                match producer.emit(buffer, 0, 0) {
                    Ok(response) => {
                        emitted += 1;
                        let _ = consumer.on_buffer_response(&response);
                    },
                    Err(_) => {},
                }
            },
            Op::Resume => {
                let _ = consumer.resume();
                producer.on_resume();
            },
            Op::Ack => {
                if consumer.acknowledge_drained().is_ok() {
                    producer.on_ack_all_records();
                }
            },
            Op::Cancel => {
                producer.on_cancel();
                cancelled = true;
            },
            Op::Resize(size) => {
                producer.on_new_buffer_size(size);
            },
        }

        assert!(emitted <= granted, "producer emitted beyond granted credit");
    }
});
