//! End-to-end pipeline over in-memory I/O.
//!
//! Drives both endpoints of a connection through the real codec and the
//! real routers: the consumer requests a partition, the producer streams
//! credited data back, and every pooled buffer finds its way home.

use std::{cell::RefCell, rc::Rc};

use bytes::BytesMut;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use shufflewire_core::{
    ChannelHandler, NetworkBufferPool, PartitionProvider, RequestRouter, ResponseRouter,
    transport::{framed_read, send_message},
};
use shufflewire_proto::{
    Buffer, BufferAllocator, ChannelId, DataType, PartitionId, ShuffleMessage,
    SubpartitionIndexSet,
    message::{BufferResponse, PartitionRequest, RemoteFailure, TaskEventRequest},
};

struct OpenAll;

impl PartitionProvider for OpenAll {
    fn open(&mut self, _request: &PartitionRequest) -> Result<(), RemoteFailure> {
        Ok(())
    }

    fn on_task_event(&mut self, _event: &TaskEventRequest) -> Result<(), RemoteFailure> {
        Ok(())
    }
}

struct Collecting {
    payloads: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl ChannelHandler for Collecting {
    fn on_buffer(&mut self, response: BufferResponse) {
        if let Some(buffer) = &response.buffer {
            self.payloads.borrow_mut().push(buffer.to_bytes().to_vec());
        }
        // Dropping the response here recycles the pooled buffer.
    }

    fn on_backlog(&mut self, _backlog: u32) {}

    fn on_failure(&mut self, failure: &RemoteFailure) {
        panic!("unexpected failure: {}", failure.message);
    }
}

#[tokio::test(flavor = "current_thread")]
async fn credited_stream_end_to_end() {
    let receiver = ChannelId::from_bytes([0xE0; 16]);

    // consumer -> producer pipe and producer -> consumer pipe
    let (mut request_tx, request_rx) = tokio::io::duplex(64 * 1024);
    let (mut data_tx, data_rx) = tokio::io::duplex(64 * 1024);

    // Consumer side: receive pool with the channel registered.
    let consumer_pool = NetworkBufferPool::new(8, 4096);
    consumer_pool.register_channel(receiver);
    let mut responses = framed_read(data_rx, consumer_pool.clone());

    // Producer side never receives data frames; its decoder still needs an
    // allocator.
    let producer_pool = NetworkBufferPool::new(0, 4096);
    let mut requests = framed_read(request_rx, producer_pool);
    let mut producer = RequestRouter::new(OpenAll);

    // Consumer opens the channel with two credits.
    let (mut consumer, request) = shufflewire_core::ConsumerChannel::request(
        PartitionId::new([1u8; 16], [2u8; 16]),
        SubpartitionIndexSet::from_range(0, 0),
        receiver,
        2,
    );
    send_message(&mut request_tx, ShuffleMessage::PartitionRequest(request)).await.unwrap();

    // Producer handles the request and streams two payloads.
    let message = requests.next().await.unwrap().unwrap();
    producer.dispatch(message).unwrap();

    for (sequence, payload) in [b"first".as_slice(), b"second".as_slice()].iter().enumerate() {
        let channel = producer.channel_mut(&receiver).unwrap();
        let buffer = Buffer::plain(BytesMut::from(*payload), DataType::DataBuffer, false);
        let response = channel.emit(buffer, 0, 0).unwrap();
        assert_eq!(response.sequence_number, sequence as u32);
        send_message(&mut data_tx, ShuffleMessage::BufferResponse(response)).await.unwrap();
    }
    assert!(!producer.channel(&receiver).unwrap().is_writable());

    // Consumer routes both responses to its handler.
    let payloads = Rc::new(RefCell::new(Vec::new()));
    let mut router = ResponseRouter::new();
    router.register(receiver, Box::new(Collecting { payloads: Rc::clone(&payloads) }));

    for _ in 0..2 {
        let message = responses.next().await.unwrap().unwrap();
        if let ShuffleMessage::BufferResponse(response) = &message {
            consumer.on_buffer_response(response).unwrap();
        }
        router.dispatch(message).unwrap();
    }

    assert_eq!(*payloads.borrow(), vec![b"first".to_vec(), b"second".to_vec()]);
    assert_eq!(consumer.outstanding_credit(), 0);
    // Handler consumed and dropped both messages: all pooled segments home.
    assert_eq!(consumer_pool.available(), 8);
}

#[tokio::test(flavor = "current_thread")]
async fn send_failure_releases_the_payload() {
    let pool = NetworkBufferPool::new(1, 1024);
    let receiver = ChannelId::from_bytes([0xE1; 16]);
    pool.register_channel(receiver);

    let mut buffer = pool.allocate_pooled(receiver).unwrap();
    buffer.set_data_type(DataType::DataBuffer);
    assert_eq!(pool.available(), 0);

    // A pipe whose read end is gone: the write fails.
    let (mut dead_tx, dead_rx) = tokio::io::duplex(16);
    drop(dead_rx);

    let response = BufferResponse::new(buffer, receiver, 0, 0, 0);
    let result = send_message(&mut dead_tx, ShuffleMessage::BufferResponse(response)).await;
    assert!(result.is_err());

    // The failed send released the buffer exactly once.
    assert_eq!(pool.available(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn fatal_decode_error_surfaces_through_the_stream() {
    let (mut tx, rx) = tokio::io::duplex(1024);
    let pool = NetworkBufferPool::new(0, 1024);
    let mut messages = framed_read(rx, pool);

    tx.write_all(&[0x00, 0x00, 0x00, 0x09, 0xDE, 0xAD, 0xBE, 0xEF, 0x05]).await.unwrap();
    tx.flush().await.unwrap();

    let err = messages.next().await.unwrap().unwrap_err();
    assert!(err.is_fatal());
}
