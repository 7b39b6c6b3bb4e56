#![allow(clippy::unwrap_used, clippy::expect_used, unsafe_code)]
//! Ordered channel under real producer concurrency: OS threads and `may`
//! coroutines claiming against one draining consumer thread.

mod common;

use std::sync::Arc;
use std::thread;

use brrtmediator::channel::{ordered_channel, ChannelError, OrderedChannel, SlotData};

#[derive(Default)]
struct Tagged {
    producer: Option<usize>,
    seq: usize,
}

impl SlotData for Tagged {
    fn clear(&mut self) {
        self.producer = None;
        self.seq = 0;
    }

    fn is_empty(&self) -> bool {
        self.producer.is_none()
    }
}

fn send(channel: &OrderedChannel<Tagged>, producer: usize, seq: usize) {
    let mut handle = channel.claim().unwrap();
    handle.write(|slot| {
        slot.producer = Some(producer);
        slot.seq = seq;
    });
    handle.publish();
}

/// Drain until close, checking every slot is non-empty and per-producer order holds.
fn spawn_consumer(
    mut rx: brrtmediator::channel::ChannelReceiver<Tagged>,
    producers: usize,
) -> thread::JoinHandle<Vec<usize>> {
    thread::spawn(move || {
        let mut next = vec![0usize; producers];
        let mut expected_sequence = 0u64;
        while let Some(slot) = rx.drain() {
            assert!(!slot.is_empty());
            assert_eq!(slot.sequence(), expected_sequence);
            expected_sequence += 1;
            let producer = slot.producer.unwrap();
            assert_eq!(slot.seq, next[producer], "producer {producer} out of order");
            next[producer] += 1;
        }
        next
    })
}

#[test]
fn test_thread_producers_keep_their_order() {
    let (channel, rx) = ordered_channel::<Tagged>(16).unwrap();
    let consumer = spawn_consumer(rx, 6);

    let producers: Vec<_> = (0..6)
        .map(|p| {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                for seq in 0..500 {
                    send(&channel, p, seq);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    channel.close();

    assert_eq!(consumer.join().unwrap(), vec![500; 6]);
    assert_eq!(channel.published_count(), 3000);
    assert_eq!(channel.consumed_count(), 3000);
    assert!(channel.is_empty());
}

#[test]
fn test_coroutine_producers_under_backpressure() {
    common::setup_may_runtime();
    // Far fewer slots than producers, so most claims park
    let (channel, rx) = ordered_channel::<Tagged>(4).unwrap();
    let consumer = spawn_consumer(rx, 20);

    let producers: Vec<_> = (0..20)
        .map(|p| {
            let channel = Arc::clone(&channel);
            may::go!(move || {
                for seq in 0..50 {
                    send(&channel, p, seq);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    channel.close();

    assert_eq!(consumer.join().unwrap(), vec![50; 20]);
}

#[test]
fn test_closed_channel_refuses_claims() {
    let (channel, mut rx) = ordered_channel::<Tagged>(2).unwrap();
    send(&channel, 0, 0);
    channel.close();
    assert!(channel.is_closed());
    assert_eq!(channel.claim().err(), Some(ChannelError::Closed));
    assert_eq!(channel.try_claim().err(), Some(ChannelError::Closed));

    // Work claimed before the close is still delivered
    assert_eq!(rx.drain().unwrap().producer, Some(0));
    assert!(rx.drain().is_none());
}
