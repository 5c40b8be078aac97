//! Multi-threaded stress over the buffer queue: one producer thread, a
//! pack of consumers attached up front, and a straggler attaching midway.
//! Every consumer must observe an uninterrupted put-order sequence, and
//! every payload must be released exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use rivulet::queue::Producer;

const PUTS: u32 = 1000;
const READERS: usize = 6;

struct Payload {
    value: u32,
    drops: Arc<AtomicUsize>,
}

impl Drop for Payload {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

fn drain(mut consumer: rivulet::queue::Consumer<Payload>) -> Vec<u32> {
    let mut seen = Vec::new();
    loop {
        match consumer.get() {
            Some(payload) => {
                seen.push(payload.value);
                consumer.advance();
            }
            None => {
                if !consumer.wait_timeout(Duration::from_secs(10)) {
                    break;
                }
            }
        }
    }
    seen
}

#[test]
fn concurrent_consumers_see_put_order_and_payloads_release_once() {
    let drops = Arc::new(AtomicUsize::new(0));
    let producer = Producer::new();

    let mut readers = Vec::new();
    for _ in 0..READERS {
        let consumer = producer.subscribe();
        readers.push(thread::spawn(move || drain(consumer)));
    }

    let feeder = {
        let drops = Arc::clone(&drops);
        thread::spawn(move || {
            for value in 0..PUTS {
                producer.put(Payload {
                    value,
                    drops: Arc::clone(&drops),
                });
                if value % 128 == 0 {
                    thread::yield_now();
                }
            }
            // Producer drops here: end-of-stream for every reader.
        })
    };

    feeder.join().unwrap();

    let expected: Vec<u32> = (0..PUTS).collect();
    for reader in readers {
        assert_eq!(reader.join().unwrap(), expected);
    }

    assert_eq!(
        drops.load(Ordering::SeqCst),
        PUTS as usize,
        "each payload released exactly once"
    );
}

#[test]
fn late_consumer_observes_a_contiguous_suffix() {
    let drops = Arc::new(AtomicUsize::new(0));
    let producer = Arc::new(Producer::new());

    let early = producer.subscribe();
    let early_reader = thread::spawn(move || drain(early));

    let feeder = {
        let producer = Arc::clone(&producer);
        let drops = Arc::clone(&drops);
        thread::spawn(move || {
            for value in 0..PUTS {
                producer.put(Payload {
                    value,
                    drops: Arc::clone(&drops),
                });
                if value % 64 == 0 {
                    thread::yield_now();
                }
            }
        })
    };

    // Attach somewhere in the middle of the feed.
    thread::sleep(Duration::from_millis(1));
    let late = producer.subscribe();
    let late_reader = thread::spawn(move || drain(late));

    feeder.join().unwrap();
    drop(producer);

    let early_seen = early_reader.join().unwrap();
    assert_eq!(early_seen, (0..PUTS).collect::<Vec<_>>());

    // Whatever the attach point was, the view is the tail from there on.
    let late_seen = late_reader.join().unwrap();
    let first = late_seen.first().copied().unwrap_or(PUTS);
    assert_eq!(late_seen, (first..PUTS).collect::<Vec<_>>());

    assert_eq!(drops.load(Ordering::SeqCst), PUTS as usize);
}
