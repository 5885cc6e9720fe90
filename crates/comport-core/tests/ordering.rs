use comport_core::SerialChannel;
use proptest::prelude::*;
use std::sync::{Arc, Mutex};

mod common;
use common::{config, wait_until, MockBackend};

/// Up to eight non-empty driver reads.
fn driver_reads() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 1..64), 1..8)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn queue_preserves_driver_order(chunks in driver_reads()) {
        let backend = MockBackend::with_devices(&["COM3"]);
        let channel = SerialChannel::builder(config("COM3")).backend(backend.clone()).build();
        channel.start_communications().unwrap();
        let queue = channel.received_data();

        let mut expected = Vec::new();
        for chunk in &chunks {
            expected.extend_from_slice(chunk);
            backend.deliver(chunk);
            let want = expected.len();
            prop_assert!(wait_until(|| queue.len() == want));
        }
        prop_assert_eq!(queue.drain(), expected);
    }

    #[test]
    fn callback_preserves_driver_order(chunks in driver_reads()) {
        let backend = MockBackend::with_devices(&["COM3"]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let channel = SerialChannel::builder(config("COM3"))
            .backend(backend.clone())
            .on_byte(move |b| {
                sink.lock().unwrap().push(b);
                Ok(())
            })
            .build();
        channel.start_communications().unwrap();

        // Deliver without waiting so chunks may coalesce into one read.
        for chunk in &chunks {
            backend.deliver(chunk);
        }
        let expected: Vec<u8> = chunks.concat();
        prop_assert!(wait_until(|| seen.lock().unwrap().len() == expected.len()));
        let got = seen.lock().unwrap().clone();
        prop_assert_eq!(got, expected);
    }
}
