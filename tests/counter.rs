//! Counter scenario: a counter molecule decremented by `decr` and read by a
//! blocking `fetch`.

use std::time::{Duration, Instant};

use retort::{Reaction, activate, blocking, molecule};

#[test]
fn counter_decrements_then_fetches_zero() {
    let counter = molecule::<i64>("counter");
    let decr = molecule::<()>("decr");
    let fetch = blocking::<(), i64>("fetch");

    let junction = activate(vec![
        Reaction::new([counter.consume(), fetch.consume_with_reply()])
            .emits([counter.output()])
            .body({
                let counter = counter.clone();
                move |b| {
                    let n: i64 = b.take(0);
                    b.reply_handle(1).reply(n);
                    counter.emit(n).unwrap();
                }
            }),
        Reaction::new([counter.consume(), decr.wildcard()])
            .emits([counter.output()])
            .body({
                let counter = counter.clone();
                move |b| {
                    let n: i64 = b.take(0);
                    counter.emit(n - 1).unwrap();
                }
            }),
    ])
    .unwrap();
    assert!(junction.warnings().is_empty());

    counter.emit(3).unwrap();
    for _ in 0..3 {
        decr.emit(()).unwrap();
    }

    // Wait for every decrement to be consumed and the counter re-emitted,
    // then the fetch must observe the final value.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let soup = junction.log_soup();
        if !soup.contains("decr(") && soup.contains("counter(") {
            break;
        }
        assert!(Instant::now() < deadline, "decrements did not drain: {soup}");
        std::thread::sleep(Duration::from_millis(10));
    }

    let got = fetch.request_timeout((), Duration::from_secs(5)).unwrap();
    assert_eq!(got, Some(0));

    let stats = junction.stats();
    assert_eq!(stats.faults, 0);
    // Three decrements and one fetch were selected; the fetch body may still
    // be winding down when the reply lands.
    assert!(stats.fired >= 4, "{stats:?}");
    assert!(stats.completed >= 3, "{stats:?}");
}

#[test]
fn fetch_observes_some_intermediate_value_under_racing_decrements() {
    let counter = molecule::<i64>("counter2");
    let decr = molecule::<()>("decr2");
    let fetch = blocking::<(), i64>("fetch2");

    activate(vec![
        Reaction::new([counter.consume(), fetch.consume_with_reply()])
            .emits([counter.output()])
            .body({
                let counter = counter.clone();
                move |b| {
                    let n: i64 = b.take(0);
                    b.reply_handle(1).reply(n);
                    counter.emit(n).unwrap();
                }
            }),
        Reaction::new([counter.consume(), decr.wildcard()])
            .emits([counter.output()])
            .body({
                let counter = counter.clone();
                move |b| {
                    let n: i64 = b.take(0);
                    counter.emit(n - 1).unwrap();
                }
            }),
    ])
    .unwrap();

    counter.emit(10).unwrap();
    for _ in 0..10 {
        decr.emit(()).unwrap();
    }
    // Any value on the way down is legal; the reply itself must arrive.
    let got = fetch
        .request_timeout((), Duration::from_secs(5))
        .unwrap()
        .expect("fetch must be served");
    assert!((0..=10).contains(&got), "implausible counter value {got}");
}
