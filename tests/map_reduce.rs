//! Map/reduce scenario: sum of squares 1..=100 through carrier molecules,
//! an accumulator seeded by a singleton initializer, and a guarded fetch.

use std::time::Duration;

use retort::{Reaction, activate, blocking, molecule};

#[test]
fn sum_of_squares_one_to_one_hundred() {
    let carrier = molecule::<i64>("carrier");
    let interm = molecule::<i64>("interm");
    let acc = molecule::<(i64, i64)>("acc");
    let fetch = blocking::<(), i64>("get_sum");

    let junction = activate(vec![
        Reaction::initializer({
            let acc = acc.clone();
            move || acc.emit((0, 0)).unwrap()
        }),
        Reaction::new([carrier.consume()]).emits([interm.output()]).body({
            let interm = interm.clone();
            move |b| {
                let a: i64 = b.take(0);
                interm.emit(a * a).unwrap();
            }
        }),
        Reaction::new([acc.consume(), interm.consume()])
            .emits([acc.output()])
            .body({
                let acc = acc.clone();
                move |b| {
                    let (count, sum): (i64, i64) = b.take(0);
                    let x: i64 = b.take(1);
                    acc.emit((count + 1, sum + x)).unwrap();
                }
            }),
        Reaction::new([acc.consume(), fetch.consume_with_reply()])
            .guard(|b| b.value::<(i64, i64)>(0).0 == 100)
            .emits([acc.output()])
            .body({
                let acc = acc.clone();
                move |b| {
                    let (count, sum): (i64, i64) = b.take(0);
                    b.reply_handle(1).reply(sum);
                    acc.emit((count, sum)).unwrap();
                }
            }),
    ])
    .unwrap();
    assert!(junction.warnings().is_empty());

    for a in 1..=100 {
        carrier.emit(a).unwrap();
    }
    let sum = fetch
        .request_timeout((), Duration::from_secs(30))
        .unwrap()
        .expect("fetch must be served once all carriers are folded");
    assert_eq!(sum, 338_350);

    let stats = junction.stats();
    // 100 squarings, 100 folds, 1 initializer-independent fetch.
    assert!(stats.fired >= 201, "unexpectedly few reactions: {stats:?}");
    assert_eq!(stats.faults, 0);
}
