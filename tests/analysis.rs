//! Static-analysis scenarios: shadowing and livelock reject activation,
//! emission-order deadlocks come back as warnings.

use retort::{ActivationError, Reaction, activate, blocking, molecule};

#[test]
fn shadowed_reaction_rejects_activation() {
    let a = molecule::<i64>("sh_a");
    let b = molecule::<i64>("sh_b");

    let err = activate(vec![
        Reaction::new([a.wildcard()]),
        Reaction::new([a.wildcard(), b.wildcard()]),
    ])
    .err()
    .expect("activation must be rejected");

    let message = err.to_string();
    assert!(
        message.contains("Unavoidable indeterminism"),
        "unexpected message: {message}"
    );
    assert!(message.contains("is shadowed by"), "unexpected message: {message}");

    // Idempotence of failure: nothing got bound.
    assert!(a.emit(1).is_err());
    assert!(b.emit(1).is_err());
}

#[test]
fn self_reenabling_reaction_rejects_activation() {
    let a = molecule::<i64>("ll_a");
    let b = molecule::<i64>("ll_b");

    // a(1) + b(_) => b(1) + b(2) + a(1)
    let err = activate(vec![
        Reaction::new([a.eq(1), b.wildcard()]).emits([
            b.output_value(1),
            b.output_value(2),
            a.output_value(1),
        ]),
    ])
    .err()
    .expect("activation must be rejected");

    assert!(
        err.to_string().contains("Unavoidable livelock"),
        "unexpected message: {err}"
    );
}

#[test]
fn guarded_self_reenabling_reaction_activates_with_warning() {
    let a = molecule::<i64>("wl_a");

    let junction = activate(vec![
        Reaction::new([a.consume()])
            .guard(|b| *b.value::<i64>(0) > 0)
            .emits([a.output()])
            .body(|_| {}),
    ])
    .unwrap();

    assert_eq!(junction.warnings().len(), 1);
    assert!(junction.warnings()[0].contains("Possible livelock"));
}

#[test]
fn blocking_emitted_before_its_needed_partner_warns() {
    let f = blocking::<(), i64>("dl_f");
    let a = molecule::<i64>("dl_a");
    let c = molecule::<()>("dl_c");

    // First junction consumes f together with a.
    activate(vec![
        Reaction::new([f.consume_with_reply(), a.consume()]).body(|b| {
            b.reply_handle(0).reply(0i64);
        }),
    ])
    .unwrap();

    // Second junction emits f, then a: the emitter parks on f before a
    // exists, and f's consumer needs a.
    let second = activate(vec![
        Reaction::new([c.wildcard()]).emits([f.output(), a.output()]),
    ])
    .unwrap();

    assert_eq!(second.warnings().len(), 1);
    assert!(
        second.warnings()[0].contains("Possible deadlock: molecule dl_f"),
        "unexpected warning: {}",
        second.warnings()[0]
    );
}

#[test]
fn activation_errors_name_the_join_site() {
    let a = molecule::<i64>("site_a");
    let err = activate(vec![
        Reaction::new([a.consume()]),
        Reaction::new([a.consume()]),
    ])
    .err()
    .expect("identical reactions shadow each other");

    match err {
        ActivationError::Rejected(report) => {
            assert_eq!(report.site, "Join{site_a; site_a}");
            assert!(report.errors.iter().all(|e| e.starts_with("In Join{")));
        }
        other => panic!("expected Rejected, got {other}"),
    }
}

#[test]
fn empty_reaction_list_is_refused() {
    assert!(matches!(
        activate(vec![]),
        Err(ActivationError::Config(_))
    ));
}
