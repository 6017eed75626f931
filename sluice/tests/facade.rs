use sluice::prelude::*;
use sluice::scheduler::run_until_idle;

#[test]
fn test_prelude_builds_a_chain() {
    let _ = sluice::observe::try_init_tracing();

    let source = from_iter(["alpha", "beta"]);
    let upper: Transform<&'static str, String> = map(|s: &'static str| s.to_uppercase());
    let (sink, seen) = collect();
    upper.pipe(&sink).unwrap();
    source.pipe(&upper).unwrap();
    run_until_idle();

    assert_eq!(*seen.borrow(), vec!["ALPHA", "BETA"]);
}

#[test]
fn test_second_tracing_init_is_reported() {
    let _ = sluice::observe::try_init_tracing();
    assert!(sluice::observe::try_init_tracing().is_err());
}

#[test]
fn test_prelude_listeners_take_plain_closures() {
    let (sink, seen) = collect::<u8>();
    let finished = std::rc::Rc::new(std::cell::Cell::new(false));
    let flag = finished.clone();
    sink.on_finish(move || flag.set(true));
    sink.on_drain(|| {});
    sink.on_error(|_err: &StreamError| {});
    sink.on_close(|| {});

    sink.write(4);
    sink.end();
    run_until_idle();

    assert!(finished.get());
    assert_eq!(*seen.borrow(), vec![4]);
}
