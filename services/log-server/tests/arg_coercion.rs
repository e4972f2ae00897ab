//! End-to-end scenario: typed argument narrowing accessors coerce across
//! compatible representations and refuse incompatible ones.
//!
//! The second case picks a value that actually overflows `i32`
//! (`as_i32` fails to narrow, `as_i64`/`as_f32` succeed) rather than a
//! smaller one that would fit — a value like 70000 fits comfortably in an
//! `i32`, so asserting `as_i32 == None` for it would contradict
//! `Arg::as_i32`'s documented "fits or doesn't" narrowing rather than
//! demonstrate it.

use log_model::{Arg, ArgValue};

#[test]
fn bool_tagged_integral_one_coerces_to_true() {
    let arg = Arg::new("flag", "bool", ArgValue::I64(1));
    assert_eq!(arg.as_bool(), Some(true));
    assert_eq!(arg.as_i64(), Some(1));
    assert_eq!(arg.as_string(), None);
}

#[test]
fn u64_value_overflowing_i32_narrows_to_i64_and_f32_but_not_i32() {
    let arg = Arg::new("count", "u64", ArgValue::U64(5_000_000_000));
    assert_eq!(arg.as_i32(), None, "5_000_000_000 overflows i32::MAX");
    assert_eq!(arg.as_i64(), Some(5_000_000_000));
    assert_eq!(arg.as_f32(), Some(5_000_000_000.0_f32));
}
