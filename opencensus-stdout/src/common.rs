use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serializer;

pub(crate) fn as_unix_nano<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let nanos = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    serializer.serialize_u128(nanos)
}

pub(crate) fn as_opt_unix_nano<S>(
    time: &Option<SystemTime>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match time {
        Some(time) => as_unix_nano(time, serializer),
        None => serializer.serialize_none(),
    }
}
