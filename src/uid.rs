use std::sync::atomic::{AtomicI64, Ordering};

use time::OffsetDateTime;

/// `YYYYMMDD'T'HHMMSS<micros>'Z'`: UTC timestamp plus a monotone
/// microsecond counter, unique within a process.
pub const UID_LEN: usize = 22;

static LAST_MICROS: AtomicI64 = AtomicI64::new(0);

fn next_micros() -> i64 {
    let now = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000) as i64;
    let mut last = LAST_MICROS.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_MICROS.compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(observed) => last = observed,
        }
    }
}

fn format_micros(micros: i64) -> String {
    let dt = OffsetDateTime::from_unix_timestamp_nanos(i128::from(micros) * 1_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}{:06}Z",
        dt.year(),
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        dt.microsecond()
    )
}

/// Strictly monotone within the process: a burst of calls in the same
/// microsecond borrows from the counter tail.
pub fn generate_uid() -> String {
    format_micros(next_micros())
}

pub fn is_uid(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != UID_LEN {
        return false;
    }
    if bytes[8] != b'T' || bytes[21] != b'Z' {
        return false;
    }
    bytes[..8].iter().all(u8::is_ascii_digit) && bytes[9..21].iter().all(u8::is_ascii_digit)
}
