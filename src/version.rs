// ABOUTME: Build identity: crate version plus commit/date stamped at build time.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn commit() -> &'static str {
    option_env!("RAD_BUILD_COMMIT").unwrap_or("unknown")
}

pub fn build_date() -> &'static str {
    option_env!("RAD_BUILD_DATE").unwrap_or("unknown")
}

pub fn long() -> String {
    format!("rad {VERSION} ({}) built {}", commit(), build_date())
}
