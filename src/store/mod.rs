/// Durable state: accounts, verification codes, and session tokens.
///
/// The database is the single source of truth and the only shared mutable
/// resource; every multi-step mutation that must be atomic runs as a
/// store-level transaction here.

pub mod accounts;
pub mod session_tokens;
pub mod verification_codes;
