/// Token and credential primitives.
///
/// Claims and the stateless token codec, plus password hashing. All
/// storage-backed session state lives in `crate::store`.

mod claims;
mod codec;
mod password;

pub use claims::Claims;
pub use claims::Role;
pub use codec::TokenCodec;
pub use codec::TokenKind;
pub use codec::TokenPair;
pub use password::hash_password;
pub use password::verify_password;
