pub mod jws;
pub mod jwt;
pub mod signing;

pub use signing::create_signed_jwt;
