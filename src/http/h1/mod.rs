//! HTTP/1.x wire protocol: the resumable request parser and the response
//! body encoders.
pub use self::encode::Encoder;
pub use self::parse::{ParseStep, Parser};

mod encode;
mod parse;
