pub mod error;
pub mod message;
pub mod option;

pub use error::CodecError;
pub use message::{Cc, Dao, DaoAck, Dio, Dis, RplBody, RplMessage};
pub use option::RplOption;
