pub mod error;
pub mod reader;
pub mod reply;

pub use error::ReplyError;
pub use reader::ResponseReader;
pub use reply::Reply;
