pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{AppConfig, ClientOptions};
pub use error::{DecodeError, OpenlikeError, Result};
pub use traits::ChatModel;
pub use types::*;
