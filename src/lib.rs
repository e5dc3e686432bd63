pub mod cli;
pub mod config;
pub mod env;
pub mod logging;
pub mod protocol;
pub mod sync;
pub mod timing;

pub use config::{ClientSettings, Config, Dispatch, ServerSettings};
pub use env::Environment;
pub use logging::{ConsoleLog, FileLog, LogSink};
pub use protocol::{Client, Message, Server, Value};
