pub mod dispatcher;
pub mod protocol;

pub use dispatcher::{run, Dispatcher, Flow};
