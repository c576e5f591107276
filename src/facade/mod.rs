pub mod database;
pub mod interceptor;

pub use database::{Database, DatabaseStats};
pub use interceptor::{ConnectionInterceptor, InjectedFault};
