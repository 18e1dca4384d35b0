pub mod connection;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod registry;

mod store;

pub use coordinator::Coordinator;
pub use dispatcher::{DeliveryOutcome, Dispatcher};
pub use error::GatewayError;
pub use registry::{PushOutcome, Registry};
