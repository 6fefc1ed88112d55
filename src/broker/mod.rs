pub mod paper;
pub mod traits;

pub use paper::{PaperBroker, RemoteCall};
pub use traits::BrokerClient;
