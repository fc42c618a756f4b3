mod communicator;
mod descriptor;
pub mod error;
mod local;
mod mock;

pub use communicator::{Communicator, CommunicatorPtr, Value};
pub use descriptor::{WorkerDescriptor, WorkerSet};
pub use error::{CommsError, Result};
pub use local::LocalCommunicator;
pub use mock::{MOCK_HOST_ID, MockCommunicator};
