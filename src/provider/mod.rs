pub mod decode;
pub mod dispatch;
pub mod router;
pub mod types;

pub use dispatch::{ByteStream, CancelHandle, Dispatch, Dispatcher};
pub use router::{Endpoints, Router};
pub use types::{ChatMessage, WireFormat};
