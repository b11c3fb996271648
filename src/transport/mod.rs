pub mod memory;
pub mod traits;
pub mod websocket;

pub use memory::{memory_transport, MemoryConnector, MemoryListener, MemoryPeer, MemoryStream};
pub use traits::{TransportConnector, TransportEvent, TransportStream};
pub use websocket::{WebSocketConnector, WebSocketTransportStream};
