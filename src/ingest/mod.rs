pub mod normalizer;
pub mod transport;

pub use normalizer::Normalizer;
pub use transport::{ChainTransport, GrpcTransport, RawChainUpdate, TransportError, WebsocketTransport};
