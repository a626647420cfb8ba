pub mod backend;
pub mod bus;
pub mod config;
pub mod error;
pub mod facade;

pub use backend::fallback::{ClockMode, FallbackBackend};
pub use backend::native::transport::{ChannelTransport, HostEndpoint, NativeTransport, OutboundMessage};
pub use backend::native::NativeBridgeBackend;
pub use backend::{AudioBackend, Outcome};
pub use bus::{BusEvent, EventBus, SubscriptionId, Topic};
pub use config::Config;
pub use error::{AudioError, AudioResult};
pub use facade::AudioFacade;

/// Facade with both production backends registered and the first available
/// preferred backend active.
pub fn facade_from_config(config: &Config) -> std::io::Result<AudioFacade> {
    let mut facade = AudioFacade::new();
    facade.register_backend(Box::new(NativeBridgeBackend::from_config(config)));
    facade.register_backend(Box::new(FallbackBackend::from_config(config)?));
    facade.detect_and_set_backend(&config.preferred_backends());
    Ok(facade)
}
