pub mod channel;
pub mod codec;
pub mod config;
pub mod gateway;
pub mod metrics;
pub mod reconciler;
pub mod router;
pub mod store;
pub mod sweeper;
pub mod testing;
pub mod ticket;

pub use channel::{inbound_queue, ChannelError, InboundReceiver, InboundSender, KafkaChannel, TicketProducer};
pub use codec::{CodecError, RegistryError, SchemaRegistry, TicketCodec};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
    StoreBackend,
};
pub use gateway::{GatewayError, Operation, Receipt, TicketGateway};
pub use reconciler::{
    HttpNotifier, Notifier, NotifyError, Outcome, ReconcileError, ReconcilerPool,
    ReconciliationEngine, SourceRegistry,
};
pub use router::{BillingChannel, RouteError};
pub use store::{RedisStateStore, SqliteStateStore, StateStore, StoreError};
pub use sweeper::{ExpirySweeper, SweepReport};
pub use ticket::{
    MessageKind, Ticket, TicketEventDto, TicketRequest, TicketState, TicketStatus,
};
