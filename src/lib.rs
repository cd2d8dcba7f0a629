pub mod channel;
pub mod config;
pub mod error;
mod fanout;
pub mod form;
pub mod gateway;
pub mod model;
pub mod phone;
pub mod session;
pub mod wire;

pub use channel::{ChannelConfig, ChannelEvent, NotificationChannel};
pub use config::{Config, ReconnectPolicy};
pub use error::SubmitError;
pub use form::{CommandId, PaymentForm};
pub use gateway::{Acknowledgment, HttpGateway, PaymentGateway};
pub use model::{ConnectionState, InboundNotification, PaymentRequest, RequestKind};
pub use phone::PhoneNumber;
pub use session::{Outcome, OutcomeResult, Session, SessionEvent};
