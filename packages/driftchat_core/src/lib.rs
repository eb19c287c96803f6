//! driftchat_core - Realtime chat session core
//!
//! The client-side state machine behind a one-to-one chat UI: one
//! realtime channel per authenticated session, presence tracking,
//! a single scoped message subscription, and an ordered message store.
//! It has no rendering dependencies; everything observable is exposed
//! through watch channels a UI layer can subscribe to.
//!
//! # Example
//!
//! ```no_run
//! use driftchat_core::config::ClientConfig;
//! use driftchat_core::context::ChatContext;
//! use driftchat_core::model::{SendPayload, Session, UserProfile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::load(std::path::Path::new("."))?;
//!     let session = Session::new(UserProfile {
//!         id: "u1".to_string(),
//!         full_name: "Ada".to_string(),
//!         email: None,
//!         profile_pic: None,
//!     });
//!
//!     let context = ChatContext::new(session, &config)?;
//!     context.connect().await;
//!
//!     context.select_conversation(Some("u2".to_string())).await;
//!     context.send(SendPayload::text("hello")).await?;
//!
//!     let mut store = context.store().watch();
//!     while store.changed().await.is_ok() {
//!         let snapshot = store.borrow_and_update().clone();
//!         println!("{} messages", snapshot.messages.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod presence;
pub mod store;
pub mod subscription;
pub mod test_support;

pub use channel::{ChannelEvent, ChannelState, ConnectionHealth, ConnectionManager};
pub use context::ChatContext;
pub use error::{ApiError, ChatError, SendError, TransportError};
pub use model::{Message, SendPayload, Session, UserId, UserProfile};
pub use presence::PresenceTracker;
pub use store::{MessageStore, StoreSnapshot};
pub use subscription::ConversationSubscription;
