//! Device-side collection control
//!
//! - `collection_entry`: session ingress (handshake → receiver or uploader)
//! - `receiver`: per-session receive loop feeding the dispatcher
//! - `dispatcher` / `handlers`: message routing and job lifecycle handlers
//! - `task_manager`: registry of jobs by composite key
//! - `job_handler`: per-job state machine driving a collection engine
//! - `engine`: collection engine and device id mapping seams
//! - `uploader`: data channel back to the host
//! - `server`: TCP acceptor handing new sessions to the collection entry

pub mod collection_entry;
pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod handlers;
pub mod job_handler;
pub mod receiver;
pub mod server;
pub mod sim_engine;
pub mod task_manager;
pub mod uploader;

#[cfg(test)]
pub(crate) mod test_support;

pub use collection_entry::{CollectionEntry, CollectionFinisher};
pub use context::DeviceContext;
pub use dispatcher::{MessageHandler, MsgDispatcher};
pub use engine::{CollectEngine, DeviceIdMapper, EngineFactory, IdentityMapper};
pub use job_handler::{check_event_valid, ProfJobHandler};
pub use receiver::Receiver;
pub use server::{accept_session, serve, HANDSHAKE_TIMEOUT};
pub use sim_engine::SimulatedEngineFactory;
pub use task_manager::TaskManager;
pub use uploader::{Uploader, UploaderRegistry};
