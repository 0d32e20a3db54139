//! Image Bridge Service
//!
//! Relays raster images between an image-editing host and a generative
//! pipeline host. Neither side needs to know the other's API: the editing
//! host posts base64 PNGs to the bridge receiver, the pipeline picks up the
//! newest one, and pipeline results are forwarded back to the editing host.
//!
//! ## Features
//!
//! - **Lazy Receiver**: HTTP listener started on first use, exactly once per
//!   port, even under concurrent start requests
//! - **Latest Wins**: consumers always get the newest image, or a blank
//!   placeholder before anything has arrived
//! - **Directory Polling**: alternative selection from a watched directory,
//!   with a change fingerprint for cache invalidation
//! - **Batch Forwarding**: per-item results, a failed item never aborts the
//!   batch
//!
//! ## Architecture
//!
//! ```text
//!  Editing host                 Bridge                      Pipeline
//! ┌────────────┐  POST   ┌──────────────┐           ┌──────────────┐
//! │ plugin     │────────▶│ Receiver     │           │              │
//! └────────────┘ /send_  └──────────────┘           │              │
//!       ▲        image          │                   │              │
//!       │                       ▼                   │              │
//!       │                ┌──────────────┐  latest   │              │
//!       │                │ Inbound Store│──────────▶│  Selector    │
//!       │                └──────────────┘           │              │
//!       │                ┌──────────────┐           │              │
//!       └────────────────│ Forwarder    │◀──────────│  results     │
//!   POST /receive_image  └──────────────┘           └──────────────┘
//! ```

pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod forwarder;
pub mod output;
pub mod receiver;
pub mod relay;
pub mod selector;
pub mod store;
pub mod tensor;

pub use codec::ChannelMode;
pub use config::Config;
pub use context::{BridgeContext, ListenerState};
pub use error::{BridgeError, Result};
pub use forwarder::{FailureKind, ForwardOutcome, ForwardResult, Forwarder};
pub use output::{save_batch, SavedImage};
pub use selector::{
    change_fingerprint, select_latest, BridgeFileEntry, DirectorySource, ImageSource,
    SelectionCache, StoreSource,
};
pub use store::{InboundStore, ReceivedImage};
pub use tensor::{ImageTensor, MaskTensor, Selection};
