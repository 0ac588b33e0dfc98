//! Long-running tasks of the pipeline
//!
//! Every component runs as its own tokio task and talks to the others over
//! channels only.
//!
//! ```text
//!  agent                      collector                    portal
//!  -----                      ---------                    ------
//!  SnapshotProducer           ingest socket                SyncBridgeActor
//!        | mpsc(1)                  | unbounded mpsc          | HTTP poll
//!        v                          v                         v
//!  StreamUploader  --- ws --->  UpsertWorker --> Store A <-- read API
//!                               offline sweeper               |
//!                                                        Store B + alerts
//!                                                             |
//!                                                   FanoutRegistry (per user)
//!                                                             | ws
//!                                                         subscribers
//! ```
//!
//! ## Communication patterns
//!
//! 1. **Handoff**: capacity-1 mpsc between producer and uploader; the producer
//!    blocks while the uploader still holds a sample
//! 2. **Commands**: actors with a handle take mpsc commands and answer over
//!    oneshot channels
//! 3. **Rooms**: one broadcast channel per subscribed user, shared by all of
//!    that user's connections

pub mod fanout;
pub mod ingest;
pub mod messages;
pub mod producer;
pub mod sync;
pub mod uploader;
